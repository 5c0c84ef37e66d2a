use std::path::Path;

use axum::extract::Multipart;
use axum::Extension;
use chrono::Utc;
use hyper::{Body, Response};
use serde_json::json;
use tracing::warn;

use crate::context_gather::gather_context;
use crate::custom_error::ScratchError;
use crate::docstore::RecordId;
use crate::global_context::SharedGlobalContext;
use crate::http::routers::json_response;
use crate::video_jobs::{
    self, build_generation_argv, compose_final_prompt, JobStatus, VideoJobRecord, VideoJobType,
    JOB_TABLE,
};


struct GeneratePost {
    prompt: String,
    job_type: VideoJobType,
    context_ids: Vec<String>,
    image: Option<(String, axum::body::Bytes)>,  // (original filename, data)
}

async fn parse_generate_form(mut multipart: Multipart) -> Result<GeneratePost, ScratchError> {
    let mut prompt: Option<String> = None;
    let mut type_tag = "t2v-A14B".to_string();
    let mut context_ids_raw: Option<String> = None;
    let mut image: Option<(String, axum::body::Bytes)> = None;
    while let Some(field) = multipart.next_field().await
        .map_err(|e| ScratchError::bad_request(format!("multipart problem: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "prompt" => {
                prompt = Some(field.text().await
                    .map_err(|e| ScratchError::bad_request(format!("bad prompt field: {}", e)))?);
            },
            "type" => {
                type_tag = field.text().await
                    .map_err(|e| ScratchError::bad_request(format!("bad type field: {}", e)))?;
            },
            "context_ids" => {
                context_ids_raw = Some(field.text().await
                    .map_err(|e| ScratchError::bad_request(format!("bad context_ids field: {}", e)))?);
            },
            "image" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field.bytes().await
                    .map_err(|e| ScratchError::bad_request(format!("bad image upload: {}", e)))?;
                image = Some((filename, data));
            },
            _ => {},
        }
    }
    let prompt = prompt
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ScratchError::bad_request("prompt is required"))?;
    let job_type = VideoJobType::from_tag(&type_tag).ok_or_else(|| {
        let known: Vec<&str> = VideoJobType::ALL.iter().map(|t| t.as_str()).collect();
        ScratchError::bad_request(format!("Invalid generation type. Must be one of {:?}", known))
    })?;
    // context_ids arrives as a JSON string of a list, bad JSON degrades to no context
    let context_ids = match context_ids_raw {
        Some(raw) if !raw.is_empty() => {
            serde_json::from_str::<Vec<String>>(&raw).unwrap_or_else(|_| {
                warn!("invalid context_ids JSON: {}", raw);
                Vec::new()
            })
        },
        _ => Vec::new(),
    };
    Ok(GeneratePost { prompt, job_type, context_ids, image })
}

pub async fn handle_video_generate(
    Extension(gcx): Extension<SharedGlobalContext>,
    multipart: Multipart,
) -> Result<Response<Body>, ScratchError> {
    let post = parse_generate_form(multipart).await?;
    let (store, models, media_dir) = {
        let gcx_locked = gcx.read().await;
        (gcx_locked.doc_store.clone(), gcx_locked.video_models.clone(), gcx_locked.media_dir.clone())
    };
    tokio::fs::create_dir_all(&media_dir).await
        .map_err(|e| ScratchError::internal(format!("can't create media dir: {}", e)))?;

    let job = RecordId::new(JOB_TABLE, uuid::Uuid::new_v4().to_string());
    let output_path = media_dir.join(format!("{}.mp4", job.key()));

    let image_path = if post.job_type == VideoJobType::ImageToVideo {
        let (filename, data) = post.image
            .ok_or_else(|| ScratchError::bad_request("Image is required for i2v-A14B task"))?;
        let suffix = Path::new(&filename).extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let path = media_dir.join(format!("{}_input{}", job.key(), suffix));
        tokio::fs::write(&path, &data).await
            .map_err(|e| ScratchError::internal(format!("can't save uploaded image: {}", e)))?;
        Some(path)
    } else {
        None
    };

    // context enrichment is best effort, submission goes ahead regardless
    let report = gather_context(store.as_ref(), &post.context_ids).await;
    if !report.skipped.is_empty() {
        warn!("job {} skipped context refs: {:?}", job, report.skipped);
    }
    let final_prompt = compose_final_prompt(&post.prompt, &report.text);
    let argv = build_generation_argv(&models, post.job_type, &final_prompt, &output_path, image_path.as_deref());

    let record = VideoJobRecord {
        id: None,
        job_type: post.job_type,
        prompt: post.prompt,  // the original prompt, better for display
        status: JobStatus::Pending,
        created_at: Utc::now(),
        completed_at: None,
        output_url: None,
        error: None,
        image_path: image_path.map(|p| p.to_string_lossy().into_owned()),
        context_ids: post.context_ids,
    };
    store.create(&job, serde_json::to_value(&record).unwrap()).await
        .map_err(ScratchError::internal)?;

    tokio::spawn(video_jobs::run_generation(store.clone(), job.clone(), argv, output_path));

    json_response(&json!({"job_id": job.key(), "status": "pending"}))
}

pub async fn handle_list_jobs(
    Extension(gcx): Extension<SharedGlobalContext>,
) -> Result<Response<Body>, ScratchError> {
    let store = gcx.read().await.doc_store.clone();
    let jobs = video_jobs::list_jobs(store.as_ref()).await?;
    json_response(&jobs)
}

pub async fn handle_get_job(
    Extension(gcx): Extension<SharedGlobalContext>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> Result<Response<Body>, ScratchError> {
    let store = gcx.read().await.doc_store.clone();
    let job = video_jobs::get_job(store.as_ref(), &job_id).await?;
    json_response(&job)
}
