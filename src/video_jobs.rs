use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{error, info};

use crate::custom_error::{MapErrToString, ScratchError};
use crate::docstore::{DocStore, RecordId};
use crate::nicer_logs::clip_chars;

pub const JOB_TABLE: &str = "video_job";

/// Hard cap on the context rendition prepended to the user prompt.
pub const CONTEXT_PROMPT_CAP: usize = 2000;
/// Hard cap on captured error text persisted into a job record.
pub const ERROR_TEXT_CAP: usize = 500;


#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoJobType {
    #[serde(rename = "t2v-A14B")]
    TextToVideo,
    #[serde(rename = "i2v-A14B")]
    ImageToVideo,
    #[serde(rename = "ti2v-5B")]
    TextImageToVideo,
}

impl VideoJobType {
    pub const ALL: [VideoJobType; 3] = [
        VideoJobType::TextToVideo,
        VideoJobType::ImageToVideo,
        VideoJobType::TextImageToVideo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoJobType::TextToVideo => "t2v-A14B",
            VideoJobType::ImageToVideo => "i2v-A14B",
            VideoJobType::TextImageToVideo => "ti2v-5B",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().find(|t| t.as_str() == tag).copied()
    }
}

impl fmt::Display for VideoJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// pending → processing → {completed, failed}, nothing else.
    pub fn can_advance_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJobRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub job_type: VideoJobType,
    pub prompt: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub context_ids: Vec<String>,
}


/// Checkpoint path per job type, resolved once at startup. Env vars override
/// the default locations under the generator root.
#[derive(Debug, Clone)]
pub struct VideoModelTable {
    wan_root: PathBuf,
    checkpoints: HashMap<VideoJobType, PathBuf>,
}

impl VideoModelTable {
    pub fn from_env(wan_root: &Path) -> Self {
        let defaults = [
            (VideoJobType::TextToVideo, "WAN_CKPT_T2V_A14B", "Wan2.1-T2V-14B"),
            (VideoJobType::ImageToVideo, "WAN_CKPT_I2V_A14B", "Wan2.1-I2V-14B"),
            (VideoJobType::TextImageToVideo, "WAN_CKPT_TI2V_5B", "Wan2.1-TI2V-5B"),
        ];
        let checkpoints = defaults.iter().map(|(job_type, env_var, default_dir)| {
            let path = std::env::var(env_var)
                .map(PathBuf::from)
                .unwrap_or_else(|_| wan_root.join(default_dir));
            (*job_type, path)
        }).collect();
        VideoModelTable {
            wan_root: wan_root.to_path_buf(),
            checkpoints,
        }
    }

    pub fn checkpoint(&self, job_type: VideoJobType) -> &Path {
        &self.checkpoints[&job_type]
    }

    pub fn generate_script(&self) -> PathBuf {
        self.wan_root.join("generate.py")
    }
}

pub fn compose_final_prompt(prompt: &str, context_text: &str) -> String {
    if context_text.is_empty() {
        prompt.to_string()
    } else {
        format!("Context: {}\n\nTask: {}", clip_chars(context_text, CONTEXT_PROMPT_CAP), prompt)
    }
}

/// Argument vector for the external generator. No shell is involved, so the
/// prompt goes through verbatim with no escaping.
pub fn build_generation_argv(
    models: &VideoModelTable,
    job_type: VideoJobType,
    final_prompt: &str,
    output_path: &Path,
    image_path: Option<&Path>,
) -> Vec<String> {
    let mut argv = vec![
        "python".to_string(),
        models.generate_script().to_string_lossy().into_owned(),
        "--task".to_string(), job_type.as_str().to_string(),
        "--ckpt_dir".to_string(), models.checkpoint(job_type).to_string_lossy().into_owned(),
        "--prompt".to_string(), final_prompt.to_string(),
        "--save_file".to_string(), output_path.to_string_lossy().into_owned(),
        "--offload_model".to_string(), "True".to_string(),
    ];
    if let Some(image) = image_path {
        argv.push("--image".to_string());
        argv.push(image.to_string_lossy().into_owned());
    }
    argv
}

/// Single chokepoint for job status writes: reads the current record and
/// refuses non-monotonic transitions.
pub async fn advance_status(
    store: &dyn DocStore,
    job: &RecordId,
    next: JobStatus,
    mut extra: Value,
) -> Result<(), String> {
    let row = store.get(job).await?
        .ok_or_else(|| format!("job {} not found", job))?;
    let current: JobStatus = serde_json::from_value(row.get("status").cloned().unwrap_or(Value::Null))
        .map_err_with_prefix(format!("job {} has malformed status:", job))?;
    if !current.can_advance_to(next) {
        return Err(format!("job {} refusing status transition {:?} -> {:?}", job, current, next));
    }
    let patch = extra.as_object_mut()
        .ok_or_else(|| "status patch must be an object".to_string())?;
    patch.insert("status".to_string(), serde_json::to_value(next).unwrap());
    store.update_merge(job, extra).await?;
    Ok(())
}

/// Background task: owns the job record from processing onward. Never
/// returns an error to anyone; every failure path lands in the record.
pub async fn run_generation(
    store: Arc<dyn DocStore>,
    job: RecordId,
    argv: Vec<String>,
    output_path: PathBuf,
) {
    info!("starting video generation for job {}", job);
    if let Err(e) = run_generation_inner(store.as_ref(), &job, &argv, &output_path).await {
        error!("exception in background task for job {}: {}", job, e);
        let patch = json!({"error": clip_chars(&e, ERROR_TEXT_CAP)});
        if let Err(e2) = advance_status(store.as_ref(), &job, JobStatus::Failed, patch).await {
            error!("job {} could not be marked failed: {}", job, e2);
        }
    }
}

async fn run_generation_inner(
    store: &dyn DocStore,
    job: &RecordId,
    argv: &[String],
    output_path: &Path,
) -> Result<(), String> {
    advance_status(store, job, JobStatus::Processing, json!({})).await?;
    info!("executing {:?}", argv);
    let (program, args) = argv.split_first()
        .ok_or_else(|| "empty generation command".to_string())?;
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output().await
        .map_err_with_prefix("can't launch generation process:")?;
    if output.status.success() {
        // a zero exit code is not proof the file was written
        if tokio::fs::metadata(output_path).await.is_ok() {
            let web_path = format!("/media/{}", output_path.file_name().unwrap_or_default().to_string_lossy());
            advance_status(store, job, JobStatus::Completed, json!({
                "output_url": web_path,
                "completed_at": Utc::now(),
            })).await?;
            info!("job {} completed successfully", job);
        } else {
            error!("job {} output file not found at {}", job, output_path.display());
            advance_status(store, job, JobStatus::Failed, json!({
                "error": "Output file generation failed",
            })).await?;
        }
    } else {
        let stderr_text = String::from_utf8_lossy(&output.stderr);
        error!("job {} failed with error: {}", job, stderr_text);
        advance_status(store, job, JobStatus::Failed, json!({
            "error": format!("Generation process failed: {}", clip_chars(&stderr_text, ERROR_TEXT_CAP)),
        })).await?;
    }
    Ok(())
}


pub async fn list_jobs(store: &dyn DocStore) -> Result<Vec<Value>, ScratchError> {
    store.query(&format!("SELECT * FROM {} ORDER BY created_at DESC", JOB_TABLE)).await
        .map_err(ScratchError::internal)
}

pub async fn get_job(store: &dyn DocStore, job_id: &str) -> Result<Value, ScratchError> {
    let job = RecordId::normalize(JOB_TABLE, job_id);
    store.get(&job).await
        .map_err(ScratchError::internal)?
        .ok_or_else(|| ScratchError::not_found("Job not found"))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockDocStore;

    fn pending_job(store: &MockDocStore, key: &str) -> RecordId {
        let job = RecordId::new(JOB_TABLE, key);
        store.put(&job.to_string(), json!({
            "id": job.to_string(),
            "type": "t2v-A14B",
            "prompt": "a cat",
            "status": "pending",
            "created_at": "2026-02-01T00:00:00Z",
            "context_ids": [],
        }));
        job
    }

    fn job_status(store: &MockDocStore, job: &RecordId) -> String {
        store.peek(&job.to_string()).unwrap()["status"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Pending.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Completed));
        assert!(Processing.can_advance_to(Failed));
        assert!(!Pending.can_advance_to(Completed));
        assert!(!Pending.can_advance_to(Failed));
        assert!(!Completed.can_advance_to(Pending));
        assert!(!Failed.can_advance_to(Processing));
        assert!(!Completed.can_advance_to(Failed));
    }

    #[test]
    fn test_compose_final_prompt_caps_context() {
        assert_eq!(compose_final_prompt("a cat", ""), "a cat");
        let long_context = "x".repeat(5000);
        let composed = compose_final_prompt("a cat", &long_context);
        assert!(composed.starts_with("Context: "));
        assert!(composed.ends_with("\n\nTask: a cat"));
        assert!(composed.len() < 2100);
    }

    #[test]
    fn test_argv_carries_prompt_verbatim() {
        let models = VideoModelTable::from_env(Path::new("Wan2.2"));
        let prompt = "it's a \"test\"; rm -rf /";
        let argv = build_generation_argv(&models, VideoJobType::TextToVideo, prompt, Path::new("media/out.mp4"), None);
        assert!(argv.contains(&prompt.to_string()));
        assert_eq!(argv[2], "--task");
        assert_eq!(argv[3], "t2v-A14B");
        assert!(!argv.contains(&"--image".to_string()));
        let argv_i2v = build_generation_argv(&models, VideoJobType::ImageToVideo, prompt, Path::new("media/out.mp4"), Some(Path::new("media/in.png")));
        assert_eq!(argv_i2v.last().unwrap(), "media/in.png");
    }

    #[tokio::test]
    async fn test_advance_status_refuses_regressions() {
        let store = MockDocStore::new();
        let job = pending_job(&store, "j1");
        advance_status(&store, &job, JobStatus::Processing, json!({})).await.unwrap();
        advance_status(&store, &job, JobStatus::Completed, json!({})).await.unwrap();
        let err = advance_status(&store, &job, JobStatus::Processing, json!({})).await.unwrap_err();
        assert!(err.contains("refusing status transition"));
        assert_eq!(job_status(&store, &job), "completed");
    }

    #[tokio::test]
    async fn test_nonzero_exit_marks_failed_with_truncated_stderr() {
        let store = Arc::new(MockDocStore::new());
        let job = pending_job(&store, "j2");
        let argv = vec![
            "sh".to_string(), "-c".to_string(),
            format!("echo {} 1>&2; exit 3", "e".repeat(2000)),
        ];
        run_generation(store.clone(), job.clone(), argv, PathBuf::from("/nonexistent/out.mp4")).await;
        let row = store.peek(&job.to_string()).unwrap();
        assert_eq!(row["status"], "failed");
        let error_text = row["error"].as_str().unwrap();
        assert!(error_text.starts_with("Generation process failed: "));
        assert!(error_text.len() <= ERROR_TEXT_CAP + 30);
        // went through processing on the way down
        let history = store.status_history(&job.to_string());
        assert_eq!(history, vec!["processing", "failed"]);
    }

    #[tokio::test]
    async fn test_zero_exit_without_output_file_is_failed() {
        let store = Arc::new(MockDocStore::new());
        let job = pending_job(&store, "j3");
        let argv = vec!["true".to_string()];
        run_generation(store.clone(), job.clone(), argv, PathBuf::from("/nonexistent/out.mp4")).await;
        let row = store.peek(&job.to_string()).unwrap();
        assert_eq!(row["status"], "failed");
        assert_eq!(row["error"], "Output file generation failed");
    }

    #[tokio::test]
    async fn test_success_requires_existing_output() {
        let tmp = tempfile::tempdir().unwrap();
        let output_path = tmp.path().join("j4.mp4");
        let store = Arc::new(MockDocStore::new());
        let job = pending_job(&store, "j4");
        let argv = vec![
            "sh".to_string(), "-c".to_string(),
            format!("touch {}", output_path.display()),
        ];
        run_generation(store.clone(), job.clone(), argv, output_path).await;
        let row = store.peek(&job.to_string()).unwrap();
        assert_eq!(row["status"], "completed");
        assert_eq!(row["output_url"], "/media/j4.mp4");
        assert!(row.get("completed_at").is_some());
    }

    #[tokio::test]
    async fn test_unlaunchable_command_marks_failed() {
        let store = Arc::new(MockDocStore::new());
        let job = pending_job(&store, "j5");
        let argv = vec!["/no/such/binary-xyz".to_string()];
        run_generation(store.clone(), job.clone(), argv, PathBuf::from("/nonexistent/out.mp4")).await;
        let row = store.peek(&job.to_string()).unwrap();
        assert_eq!(row["status"], "failed");
        assert!(row["error"].as_str().unwrap().contains("can't launch"));
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first() {
        let store = MockDocStore::new();
        store.put("video_job:old", json!({"id": "video_job:old", "type": "t2v-A14B", "prompt": "x", "status": "pending", "created_at": "2026-01-01T00:00:00Z"}));
        store.put("video_job:new", json!({"id": "video_job:new", "type": "t2v-A14B", "prompt": "y", "status": "pending", "created_at": "2026-03-01T00:00:00Z"}));
        let jobs = list_jobs(&store).await.unwrap();
        assert_eq!(jobs[0]["id"], "video_job:new");
        assert_eq!(jobs[1]["id"], "video_job:old");
    }

    #[tokio::test]
    async fn test_get_job_normalizes_id() {
        let store = MockDocStore::new();
        pending_job(&store, "j6");
        assert!(get_job(&store, "j6").await.is_ok());
        assert!(get_job(&store, "video_job:j6").await.is_ok());
        let err = get_job(&store, "ghost").await.unwrap_err();
        assert_eq!(err.status_code, hyper::StatusCode::NOT_FOUND);
    }
}
