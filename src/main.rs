use std::io::Write;

use tracing::{info, Level};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

// mods roughly sorted by dependency ↓

mod custom_error;
mod nicer_logs;
mod global_context;

mod docstore;
mod agent_runtime;
mod call_validation;

mod context_gather;
mod chat_sessions;
mod video_jobs;

mod http;

#[cfg(test)]
mod test_support;

#[tokio::main]
async fn main() {
    let (gcx, ask_shutdown_receiver, shutdown_flag, cmdline) = global_context::create_global_context().await;
    let mut writer_is_stderr = false;
    let (logs_writer, _guard) = if cmdline.logs_stderr {
        writer_is_stderr = true;
        tracing_appender::non_blocking(std::io::stderr())
    } else if !cmdline.logs_to_file.is_empty() {
        tracing_appender::non_blocking(tracing_appender::rolling::RollingFileAppender::new(
            tracing_appender::rolling::Rotation::NEVER,
            std::path::Path::new(&cmdline.logs_to_file).parent().unwrap(),
            std::path::Path::new(&cmdline.logs_to_file).file_name().unwrap()
        ))
    } else {
        let logs_dir = std::path::Path::new("logs");
        let _ = write!(std::io::stderr(), "This binary keeps logs as files, rotated daily. Try\ntail -f {}/\nor use --logs-stderr for debugging. Any errors will duplicate here in stderr.\n\n", logs_dir.display());
        tracing_appender::non_blocking(tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::DAILY)
            .filename_prefix("notebook-server")
            .max_log_files(30)
            .build(logs_dir).unwrap()
        )
    };
    let my_layer = nicer_logs::CustomLayer::new(
        logs_writer.clone(),
        writer_is_stderr,
        if cmdline.verbose { Level::DEBUG } else { Level::INFO },
        Level::ERROR,
        true,
    );
    tracing_subscriber::registry()
        .with(my_layer)
        .init();

    info!("database at {}", cmdline.database_url);
    info!("agent runtime at {}", cmdline.agent_url);
    info!("media dir {}", cmdline.media_dir);

    let main_handle = http::start_server(gcx.clone(), ask_shutdown_receiver, shutdown_flag).await;
    if let Some(handle) = main_handle {
        let _ = handle.await;
    }
    info!("bye");
}
