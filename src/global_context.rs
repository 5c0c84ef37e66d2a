use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use structopt::StructOpt;
use tokio::sync::RwLock as ARwLock;
use tracing::info;

use crate::agent_runtime::{AgentRuntime, GraphGatewayClient};
use crate::docstore::{DocStore, SurrealDocStore};
use crate::video_jobs::VideoModelTable;


#[derive(Debug, StructOpt, Clone)]
pub struct CommandLine {
    #[structopt(long, help="Send logs to stderr, as opposed to the media-adjacent logs directory, so it's easier to debug.")]
    pub logs_stderr: bool,
    #[structopt(long, default_value="", help="Write logs to this file instead of the logs directory.")]
    pub logs_to_file: String,
    #[structopt(long, help="Log DEBUG level as well.")]
    pub verbose: bool,
    #[structopt(long, short="p", default_value="5055", help="Bind 127.0.0.1:<port> to listen for HTTP requests, such as /chat/sessions, /chat/execute, /video/generate.")]
    pub http_port: u16,
    #[structopt(long, default_value="http://127.0.0.1:8000", help="Document database HTTP endpoint.")]
    pub database_url: String,
    #[structopt(long, default_value="open_notebook", help="Database namespace.")]
    pub database_ns: String,
    #[structopt(long, default_value="open_notebook", help="Database name within the namespace.")]
    pub database_db: String,
    #[structopt(long, default_value="root", help="Database user.")]
    pub database_user: String,
    #[structopt(long, default_value="root", help="Database password, DATABASE_PASSWORD env takes precedence.")]
    pub database_password: String,
    #[structopt(long, default_value="http://127.0.0.1:8123", help="Agent graph runtime endpoint, used for thread state reads and token streaming.")]
    pub agent_url: String,
    #[structopt(long, default_value="media", help="Directory for uploaded images and generated videos, served under /media by the frontend proxy.")]
    pub media_dir: String,
    #[structopt(long, default_value="Wan2.2", help="Root of the video generator checkout, <root>/generate.py gets executed.")]
    pub wan_root: String,
}

pub struct GlobalContext {
    pub cmdline: CommandLine,
    pub http_client: reqwest::Client,
    pub doc_store: Arc<dyn DocStore>,
    pub agent_runtime: Arc<dyn AgentRuntime>,
    pub video_models: Arc<VideoModelTable>,
    pub media_dir: PathBuf,
    pub ask_shutdown_sender: Arc<Mutex<std::sync::mpsc::Sender<String>>>,
    pub shutdown_flag: Arc<AtomicBool>,
}

pub type SharedGlobalContext = Arc<ARwLock<GlobalContext>>;

pub async fn create_global_context(
) -> (SharedGlobalContext, std::sync::mpsc::Receiver<String>, Arc<AtomicBool>, CommandLine) {
    let cmdline = CommandLine::from_args();
    let (ask_shutdown_sender, ask_shutdown_receiver) = std::sync::mpsc::channel::<String>();
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let http_client = reqwest::Client::new();
    let database_password = std::env::var("DATABASE_PASSWORD")
        .unwrap_or_else(|_| cmdline.database_password.clone());
    let doc_store: Arc<dyn DocStore> = Arc::new(SurrealDocStore::new(
        http_client.clone(),
        cmdline.database_url.clone(),
        cmdline.database_ns.clone(),
        cmdline.database_db.clone(),
        cmdline.database_user.clone(),
        database_password,
    ));
    let agent_runtime: Arc<dyn AgentRuntime> = Arc::new(GraphGatewayClient::new(
        http_client.clone(),
        cmdline.agent_url.clone(),
    ));
    let video_models = Arc::new(VideoModelTable::from_env(std::path::Path::new(&cmdline.wan_root)));
    let media_dir = PathBuf::from(&cmdline.media_dir);

    let cx = GlobalContext {
        cmdline: cmdline.clone(),
        http_client,
        doc_store,
        agent_runtime,
        video_models,
        media_dir,
        ask_shutdown_sender: Arc::new(Mutex::new(ask_shutdown_sender)),
        shutdown_flag: shutdown_flag.clone(),
    };
    (Arc::new(ARwLock::new(cx)), ask_shutdown_receiver, shutdown_flag, cmdline)
}

pub async fn block_until_signal(
    ask_shutdown_receiver: std::sync::mpsc::Receiver<String>,
    shutdown_flag: Arc<AtomicBool>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        info!("SIGINT signal received");
    };
    let shutdown_request = tokio::task::spawn_blocking(move || {
        let _ = ask_shutdown_receiver.recv();
        info!("graceful shutdown requested");
    });
    tokio::select! {
        _ = ctrl_c => {},
        _ = shutdown_request => {},
    }
    shutdown_flag.store(true, Ordering::SeqCst);
}
