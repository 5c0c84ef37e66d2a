use std::io::Write;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{http::{StatusCode, Uri}, response::IntoResponse, Extension};
use hyper::Server;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::global_context::SharedGlobalContext;
use crate::http::routers::make_server_router;

pub mod routers;

async fn handler_404(path: Uri) -> impl IntoResponse {
    info!("404 {}", path);
    (StatusCode::NOT_FOUND, format!("no handler for {}", path))
}

pub async fn start_server(
    gcx: SharedGlobalContext,
    ask_shutdown_receiver: std::sync::mpsc::Receiver<String>,
    shutdown_flag: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    let port = gcx.read().await.cmdline.http_port;
    if port == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let addr = ([127, 0, 0, 1], port).into();
        let builder = Server::try_bind(&addr).map_err(|e| {
            let _ = write!(std::io::stderr(), "PORT_BUSY {}\n", e);
            format!("port busy, address {}: {}", addr, e)
        });
        match builder {
            Ok(builder) => {
                info!("HTTP server listening on {}", addr);
                let router = make_server_router()
                    .fallback(handler_404)
                    .layer(Extension(gcx.clone()));
                let server = builder
                    .serve(router.into_make_service())
                    .with_graceful_shutdown(crate::global_context::block_until_signal(ask_shutdown_receiver, shutdown_flag));
                if let Err(e) = server.await {
                    error!("HTTP server error: {}", e);
                } else {
                    info!("clean shutdown");
                }
            },
            Err(e) => {
                error!("server error: {}", e);
            },
        }
    }))
}
