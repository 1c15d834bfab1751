//! plaindav server binary.
//!
//! Serves a local directory over WebDAV. Requests pass through header
//! decoration and Basic authentication before being dispatched per verb
//! onto the storage root.

mod app;
mod atomic;
mod auth;
mod config;
mod dav;
mod error;
mod etag;
mod http;
mod lock;
mod logging;
mod props;
mod storage;
mod transfer;

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::auth::{SharedCredentials, StaticCredentials};
use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::http::resolve_client_ip;
use crate::storage::Storage;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let root = PathBuf::from(&args.storage_dir);
    tokio::fs::create_dir_all(&root).await?;
    let root = tokio::fs::canonicalize(&root).await?;
    let storage = Arc::new(Storage::new(root));
    let credentials: SharedCredentials =
        Arc::new(StaticCredentials::new(args.auth_user, args.auth_pass));

    let app = app::build_router(storage.clone(), credentials).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let connect_ip = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip());
                let client_ip = resolve_client_ip(request.headers(), connect_ip)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip,
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Starting WebDAV server at http://{}", addr);
    info!("Serving {}", storage.root_path().display());

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
