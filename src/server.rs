use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    actions::{Command, CommandReply, Reason},
    bridge::{Bridge, BridgeHandle},
    config::Config,
    error::Error,
    serial::{Opener, SerialOpener},
    websocket,
};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 8080;

/// The routes of the server, backed by the given bridge.
pub fn app(handle: BridgeHandle, config: Config) -> Router {
    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/send", post(send_command))
        .route("/api/devices", get(list_devices))
        .route("/api/status", get(show_status))
        .route("/logs/:filename", get(download_log))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Each websocket needs to be able to reach the bridge
                .layer(Extension(handle))
                // The config should be known to the web server
                .layer(Extension(config)),
        )
}

async fn run(
    config: Config,
    opener: Arc<dyn Opener>,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    // Bound before any device is opened, so a taken port leaves nothing behind.
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let builder = axum::Server::try_bind(&addr)
        .map_err(|e| Error::InternalIssue(format!("Could not bind to {addr}: {e}")))?;

    let bridge = Bridge::start(&config, opener, shutdown.child_token())?;

    let app = app(bridge.handle(), config);

    let server = builder.serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    let result = server
        .with_graceful_shutdown(shutdown.cancelled())
        .await
        .map_err(|e| Error::InternalIssue(format!("Server error: {e}")));

    bridge.shutdown().await;

    result
}

/// Start the server on an arbitrary available port, with devices opened by `opener`.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: Config,
    opener: Arc<dyn Opener>,
    allocated_port: oneshot::Sender<u16>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    run(config, opener, None, Some(allocated_port), shutdown).await
}

/// Start the server on the given port, with real serial ports.
/// Runs until `shutdown` is cancelled.
pub async fn run_on_port(
    config: Config,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    run(config, Arc::new(SerialOpener), Some(port), None, shutdown).await
}

fn status_code(reason: Reason) -> StatusCode {
    match reason {
        Reason::UnknownDevice => StatusCode::NOT_FOUND,
        Reason::MissingCommand | Reason::BadRequest => StatusCode::BAD_REQUEST,
        Reason::DeviceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        Reason::WriteFailed | Reason::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn send_command(Extension(handle): Extension<BridgeHandle>, body: String) -> Response {
    let reply = match serde_json::from_str::<Command>(&body) {
        Ok(command) => CommandReply::from(handle.route(command).await),
        Err(e) => CommandReply::from(Error::BadJson {
            request: body,
            problem: e.to_string(),
        }),
    };

    let status = reply.reason().map(status_code).unwrap_or(StatusCode::OK);
    debug!(%status, %reply, "Command over HTTP");

    (status, Json(reply)).into_response()
}

async fn list_devices(Extension(handle): Extension<BridgeHandle>) -> impl IntoResponse {
    Json(handle.devices().names())
}

async fn show_status(Extension(handle): Extension<BridgeHandle>) -> impl IntoResponse {
    Json(handle.devices().statuses())
}

/// A log file name may only point into the log directory.
fn servable(filename: &str) -> bool {
    !filename.is_empty() && !filename.starts_with('.') && !filename.contains(['/', '\\'])
}

async fn download_log(
    Extension(handle): Extension<BridgeHandle>,
    Path(filename): Path<String>,
) -> Response {
    if !servable(&filename) {
        warn!(%filename, "Refusing log download");
        return (
            StatusCode::BAD_REQUEST,
            Error::NoSuchLog(filename).to_string(),
        )
            .into_response();
    }

    let path = handle.log_dir().join(&filename);

    match tokio::fs::read(&path).await {
        Ok(content) => (
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_owned()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{filename}\""),
                ),
            ],
            content,
        )
            .into_response(),
        Err(e) => {
            debug!(?path, %e, "Log not readable");
            (StatusCode::NOT_FOUND, Error::NoSuchLog(filename).to_string()).into_response()
        }
    }
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config.serialize_pretty()
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Hub v{}\n", env!("CARGO_PKG_VERSION"))
}
