use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream;
use rust_embed::Embed;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::pipeline::{DetectionStatus, FrameReceiver};

#[derive(Embed)]
#[folder = "src/assets/"]
struct Assets;

#[derive(Clone)]
pub struct AppState {
    pub frames: FrameReceiver,
    pub status: watch::Receiver<DetectionStatus>,
}

impl AppState {
    pub fn new(frames: FrameReceiver, status: watch::Receiver<DetectionStatus>) -> Self {
        Self { frames, status }
    }
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/assets/{*path}", get(static_handler))
        .route("/api/status", get(status_handler))
        .route("/stream", get(stream_handler))
        .layer(TraceLayer::new_for_http())
        // External dashboards poll the status and embed the stream.
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}

async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = *state.status.borrow();
    axum::Json(status)
}

/// Unbounded multipart JPEG sequence. Each connected client sees every
/// annotated frame published after it connected, until it disconnects.
async fn stream_handler(State(state): State<AppState>) -> Response {
    let rx = state.frames.clone();

    let body = Body::from_stream(stream::unfold(rx, |mut rx| async move {
        loop {
            if rx.changed().await.is_err() {
                // Detection loop gone; end the stream.
                return None;
            }
            let frame = rx.borrow_and_update().clone();
            let Some(jpeg) = frame else { continue };
            return Some((Ok::<_, Infallible>(Bytes::from(multipart_chunk(&jpeg))), rx));
        }
    }));

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        body,
    )
        .into_response()
}

fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(jpeg.len() + 64);
    chunk.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}
