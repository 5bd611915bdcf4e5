pub mod api;
pub mod app_state;
pub mod config;
pub mod encoder;
pub mod params;
pub mod video_id;

use anyhow::Context;
use axum::Router;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::StatusCode;
use axum::routing::{get, post};
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{ApiError, ErrorResponse, GenerateVideoResponse, generate_video, health};
pub use app_state::{AppState, UPLOADS_ROUTE};
pub use config::Config;
pub use encoder::{EncodeError, Encoder, LoopJob};
pub use params::GenerationRequest;
pub use video_id::VideoIdGenerator;

/// Room for the text fields and part headers on top of the image itself
const FORM_OVERHEAD: u64 = 64 * 1024;

pub fn router(state: AppState, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let uploads = ServeDir::new(state.uploads_dir()).append_index_html_on_directories(false);
    let body_limit = config.max_upload_size.saturating_add(FORM_OVERHEAD);

    Router::new()
        .route("/generate-video", post(generate_video))
        .route("/health", get(health))
        .nest_service(UPLOADS_ROUTE, uploads)
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let state = AppState::new(&config)
        .await
        .context("Failed to initialize workspace")?;
    let app = router(state, &config);

    let addr = format!("0.0.0.0:{}", config.listen_on_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Server running on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    } else {
        // no signal handler available, run until killed
        std::future::pending::<()>().await;
    }
}
