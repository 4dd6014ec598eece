pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod oracle;
pub mod state;


pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use oracle::LineLengthOracle;
pub use state::{IngestStatus, ServerState};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

use handlers::{
    detection_progress_stream, download_file, generate_key, get_chunk, get_session,
    health_check, ingest_session, resolve_key, run_detection, server_info, set_montage,
    upload_session,
};

/// Limit for JSON request bodies
const MAX_API_BODY_SIZE: usize = 1024 * 1024;

/// Build the application router. Tracing and CORS layers are added by the binary.
pub fn create_router(state: Arc<ServerState>) -> Router {
    let max_upload_size = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);

    let upload_routes = Router::new()
        .route("/api/sessions/upload", post(upload_session))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_size));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/api/sessions", post(ingest_session))
        .route("/api/sessions/progress", get(detection_progress_stream))
        .route("/api/sessions/{id}", get(get_session))
        .route("/api/sessions/{id}/montage", put(set_montage))
        .route("/api/sessions/{id}/chunk", get(get_chunk))
        .route("/api/sessions/{id}/detect", post(run_detection))
        .route("/api/keys", post(generate_key))
        .route("/api/keys/{token}", get(resolve_key))
        .route("/api/files/{token}", get(download_file))
        .layer(RequestBodyLimitLayer::new(MAX_API_BODY_SIZE));

    Router::new()
        .merge(upload_routes)
        .merge(api_routes)
        .with_state(state)
}
