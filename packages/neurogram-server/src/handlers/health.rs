use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::{IngestStatus, ServerState};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub ingests_pending: usize,
}

/// Server info response
#[derive(Debug, Serialize, Deserialize)]
pub struct ServerInfoResponse {
    pub version: String,
    pub supported_extensions: Vec<String>,
    pub detection: DetectionInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectionInfo {
    pub window_size: usize,
    pub step_width: usize,
    pub threshold: f64,
    pub model_sample_rate: Option<f64>,
}

/// Health check endpoint
pub async fn health_check(
    State(state): State<Arc<ServerState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let ingests_pending = state
        .ingests
        .read()
        .values()
        .filter(|status| **status == IngestStatus::Pending)
        .count();

    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        ingests_pending,
    };

    (StatusCode::OK, Json(response))
}

/// Server info endpoint
pub async fn server_info(State(state): State<Arc<ServerState>>) -> Json<ServerInfoResponse> {
    let detector = &state.sessions.config().detector;
    Json(ServerInfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        supported_extensions: neurogram_core::RecordingReaderFactory::supported_extensions()
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        detection: DetectionInfo {
            window_size: detector.window_size,
            step_width: detector.step_width,
            threshold: detector.threshold,
            model_sample_rate: state.sessions.config().target_sample_rate,
        },
    })
}
