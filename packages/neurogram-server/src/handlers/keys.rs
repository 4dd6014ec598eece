use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{is_within_any, run_blocking};
use crate::error::{ApiError, ApiResult};
use crate::state::ServerState;

#[derive(Debug, Deserialize)]
pub struct GenerateKeyRequest {
    pub path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyResponse {
    pub token: String,
    pub path: String,
}

/// Directories the server is willing to hand out keys for
fn allowed_roots(state: &ServerState) -> Vec<&std::path::Path> {
    let config = &state.config;
    let mut roots = vec![
        config.cache_directory.as_path(),
        config.upload_directory.as_path(),
    ];
    roots.extend(config.output_directory.as_deref());
    roots.extend(config.server_files_directory.as_deref());
    roots
}

/// Register a path and return its token
pub async fn generate_key(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<GenerateKeyRequest>,
) -> ApiResult<(StatusCode, Json<KeyResponse>)> {
    let path = PathBuf::from(&request.path);
    if !is_within_any(&path, &allowed_roots(&state)) {
        warn!("Rejected key request for {}", request.path);
        return Err(ApiError::Forbidden(
            "Path is outside the server's data directories".to_string(),
        ));
    }

    let sessions = Arc::clone(&state.sessions);
    let key_path = path.clone();
    let token = run_blocking(move || sessions.generate_key(&key_path)).await?;
    info!("Generated key for {}", path.display());

    Ok((
        StatusCode::CREATED,
        Json(KeyResponse {
            token,
            path: request.path,
        }),
    ))
}

/// Resolve a token to its path
pub async fn resolve_key(
    State(state): State<Arc<ServerState>>,
    Path(token): Path<String>,
) -> ApiResult<Json<KeyResponse>> {
    let sessions = Arc::clone(&state.sessions);
    let lookup = token.clone();
    let path = run_blocking(move || sessions.resolve(&lookup)).await?;

    Ok(Json(KeyResponse {
        token,
        path: path.to_string_lossy().to_string(),
    }))
}

/// Download the file behind a token
pub async fn download_file(
    State(state): State<Arc<ServerState>>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let sessions = Arc::clone(&state.sessions);
    let path = run_blocking(move || sessions.resolve(&token)).await?;

    let data = tokio::fs::read(&path).await.map_err(|e| {
        warn!("Failed to read {}: {}", path.display(), e);
        neurogram_core::CoreError::NotFound(format!("File for key is gone: {}", e))
    })?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "download".to_string());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        data,
    ))
}
