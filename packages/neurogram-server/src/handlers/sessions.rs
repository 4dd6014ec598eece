use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use neurogram_core::{AppliedMontage, Chunk, CoreError, MontageSpec, SessionInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{resolve_within, run_blocking, sanitize_filename};
use crate::error::{ApiError, ApiResult};
use crate::state::{IngestStatus, ServerState};

/// Request to ingest a file that already lives on the server
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub session_id: Option<String>,
    /// Path relative to the configured server files directory
    pub path: String,
    #[serde(default)]
    pub background: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub session_id: String,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<SessionInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub filename: String,
    pub size: u64,
    pub status: IngestStatus,
}

/// Session metadata plus the state of its last ingestion, if one ran here
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: Option<IngestStatus>,
    pub info: Option<SessionInfo>,
}

/// Either a sample range or an ordinal chunk
#[derive(Debug, Default, Deserialize)]
pub struct ChunkQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub chunk_i: Option<usize>,
    pub chunk_total: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChunkResponse {
    pub session_id: String,
    pub sample_rate: f64,
    #[serde(flatten)]
    pub chunk: Chunk,
}

/// Ingest `path` into `session_id` on the blocking pool, tracking its status
fn spawn_ingest(state: Arc<ServerState>, session_id: String, path: PathBuf) {
    state.set_ingest_status(&session_id, IngestStatus::Pending);

    tokio::spawn(async move {
        let sessions = Arc::clone(&state.sessions);
        let sid = session_id.clone();
        let status = match run_blocking(move || sessions.ingest(&sid, &path)).await {
            Ok(info) => {
                info!(
                    "Session {} ingested: {} channels, {} samples",
                    session_id,
                    info.labels.len(),
                    info.num_samples
                );
                IngestStatus::Ready
            }
            Err(e) => {
                error!("Background ingest of session {} failed: {}", session_id, e);
                IngestStatus::Failed(e.to_string())
            }
        };
        state.set_ingest_status(&session_id, status);
    });
}

/// Ingest a server-side file
pub async fn ingest_session(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<IngestRequest>,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    let server_files_dir = state
        .config
        .server_files_directory
        .as_ref()
        .ok_or_else(|| {
            ApiError::BadRequest("Server-side file access is not configured".to_string())
        })?;
    let path = resolve_within(server_files_dir, &request.path)?;

    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if request.background {
        info!("Queued ingest of {} as session {}", path.display(), session_id);
        spawn_ingest(Arc::clone(&state), session_id.clone(), path);
        return Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                session_id,
                status: IngestStatus::Pending,
                info: None,
            }),
        ));
    }

    state.set_ingest_status(&session_id, IngestStatus::Pending);
    let sessions = Arc::clone(&state.sessions);
    let sid = session_id.clone();
    match run_blocking(move || sessions.ingest(&sid, &path)).await {
        Ok(info) => {
            state.set_ingest_status(&session_id, IngestStatus::Ready);
            Ok((
                StatusCode::OK,
                Json(IngestResponse {
                    session_id,
                    status: IngestStatus::Ready,
                    info: Some(info),
                }),
            ))
        }
        Err(e) => {
            state.set_ingest_status(&session_id, IngestStatus::Failed(e.to_string()));
            Err(e)
        }
    }
}

/// Upload a recording and ingest it in the background
pub async fn upload_session(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let mut session_id: Option<String> = None;
    let mut uploaded: Option<(PathBuf, String, u64)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart data: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "sid" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read sid: {}", e)))?;
                let text = text.trim();
                if !text.is_empty() {
                    session_id = Some(text.to_string());
                }
            }
            "file" => {
                let filename = field
                    .file_name()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "upload.edf".to_string());

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {}", e)))?;

                if data.len() as u64 > state.config.max_upload_size {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "Maximum size: {} bytes",
                        state.config.max_upload_size
                    )));
                }

                tokio::fs::create_dir_all(&state.config.upload_directory).await?;

                let original = std::path::Path::new(&filename);
                let stem = original
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(sanitize_filename)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "upload".to_string());
                let ext = original
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(sanitize_filename)
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "edf".to_string());
                let saved = state
                    .config
                    .upload_directory
                    .join(format!("{}_{}.{}", Uuid::new_v4(), stem, ext));

                tokio::fs::write(&saved, &data).await?;
                info!("File uploaded: {} ({} bytes)", saved.display(), data.len());
                uploaded = Some((saved, filename, data.len() as u64));
            }
            other => {
                warn!("Ignoring unknown upload field '{}'", other);
            }
        }
    }

    let (path, filename, size) =
        uploaded.ok_or_else(|| ApiError::BadRequest("No file provided".to_string()))?;
    let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    spawn_ingest(Arc::clone(&state), session_id.clone(), path);

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            session_id,
            filename,
            size,
            status: IngestStatus::Pending,
        }),
    ))
}

/// Session info; 404 only when nothing is known about the session
pub async fn get_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionResponse>> {
    let status = state.ingest_status(&session_id);

    let sessions = Arc::clone(&state.sessions);
    let sid = session_id.clone();
    let info = match run_blocking(move || sessions.session_info(&sid)).await {
        Ok(info) => Some(info),
        Err(ApiError::Core(CoreError::NotFound(_))) if status.is_some() => None,
        Err(e) => return Err(e),
    };

    let status = status.or_else(|| info.as_ref().map(|_| IngestStatus::Ready));
    Ok(Json(SessionResponse {
        session_id,
        status,
        info,
    }))
}

/// Replace the session's montage
pub async fn set_montage(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Json(spec): Json<MontageSpec>,
) -> ApiResult<Json<AppliedMontage>> {
    let sessions = Arc::clone(&state.sessions);
    let sid = session_id.clone();
    let applied = run_blocking(move || sessions.set_montage(&sid, spec)).await?;

    if !applied.unresolved.is_empty() {
        warn!(
            "Session {}: skipped unresolved montage entries {:?}",
            session_id, applied.unresolved
        );
    }
    Ok(Json(applied))
}

/// A slice of the effective (derived if present, else raw) matrix
pub async fn get_chunk(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Query(query): Query<ChunkQuery>,
) -> ApiResult<Json<ChunkResponse>> {
    let sessions = Arc::clone(&state.sessions);
    let sid = session_id.clone();

    let (chunk, sample_rate) = match query {
        ChunkQuery {
            start: Some(start),
            end: Some(end),
            ..
        } => {
            run_blocking(move || {
                let chunk = sessions.get_chunk(&sid, start, end)?;
                Ok((chunk, sessions.get_sample_rate(&sid)?))
            })
            .await?
        }
        ChunkQuery {
            chunk_i: Some(n),
            chunk_total: Some(total),
            ..
        } => {
            run_blocking(move || {
                let chunk = sessions.get_chunk_ordinal(&sid, n, total)?;
                Ok((chunk, sessions.get_sample_rate(&sid)?))
            })
            .await?
        }
        _ => {
            return Err(ApiError::BadRequest(
                "Expected start and end, or chunk_i and chunk_total".to_string(),
            ))
        }
    };

    Ok(Json(ChunkResponse {
        session_id,
        sample_rate,
        chunk,
    }))
}
