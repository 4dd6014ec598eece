use axum::{
    extract::{Path, Query, State},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use neurogram_core::Event;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{info, warn};

use super::run_blocking;
use crate::error::ApiResult;
use crate::state::ServerState;

#[derive(Debug, Deserialize)]
pub struct DetectQuery {
    /// Write an annotated copy of the recording (default true)
    pub export: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectionResponse {
    pub session_id: String,
    pub events: Vec<Event>,
    pub file_key: Option<String>,
    pub file_name: Option<String>,
}

/// Run event detection over a session and export the annotated recording
pub async fn run_detection(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
    Query(query): Query<DetectQuery>,
) -> ApiResult<Json<DetectionResponse>> {
    let export = query.export.unwrap_or(true);
    let sessions = Arc::clone(&state.sessions);
    let oracle = Arc::clone(&state.oracle);
    let progress = state.progress.clone();
    let sid = session_id.clone();

    let (events, exported) = run_blocking(move || {
        let events =
            sessions.run_detection_with_progress(&sid, oracle.as_ref(), Some(progress))?;
        let exported = if export {
            Some(sessions.export_annotated(&sid, &events)?)
        } else {
            None
        };
        Ok((events, exported))
    })
    .await?;

    info!("Session {}: detected {} events", session_id, events.len());

    let (file_key, file_name) = match exported {
        Some(exported) => (
            Some(exported.file_key),
            exported
                .path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
        ),
        None => (None, None),
    };

    Ok(Json(DetectionResponse {
        session_id,
        events,
        file_key,
        file_name,
    }))
}

/// SSE endpoint for detection progress of every session
pub async fn detection_progress_stream(
    State(state): State<Arc<ServerState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut receiver = state.subscribe_progress();

    let stream = async_stream::stream! {
        loop {
            match receiver.recv().await {
                Ok(progress) => {
                    let data = serde_json::to_string(&progress).unwrap_or_default();
                    yield Ok(SseEvent::default().data(data).event("progress"));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("SSE client lagged, missed {} events", n);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
