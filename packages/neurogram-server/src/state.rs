use neurogram_core::{CoreError, DetectionProgress, Oracle, SessionService};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::oracle::LineLengthOracle;

const PROGRESS_CAPACITY: usize = 1000;

/// Where a background ingestion stands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum IngestStatus {
    Pending,
    Ready,
    Failed(String),
}

/// Main server state shared across all handlers
pub struct ServerState {
    pub config: ServerConfig,
    pub sessions: Arc<SessionService>,
    pub oracle: Arc<dyn Oracle + Send>,
    pub progress: broadcast::Sender<DetectionProgress>,
    pub ingests: RwLock<HashMap<String, IngestStatus>>,
    pub start_time: Instant,
}

impl ServerState {
    /// State with the built-in heuristic oracle
    pub fn new(config: ServerConfig) -> Result<Self, CoreError> {
        Self::with_oracle(config, Arc::new(LineLengthOracle::default()))
    }

    pub fn with_oracle(config: ServerConfig, oracle: Arc<dyn Oracle + Send>) -> Result<Self, CoreError> {
        let sessions = Arc::new(SessionService::new(config.session_config())?);
        let (progress, _) = broadcast::channel(PROGRESS_CAPACITY);

        Ok(Self {
            config,
            sessions,
            oracle,
            progress,
            ingests: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        })
    }

    /// Subscribe to detection progress of every session
    pub fn subscribe_progress(&self) -> broadcast::Receiver<DetectionProgress> {
        self.progress.subscribe()
    }

    pub fn set_ingest_status(&self, session_id: &str, status: IngestStatus) {
        self.ingests.write().insert(session_id.to_string(), status);
    }

    pub fn ingest_status(&self, session_id: &str) -> Option<IngestStatus> {
        self.ingests.read().get(session_id).cloned()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
