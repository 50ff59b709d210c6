//! Recording management
//!
//! Starts a room recording job once the session has live audio, supervises
//! it with a fixed-deadline watchdog, and guarantees a stop attempt on
//! session close. Recording loss must never fail the call: every error on
//! this path is logged and absorbed.

use crate::application::shutdown::ShutdownBarrier;
use crate::domain::handoff::ConversationContext;
use crate::domain::session::usage::UsageSummary;
use crate::domain::shared::value_objects::{EgressId, RoomName};
use crate::infrastructure::storage::{self, StoragePort};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Failed to start egress for {room}: {reason}")]
    StartFailed { room: String, reason: String },

    #[error("Failed to stop egress {egress_id}: {reason}")]
    StopFailed { egress_id: String, reason: String },
}

/// Where the recording provider should upload the captured media
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingDestination {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Full object key for the media file
    pub key: String,
}

/// Recording provider control surface
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EgressPort: Send + Sync {
    /// Start a room-composite recording; resolves with the provider job id
    async fn start_room_recording(
        &self,
        room: &RoomName,
        layout: &str,
        audio_only: bool,
        destination: &RecordingDestination,
    ) -> Result<EgressId, RecordingError>;

    /// Stop a recording job (idempotent provider-side)
    async fn stop_recording(&self, egress_id: &EgressId) -> Result<(), RecordingError>;
}

/// Lifecycle states of one recording task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressJobState {
    /// Created, start call not yet acknowledged
    Created,
    /// Provider assigned a job id
    Started,
    /// Stop attempted (normal close or watchdog)
    Stopped,
    /// The start call itself failed; the call proceeds without recording
    Abandoned,
}

/// One recording task for one session
///
/// The egress id is written once on start acknowledgment; the watchdog and
/// the close handler both read it and must tolerate it still being unset.
pub struct EgressJob {
    room: RoomName,
    egress_id: RwLock<Option<EgressId>>,
    state: RwLock<EgressJobState>,
    stop_attempted: AtomicBool,
    started_at: DateTime<Utc>,
    watchdog_deadline: Duration,
    watchdog: std::sync::Mutex<Option<AbortHandle>>,
}

impl EgressJob {
    fn new(room: RoomName, watchdog_deadline: Duration) -> Self {
        Self {
            room,
            egress_id: RwLock::new(None),
            state: RwLock::new(EgressJobState::Created),
            stop_attempted: AtomicBool::new(false),
            started_at: Utc::now(),
            watchdog_deadline,
            watchdog: std::sync::Mutex::new(None),
        }
    }

    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub async fn egress_id(&self) -> Option<EgressId> {
        self.egress_id.read().await.clone()
    }

    pub async fn state(&self) -> EgressJobState {
        *self.state.read().await
    }

    pub fn started_at(&self) -> &DateTime<Utc> {
        &self.started_at
    }

    pub fn watchdog_deadline(&self) -> Duration {
        self.watchdog_deadline
    }
}

/// Supervises recording jobs and finalizes session artifacts
pub struct RecordingManager {
    egress: Arc<dyn EgressPort>,
    storage: Arc<dyn StoragePort>,
    /// Storage namespace, first segment of every object key
    storage_domain: String,
    layout: String,
    watchdog_deadline: Duration,
    scratch_dir: PathBuf,
}

impl RecordingManager {
    pub fn new(
        egress: Arc<dyn EgressPort>,
        storage: Arc<dyn StoragePort>,
        storage_domain: impl Into<String>,
        watchdog_deadline: Duration,
    ) -> Self {
        Self {
            egress,
            storage,
            storage_domain: storage_domain.into(),
            layout: "grid".to_string(),
            watchdog_deadline,
            scratch_dir: std::env::temp_dir().join("parley"),
        }
    }

    pub fn with_scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Destination for this session's media file
    pub fn destination_for(&self, room: &RoomName, credentials: &RecordingDestination) -> RecordingDestination {
        RecordingDestination {
            key: storage::recording_key(&self.storage_domain, room),
            ..credentials.clone()
        }
    }

    /// Start the recording job; call only after live audio is confirmed
    ///
    /// Starting against an empty room silently records nothing, so the
    /// caller gates this on the bound-session signal. A start failure
    /// abandons the job and never blocks the call.
    pub async fn begin_recording(
        self: &Arc<Self>,
        room: &RoomName,
        destination: RecordingDestination,
        barrier: &ShutdownBarrier,
    ) -> Arc<EgressJob> {
        let job = Arc::new(EgressJob::new(room.clone(), self.watchdog_deadline));

        match self
            .egress
            .start_room_recording(room, &self.layout, true, &destination)
            .await
        {
            Ok(egress_id) => {
                info!(room = %room, egress_id = %egress_id, "Started egress");
                *job.egress_id.write().await = Some(egress_id);
                *job.state.write().await = EgressJobState::Started;
            }
            Err(e) => {
                error!(room = %room, error = %e, "Failed to start egress");
                *job.state.write().await = EgressJobState::Abandoned;
                return job;
            }
        }

        // Fixed-deadline watchdog: bounds runaway jobs against a stuck
        // control plane. The close-triggered stop and this race; whichever
        // fires first wins and the loser is a no-op.
        let manager = Arc::clone(self);
        let watched = Arc::clone(&job);
        let abort = barrier.spawn(async move {
            tokio::time::sleep(watched.watchdog_deadline).await;
            if watched.state().await == EgressJobState::Started {
                warn!(room = %watched.room, "Egress watchdog deadline elapsed, issuing stop");
                manager.ensure_stopped(&watched).await;
            }
        });
        if let Ok(mut slot) = job.watchdog.lock() {
            *slot = Some(abort);
        }

        job
    }

    /// Stop the job if it is still running; safe to call repeatedly
    ///
    /// At most one underlying stop call is issued; later calls are no-ops.
    /// Stop failures are logged, never escalated.
    pub async fn ensure_stopped(&self, job: &EgressJob) {
        if job.stop_attempted.swap(true, Ordering::SeqCst) {
            return;
        }

        let egress_id = match job.egress_id().await {
            Some(id) => id,
            // Start never acknowledged (or abandoned): nothing to stop
            None => return,
        };

        match self.egress.stop_recording(&egress_id).await {
            Ok(()) => {
                info!(room = %job.room, egress_id = %egress_id, "Stopped egress");
            }
            Err(e) => {
                warn!(room = %job.room, egress_id = %egress_id, error = %e, "Failed to stop egress");
            }
        }
        *job.state.write().await = EgressJobState::Stopped;

        // A sleeping watchdog would otherwise hold up the shutdown barrier
        // until its deadline elapses.
        let pending = job.watchdog.lock().ok().and_then(|mut slot| slot.take());
        if let Some(abort) = pending {
            abort.abort();
        }
    }

    /// Upload transcript and usage summary next to the recording
    ///
    /// The uploads are independent and best-effort: a transcript failure
    /// must not block the summary upload, and neither failure escalates.
    /// Local scratch copies are removed afterwards.
    pub async fn finalize(
        &self,
        room: &RoomName,
        context: &ConversationContext,
        summary: &UsageSummary,
    ) {
        let transcript_key = storage::transcript_key(&self.storage_domain, room);
        let summary_key = storage::summary_key(&self.storage_domain, room);

        let transcript_bytes =
            serde_json::to_vec(&context.to_transcript()).unwrap_or_else(|_| b"{}".to_vec());
        let summary_bytes = serde_json::to_vec(summary).unwrap_or_else(|_| b"{}".to_vec());

        let transcript_scratch = self
            .write_scratch(room, "transcript.json", &transcript_bytes)
            .await;
        let summary_scratch = self.write_scratch(room, "summary.json", &summary_bytes).await;

        // The uploads run concurrently and independently
        let (transcript_result, summary_result) = futures::join!(
            self.storage.put_object(&transcript_key, transcript_bytes),
            self.storage.put_object(&summary_key, summary_bytes),
        );
        if let Err(e) = transcript_result {
            warn!(room = %room, error = %e, "Transcript upload failed");
        }
        if let Err(e) = summary_result {
            warn!(room = %room, error = %e, "Usage summary upload failed");
        }

        for scratch in [transcript_scratch, summary_scratch].into_iter().flatten() {
            if let Err(e) = tokio::fs::remove_file(&scratch).await {
                warn!(path = %scratch.display(), error = %e, "Failed to remove scratch file");
            }
        }
    }

    async fn write_scratch(&self, room: &RoomName, name: &str, bytes: &[u8]) -> Option<PathBuf> {
        let dir = self.scratch_dir.join(room.as_str());
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(path = %dir.display(), error = %e, "Failed to create scratch dir");
            return None;
        }
        let path = dir.join(name);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to write scratch file");
                None
            }
        }
    }
}
