//! In-memory port implementations.
//!
//! Stand-ins for the provider-backed ports, used by the demo binary and by
//! integration tests. Each fake records what was asked of it and can be
//! scripted to fail, which is enough to exercise the full dial/record/close
//! path without a telephony provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::handoff::SpeechPort;
use crate::domain::outcome::DialError;
use crate::domain::shared::value_objects::{EgressId, PhoneNumber, RoomName, SessionId, TrunkId};
use crate::domain::shared::Result;
use crate::infrastructure::recording::{EgressPort, RecordingDestination, RecordingError};
use crate::infrastructure::storage::{StorageError, StoragePort};
use crate::infrastructure::telephony::{ParticipantHandle, TelephonyPort};

/// Telephony fake: answers every invite unless a failure is scripted.
#[derive(Default)]
pub struct MemoryTelephony {
    fail_connect_with: RwLock<Option<DialError>>,
    fail_dial_with: RwLock<Option<DialError>>,
    calls: RwLock<Vec<(RoomName, TrunkId, PhoneNumber)>>,
    deleted_rooms: RwLock<Vec<RoomName>>,
}

impl MemoryTelephony {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next `connect_room` to fail with the given error.
    pub async fn fail_next_connect(&self, error: DialError) {
        *self.fail_connect_with.write().await = Some(error);
    }

    /// Script the next `create_call` to fail with the given error.
    pub async fn fail_next_dial(&self, error: DialError) {
        *self.fail_dial_with.write().await = Some(error);
    }

    pub async fn placed_calls(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn deleted_rooms(&self) -> Vec<RoomName> {
        self.deleted_rooms.read().await.clone()
    }
}

#[async_trait]
impl TelephonyPort for MemoryTelephony {
    async fn connect_room(&self, room: &RoomName) -> std::result::Result<SessionId, DialError> {
        if let Some(error) = self.fail_connect_with.write().await.take() {
            return Err(error);
        }
        debug!(room = %room, "memory telephony: room connected");
        Ok(SessionId::new())
    }

    async fn create_call(
        &self,
        room: &RoomName,
        trunk: &TrunkId,
        destination: &PhoneNumber,
        _participant_identity: &str,
        _wait_until_answered: bool,
    ) -> std::result::Result<(), DialError> {
        if let Some(error) = self.fail_dial_with.write().await.take() {
            return Err(error);
        }
        self.calls
            .write()
            .await
            .push((room.clone(), trunk.clone(), destination.clone()));
        Ok(())
    }

    async fn wait_for_participant(
        &self,
        _room: &RoomName,
        identity: &str,
    ) -> std::result::Result<ParticipantHandle, DialError> {
        Ok(ParticipantHandle {
            identity: identity.to_string(),
            joined_at: Utc::now(),
        })
    }

    async fn delete_room(&self, room: &RoomName) -> std::result::Result<(), DialError> {
        self.deleted_rooms.write().await.push(room.clone());
        Ok(())
    }
}

/// Egress fake: hands out sequential job ids and counts stops.
#[derive(Default)]
pub struct MemoryEgress {
    next_id: AtomicU64,
    fail_start: AtomicBool,
    stopped: RwLock<Vec<EgressId>>,
}

impl MemoryEgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub async fn stopped_jobs(&self) -> Vec<EgressId> {
        self.stopped.read().await.clone()
    }
}

#[async_trait]
impl EgressPort for MemoryEgress {
    async fn start_room_recording(
        &self,
        room: &RoomName,
        _layout: &str,
        _audio_only: bool,
        _destination: &RecordingDestination,
    ) -> std::result::Result<EgressId, RecordingError> {
        if self.fail_start.swap(false, Ordering::SeqCst) {
            return Err(RecordingError::StartFailed {
                room: room.to_string(),
                reason: "scripted start failure".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(EgressId::new(format!("EG_{n}")))
    }

    async fn stop_recording(&self, egress_id: &EgressId) -> std::result::Result<(), RecordingError> {
        self.stopped.write().await.push(egress_id.clone());
        Ok(())
    }
}

/// Storage fake backed by a map from object key to body.
#[derive(Default)]
pub struct MemoryStorage {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StoragePort for MemoryStorage {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> std::result::Result<(), StorageError> {
        self.objects.write().await.insert(key.to_string(), body);
        Ok(())
    }
}

/// Speech fake: records every line spoken and whether the audio session
/// was closed.
#[derive(Default)]
pub struct MemorySpeech {
    lines: RwLock<Vec<String>>,
    closed: AtomicBool,
}

impl MemorySpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spoken(&self) -> Vec<String> {
        self.lines.read().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechPort for MemorySpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        self.lines.write().await.push(text.to_string());
        Ok(())
    }

    async fn generate_reply(&self, instructions: &str) -> Result<()> {
        self.lines
            .write()
            .await
            .push(format!("[generated] {instructions}"));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
