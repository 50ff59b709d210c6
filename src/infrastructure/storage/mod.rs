//! Durable storage port and object key layout
//!
//! Recordings, transcripts and usage summaries for one session live under a
//! shared per-session prefix, so the external system can find them as
//! siblings.

use crate::domain::shared::value_objects::RoomName;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Upload failed for {key}: {reason}")]
    UploadFailed { key: String, reason: String },
}

/// Storage abstraction for session artifacts
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait StoragePort: Send + Sync {
    async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), StorageError>;
}

/// Per-session object prefix: `{domain}/{session}`
pub fn session_prefix(domain: &str, room: &RoomName) -> String {
    format!("{}/{}", domain, room)
}

/// Recording object name derived from the room name hash
///
/// Hashing keeps dialed numbers out of bucket listings.
pub fn recording_file_name(room: &RoomName) -> String {
    let digest = Sha256::digest(room.as_str().as_bytes());
    format!("call_recording_{}.mp4", hex::encode(digest))
}

/// Full object key for the session recording
pub fn recording_key(domain: &str, room: &RoomName) -> String {
    format!("{}/{}", session_prefix(domain, room), recording_file_name(room))
}

/// Sibling object key for the transcript
pub fn transcript_key(domain: &str, room: &RoomName) -> String {
    format!("{}/transcript.json", session_prefix(domain, room))
}

/// Sibling object key for the usage summary
pub fn summary_key(domain: &str, room: &RoomName) -> String {
    format!("{}/summary.json", session_prefix(domain, room))
}
