//! Telephony control port
//!
//! The provider-facing handshake surface consumed by the call dialer. All
//! failures come back as structured [`DialError`]s so the outcome classifier
//! can map them to business results.

use crate::domain::outcome::DialError;
use crate::domain::shared::value_objects::{PhoneNumber, RoomName, SessionId, TrunkId};
use chrono::{DateTime, Utc};

/// Remote participant that joined the room
#[derive(Debug, Clone)]
pub struct ParticipantHandle {
    pub identity: String,
    pub joined_at: DateTime<Utc>,
}

/// Telephony provider control surface
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TelephonyPort: Send + Sync {
    /// Create/connect the room shell and return its provider session id
    async fn connect_room(&self, room: &RoomName) -> Result<SessionId, DialError>;

    /// Issue the outbound invite through the given trunk
    ///
    /// With `wait_until_answered` the future resolves only once the remote
    /// party accepts; rejection surfaces the SIP status in the error.
    async fn create_call(
        &self,
        room: &RoomName,
        trunk: &TrunkId,
        destination: &PhoneNumber,
        participant_identity: &str,
        wait_until_answered: bool,
    ) -> Result<(), DialError>;

    /// Wait for the remote participant's media to actually join the room
    ///
    /// Distinct from invite acceptance: carriers may accept before RTP is
    /// live. A timeout surfaces as a `DialError` with no SIP status.
    async fn wait_for_participant(
        &self,
        room: &RoomName,
        identity: &str,
    ) -> Result<ParticipantHandle, DialError>;

    /// Tear down the room; the session is logically destroyed afterwards
    async fn delete_room(&self, room: &RoomName) -> Result<(), DialError>;
}
