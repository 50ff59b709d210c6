//! Call session aggregate root

use crate::domain::session::value_object::SessionStatus;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::events::{DomainEvent, EventMetadata};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{RoomName, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Domain events raised by the call session aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallSessionEvent {
    Created {
        metadata: EventMetadata,
        room: RoomName,
        participant_identity: String,
    },
    Bound {
        metadata: EventMetadata,
        room: RoomName,
        session_id: SessionId,
    },
    Closed {
        metadata: EventMetadata,
        room: RoomName,
        status: SessionStatus,
        duration_seconds: Option<i64>,
    },
    DialFailed {
        metadata: EventMetadata,
        room: RoomName,
        status: SessionStatus,
        reason: String,
    },
}

impl CallSessionEvent {
    fn metadata(&self) -> &EventMetadata {
        match self {
            CallSessionEvent::Created { metadata, .. }
            | CallSessionEvent::Bound { metadata, .. }
            | CallSessionEvent::Closed { metadata, .. }
            | CallSessionEvent::DialFailed { metadata, .. } => metadata,
        }
    }
}

impl DomainEvent for CallSessionEvent {
    fn event_type(&self) -> &str {
        &self.metadata().event_type
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.metadata().occurred_at
    }
}

/// Call session aggregate root
///
/// One physical telephony session. Owned exclusively by the dialer until
/// bound; afterwards shared read-mostly by the recording manager and the
/// notification dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallSession {
    room: RoomName,
    /// Provider-assigned session id, known once the room is connected
    session_id: Option<SessionId>,
    participant_identity: String,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    events: Vec<CallSessionEvent>,
}

impl CallSession {
    /// Create the session shell for a dial attempt
    pub fn new(room: RoomName, participant_identity: impl Into<String>) -> Self {
        let participant_identity = participant_identity.into();
        let mut session = Self {
            room: room.clone(),
            session_id: None,
            participant_identity: participant_identity.clone(),
            status: SessionStatus::Dialing,
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            events: Vec::new(),
        };

        session.record_event(CallSessionEvent::Created {
            metadata: EventMetadata::new("session.created"),
            room,
            participant_identity,
        });

        session
    }

    /// Attach the provider-assigned session id once the room is connected
    pub fn connect(&mut self, session_id: SessionId) {
        self.session_id = Some(session_id);
    }

    /// Mark the session live: participant joined and agent bound
    pub fn bind(&mut self) -> Result<()> {
        let session_id = self
            .session_id
            .ok_or_else(|| DomainError::InvalidOperation("Cannot bind before connect".to_string()))?;
        self.transition_to(SessionStatus::Active)?;
        self.answered_at = Some(Utc::now());
        self.record_event(CallSessionEvent::Bound {
            metadata: EventMetadata::new("session.bound"),
            room: self.room.clone(),
            session_id,
        });

        Ok(())
    }

    /// Close the session normally
    pub fn complete(&mut self) -> Result<()> {
        self.transition_to(SessionStatus::Completed)?;
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);

        let duration_seconds = self.answered_at.map(|answered| (ended_at - answered).num_seconds());
        self.record_event(CallSessionEvent::Closed {
            metadata: EventMetadata::new("session.closed"),
            room: self.room.clone(),
            status: self.status,
            duration_seconds,
        });

        Ok(())
    }

    /// Record a dial failure with its classified terminal status
    pub fn fail_dial(&mut self, status: SessionStatus, reason: impl Into<String>) -> Result<()> {
        if !status.is_terminal() {
            return Err(DomainError::ValidationError(format!(
                "Dial failure requires a terminal status, got {:?}",
                status
            )));
        }
        self.transition_to(status)?;
        self.ended_at = Some(Utc::now());

        self.record_event(CallSessionEvent::DialFailed {
            metadata: EventMetadata::new("session.dial_failed"),
            room: self.room.clone(),
            status,
            reason: reason.into(),
        });

        Ok(())
    }

    /// Mark a live session as errored
    pub fn error(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        self.transition_to(SessionStatus::Error)?;
        let ended_at = Utc::now();
        self.ended_at = Some(ended_at);

        self.record_event(CallSessionEvent::Closed {
            metadata: EventMetadata::new("session.closed"),
            room: self.room.clone(),
            status: self.status,
            duration_seconds: self.answered_at.map(|a| (ended_at - a).num_seconds()),
        });
        tracing::debug!(room = %self.room, reason = %reason, "Session errored");

        Ok(())
    }

    fn transition_to(&mut self, new_status: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(&new_status) {
            return Err(DomainError::InvalidStateTransition(format!(
                "Cannot transition from {:?} to {:?}",
                self.status, new_status
            )));
        }

        self.status = new_status;
        Ok(())
    }

    fn record_event(&mut self, event: CallSessionEvent) {
        self.events.push(event);
    }

    /// Take all pending domain events
    pub fn take_events(&mut self) -> Vec<CallSessionEvent> {
        std::mem::take(&mut self.events)
    }

    // Getters
    pub fn room(&self) -> &RoomName {
        &self.room
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn participant_identity(&self) -> &str {
        &self.participant_identity
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn created_at(&self) -> &DateTime<Utc> {
        &self.created_at
    }

    pub fn answered_at(&self) -> Option<&DateTime<Utc>> {
        self.answered_at.as_ref()
    }

    pub fn ended_at(&self) -> Option<&DateTime<Utc>> {
        self.ended_at.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialing_session() -> CallSession {
        CallSession::new(RoomName::new("call-test"), "+15551234567")
    }

    #[test]
    fn test_session_lifecycle() {
        let mut session = dialing_session();
        assert_eq!(session.status(), SessionStatus::Dialing);
        assert_eq!(session.events.len(), 1);

        session.connect(SessionId::new());
        session.bind().unwrap();
        assert_eq!(session.status(), SessionStatus::Active);
        assert!(session.answered_at().is_some());

        session.complete().unwrap();
        assert_eq!(session.status(), SessionStatus::Completed);
        assert!(session.ended_at().is_some());

        let events = session.take_events();
        assert_eq!(events.len(), 3); // Created, Bound, Closed
    }

    #[test]
    fn test_bind_requires_connect() {
        let mut session = dialing_session();
        assert!(session.bind().is_err());
    }

    #[test]
    fn test_dial_failure_statuses() {
        let mut session = dialing_session();
        session.fail_dial(SessionStatus::DialBusy, "sip status 486").unwrap();
        assert_eq!(session.status(), SessionStatus::DialBusy);

        // Terminal: no further transitions
        assert!(session.complete().is_err());
        assert!(session.bind().is_err());
    }

    #[test]
    fn test_fail_dial_rejects_live_status() {
        let mut session = dialing_session();
        assert!(session.fail_dial(SessionStatus::Active, "nonsense").is_err());
    }

    #[test]
    fn test_cannot_complete_unanswered_session() {
        let mut session = dialing_session();
        assert!(session.complete().is_err());
    }
}
