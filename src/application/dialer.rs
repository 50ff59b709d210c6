//! Call dialing orchestration
//!
//! The dialer owns the telephony handshake: create the session shell,
//! bind the conversational agent concurrently with the outbound invite,
//! wait for the remote party to answer and for their media to join, and
//! hand back a bound session. Any failure along the way is classified
//! into a business outcome, the room is torn down, and the terminal
//! dial-failed webhook is delivered before the job is considered done.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::domain::handoff::{
    AgentFactory, AgentVariant, ConversationContext, HandoffController, SpeechPort,
};
use crate::domain::outcome::{classify, CallOutcome, DialError};
use crate::domain::session::{CallSession, DialTarget, SessionStatus};
use crate::domain::shared::value_objects::RoomName;
use crate::infrastructure::notify::{NotificationDispatcher, OutboundEvent};
use crate::infrastructure::telephony::{ParticipantHandle, TelephonyPort};

/// Terminal dial failure, carrying the classified outcome
#[derive(Debug, Error)]
#[error("dial for {room} failed ({status:?}): {message}")]
pub struct DialFailure {
    pub room: RoomName,
    pub outcome: CallOutcome,
    pub status: SessionStatus,
    pub message: String,
}

/// A live session with the agent attached
///
/// For outbound calls the remote participant handle is present; inbound
/// calls bind to an already-live room and carry no handle.
pub struct BoundSession {
    pub session: CallSession,
    pub participant: Option<ParticipantHandle>,
    pub controller: Arc<HandoffController>,
    /// Correlation key for the external system of record
    pub bridge_id: String,
}

impl std::fmt::Debug for BoundSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSession")
            .field("session", &self.session)
            .field("participant", &self.participant)
            .field("bridge_id", &self.bridge_id)
            .finish_non_exhaustive()
    }
}

impl BoundSession {
    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }
}

/// Orchestrates the telephony handshake for one job at a time
pub struct CallDialer {
    telephony: Arc<dyn TelephonyPort>,
    dispatcher: Arc<NotificationDispatcher>,
    speech: Arc<dyn SpeechPort>,
    factory: Arc<dyn AgentFactory>,
    config: Config,
}

impl CallDialer {
    pub fn new(
        telephony: Arc<dyn TelephonyPort>,
        dispatcher: Arc<NotificationDispatcher>,
        speech: Arc<dyn SpeechPort>,
        factory: Arc<dyn AgentFactory>,
        config: Config,
    ) -> Self {
        Self {
            telephony,
            dispatcher,
            speech,
            factory,
            config,
        }
    }

    /// Place an outbound call and bind the agent to it
    pub async fn place_call(&self, target: &DialTarget) -> Result<BoundSession, DialFailure> {
        let room = RoomName::generate();
        let identity = self.config.telephony.participant_identity.clone();
        let mut session = CallSession::new(room.clone(), &identity);

        info!(room = %room, destination = %target.destination(), "Placing outbound call");

        let session_id = match self.telephony.connect_room(&room).await {
            Ok(id) => id,
            Err(e) => return Err(self.abandon(session, e, Some(target.bridge_id())).await),
        };
        session.connect(session_id);

        // Agent binding runs concurrently with the invite so the greeting
        // is ready the moment the remote party answers.
        let controller = Arc::new(HandoffController::new(
            self.speech.clone(),
            self.factory.clone(),
        ));
        let binding = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move {
                controller
                    .start(AgentVariant::LanguageTriage, ConversationContext::new())
                    .await
            })
        };

        let invite = self
            .telephony
            .create_call(&room, target.trunk(), target.destination(), &identity, true)
            .await;
        if let Err(e) = invite {
            binding.abort();
            return Err(self.abandon(session, e, Some(target.bridge_id())).await);
        }

        // Invite acceptance and media presence are distinct; wait for the
        // participant to actually join before declaring the call live.
        let participant = match self.telephony.wait_for_participant(&room, &identity).await {
            Ok(p) => p,
            Err(e) => {
                binding.abort();
                return Err(self.abandon(session, e, Some(target.bridge_id())).await);
            }
        };

        match binding.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let e = DialError::new(format!("agent binding failed: {e}"));
                return Err(self.abandon(session, e, Some(target.bridge_id())).await);
            }
            Err(e) => {
                let e = DialError::new(format!("agent binding task failed: {e}"));
                return Err(self.abandon(session, e, Some(target.bridge_id())).await);
            }
        }

        if let Err(e) = session.bind() {
            let e = DialError::new(e.to_string());
            return Err(self.abandon(session, e, Some(target.bridge_id())).await);
        }

        info!(room = %room, participant = %participant.identity, "Call answered and bound");
        Ok(BoundSession {
            session,
            participant: Some(participant),
            controller,
            bridge_id: target.bridge_id().to_string(),
        })
    }

    /// Bind the agent to an already-live inbound session
    ///
    /// No invite, no participant wait: the caller is on the line already.
    pub async fn accept_call(
        &self,
        room: RoomName,
        bridge_id: impl Into<String>,
    ) -> Result<BoundSession, DialFailure> {
        let bridge_id = bridge_id.into();
        let identity = self.config.telephony.participant_identity.clone();
        let mut session = CallSession::new(room.clone(), &identity);

        info!(room = %room, "Accepting inbound call");

        let session_id = match self.telephony.connect_room(&room).await {
            Ok(id) => id,
            Err(e) => return Err(self.abandon(session, e, Some(bridge_id.as_str())).await),
        };
        session.connect(session_id);

        let controller = Arc::new(HandoffController::new(
            self.speech.clone(),
            self.factory.clone(),
        ));
        if let Err(e) = controller
            .start(AgentVariant::LanguageTriage, ConversationContext::new())
            .await
        {
            let e = DialError::new(format!("agent binding failed: {e}"));
            return Err(self.abandon(session, e, Some(bridge_id.as_str())).await);
        }

        if let Err(e) = session.bind() {
            let e = DialError::new(e.to_string());
            return Err(self.abandon(session, e, Some(bridge_id.as_str())).await);
        }

        Ok(BoundSession {
            session,
            participant: None,
            controller,
            bridge_id,
        })
    }

    /// Classify the failure, tear down the room, and report it
    ///
    /// The dial-failed webhook is awaited here: the worker must not finish
    /// the job before the bridge has been told the call never happened.
    async fn abandon(
        &self,
        mut session: CallSession,
        cause: DialError,
        bridge_id: Option<&str>,
    ) -> DialFailure {
        let outcome = classify(&cause);
        let status = outcome.session_status();
        let room = session.room().clone();

        error!(
            room = %room,
            outcome = outcome.as_str(),
            error = %cause,
            "Dial failed"
        );

        let record = match status {
            SessionStatus::Error => session.error(cause.message.clone()),
            terminal => session.fail_dial(terminal, cause.message.clone()),
        };
        if let Err(e) = record {
            warn!(room = %room, error = %e, "Failed to record dial failure on session");
        }

        if let Err(e) = self.telephony.delete_room(&room).await {
            warn!(room = %room, error = %e, "Failed to delete room after dial failure");
        }

        if let Some(bridge_id) = bridge_id {
            let room_id = session
                .session_id()
                .map(|id| id.to_string())
                .unwrap_or_default();
            let event = OutboundEvent::dial_failed(
                &self.config.notifier.base_url,
                bridge_id,
                &room,
                &room_id,
                status.as_str(),
                outcome.as_str(),
                &cause.message,
            );
            if let Err(e) = self.dispatcher.dispatch_now(&event).await {
                error!(room = %room, error = %e, "Failed to deliver dial-failed webhook");
            }
        }

        DialFailure {
            room,
            outcome,
            status,
            message: cause.message,
        }
    }
}
