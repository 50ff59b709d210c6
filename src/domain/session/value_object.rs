//! Session value objects

use crate::domain::shared::value_objects::{PhoneNumber, TrunkId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Terminal and live states of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Invite issued, waiting for answer and media
    Dialing,
    /// Remote participant joined, agent bound, media flowing
    Active,
    /// Session closed normally
    Completed,
    /// Carrier or signaling failure during dial
    DialFailed,
    /// Remote party busy
    DialBusy,
    /// Remote party did not answer
    DialNoAnswer,
    /// Unclassified failure
    Error,
}

impl SessionStatus {
    /// Wire string used in outbound webhook payloads
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Dialing => "dialing",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::DialFailed => "dial_failed",
            SessionStatus::DialBusy => "dial_busy",
            SessionStatus::DialNoAnswer => "dial_no_answer",
            SessionStatus::Error => "error",
        }
    }

    /// Check if state transition is valid
    pub fn can_transition_to(&self, new_status: &SessionStatus) -> bool {
        use SessionStatus::*;

        match (self, new_status) {
            // Dial phase can succeed or fail into any terminal dial status
            (Dialing, Active) => true,
            (Dialing, DialFailed) | (Dialing, DialBusy) | (Dialing, DialNoAnswer) => true,
            (Dialing, Error) => true,

            // A live session can only complete or error out
            (Active, Completed) => true,
            (Active, Error) => true,

            // Terminal states never transition
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Dialing | SessionStatus::Active)
    }
}

/// Immutable dial input built from inbound job metadata
///
/// Carries everything needed to place the call and render agent
/// instructions; never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialTarget {
    destination: PhoneNumber,
    trunk: TrunkId,
    /// Correlation key for the external system of record
    bridge_id: String,
    /// Template variables for instruction rendering (name, honorific, ...)
    #[serde(default)]
    template_vars: HashMap<String, String>,
}

impl DialTarget {
    pub fn new(destination: PhoneNumber, trunk: TrunkId, bridge_id: impl Into<String>) -> Self {
        Self {
            destination,
            trunk,
            bridge_id: bridge_id.into(),
            template_vars: HashMap::new(),
        }
    }

    /// Parse a dial target from raw job metadata
    ///
    /// Mirrors the shape produced by the dispatch side:
    /// `{"phone_number": "+1...", "trunk_id": "T1", "bridge_id": "..."}`.
    pub fn from_job_metadata(metadata: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        struct RawMetadata {
            phone_number: String,
            trunk_id: String,
            bridge_id: String,
            #[serde(default)]
            template_vars: HashMap<String, String>,
        }

        let raw: RawMetadata =
            serde_json::from_str(metadata).map_err(|e| format!("Invalid job metadata: {}", e))?;
        let destination = PhoneNumber::parse(&raw.phone_number)?;

        Ok(Self {
            destination,
            trunk: TrunkId::new(raw.trunk_id),
            bridge_id: raw.bridge_id,
            template_vars: raw.template_vars,
        })
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.template_vars.insert(key.into(), value.into());
        self
    }

    pub fn destination(&self) -> &PhoneNumber {
        &self.destination
    }

    pub fn trunk(&self) -> &TrunkId {
        &self.trunk
    }

    pub fn bridge_id(&self) -> &str {
        &self.bridge_id
    }

    pub fn template_vars(&self) -> &HashMap<String, String> {
        &self.template_vars
    }

    /// Render `{{key}}` placeholders in an instruction template
    pub fn render(&self, template: &str) -> String {
        let mut rendered = template.to_string();
        for (key, value) in &self.template_vars {
            rendered = rendered.replace(&format!("{{{{{}}}}}", key), value);
        }
        rendered
    }
}
