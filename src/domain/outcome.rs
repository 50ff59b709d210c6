//! Dial outcome classification
//!
//! Maps a low-level signaling failure (numeric SIP status plus optional
//! provider metadata) to a business-level call result. The mapping is total:
//! unclassifiable input degrades to `Unknown`, never an error.

use crate::domain::session::value_object::SessionStatus;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Structured telephony failure surfaced by the invite path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialError {
    /// Raw provider error text
    pub message: String,
    /// Structured metadata attached by the provider, if any
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl DialError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DialError {}

/// SIP status details extracted from a dial error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SipStatus {
    pub code: Option<u16>,
    pub message: Option<String>,
}

/// Business-level call result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Remote party busy (486, 600)
    Busy,
    /// No answer (408, 480, 504, 603, 604)
    NoAnswer,
    /// Carrier-side failure (500-503)
    CarrierFailure,
    /// A SIP status was present but matches no known class
    Other,
    /// No status could be extracted
    Unknown,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Busy => "busy",
            CallOutcome::NoAnswer => "no_answer",
            CallOutcome::CarrierFailure => "failed",
            CallOutcome::Other => "other",
            CallOutcome::Unknown => "unknown",
        }
    }

    /// Terminal session status reported for this outcome
    pub fn session_status(&self) -> SessionStatus {
        match self {
            CallOutcome::Busy => SessionStatus::DialBusy,
            CallOutcome::NoAnswer => SessionStatus::DialNoAnswer,
            CallOutcome::CarrierFailure => SessionStatus::DialFailed,
            CallOutcome::Other | CallOutcome::Unknown => SessionStatus::Error,
        }
    }
}

fn sip_code_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)sip status:\s*(\d{3})").expect("hard-coded pattern"))
}

fn sip_message_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)sip status:\s*\d{3}:\s*([^,]+)").expect("hard-coded pattern"))
}

/// Extract SIP status details from a dial error
///
/// Structured metadata wins over pattern-matching the free-text message;
/// if neither yields a code the result is empty.
pub fn extract_sip_status(error: &DialError) -> SipStatus {
    let mut status = SipStatus::default();

    if let Some(raw) = error.metadata.get("sip_status_code") {
        status.code = raw.parse().ok();
    }
    if let Some(message) = error.metadata.get("sip_status") {
        status.message = Some(message.clone());
    }

    if status.code.is_none() {
        if let Some(captures) = sip_code_pattern().captures(&error.message) {
            status.code = captures.get(1).and_then(|m| m.as_str().parse().ok());
        }
    }
    if status.message.is_none() {
        if let Some(captures) = sip_message_pattern().captures(&error.message) {
            status.message = captures.get(1).map(|m| m.as_str().trim().to_string());
        }
    }

    status
}

/// Classify a dial failure into a business outcome
pub fn classify(error: &DialError) -> CallOutcome {
    let status = extract_sip_status(error);

    let code = match status.code {
        Some(code) => code,
        None => return CallOutcome::Unknown,
    };

    match code {
        486 | 600 => CallOutcome::Busy,
        408 | 480 | 504 | 603 | 604 => CallOutcome::NoAnswer,
        500..=503 => CallOutcome::CarrierFailure,
        _ => CallOutcome::Other,
    }
}
