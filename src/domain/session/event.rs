//! Session lifecycle events
//!
//! Everything the bus delivers to subscribers during one session's
//! turn-processing timeline.

use crate::domain::session::usage::UsageMetrics;
use serde::{Deserialize, Serialize};

/// Remote user presence states reported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    Speaking,
    Listening,
    Away,
}

/// Conversational agent activity states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Initializing,
    Listening,
    Thinking,
    Speaking,
}

/// Session lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// VAD/turn-detector false positive; the suppressed speech should be
    /// resumed with its original content, not restarted
    AgentFalseInterruption { resume_instructions: Option<String> },
    /// Pipeline metrics for one turn
    MetricsCollected { metrics: UsageMetrics },
    /// A function tool finished executing
    ToolExecuted {
        tool_name: String,
        payload: serde_json::Value,
    },
    /// Remote user presence changed
    UserStateChanged { new_state: UserState },
    /// Agent activity changed
    AgentStateChanged { new_state: AgentState },
    /// Non-fatal error surfaced by the pipeline
    Error { message: String },
    /// Session is closing; the only event that triggers finalization
    Close,
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::AgentFalseInterruption { .. } => "agent_false_interruption",
            SessionEvent::MetricsCollected { .. } => "metrics_collected",
            SessionEvent::ToolExecuted { .. } => "function_tools_executed",
            SessionEvent::UserStateChanged { .. } => "user_state_changed",
            SessionEvent::AgentStateChanged { .. } => "agent_state_changed",
            SessionEvent::Error { .. } => "error",
            SessionEvent::Close => "close",
        }
    }
}
