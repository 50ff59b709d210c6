//! Pipeline usage aggregation
//!
//! Collects per-turn pipeline metrics into a session-level summary that
//! ships with the terminal webhook.

use serde::{Deserialize, Serialize};

/// Metrics reported by the speech pipeline for one turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub llm_prompt_tokens: u64,
    pub llm_completion_tokens: u64,
    pub tts_characters: u64,
    pub stt_audio_seconds: f64,
}

/// Session-level usage totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub llm_prompt_tokens: u64,
    pub llm_completion_tokens: u64,
    pub tts_characters: u64,
    pub stt_audio_seconds: f64,
    pub turns: u64,
}

/// Accumulates usage metrics over the session lifetime
#[derive(Debug, Default)]
pub struct UsageCollector {
    summary: UsageSummary,
}

impl UsageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, metrics: &UsageMetrics) {
        self.summary.llm_prompt_tokens += metrics.llm_prompt_tokens;
        self.summary.llm_completion_tokens += metrics.llm_completion_tokens;
        self.summary.tts_characters += metrics.tts_characters;
        self.summary.stt_audio_seconds += metrics.stt_audio_seconds;
        self.summary.turns += 1;
    }

    pub fn summary(&self) -> &UsageSummary {
        &self.summary
    }
}
