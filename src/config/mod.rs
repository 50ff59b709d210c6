//! Configuration management

use serde::{Deserialize, Serialize};

use crate::infrastructure::recording::RecordingDestination;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub telephony: TelephonyConfig,
    pub recording: RecordingConfig,
    pub notifier: NotifierConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifier reported in terminal webhooks
    pub identifier: String,
    /// Prompts spoken to an away user before the session is shut down
    pub presence_prompts: u32,
    /// Pause between presence prompts, seconds
    pub presence_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    /// Identity assigned to the remote SIP participant
    pub participant_identity: String,
    pub trunk_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    /// Storage namespace, first segment of every object key
    pub storage_domain: String,
    /// Public base URL recordings are served from
    pub playback_base_url: String,
    pub watchdog_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Base URL for outbound webhooks; events go to `{base}/events`,
    /// bridge callbacks to `{base}/webhook_listener/{bridge_id}`
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent: AgentConfig {
                identifier: "parley_outbound_agent".to_string(),
                presence_prompts: 3,
                presence_interval_secs: 10,
            },
            telephony: TelephonyConfig {
                participant_identity: "phone_user".to_string(),
                trunk_id: "default".to_string(),
            },
            recording: RecordingConfig {
                bucket: "parley-recordings".to_string(),
                region: "ap-south-1".to_string(),
                access_key: String::new(),
                secret_key: String::new(),
                storage_domain: "parley".to_string(),
                playback_base_url: "https://recordings.localhost".to_string(),
                watchdog_secs: 600,
            },
            notifier: NotifierConfig {
                base_url: "https://localhost/bridge".to_string(),
            },
            auth: AuthConfig {
                token_url: "https://localhost/oauth2/token".to_string(),
                client_id: String::new(),
                client_secret: String::new(),
            },
        }
    }
}

impl Config {
    /// Load from an optional `parley.toml` plus `PARLEY_*` environment
    /// overrides (`PARLEY_NOTIFIER__BASE_URL=...`).
    pub fn load() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::with_name("parley").required(false))
            .add_source(config::Environment::with_prefix("PARLEY").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Recording upload credentials; the per-session object key is filled
    /// in by the recording manager.
    pub fn recording_credentials(&self) -> RecordingDestination {
        RecordingDestination {
            bucket: self.recording.bucket.clone(),
            region: self.recording.region.clone(),
            access_key: self.recording.access_key.clone(),
            secret_key: self.recording.secret_key.clone(),
            key: String::new(),
        }
    }
}
