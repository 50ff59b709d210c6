//! Domain events infrastructure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base trait for all domain events raised by aggregates
pub trait DomainEvent: Send + Sync {
    /// Stable event type name, `session.<verb>` style
    fn event_type(&self) -> &str;

    /// When the event occurred
    fn occurred_at(&self) -> DateTime<Utc>;
}

/// Identity and timing shared by every domain event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub event_type: String,
}

impl EventMetadata {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            event_type: event_type.into(),
        }
    }
}
