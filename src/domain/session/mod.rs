//! Session bounded context - manages the lifecycle of one telephony session

pub mod aggregate;
pub mod bus;
pub mod event;
pub mod usage;
pub mod value_object;

pub use aggregate::{CallSession, CallSessionEvent};
pub use bus::SessionEventBus;
pub use event::{AgentState, SessionEvent, UserState};
pub use usage::{UsageCollector, UsageMetrics, UsageSummary};
pub use value_object::{DialTarget, SessionStatus};
