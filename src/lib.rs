//! Parley - a call session orchestration core for voice-agent workers
//!
//! This is a Domain-Driven Design (DDD) implementation of the session
//! lifecycle around one telephone call: dialing, agent handoff, recording
//! supervision, and outbound notifications.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
