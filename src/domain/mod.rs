//! Domain layer - Core business logic and rules
//!
//! This layer contains:
//! - Aggregates: Consistency boundaries
//! - Value Objects: Immutable objects without identity
//! - Domain Services: Operations that don't fit in a single aggregate
//! - Domain Events: Things that happened in the domain

pub mod handoff;
pub mod outcome;
pub mod session;
pub mod shared;

// Re-export commonly used types
pub use shared::{DomainError, Result};
