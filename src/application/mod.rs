//! Application layer - Use cases and application services
//!
//! This layer orchestrates domain objects to fulfill use cases: placing
//! and accepting calls, wiring a bound session's event bus, and tearing
//! everything down deterministically at job end.

pub mod dialer;
pub mod runtime;
pub mod shutdown;

pub use dialer::{BoundSession, CallDialer, DialFailure};
pub use runtime::SessionRuntime;
pub use shutdown::ShutdownBarrier;
