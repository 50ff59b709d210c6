//! Infrastructure implementations

pub mod auth;
pub mod memory;
pub mod notify;
pub mod recording;
pub mod storage;
pub mod telephony;
