//! API models for request and response payloads

pub mod receipt;
pub mod session;
