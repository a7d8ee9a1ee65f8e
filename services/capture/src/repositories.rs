//! Repositories for receipt rows and capture sessions

pub mod receipt;
pub mod session;

pub use receipt::{ReceiptRepository, ReceiptStore};
pub use session::{MemorySessionStore, RedisSessionStore, SessionStore, SessionStoreError};
