//! `cv-domain` — shared value types for the Converse core.
//!
//! Everything the other crates agree on lives here: chat turns and
//! generated replies, the per-user context window, the error taxonomy,
//! cache-key management, config, and structured trace events.

pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod message;
pub mod trace;

pub use context::{ContextWindow, Tone};
pub use error::{Error, Result};
pub use keys::CacheKeys;
pub use message::{ChatTurn, GeneratedReply, Role};
