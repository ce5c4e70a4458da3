//! `cv-engine` — the conversational front of the stack.
//!
//! Binds the provider coordinator and the tiered context store into a
//! [`ChatEngine`] with a single `handle_message` entry point. The
//! `converse` binary wraps it in a CLI and an interactive REPL.

pub mod engine;

pub use engine::{ChatEngine, EngineReply};
