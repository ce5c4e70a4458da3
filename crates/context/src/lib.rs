//! `cv-context` — tiered persistence of per-user conversation context.
//!
//! Three cooperating tiers: the in-process [`ContextBuffer`] (fast,
//! volatile), a replicated cache tier behind the [`ReplicaStore`] trait
//! (survives process restart, TTL-bounded), and the durable
//! [`SqliteStore`] (authoritative, append-only). The [`ContextStore`]
//! drives save/load across the tiers; the [`FlushScheduler`] replicates
//! dirty buffers in the background; [`recover_contexts`] repopulates the
//! buffer from the replica tier on boot.

pub mod buffer;
pub mod durable;
pub mod flush;
pub mod memory;
pub mod recovery;
pub mod replica;
pub mod tiered;

pub use buffer::{BufferEntry, ContextBuffer, PendingExchange};
pub use durable::SqliteStore;
pub use flush::FlushScheduler;
pub use memory::MemoryReplica;
pub use recovery::recover_contexts;
pub use replica::{ReplicaStore, RestReplicaClient};
pub use tiered::{BackupRecord, ContextStore, FlushStats};
