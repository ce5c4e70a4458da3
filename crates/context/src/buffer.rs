//! In-process buffer tier.
//!
//! Entries are keyed per user; each carries its own async mutex so a
//! background flush and a request-path save for the same user serialize
//! instead of racing, while different users never contend. The entry
//! lock is deliberately a `tokio::sync::Mutex`: it is held across
//! replica and durable writes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cv_domain::context::ContextWindow;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Raw exchange payload waiting for the durable tier: one user message
/// and the assistant reply with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingExchange {
    pub user_message: String,
    pub assistant_message: String,
    pub model: String,
    pub tokens_used: u32,
    pub latency_seconds: f64,
}

/// One user's buffered context plus flush bookkeeping.
#[derive(Debug, Clone)]
pub struct BufferEntry {
    pub context: ContextWindow,
    /// Exchanges awaiting the durable tier, oldest first. A queue so a
    /// failed write never forces a choice between old and new.
    pub pending: VecDeque<PendingExchange>,
    /// When this entry first appeared in the buffer; drives aging into
    /// the durable tier.
    pub captured_at: DateTime<Utc>,
    pub dirty: bool,
    pub last_replicated_at: Option<DateTime<Utc>>,
}

impl BufferEntry {
    pub fn new(context: ContextWindow) -> Self {
        Self {
            context,
            pending: VecDeque::new(),
            captured_at: Utc::now(),
            dirty: true,
            last_replicated_at: None,
        }
    }

    /// A clean entry as reconstructed from the replica tier.
    pub fn replicated(context: ContextWindow, captured_at: DateTime<Utc>) -> Self {
        Self {
            context,
            pending: VecDeque::new(),
            captured_at,
            dirty: false,
            last_replicated_at: Some(Utc::now()),
        }
    }
}

/// The per-user entry map. The outer lock only guards map shape and is
/// never held across an await.
pub struct ContextBuffer {
    entries: RwLock<HashMap<i64, Arc<Mutex<BufferEntry>>>>,
}

impl ContextBuffer {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Existing entry for `user_id`, if buffered.
    pub fn get(&self, user_id: i64) -> Option<Arc<Mutex<BufferEntry>>> {
        self.entries.read().get(&user_id).cloned()
    }

    /// Existing entry, or a fresh one built from `init`.
    pub fn get_or_insert_with(
        &self,
        user_id: i64,
        init: impl FnOnce() -> BufferEntry,
    ) -> Arc<Mutex<BufferEntry>> {
        if let Some(entry) = self.get(user_id) {
            return entry;
        }
        let mut entries = self.entries.write();
        entries
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(init())))
            .clone()
    }

    /// Replace (or create) the entry for `user_id`.
    pub fn insert(&self, user_id: i64, entry: BufferEntry) {
        self.entries
            .write()
            .insert(user_id, Arc::new(Mutex::new(entry)));
    }

    /// Drop a durably flushed entry.
    pub fn remove(&self, user_id: i64) {
        self.entries.write().remove(&user_id);
    }

    /// Snapshot of the buffered user ids.
    pub fn user_ids(&self) -> Vec<i64> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for ContextBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_insert_returns_same_entry() {
        let buffer = ContextBuffer::new();
        let a = buffer.get_or_insert_with(1, || BufferEntry::new(ContextWindow::new()));
        let b = buffer.get_or_insert_with(1, || BufferEntry::new(ContextWindow::new()));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn remove_drops_entry() {
        let buffer = ContextBuffer::new();
        buffer.insert(7, BufferEntry::new(ContextWindow::new()));
        buffer.remove(7);
        assert!(buffer.get(7).is_none());
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn per_user_lock_serializes_writers() {
        let buffer = Arc::new(ContextBuffer::new());
        let entry = buffer.get_or_insert_with(1, || BufferEntry::new(ContextWindow::new()));

        let held = entry.lock().await;
        // A second writer for the same user must wait.
        assert!(entry.try_lock().is_err());
        drop(held);
        assert!(entry.try_lock().is_ok());
    }
}
