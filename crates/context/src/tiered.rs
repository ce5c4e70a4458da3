//! Three-tier context store.
//!
//! Saves land in the in-process buffer immediately, replicate to the
//! cache tier once the entry's dirty window elapses (or on demand), and
//! age into SQLite where they become permanent. A backup record rides
//! alongside every replication so a crashed process can rebuild its
//! buffer on restart.
//!
//! Replica failures on the save path are logged and swallowed; the
//! entry stays dirty and the next save or cycle retries. Durable-tier
//! failures keep the entry buffered for the next cycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cv_domain::config::PersistenceConfig;
use cv_domain::context::ContextWindow;
use cv_domain::error::{Error, Result};
use cv_domain::keys::CacheKeys;
use cv_domain::trace::TraceEvent;
use serde::{Deserialize, Serialize};

use crate::buffer::{BufferEntry, ContextBuffer, PendingExchange};
use crate::durable::SqliteStore;
use crate::replica::ReplicaStore;

/// Replica-side backup of one buffered context. Versioned so a future
/// schema change can skip stale records instead of misreading them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub context: ContextWindow,
    pub timestamp: DateTime<Utc>,
    pub version: u32,
}

pub const BACKUP_RECORD_VERSION: u32 = 1;

/// Extra life a backup record gets past the flush interval, so a
/// scheduler running slightly late still finds it.
const BACKUP_TTL_SLACK_SECONDS: u64 = 300;

/// Counts from one scheduler pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    pub replicated: usize,
    pub flushed: usize,
}

pub struct ContextStore {
    buffer: ContextBuffer,
    replica: Arc<dyn ReplicaStore>,
    durable: Arc<SqliteStore>,
    cfg: PersistenceConfig,
}

impl ContextStore {
    pub fn new(
        replica: Arc<dyn ReplicaStore>,
        durable: Arc<SqliteStore>,
        cfg: PersistenceConfig,
    ) -> Self {
        Self {
            buffer: ContextBuffer::new(),
            replica,
            durable,
            cfg,
        }
    }

    pub fn buffer(&self) -> &ContextBuffer {
        &self.buffer
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Save path
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Record the latest context for a user. The buffer write always
    /// happens; replication happens when `immediate` is set, when the
    /// entry has never replicated, or when its dirty window has lapsed.
    /// An entry older than the flush interval is moved into SQLite on
    /// the spot instead of waiting for the scheduler.
    ///
    /// Exchanges already queued on the entry are written to the
    /// durable tier before the new one joins the queue; a failed write
    /// leaves them queued, so no exchange is ever dropped between
    /// flush cycles.
    pub async fn save_context(
        &self,
        user_id: i64,
        context: ContextWindow,
        exchange: Option<PendingExchange>,
        immediate: bool,
    ) -> Result<()> {
        let entry = self
            .buffer
            .get_or_insert_with(user_id, || BufferEntry::new(context.clone()));
        let mut guard = entry.lock().await;

        if !guard.pending.is_empty() {
            if let Err(e) = self.drain_pending(user_id, &mut guard).await {
                tracing::warn!(user_id, error = %e, "durable write failed, exchanges stay queued");
            }
        }
        guard.pending.extend(exchange);
        guard.context = context;
        guard.dirty = true;

        let due = immediate
            || match guard.last_replicated_at {
                None => true,
                Some(at) => elapsed_secs(at) >= self.cfg.replicate_after_seconds,
            };
        if due {
            match self.replicate(user_id, &guard.context).await {
                Ok(()) => {
                    guard.dirty = false;
                    guard.last_replicated_at = Some(Utc::now());
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "replication failed, context stays buffered");
                }
            }
        }

        if elapsed_secs(guard.captured_at) >= self.cfg.flush_interval_seconds {
            match self.flush_entry(user_id, &mut guard).await {
                Ok(()) => {
                    drop(guard);
                    self.buffer.remove(user_id);
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "durable flush failed, entry stays buffered");
                }
            }
        }
        Ok(())
    }

    /// Write the backup record and the lookup record for one user.
    async fn replicate(&self, user_id: i64, context: &ContextWindow) -> Result<()> {
        let backup = BackupRecord {
            context: context.clone(),
            timestamp: Utc::now(),
            version: BACKUP_RECORD_VERSION,
        };
        let backup_json = serde_json::to_string(&backup)?;
        let backup_ttl =
            Duration::from_secs(self.cfg.flush_interval_seconds + BACKUP_TTL_SLACK_SECONDS);
        self.replica
            .put(&CacheKeys::backup_key(user_id), &backup_json, backup_ttl)
            .await?;

        let context_json = serde_json::to_string(context)?;
        let context_key = CacheKeys::context_key(
            user_id,
            self.cfg.default_limit,
            self.cfg.default_max_age_hours,
        );
        self.replica
            .put(
                &context_key,
                &context_json,
                Duration::from_secs(self.cfg.context_ttl_seconds),
            )
            .await?;

        TraceEvent::ContextFlushed {
            user_id,
            tier: "replica".to_owned(),
        }
        .emit();
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Load path
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Look a context up buffer-first, then replica, then SQLite.
    /// Hits from the lower tiers repopulate the tiers above them.
    pub async fn load_context(
        &self,
        user_id: i64,
        limit: u32,
        max_age_hours: u32,
    ) -> Result<Option<ContextWindow>> {
        if let Some(entry) = self.buffer.get(user_id) {
            let guard = entry.lock().await;
            let max_age_secs = u64::from(max_age_hours) * 3600;
            if elapsed_secs(guard.captured_at) <= max_age_secs {
                return Ok(Some(guard.context.clone()));
            }
        }

        // The replica only ever holds the record written under the
        // standard parameters; other shapes go straight to SQLite.
        let standard = limit == self.cfg.default_limit && max_age_hours == self.cfg.default_max_age_hours;
        if standard {
            let key = CacheKeys::context_key(user_id, limit, max_age_hours);
            match self.replica.get(&key).await {
                Ok(Some(json)) => match serde_json::from_str::<ContextWindow>(&json) {
                    Ok(context) => {
                        self.buffer
                            .insert(user_id, BufferEntry::replicated(context.clone(), Utc::now()));
                        return Ok(Some(context));
                    }
                    Err(e) => {
                        tracing::warn!(user_id, error = %e, "unparseable replica context, falling through");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "replica read failed, falling through");
                }
            }
        }

        match self.durable.load_context(user_id, limit, max_age_hours).await? {
            Some(context) => {
                self.buffer
                    .insert(user_id, BufferEntry::replicated(context.clone(), Utc::now()));
                if standard {
                    if let Err(e) = self.replicate(user_id, &context).await {
                        tracing::warn!(user_id, error = %e, "replica repopulation failed");
                    }
                }
                Ok(Some(context))
            }
            None => Ok(None),
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Background flushing
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// One scheduler pass over every buffered user: replicate every
    /// dirty entry (plus clean ones whose replication is overdue), and
    /// move entries older than the flush interval into SQLite
    /// (dropping them from the buffer and deleting their backup
    /// record).
    pub async fn flush_cycle(&self) -> FlushStats {
        let mut stats = FlushStats::default();

        for user_id in self.buffer.user_ids() {
            let Some(entry) = self.buffer.get(user_id) else {
                continue;
            };
            let mut guard = entry.lock().await;

            let overdue = match guard.last_replicated_at {
                None => true,
                Some(at) => elapsed_secs(at) >= self.cfg.replicate_after_seconds,
            };
            if guard.dirty || overdue {
                match self.replicate(user_id, &guard.context).await {
                    Ok(()) => {
                        guard.dirty = false;
                        guard.last_replicated_at = Some(Utc::now());
                        stats.replicated += 1;
                    }
                    Err(e) => {
                        tracing::warn!(user_id, error = %e, "scheduled replication failed");
                    }
                }
            }

            if elapsed_secs(guard.captured_at) >= self.cfg.flush_interval_seconds {
                match self.flush_entry(user_id, &mut guard).await {
                    Ok(()) => {
                        drop(guard);
                        self.buffer.remove(user_id);
                        stats.flushed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(user_id, error = %e, "durable flush failed, retrying next cycle");
                    }
                }
            }
        }
        stats
    }

    /// Write queued exchanges into SQLite oldest-first. An exchange
    /// the durable tier rejects outright is dropped with an error log;
    /// a transient failure leaves it and everything behind it queued
    /// for the next attempt.
    async fn drain_pending(&self, user_id: i64, entry: &mut BufferEntry) -> Result<()> {
        while let Some(pending) = entry.pending.front() {
            match self.durable.save_exchange(user_id, pending).await {
                Ok(()) => {
                    entry.pending.pop_front();
                }
                Err(Error::InvalidInput(reason)) => {
                    tracing::error!(user_id, %reason, "unwritable exchange dropped");
                    entry.pending.pop_front();
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn flush_entry(&self, user_id: i64, entry: &mut BufferEntry) -> Result<()> {
        self.drain_pending(user_id, entry).await?;
        if let Err(e) = self.replica.delete(&CacheKeys::backup_key(user_id)).await {
            tracing::warn!(user_id, error = %e, "backup cleanup failed, record will expire on its own");
        }
        TraceEvent::ContextFlushed {
            user_id,
            tier: "durable".to_owned(),
        }
        .emit();
        Ok(())
    }

    /// Drain every buffered entry into SQLite. Called on shutdown.
    pub async fn close(&self) -> Result<()> {
        for user_id in self.buffer.user_ids() {
            let Some(entry) = self.buffer.get(user_id) else {
                continue;
            };
            let mut guard = entry.lock().await;
            if let Err(e) = self.flush_entry(user_id, &mut guard).await {
                tracing::error!(user_id, error = %e, "shutdown flush failed, exchange lost from buffer");
            }
            drop(guard);
            self.buffer.remove(user_id);
        }
        Ok(())
    }
}

fn elapsed_secs(since: DateTime<Utc>) -> u64 {
    (Utc::now() - since).num_seconds().max(0) as u64
}
