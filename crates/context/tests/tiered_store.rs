//! End-to-end behavior of the three-tier context store: save/load
//! through the tiers, scheduled flushing into SQLite, and rebuilding
//! the buffer from backup records after a simulated crash.

use std::sync::Arc;

use cv_context::{
    recover_contexts, BufferEntry, ContextStore, MemoryReplica, PendingExchange, ReplicaStore,
    SqliteStore,
};
use cv_domain::config::PersistenceConfig;
use cv_domain::context::ContextWindow;
use cv_domain::keys::CacheKeys;
use cv_domain::message::{ChatTurn, Role};

fn window(user_text: &str, assistant_text: &str) -> ContextWindow {
    let mut window = ContextWindow::new();
    window.push_user_turn(ChatTurn::now(Role::User, user_text));
    window.push_assistant_turn(ChatTurn::now(Role::Assistant, assistant_text));
    window
}

fn exchange(user_text: &str, assistant_text: &str) -> PendingExchange {
    PendingExchange {
        user_message: user_text.into(),
        assistant_message: assistant_text.into(),
        model: "test-model".into(),
        tokens_used: 12,
        latency_seconds: 0.3,
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    replica: Arc<MemoryReplica>,
    durable: Arc<SqliteStore>,
    cfg: PersistenceConfig,
}

impl Fixture {
    fn new(cfg: PersistenceConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let durable = Arc::new(SqliteStore::open(&dir.path().join("conv.db")).unwrap());
        Self {
            _dir: dir,
            replica: Arc::new(MemoryReplica::new()),
            durable,
            cfg,
        }
    }

    /// A store over the fixture's shared tiers. Calling this twice
    /// models a process restart: fresh buffer, surviving replica and
    /// SQLite.
    fn store(&self) -> ContextStore {
        ContextStore::new(self.replica.clone(), self.durable.clone(), self.cfg.clone())
    }
}

/// Flush everything as soon as the scheduler looks at it.
fn eager_cfg() -> PersistenceConfig {
    PersistenceConfig {
        replicate_after_seconds: 0,
        flush_interval_seconds: 0,
        ..PersistenceConfig::default()
    }
}

#[tokio::test]
async fn saved_context_loads_back_from_the_buffer() {
    let fx = Fixture::new(PersistenceConfig::default());
    let store = fx.store();

    store
        .save_context(1, window("hi", "hello"), None, false)
        .await
        .unwrap();

    let loaded = store.load_context(1, 6, 12).await.unwrap().unwrap();
    assert_eq!(loaded.user_turns[0].text, "hi");
    assert_eq!(loaded.assistant_turns[0].text, "hello");
}

#[tokio::test]
async fn first_save_replicates_and_survives_a_restart() {
    let fx = Fixture::new(PersistenceConfig::default());

    fx.store()
        .save_context(1, window("hi", "hello"), None, false)
        .await
        .unwrap();

    // New process: empty buffer, replica intact.
    let restarted = fx.store();
    assert!(restarted.buffer().is_empty());
    let loaded = restarted.load_context(1, 6, 12).await.unwrap().unwrap();
    assert_eq!(loaded.user_turns[0].text, "hi");
    // The replica hit repopulated the buffer.
    assert_eq!(restarted.buffer().len(), 1);
}

#[tokio::test]
async fn nonstandard_lookup_shape_bypasses_the_replica() {
    let fx = Fixture::new(PersistenceConfig::default());

    let writer = fx.store();
    writer
        .save_context(1, window("hi", "hello"), Some(exchange("hi", "hello")), true)
        .await
        .unwrap();
    // Drain the exchange into SQLite so the durable tier has rows.
    writer.close().await.unwrap();

    // limit=2 never matches the replica record; it must come from SQLite.
    let loaded = fx.store().load_context(1, 2, 12).await.unwrap().unwrap();
    assert_eq!(loaded.user_turns[0].text, "hi");
}

#[tokio::test]
async fn flush_cycle_ages_entries_into_sqlite() {
    let fx = Fixture::new(eager_cfg());
    let store = fx.store();

    let mut entry = BufferEntry::new(window("hi", "hello"));
    entry.pending.push_back(exchange("hi", "hello"));
    store.buffer().insert(1, entry);

    let stats = store.flush_cycle().await;
    assert_eq!(stats.flushed, 1);

    // Flushed: gone from the buffer, backup deleted, rows in SQLite.
    assert!(store.buffer().is_empty());
    assert!(fx.replica.get(&CacheKeys::backup_key(1)).await.unwrap().is_none());
    assert_eq!(fx.durable.row_count(1).await.unwrap(), 2);
}

#[tokio::test]
async fn over_age_save_flushes_on_the_request_path() {
    let fx = Fixture::new(eager_cfg());
    let store = fx.store();

    // With a zero flush interval the save itself ages the entry out.
    store
        .save_context(1, window("hi", "hello"), Some(exchange("hi", "hello")), true)
        .await
        .unwrap();

    assert!(store.buffer().is_empty());
    assert_eq!(fx.durable.row_count(1).await.unwrap(), 2);
}

#[tokio::test]
async fn flush_cycle_leaves_unaged_entries_alone() {
    let fx = Fixture::new(PersistenceConfig::default());
    let store = fx.store();

    store
        .save_context(1, window("hi", "hello"), Some(exchange("hi", "hello")), false)
        .await
        .unwrap();

    let stats = store.flush_cycle().await;
    assert_eq!(stats.flushed, 0);
    assert_eq!(store.buffer().len(), 1);
    assert_eq!(fx.durable.row_count(1).await.unwrap(), 0);
}

#[tokio::test]
async fn flush_cycle_replicates_dirty_entries_exactly_once() {
    let fx = Fixture::new(PersistenceConfig::default());
    let store = fx.store();

    // Dirty, never-replicated entries straight into the buffer.
    for user_id in 1..=3 {
        store
            .buffer()
            .insert(user_id, BufferEntry::new(window("hi", "hello")));
    }

    let first = store.flush_cycle().await;
    assert_eq!(first.replicated, 3);
    for user_id in 1..=3 {
        assert!(fx
            .replica
            .get(&CacheKeys::backup_key(user_id))
            .await
            .unwrap()
            .is_some());
    }

    // Now clean with a fresh last_replicated_at: nothing to do.
    let second = store.flush_cycle().await;
    assert_eq!(second.replicated, 0);

    // A save inside the dirty window re-dirties an entry without an
    // immediate replication; the next cycle still picks it up.
    store
        .save_context(2, window("more", "sure"), None, false)
        .await
        .unwrap();
    {
        let entry = store.buffer().get(2).unwrap();
        assert!(entry.lock().await.dirty);
    }

    let third = store.flush_cycle().await;
    assert_eq!(third.replicated, 1);
    let entry = store.buffer().get(2).unwrap();
    assert!(!entry.lock().await.dirty);
}

#[tokio::test]
async fn unwritable_exchange_does_not_wedge_the_queue() {
    let fx = Fixture::new(PersistenceConfig::default());
    let store = fx.store();

    // An exchange the durable tier always rejects, already queued.
    let mut poisoned = exchange("hi", "hello");
    poisoned.latency_seconds = 400.0;
    let mut entry = BufferEntry::new(window("hi", "hello"));
    entry.pending.push_back(poisoned);
    store.buffer().insert(1, entry);

    store
        .save_context(
            1,
            window("hi there", "hello again"),
            Some(exchange("hi there", "hello again")),
            false,
        )
        .await
        .unwrap();

    // The rejected exchange is gone; the new one is still queued.
    {
        let entry = store.buffer().get(1).unwrap();
        let guard = entry.lock().await;
        assert_eq!(guard.pending.len(), 1);
        assert_eq!(guard.pending[0].user_message, "hi there");
    }

    store.close().await.unwrap();
    assert_eq!(fx.durable.row_count(1).await.unwrap(), 2);
}

#[tokio::test]
async fn crash_recovery_rebuilds_the_buffer_from_backups() {
    let fx = Fixture::new(PersistenceConfig::default());

    let first = fx.store();
    first
        .save_context(1, window("hi", "hello"), None, true)
        .await
        .unwrap();
    first
        .save_context(2, window("hey", "howdy"), None, true)
        .await
        .unwrap();
    drop(first); // Crash: buffer lost without a flush.

    let restarted = fx.store();
    let recovered = recover_contexts(restarted.buffer(), fx.replica.as_ref())
        .await
        .unwrap();
    assert_eq!(recovered, 2);

    let loaded = restarted.load_context(2, 6, 12).await.unwrap().unwrap();
    assert_eq!(loaded.user_turns[0].text, "hey");
}

#[tokio::test]
async fn corrupt_backup_record_is_skipped_not_fatal() {
    let fx = Fixture::new(PersistenceConfig::default());

    fx.store()
        .save_context(1, window("hi", "hello"), None, true)
        .await
        .unwrap();
    fx.replica
        .put(
            &CacheKeys::backup_key(2),
            "not json",
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap();

    let restarted = fx.store();
    let recovered = recover_contexts(restarted.buffer(), fx.replica.as_ref())
        .await
        .unwrap();
    assert_eq!(recovered, 1);
    assert!(restarted.buffer().get(1).is_some());
    assert!(restarted.buffer().get(2).is_none());
}

#[tokio::test]
async fn durable_flush_survives_full_restart_without_replica() {
    let fx = Fixture::new(eager_cfg());

    let store = fx.store();
    store
        .save_context(1, window("hi", "hello"), Some(exchange("hi", "hello")), true)
        .await
        .unwrap();
    store.flush_cycle().await;

    // Replica wiped too: only SQLite is left.
    fx.replica
        .delete(&CacheKeys::context_key(1, 6, 12))
        .await
        .unwrap();

    let restarted = fx.store();
    let loaded = restarted.load_context(1, 6, 12).await.unwrap().unwrap();
    assert_eq!(loaded.user_turns[0].text, "hi");
    assert_eq!(loaded.assistant_turns[0].text, "hello");
}

#[tokio::test]
async fn unknown_user_is_none_across_all_tiers() {
    let fx = Fixture::new(PersistenceConfig::default());
    assert!(fx.store().load_context(99, 6, 12).await.unwrap().is_none());
}
