//! Crash recovery.
//!
//! On startup the replica tier is scanned for backup records left by a
//! process that died before its buffer reached SQLite. Each record that
//! parses rebuilds a clean buffer entry; records that do not parse are
//! logged and skipped so one corrupt value cannot block the rest.

use cv_domain::error::Result;
use cv_domain::keys::CacheKeys;
use cv_domain::trace::TraceEvent;

use crate::buffer::{BufferEntry, ContextBuffer};
use crate::replica::ReplicaStore;
use crate::tiered::BackupRecord;

/// Rebuild the buffer from surviving backup records. Returns the number
/// of users recovered.
pub async fn recover_contexts(
    buffer: &ContextBuffer,
    replica: &dyn ReplicaStore,
) -> Result<usize> {
    let keys = replica.scan(&CacheKeys::backup_prefix()).await?;
    let mut recovered = 0;

    for key in keys {
        let user_id = match CacheKeys::parse_backup_key(&key) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "skipping malformed backup key");
                continue;
            }
        };

        let value = match replica.get(&key).await {
            Ok(Some(v)) => v,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "backup fetch failed, skipping");
                continue;
            }
        };

        let record: BackupRecord = match serde_json::from_str(&value) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "skipping unparseable backup record");
                continue;
            }
        };

        // captured_at keeps the original capture time so the aged entry
        // still flushes on schedule rather than getting a fresh window.
        buffer.insert(
            user_id,
            BufferEntry::replicated(record.context, record.timestamp),
        );
        recovered += 1;
    }

    TraceEvent::ContextRecovered { users: recovered }.emit();
    Ok(recovered)
}
