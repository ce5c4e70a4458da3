//! Content-addressed, TTL-bounded response cache.
//!
//! Key = sha256 over the ordered (role, text) pairs of the history plus
//! the provider id, so identical prefixes routed to different providers
//! cache independently. Expired entries are evicted lazily on lookup.
//! A hit returns a clone with `cached = true`; the stored original keeps
//! `cached = false` and is never handed out directly.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use cv_domain::keys::CacheKeys;
use cv_domain::message::{ChatTurn, GeneratedReply};
use parking_lot::Mutex;

struct CacheEntry {
    reply: GeneratedReply,
    stored_at: Instant,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Deterministic key for a (history, provider) pair.
    pub fn key_for(history: &[ChatTurn], provider_id: &str) -> String {
        let mut payload = Vec::new();
        for turn in history {
            payload.extend_from_slice(turn.role.as_str().as_bytes());
            payload.push(0);
            payload.extend_from_slice(turn.text.as_bytes());
            payload.push(0);
        }
        payload.extend_from_slice(provider_id.as_bytes());
        CacheKeys::hash_key("resp", &payload)
    }

    /// Look up a reply. A hit is returned as a copy marked `cached`, with
    /// near-zero latency as seen by the caller.
    pub fn get(&self, history: &[ChatTurn], provider_id: &str) -> Option<GeneratedReply> {
        let key = Self::key_for(history, provider_id);
        let mut entries = self.entries.lock();

        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                let mut reply = entry.reply.clone();
                reply.cached = true;
                reply.latency_seconds = 0.01;
                Some(reply)
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a freshly generated reply. Re-caching the same key is
    /// idempotent.
    pub fn put(&self, history: &[ChatTurn], provider_id: &str, reply: &GeneratedReply) {
        let key = Self::key_for(history, provider_id);
        self.entries.lock().insert(
            key,
            CacheEntry {
                reply: reply.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cv_domain::message::Role;

    fn reply(text: &str) -> GeneratedReply {
        GeneratedReply {
            text: text.into(),
            model: "m".into(),
            tokens_used: 3,
            latency_seconds: 1.2,
            provider: "p".into(),
            cached: false,
            metadata: None,
        }
    }

    fn history(text: &str) -> Vec<ChatTurn> {
        vec![ChatTurn::new(Role::User, text)]
    }

    #[test]
    fn hit_is_marked_cached_without_mutating_stored_value() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put(&history("hi"), "p", &reply("hello"));

        let hit = cache.get(&history("hi"), "p").unwrap();
        assert!(hit.cached);
        assert_eq!(hit.text, "hello");

        // A second hit still works and is still flagged; the stored
        // original was not aliased or mutated.
        let again = cache.get(&history("hi"), "p").unwrap();
        assert!(again.cached);
    }

    #[test]
    fn providers_cache_independently() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put(&history("hi"), "primary", &reply("a"));
        assert!(cache.get(&history("hi"), "secondary").is_none());
    }

    #[test]
    fn expired_entries_evicted_on_lookup() {
        let cache = ResponseCache::new(Duration::from_millis(0));
        cache.put(&history("hi"), "p", &reply("a"));
        assert!(cache.get(&history("hi"), "p").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn clear_empties_everything() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put(&history("a"), "p", &reply("1"));
        cache.put(&history("b"), "p", &reply("2"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
