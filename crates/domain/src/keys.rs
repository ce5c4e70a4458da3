//! Centralized cache-key management.
//!
//! Every replica-tier key is `{prefix}:{version}:{components...}`. The
//! version component lets a new key layout migrate without colliding
//! with old entries. Identical logical requests always produce the same
//! key.

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Schema version embedded in every key.
pub const KEY_VERSION: &str = "v1";

const PREFIX_USER: &str = "user";
const PREFIX_CONTEXT: &str = "conv_ctx";
const PREFIX_BACKUP: &str = "conv_backup";

/// Builder for the versioned replica-tier key scheme.
pub struct CacheKeys;

impl CacheKeys {
    /// Key for a user record.
    pub fn user_key(user_id: i64) -> String {
        format!("{PREFIX_USER}:{KEY_VERSION}:{user_id}")
    }

    /// Key for a parameterized context lookup. Window size and max-age
    /// are part of the key so differently-parameterized lookups do not
    /// collide.
    pub fn context_key(user_id: i64, limit: u32, max_age_hours: u32) -> String {
        format!("{PREFIX_CONTEXT}:{KEY_VERSION}:{user_id}:{limit}:{max_age_hours}")
    }

    /// Key for the crash-recovery backup of a user's context.
    pub fn backup_key(user_id: i64) -> String {
        format!("{PREFIX_BACKUP}:{KEY_VERSION}:{user_id}")
    }

    /// Prefix matching every backup key, for startup recovery scans.
    pub fn backup_prefix() -> String {
        format!("{PREFIX_BACKUP}:{KEY_VERSION}:")
    }

    /// Content-addressed key: `{prefix}:{version}:hash:{16 hex chars}`.
    pub fn hash_key(prefix: &str, payload: &[u8]) -> String {
        let digest = Sha256::digest(payload);
        let hash = hex::encode(&digest[..8]);
        format!("{prefix}:{KEY_VERSION}:hash:{hash}")
    }

    /// Extract the user id from a backup key.
    pub fn parse_backup_key(key: &str) -> Result<i64> {
        let parsed = Self::parse(key)?;
        if parsed.prefix != PREFIX_BACKUP {
            return Err(Error::Storage(format!(
                "not a backup key: {key}"
            )));
        }
        parsed
            .components
            .first()
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| Error::Storage(format!("backup key missing user id: {key}")))
    }

    /// Split a key into its prefix, version, and trailing components.
    pub fn parse(key: &str) -> Result<ParsedKey<'_>> {
        let mut parts = key.split(':');
        let (prefix, version) = match (parts.next(), parts.next()) {
            (Some(p), Some(v)) if !p.is_empty() && !v.is_empty() => (p, v),
            _ => return Err(Error::Storage(format!("malformed cache key: {key}"))),
        };
        Ok(ParsedKey {
            prefix,
            version,
            components: parts.collect(),
        })
    }
}

/// A cache key decomposed into its parts.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub prefix: &'a str,
    pub version: &'a str,
    pub components: Vec<&'a str>,
}
