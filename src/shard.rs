//! # Shard Registry
//!
//! Static mapping from tenant keys (country codes) to shard handles. The
//! registry is built once from configuration at process start and is a
//! pure lookup from then on: resolution either returns a configured shard
//! or fails, never a default.

use crate::config::PlatformConfig;
use crate::error::{CoreError, Result};
use crate::model::{ShardKey, User};
use crate::store::ShardStore;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handle to one resolved shard. Holding a handle is the only way to reach
/// tenant rows, which makes "forgot to pick a shard" a type error instead
/// of a read from the wrong tenant's data.
pub type ShardHandle = Arc<ShardStore>;

/// The configured set of country shards.
#[derive(Debug)]
pub struct ShardRegistry {
    shards: BTreeMap<ShardKey, ShardHandle>,
}

impl ShardRegistry {
    /// Build the registry from platform configuration.
    pub fn new(config: &PlatformConfig) -> Self {
        Self::from_keys(config.shards.iter().cloned())
    }

    pub fn from_keys<I: IntoIterator<Item = ShardKey>>(keys: I) -> Self {
        let shards = keys
            .into_iter()
            .map(|key| {
                let store = Arc::new(ShardStore::new(key.clone()));
                (key, store)
            })
            .collect();
        Self { shards }
    }

    /// Resolve a tenant key to its shard. Unconfigured keys are a fatal
    /// misconfiguration, surfaced as [`CoreError::UnknownShard`].
    pub fn resolve(&self, key: &ShardKey) -> Result<ShardHandle> {
        self.shards
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::UnknownShard(key.clone()))
    }

    /// Every configured shard, in key order.
    pub fn all_shards(&self) -> Vec<ShardHandle> {
        self.shards.values().cloned().collect()
    }

    pub fn keys(&self) -> Vec<ShardKey> {
        self.shards.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Scan every shard for a user by email. Used by flows that start
    /// from an email address before any shard is known (login, invite
    /// confirmation).
    pub fn find_user_shard(&self, email: &str) -> Option<(ShardHandle, User)> {
        for shard in self.shards.values() {
            if let Some(user) = shard.user_by_email(email) {
                return Some((shard.clone(), user));
            }
        }
        None
    }
}
