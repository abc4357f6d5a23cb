//! # Configuration
//!
//! Tunables for the connection workflow and shard set. Plain structs with
//! presets; hosts can deserialize them from their own config files.

use crate::model::{ShardKey, TopCategoryId, DEFAULT_OPEN_TOP_CATEGORY};
use serde::Deserialize;

/// Timing and defaults for invites, cooldowns and permission grants.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Seconds after which a pending invite expires and can no longer be
    /// confirmed.
    pub invite_token_expires_secs: i64,
    /// Seconds during which re-inviting the same recipient is rejected.
    pub invite_resend_timeout_secs: i64,
    /// Cooldown window for athlete-to-coach assessments.
    pub assessment_cooldown_secs: i64,
    /// The top category athletes get open access to on every connection.
    pub default_open_top_category: TopCategoryId,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            invite_token_expires_secs: 604_800,
            invite_resend_timeout_secs: 86_400,
            assessment_cooldown_secs: 2_592_000,
            default_open_top_category: DEFAULT_OPEN_TOP_CATEGORY,
        }
    }
}

impl ConnectionConfig {
    /// Short windows for test environments.
    pub fn short_windows() -> Self {
        Self {
            invite_token_expires_secs: 60,
            invite_resend_timeout_secs: 5,
            assessment_cooldown_secs: 60,
            default_open_top_category: DEFAULT_OPEN_TOP_CATEGORY,
        }
    }
}

/// Static platform configuration loaded at process start.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfig {
    /// The full set of country shards. Fixed for the process lifetime.
    pub shards: Vec<ShardKey>,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl PlatformConfig {
    pub fn new<I, S>(shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            shards: shards.into_iter().map(|s| ShardKey::new(s)).collect(),
            connection: ConnectionConfig::default(),
        }
    }

    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}
