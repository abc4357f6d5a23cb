//! # Error Types
//!
//! The error taxonomy shared by every component of the crate.
//! Shard-resolution and sync errors abort the triggering workflow;
//! permission, cooldown and format errors are per-item outcomes that
//! batch operations accumulate instead of failing wholesale.

use crate::model::{ShardKey, TopCategoryId, UserId};
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Outcome of a cross-shard write that did not reach every shard.
///
/// Each shard is an independent unit of work; already-committed shards are
/// never rolled back. Callers retry the failed subset (writes are upserts
/// keyed by id, so re-running a succeeded shard is harmless).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialSync {
    /// Shards the write committed on.
    pub succeeded: Vec<ShardKey>,
    /// Shards the write failed on, with the per-shard reason.
    pub failed: Vec<(ShardKey, String)>,
}

impl std::fmt::Display for PartialSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} shard(s) succeeded, {} failed",
            self.succeeded.len(),
            self.failed.len()
        )?;
        for (shard, reason) in &self.failed {
            write!(f, "; {shard}: {reason}")?;
        }
        Ok(())
    }
}

/// Errors produced by the platform core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The tenant key does not map to any configured shard. Fatal
    /// misconfiguration; never falls back to a default shard.
    #[error("unknown shard: {0}")]
    UnknownShard(ShardKey),

    /// A synchronized write reached some shards but not all of them.
    /// Recoverable by retrying the failed subset.
    #[error("partial sync: {0}")]
    PartialSync(PartialSync),

    /// The assessor has no access to the assessed user's top category.
    #[error("assessor {assessor} has no access to assess {assessed} in top category {top_category}")]
    PermissionDenied {
        assessor: UserId,
        assessed: UserId,
        top_category: TopCategoryId,
    },

    /// The athlete-to-coach assessment rate limit is still active.
    #[error("coach was assessed recently; retry in {remaining_secs}s")]
    CooldownActive { remaining_secs: i64 },

    /// A write would violate a data-integrity invariant (for example an
    /// assessment flagged both private and public-everywhere).
    #[error("integrity conflict: {0}")]
    IntegrityConflict(String),

    /// A referenced row does not exist on the target shard.
    #[error("unknown {kind}: {id}")]
    UnknownEntity { kind: &'static str, id: String },

    /// The assessor and assessed are not connected (directly or through a
    /// shared team).
    #[error("users {assessor} and {assessed} are not connected")]
    NotConnected { assessor: UserId, assessed: UserId },

    /// The submitted value does not match the assessment's format.
    #[error("wrong value format: {expected}")]
    InvalidValue { expected: String },

    /// The assessment does not allow this assessor/assessed relationship
    /// direction.
    #[error("relationship between {assessor} and {assessed} cannot use this assessment")]
    InvalidRelationship { assessor: UserId, assessed: UserId },

    /// An invite could not be created or confirmed.
    #[error("invite rejected: {0}")]
    InviteRejected(String),
}

impl CoreError {
    /// Shorthand for a missing-row error.
    pub fn unknown(kind: &'static str, id: impl ToString) -> Self {
        CoreError::UnknownEntity {
            kind,
            id: id.to_string(),
        }
    }
}

/// Per-item partition for bulk operations: each item independently
/// succeeds (`valid`) or is rejected with its error, instead of failing
/// the batch wholesale.
#[derive(Debug)]
pub struct BatchOutcome<V, I = V> {
    pub valid: Vec<V>,
    pub rejected: Vec<(I, CoreError)>,
}

impl<V, I> BatchOutcome<V, I> {
    pub fn new() -> Self {
        Self {
            valid: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Whether every item went through.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ShardKey;

    #[test]
    fn test_partial_sync_display() {
        let err = CoreError::PartialSync(PartialSync {
            succeeded: vec![ShardKey::new("ca")],
            failed: vec![(ShardKey::new("us"), "copy diverged".to_string())],
        });
        let text = err.to_string();
        assert!(text.contains("1 shard(s) succeeded"));
        assert!(text.contains("us: copy diverged"));
    }

    #[test]
    fn test_unknown_entity_shorthand() {
        let err = CoreError::unknown("team", 7);
        assert_eq!(err.to_string(), "unknown team: 7");
    }
}
