//! # Permission Graph
//!
//! Access resolution and the explicit update endpoint over the
//! `(assessed, assessor, top category)` grant rows. Row creation belongs
//! to the connection fan-out (`crate::connections`); this module answers
//! "may this assessor touch this top category of this assessed" and lets
//! an assessed user flip individual grants.

use crate::error::{BatchOutcome, CoreError, Result};
use crate::model::{Assessor, TopCategoryId, TopCategoryPermission, UserId};
use crate::shard::ShardHandle;

/// One permission update request (the assessed user flipping a grant).
#[derive(Debug, Clone, Copy)]
pub struct PermissionUpdate {
    pub assessor: UserId,
    pub top_category: TopCategoryId,
    pub assessor_has_access: bool,
}

/// Query filter for listing an assessed user's grant rows.
#[derive(Debug, Clone, Default)]
pub struct PermissionFilter {
    pub top_categories: Option<Vec<TopCategoryId>>,
    pub assessor: Option<UserId>,
    pub assessor_has_access: Option<bool>,
}

/// Read/update surface of one shard's permission graph.
pub struct PermissionGraph<'a> {
    shard: &'a ShardHandle,
    /// The top category open to athletes by default within an active
    /// connection, even when no row was materialized for it.
    default_open: TopCategoryId,
}

impl<'a> PermissionGraph<'a> {
    pub fn new(shard: &'a ShardHandle, default_open: TopCategoryId) -> Self {
        Self {
            shard,
            default_open,
        }
    }

    /// Whether the assessor may record under this top category.
    ///
    /// Self-assessment is always allowed. Otherwise the row decides;
    /// absence of a row means no access, except the default-open top
    /// category for an athlete assessor within an active connection
    /// (`connected` is the caller-established connection state).
    pub fn has_access(
        &self,
        assessor: &Assessor,
        assessed: UserId,
        top_category: TopCategoryId,
        connected: bool,
    ) -> bool {
        if assessor.user == assessed {
            return true;
        }
        match self.shard.permission(assessed, assessor.user, top_category) {
            Some(access) => access,
            None => {
                connected && assessor.role.is_athlete() && top_category == self.default_open
            }
        }
    }

    pub fn require_access(
        &self,
        assessor: &Assessor,
        assessed: UserId,
        top_category: TopCategoryId,
        connected: bool,
    ) -> Result<()> {
        if self.has_access(assessor, assessed, top_category, connected) {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied {
                assessor: assessor.user,
                assessed,
                top_category,
            })
        }
    }

    /// The assessed user's grant rows, filtered, ordered by (assessor,
    /// top category).
    pub fn list_for_assessed(
        &self,
        assessed: UserId,
        filter: &PermissionFilter,
    ) -> Vec<TopCategoryPermission> {
        self.shard
            .permissions_for_assessed(assessed)
            .into_iter()
            .filter(|row| {
                filter
                    .top_categories
                    .as_ref()
                    .is_none_or(|ids| ids.contains(&row.top_category))
                    && filter.assessor.is_none_or(|a| row.assessor == a)
                    && filter
                        .assessor_has_access
                        .is_none_or(|access| row.assessor_has_access == access)
            })
            .collect()
    }

    /// Apply a batch of grant flips for one assessed user. Each update
    /// must target an existing row (the fan-out materializes them; this
    /// endpoint never creates rows) and an existing assessor account.
    pub fn update_many(
        &self,
        assessed: UserId,
        updates: Vec<PermissionUpdate>,
    ) -> BatchOutcome<TopCategoryPermission, PermissionUpdate> {
        let mut outcome = BatchOutcome::new();
        for update in updates {
            match self.apply_update(assessed, update) {
                Ok(row) => outcome.valid.push(row),
                Err(e) => outcome.rejected.push((update, e)),
            }
        }
        outcome
    }

    fn apply_update(
        &self,
        assessed: UserId,
        update: PermissionUpdate,
    ) -> Result<TopCategoryPermission> {
        // The assessor must be a real account on this shard.
        self.shard.user(update.assessor)?;
        self.shard.set_permission(
            assessed,
            update.assessor,
            update.top_category,
            update.assessor_has_access,
        )?;
        Ok(TopCategoryPermission {
            assessed,
            assessor: update.assessor,
            top_category: update.top_category,
            assessor_has_access: update.assessor_has_access,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ShardKey, UserRole, DEFAULT_OPEN_TOP_CATEGORY};
    use crate::shard::ShardRegistry;
    use chrono::Utc;

    fn shard() -> ShardHandle {
        ShardRegistry::from_keys([ShardKey::new("ca")])
            .resolve(&ShardKey::new("ca"))
            .unwrap()
    }

    #[test]
    fn test_self_assessment_always_allowed() {
        let shard = shard();
        let user = shard.create_user("a@example.com", UserRole::Athlete, Utc::now());
        let graph = PermissionGraph::new(&shard, DEFAULT_OPEN_TOP_CATEGORY);
        let assessor = shard.assessor_of(user.id).unwrap();
        assert!(graph.has_access(&assessor, user.id, TopCategoryId(3), false));
    }

    #[test]
    fn test_default_open_category_for_connected_athlete() {
        let shard = shard();
        let athlete = shard.create_user("a@example.com", UserRole::Athlete, Utc::now());
        let coach = shard.create_user("c@example.com", UserRole::Coach, Utc::now());
        let graph = PermissionGraph::new(&shard, DEFAULT_OPEN_TOP_CATEGORY);
        let assessor = shard.assessor_of(athlete.id).unwrap();

        // No rows at all: only the default-open category, only while
        // connected.
        assert!(graph.has_access(&assessor, coach.id, DEFAULT_OPEN_TOP_CATEGORY, true));
        assert!(!graph.has_access(&assessor, coach.id, DEFAULT_OPEN_TOP_CATEGORY, false));
        assert!(!graph.has_access(&assessor, coach.id, TopCategoryId(1), true));

        // An explicit closed row wins over the default.
        shard.grant_permission(coach.id, athlete.id, DEFAULT_OPEN_TOP_CATEGORY, false);
        assert!(!graph.has_access(&assessor, coach.id, DEFAULT_OPEN_TOP_CATEGORY, true));
    }

    #[test]
    fn test_update_many_partitions_outcomes() {
        let shard = shard();
        let athlete = shard.create_user("a@example.com", UserRole::Athlete, Utc::now());
        let coach = shard.create_user("c@example.com", UserRole::Coach, Utc::now());
        shard.grant_permission(athlete.id, coach.id, TopCategoryId(1), true);

        let graph = PermissionGraph::new(&shard, DEFAULT_OPEN_TOP_CATEGORY);
        let outcome = graph.update_many(
            athlete.id,
            vec![
                PermissionUpdate {
                    assessor: coach.id,
                    top_category: TopCategoryId(1),
                    assessor_has_access: false,
                },
                // No row for this category: rejected, not created.
                PermissionUpdate {
                    assessor: coach.id,
                    top_category: TopCategoryId(2),
                    assessor_has_access: true,
                },
            ],
        );
        assert_eq!(outcome.valid.len(), 1);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(
            shard.permission(athlete.id, coach.id, TopCategoryId(1)),
            Some(false)
        );
        assert_eq!(shard.permission(athlete.id, coach.id, TopCategoryId(2)), None);
    }
}
