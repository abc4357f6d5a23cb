//! # Talentgrid
//!
//! Core library of a country-sharded sport assessment platform.
//!
//! Tenant data is partitioned by country into fully isolated shards;
//! reference entities (sports, the assessment catalog, promo codes) are
//! kept present with matching primary keys across every shard. On top of
//! that sit the two coupled subsystems this crate exists for: per-viewer
//! visibility resolution over the assessment catalog, and the
//! assessor/assessed permission graph rewritten on every connection
//! lifecycle event.
//!
//! The crate is a library layer invoked in-process by a web tier; it
//! defines no wire format and performs no authentication. The identity
//! collaborator supplies a resolved shard key per request, and every
//! operation takes an explicit shard handle from there.

pub mod assessing;
pub mod config;
pub mod connections;
pub mod error;
pub mod model;
pub mod permissions;
pub mod shard;
pub mod store;
pub mod sync;
pub mod test_support;
pub mod tree;
pub mod visibility;

// Re-export main types for convenience
pub use assessing::{AssessmentRecorder, Correction, SubmissionItem};
pub use config::{ConnectionConfig, PlatformConfig};
pub use connections::{
    ConnectionKind, ConnectionNotifier, ConnectionOrchestrator, GrantRule, NoopNotifier, Party,
};
pub use error::{BatchOutcome, CoreError, PartialSync, Result};
pub use model::{
    Assessed, Assessment, AssessmentFormat, AssessmentId, AssessmentSubCategory,
    AssessmentTopCategory, Assessor, ChosenSport, Coaching, FormatId, Invite, InviteId, InviteStatus,
    Organisation, OrgId, Promocode, PromocodeId, RecordedValue, RecordedValueId, RelationshipKind,
    ShardKey, Sport, SportId, SubCategoryId, SubCategoryParent, Team, TeamId, TopCategoryId,
    TopCategoryPermission, User, UserId, UserRole,
};
pub use permissions::{PermissionFilter, PermissionGraph, PermissionUpdate};
pub use shard::{ShardHandle, ShardRegistry};
pub use store::ShardStore;
pub use sync::{ReferenceSyncWriter, SyncedKind, SyncedRecord};
pub use tree::{AssessmentTree, TreeCache};
pub use visibility::{RecordedFilter, RenderedTopCategory, VisibilityResolver};

use std::sync::Arc;

/// Main entry point wiring the registry, the tree cache and the
/// notification collaborator together. Hosts that prefer assembling the
/// components themselves can use the modules directly; the facade only
/// adds the cache-invalidation bookkeeping around synced catalog writes.
pub struct Platform {
    registry: ShardRegistry,
    config: PlatformConfig,
    tree_cache: TreeCache,
    notifier: Box<dyn ConnectionNotifier>,
}

impl Platform {
    /// Create a platform over the configured shard set.
    pub fn new(config: PlatformConfig) -> Self {
        let registry = ShardRegistry::new(&config);
        Self {
            registry,
            config,
            tree_cache: TreeCache::new(),
            notifier: Box::new(NoopNotifier),
        }
    }

    /// Attach a notification collaborator (email etc.).
    pub fn with_notifier(mut self, notifier: Box<dyn ConnectionNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    pub fn registry(&self) -> &ShardRegistry {
        &self.registry
    }

    /// Resolve a tenant key to its shard handle.
    pub fn resolve(&self, key: &ShardKey) -> Result<ShardHandle> {
        self.registry.resolve(key)
    }

    // ---- synced reference writes ----------------------------------------

    /// Create a reference entity on every shard and drop the stale
    /// catalog caches.
    pub fn create_synced(&self, record: SyncedRecord) -> Result<u32> {
        let result = ReferenceSyncWriter::new(&self.registry).create_synced(record);
        // Even a partial write changed some shards' catalogs.
        self.tree_cache.invalidate_all();
        result
    }

    /// Replay an existing reference row onto shards missing it.
    pub fn propagate_existing(&self, kind: SyncedKind, id: u32) -> Result<()> {
        let result = ReferenceSyncWriter::new(&self.registry).propagate_existing(kind, id);
        self.tree_cache.invalidate_all();
        result
    }

    /// Delete a reference entity from every shard.
    pub fn delete_synced(&self, kind: SyncedKind, id: u32) -> Result<()> {
        let result = ReferenceSyncWriter::new(&self.registry).delete_synced(kind, id);
        self.tree_cache.invalidate_all();
        result
    }

    // ---- per-shard components -------------------------------------------

    /// The shard's cached catalog tree.
    pub fn catalog(&self, shard: &ShardHandle) -> Arc<AssessmentTree> {
        self.tree_cache.get(shard)
    }

    /// Drop one shard's cached tree after a shard-local admin edit.
    pub fn invalidate_catalog(&self, key: &ShardKey) {
        self.tree_cache.invalidate(key);
    }

    pub fn visibility<'a>(&self, shard: &'a ShardHandle) -> VisibilityResolver<'a> {
        VisibilityResolver::new(shard, self.tree_cache.get(shard))
    }

    pub fn connections<'a>(&'a self, shard: &'a ShardHandle) -> ConnectionOrchestrator<'a> {
        ConnectionOrchestrator::new(shard, &self.config.connection, self.notifier.as_ref())
    }

    pub fn recorder<'a>(&'a self, shard: &'a ShardHandle) -> AssessmentRecorder<'a> {
        AssessmentRecorder::new(shard, &self.config.connection, self.tree_cache.get(shard))
    }

    pub fn permissions<'a>(&self, shard: &'a ShardHandle) -> PermissionGraph<'a> {
        PermissionGraph::new(shard, self.config.connection.default_open_top_category)
    }
}
