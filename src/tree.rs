//! # Assessment Tree
//!
//! Immutable snapshot of one shard's assessment catalog
//! (top category -> sub category -> assessment) with parent/child indexes,
//! plus the per-shard cache. The tree is read-mostly reference data:
//! admin writes invalidate the owning shard's cache entry, reads never do.
//! Shards never share tree instances even when the content is nominally
//! identical, because each shard's copy may diverge after creation.

use crate::model::{
    Assessment, AssessmentId, AssessmentSubCategory, AssessmentTopCategory, ShardKey,
    SubCategoryId, SubCategoryParent, TopCategoryId,
};
use crate::shard::ShardHandle;
use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Immutable, indexed snapshot of a shard's catalog.
#[derive(Debug)]
pub struct AssessmentTree {
    top_categories: Vec<AssessmentTopCategory>,
    sub_categories: FxHashMap<SubCategoryId, AssessmentSubCategory>,
    assessments: FxHashMap<AssessmentId, Assessment>,
    /// Children, id-ordered, per parent.
    subs_under_top: FxHashMap<TopCategoryId, Vec<SubCategoryId>>,
    subs_under_sub: FxHashMap<SubCategoryId, Vec<SubCategoryId>>,
    assessments_under_sub: FxHashMap<SubCategoryId, Vec<AssessmentId>>,
}

impl AssessmentTree {
    /// Build the snapshot from the shard's current catalog rows. The
    /// store returns id-ordered rows, so child lists come out id-ordered
    /// without re-sorting.
    pub fn load(shard: &ShardHandle) -> Self {
        let top_categories = shard.top_categories();
        let mut sub_categories = FxHashMap::default();
        let mut assessments = FxHashMap::default();
        let mut subs_under_top: FxHashMap<TopCategoryId, Vec<SubCategoryId>> = FxHashMap::default();
        let mut subs_under_sub: FxHashMap<SubCategoryId, Vec<SubCategoryId>> = FxHashMap::default();
        let mut assessments_under_sub: FxHashMap<SubCategoryId, Vec<AssessmentId>> =
            FxHashMap::default();

        for sub in shard.sub_categories() {
            match sub.parent {
                SubCategoryParent::Top(top) => subs_under_top.entry(top).or_default().push(sub.id),
                SubCategoryParent::Sub(parent) => {
                    subs_under_sub.entry(parent).or_default().push(sub.id)
                }
            }
            sub_categories.insert(sub.id, sub);
        }
        for assessment in shard.assessments() {
            assessments_under_sub
                .entry(assessment.sub_category)
                .or_default()
                .push(assessment.id);
            assessments.insert(assessment.id, assessment);
        }

        Self {
            top_categories,
            sub_categories,
            assessments,
            subs_under_top,
            subs_under_sub,
            assessments_under_sub,
        }
    }

    /// Top categories, id-ordered.
    pub fn top_categories(&self) -> &[AssessmentTopCategory] {
        &self.top_categories
    }

    pub fn sub_category(&self, id: SubCategoryId) -> Option<&AssessmentSubCategory> {
        self.sub_categories.get(&id)
    }

    pub fn sub_categories(&self) -> impl Iterator<Item = &AssessmentSubCategory> {
        self.sub_categories.values()
    }

    pub fn assessment(&self, id: AssessmentId) -> Option<&Assessment> {
        self.assessments.get(&id)
    }

    pub fn subs_under_top(&self, top: TopCategoryId) -> &[SubCategoryId] {
        self.subs_under_top.get(&top).map_or(&[], Vec::as_slice)
    }

    pub fn subs_under_sub(&self, sub: SubCategoryId) -> &[SubCategoryId] {
        self.subs_under_sub.get(&sub).map_or(&[], Vec::as_slice)
    }

    pub fn assessments_under(&self, sub: SubCategoryId) -> &[AssessmentId] {
        self.assessments_under_sub.get(&sub).map_or(&[], Vec::as_slice)
    }

    /// Whether the sub category sits directly under a top category.
    pub fn is_top_level(&self, sub: SubCategoryId) -> bool {
        matches!(
            self.sub_categories.get(&sub).map(|s| s.parent),
            Some(SubCategoryParent::Top(_))
        )
    }

    /// Walk parent pointers to the top-level ancestor sub category (the
    /// one directly under a top category) and its top category. Returns
    /// `None` on a dangling parent reference.
    pub fn top_level_ancestor(&self, sub: SubCategoryId) -> Option<(SubCategoryId, TopCategoryId)> {
        let mut current = self.sub_categories.get(&sub)?;
        loop {
            match current.parent {
                SubCategoryParent::Top(top) => return Some((current.id, top)),
                SubCategoryParent::Sub(parent) => current = self.sub_categories.get(&parent)?,
            }
        }
    }

    /// The top category an assessment ultimately belongs to.
    pub fn top_category_of(&self, assessment: AssessmentId) -> Option<TopCategoryId> {
        let assessment = self.assessments.get(&assessment)?;
        self.top_level_ancestor(assessment.sub_category)
            .map(|(_, top)| top)
    }

    /// Parent chain of a sub category, nearest first, ending at the
    /// top-level sub category.
    pub fn ancestors(&self, sub: SubCategoryId) -> Vec<SubCategoryId> {
        let mut chain = Vec::new();
        let mut current = self.sub_categories.get(&sub);
        while let Some(node) = current {
            match node.parent {
                SubCategoryParent::Top(_) => break,
                SubCategoryParent::Sub(parent) => {
                    chain.push(parent);
                    current = self.sub_categories.get(&parent);
                }
            }
        }
        chain
    }
}

/// Per-shard cache of loaded trees. At most one entry per configured
/// shard; admin writes must call [`TreeCache::invalidate`] for the shard
/// they touched (or [`TreeCache::invalidate_all`] after a cross-shard
/// sync).
#[derive(Debug, Default)]
pub struct TreeCache {
    trees: RwLock<HashMap<ShardKey, Arc<AssessmentTree>>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shard's cached tree, loading it on first use.
    pub fn get(&self, shard: &ShardHandle) -> Arc<AssessmentTree> {
        if let Some(tree) = self.trees.read().get(shard.key()) {
            return tree.clone();
        }
        let tree = Arc::new(AssessmentTree::load(shard));
        self.trees
            .write()
            .entry(shard.key().clone())
            .or_insert(tree)
            .clone()
    }

    pub fn invalidate(&self, key: &ShardKey) {
        self.trees.write().remove(key);
    }

    pub fn invalidate_all(&self) {
        self.trees.write().clear();
    }
}
