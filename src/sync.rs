//! # Reference Sync Writer
//!
//! Cross-shard writes for the synchronized reference entities (sports,
//! the assessment catalog, value formats, promo codes). There is no
//! multi-shard transaction: each shard is one idempotent unit of work,
//! the writer tracks which shards committed, and a partial result is
//! surfaced as [`CoreError::PartialSync`] so the caller can retry the
//! failed subset. [`ReferenceSyncWriter::propagate_existing`] is the
//! repair operation for shards that fell out of alignment.

use crate::error::{CoreError, PartialSync, Result};
use crate::model::{
    Assessment, AssessmentFormat, AssessmentId, AssessmentSubCategory, AssessmentTopCategory,
    ChosenSport, FormatId, Promocode, PromocodeId, Sport, SportId, SubCategoryId, TopCategoryId,
};
use crate::shard::{ShardHandle, ShardRegistry};
use tracing::{debug, warn};

/// A reference row destined for every shard. An id of 0 means
/// "unassigned": each shard allocates `max(existing) + 1` independently,
/// which stays aligned only while every shard carries the same reference
/// snapshot. A shard seeded out of band can diverge; `propagate_existing`
/// is the documented repair, not an automatic one.
#[derive(Debug, Clone)]
pub enum SyncedRecord {
    Sport(Sport),
    TopCategory(AssessmentTopCategory),
    SubCategory(AssessmentSubCategory),
    Assessment(Assessment),
    Format(AssessmentFormat),
    Promocode(Promocode),
}

/// Kind selector for repair and delete operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncedKind {
    Sport,
    TopCategory,
    SubCategory,
    Assessment,
    Format,
    Promocode,
}

impl SyncedRecord {
    pub fn kind(&self) -> SyncedKind {
        match self {
            SyncedRecord::Sport(_) => SyncedKind::Sport,
            SyncedRecord::TopCategory(_) => SyncedKind::TopCategory,
            SyncedRecord::SubCategory(_) => SyncedKind::SubCategory,
            SyncedRecord::Assessment(_) => SyncedKind::Assessment,
            SyncedRecord::Format(_) => SyncedKind::Format,
            SyncedRecord::Promocode(_) => SyncedKind::Promocode,
        }
    }

    fn raw_id(&self) -> u32 {
        match self {
            SyncedRecord::Sport(s) => s.id.0,
            SyncedRecord::TopCategory(c) => c.id.0,
            SyncedRecord::SubCategory(c) => c.id.0,
            SyncedRecord::Assessment(a) => a.id.0,
            SyncedRecord::Format(f) => f.id.0,
            SyncedRecord::Promocode(p) => p.id.0,
        }
    }

    fn set_raw_id(&mut self, id: u32) {
        match self {
            SyncedRecord::Sport(s) => s.id = SportId(id),
            SyncedRecord::TopCategory(c) => c.id = TopCategoryId(id),
            SyncedRecord::SubCategory(c) => c.id = SubCategoryId(id),
            SyncedRecord::Assessment(a) => a.id = AssessmentId(id),
            SyncedRecord::Format(f) => f.id = FormatId(id),
            SyncedRecord::Promocode(p) => p.id = PromocodeId(id),
        }
    }
}

fn max_id(shard: &ShardHandle, kind: SyncedKind) -> u32 {
    match kind {
        SyncedKind::Sport => shard.max_sport_id(),
        SyncedKind::TopCategory => shard.max_top_category_id(),
        SyncedKind::SubCategory => shard.max_sub_category_id(),
        SyncedKind::Assessment => shard.max_assessment_id(),
        SyncedKind::Format => shard.max_format_id(),
        SyncedKind::Promocode => shard.max_promocode_id(),
    }
}

fn row_exists(shard: &ShardHandle, kind: SyncedKind, id: u32) -> bool {
    match kind {
        SyncedKind::Sport => shard.sport(SportId(id)).is_ok(),
        SyncedKind::TopCategory => shard.top_category(TopCategoryId(id)).is_ok(),
        SyncedKind::SubCategory => shard.sub_category(SubCategoryId(id)).is_ok(),
        SyncedKind::Assessment => shard.assessment(AssessmentId(id)).is_ok(),
        SyncedKind::Format => shard.format(FormatId(id)).is_ok(),
        SyncedKind::Promocode => shard.promocode(PromocodeId(id)).is_ok(),
    }
}

fn read_row(shard: &ShardHandle, kind: SyncedKind, id: u32) -> Result<SyncedRecord> {
    Ok(match kind {
        SyncedKind::Sport => SyncedRecord::Sport(shard.sport(SportId(id))?),
        SyncedKind::TopCategory => SyncedRecord::TopCategory(shard.top_category(TopCategoryId(id))?),
        SyncedKind::SubCategory => SyncedRecord::SubCategory(shard.sub_category(SubCategoryId(id))?),
        SyncedKind::Assessment => SyncedRecord::Assessment(shard.assessment(AssessmentId(id))?),
        SyncedKind::Format => SyncedRecord::Format(shard.format(FormatId(id))?),
        SyncedKind::Promocode => SyncedRecord::Promocode(shard.promocode(PromocodeId(id))?),
    })
}

/// Performs writes to synchronized entities across all shards.
pub struct ReferenceSyncWriter<'a> {
    registry: &'a ShardRegistry,
}

impl<'a> ReferenceSyncWriter<'a> {
    pub fn new(registry: &'a ShardRegistry) -> Self {
        Self { registry }
    }

    /// Create the entity on every shard, allocating matching ids when the
    /// record carries none. Returns the allocated id.
    ///
    /// At-least-once semantics: on [`CoreError::PartialSync`] the caller
    /// retries with the id the error's succeeded shards already hold;
    /// every per-shard write is an upsert, so re-running a committed shard
    /// changes nothing.
    pub fn create_synced(&self, record: SyncedRecord) -> Result<u32> {
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut allocated: Option<u32> = None;

        for shard in self.registry.all_shards() {
            let mut row = record.clone();
            if row.raw_id() == 0 {
                row.set_raw_id(max_id(&shard, row.kind()) + 1);
            }
            if allocated.is_none() {
                allocated = Some(row.raw_id());
            }
            match apply(&shard, row) {
                Ok(()) => {
                    debug!(shard = %shard.key(), "synced reference row");
                    succeeded.push(shard.key().clone());
                }
                Err(e) => {
                    warn!(shard = %shard.key(), error = %e, "reference sync failed");
                    failed.push((shard.key().clone(), e.to_string()));
                }
            }
        }

        let id = allocated.unwrap_or_else(|| record.raw_id());
        if failed.is_empty() {
            Ok(id)
        } else {
            Err(CoreError::PartialSync(PartialSync { succeeded, failed }))
        }
    }

    /// Replay one shard's row onto every shard missing it. This is the
    /// repair path for divergent shards (seeded out of band, or left
    /// behind by a partial sync).
    pub fn propagate_existing(&self, kind: SyncedKind, id: u32) -> Result<()> {
        let source = self
            .registry
            .all_shards()
            .into_iter()
            .find(|shard| row_exists(shard, kind, id))
            .ok_or_else(|| CoreError::unknown("synced row", id))?;
        let row = read_row(&source, kind, id)?;

        let mut succeeded = vec![source.key().clone()];
        let mut failed = Vec::new();
        for shard in self.registry.all_shards() {
            if shard.key() == source.key() || row_exists(&shard, kind, id) {
                continue;
            }
            match apply(&shard, row.clone()) {
                Ok(()) => {
                    debug!(shard = %shard.key(), source = %source.key(), "propagated reference row");
                    succeeded.push(shard.key().clone());
                }
                Err(e) => {
                    warn!(shard = %shard.key(), error = %e, "reference propagation failed");
                    failed.push((shard.key().clone(), e.to_string()));
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(CoreError::PartialSync(PartialSync { succeeded, failed }))
        }
    }

    /// Remove the entity from every shard. Shards already missing the row
    /// are skipped, so retries converge.
    pub fn delete_synced(&self, kind: SyncedKind, id: u32) -> Result<()> {
        for shard in self.registry.all_shards() {
            let removed = match kind {
                SyncedKind::Sport => shard.remove_sport(SportId(id)),
                SyncedKind::TopCategory => shard.remove_top_category(TopCategoryId(id)),
                SyncedKind::SubCategory => shard.remove_sub_category(SubCategoryId(id)),
                SyncedKind::Assessment => shard.remove_assessment(AssessmentId(id)),
                SyncedKind::Format => shard.remove_format(FormatId(id)),
                SyncedKind::Promocode => shard.remove_promocode(PromocodeId(id)),
            };
            if removed {
                debug!(shard = %shard.key(), "deleted reference row");
            }
        }
        Ok(())
    }
}

/// Apply one record to one shard, with the creation side effects the
/// catalog requires.
fn apply(shard: &ShardHandle, row: SyncedRecord) -> Result<()> {
    match row {
        SyncedRecord::Sport(sport) => {
            let is_new = shard.sport(sport.id).is_err();
            let sport_id = sport.id;
            shard.upsert_sport(sport.clone());
            if is_new {
                // Every user gets a selection row for the new sport, and
                // the sport doubles as an assessment top category with the
                // same id.
                for user in shard.users() {
                    shard.add_chosen_sport(ChosenSport {
                        user: user.id,
                        sport: sport_id,
                    });
                }
                let mut category =
                    AssessmentTopCategory::new(TopCategoryId(sport_id.0), sport.name);
                category.description = sport.description;
                category.sport = Some(sport_id);
                apply(shard, SyncedRecord::TopCategory(category))?;
            }
            Ok(())
        }
        SyncedRecord::TopCategory(category) => {
            let is_new = shard.top_category(category.id).is_err();
            let category_id = category.id;
            shard.upsert_top_category(category);
            if is_new {
                // Backfill a closed permission row for every pair already
                // in the graph, mirroring what the connection fan-out
                // would have created had the category existed then.
                for (assessed, assessor) in shard.permission_pairs() {
                    shard.grant_permission(assessed, assessor, category_id, false);
                }
            }
            Ok(())
        }
        SyncedRecord::SubCategory(category) => shard.upsert_sub_category(category),
        SyncedRecord::Assessment(assessment) => shard.upsert_assessment(assessment),
        SyncedRecord::Format(format) => {
            shard.upsert_format(format);
            Ok(())
        }
        SyncedRecord::Promocode(mut promocode) => {
            // Shard copies may have allocated different pks for the same
            // code; align on the shard-local row when one exists.
            if let Some(existing) = shard.promocode_by_code(&promocode.code) {
                promocode.id = existing.id;
            }
            shard.upsert_promocode(promocode);
            Ok(())
        }
    }
}
