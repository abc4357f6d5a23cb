//! Cross-shard reference synchronization: aligned id allocation, partial
//! failure surfacing, repair by propagation, and the catalog side effects
//! of syncing sports and top categories.

use chrono::Utc;
use talentgrid::{
    Assessment, AssessmentFormat, AssessmentId, AssessmentSubCategory, AssessmentTopCategory,
    CoreError, FormatId, Platform, PlatformConfig, Promocode, PromocodeId, ReferenceSyncWriter,
    ShardKey, Sport, SportId, SubCategoryId, SubCategoryParent, SyncedKind, SyncedRecord,
    TopCategoryId, UserId, UserRole,
};

fn platform() -> Platform {
    Platform::new(PlatformConfig::new(["ca", "us", "se"]))
}

#[test]
fn synced_rows_exist_on_every_shard_or_none() {
    let platform = platform();
    let id = platform
        .create_synced(SyncedRecord::Format(AssessmentFormat::new(FormatId(0), "kg")))
        .unwrap();

    // Success means presence everywhere: for any two shards, the id
    // exists on one iff it exists on the other.
    for shard in platform.registry().all_shards() {
        assert!(shard.format(FormatId(id)).is_ok(), "missing on {}", shard.key());
    }
}

#[test]
fn id_allocation_stays_aligned_across_consecutive_writes() {
    let platform = platform();
    let first = platform
        .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
            TopCategoryId(0),
            "strength",
        )))
        .unwrap();
    let second = platform
        .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
            TopCategoryId(0),
            "endurance",
        )))
        .unwrap();
    assert_eq!(second, first + 1);
    for shard in platform.registry().all_shards() {
        assert_eq!(shard.top_categories().len(), 2);
    }
}

#[test]
fn partial_sync_reports_failed_subset_and_retry_repairs() {
    let platform = platform();
    // Seed the parent category on one shard only, out of band, so the
    // dependent write fails on the other shards.
    let ca = platform.resolve(&ShardKey::new("ca")).unwrap();
    ca.upsert_top_category(AssessmentTopCategory::new(TopCategoryId(1), "strength"));

    let err = platform
        .create_synced(SyncedRecord::SubCategory(AssessmentSubCategory::new(
            SubCategoryId(0),
            "lifts",
            SubCategoryParent::Top(TopCategoryId(1)),
        )))
        .unwrap_err();
    let CoreError::PartialSync(partial) = err else {
        panic!("expected partial sync");
    };
    assert_eq!(partial.succeeded, vec![ShardKey::new("ca")]);
    assert_eq!(partial.failed.len(), 2);

    // Repair the precondition, then replay the committed shard's rows
    // onto the ones that missed them.
    platform
        .propagate_existing(SyncedKind::TopCategory, 1)
        .unwrap();
    platform.propagate_existing(SyncedKind::SubCategory, 1).unwrap();
    for shard in platform.registry().all_shards() {
        assert!(shard.sub_category(SubCategoryId(1)).is_ok());
    }
}

#[test]
fn sport_sync_fans_out_selections_and_top_category() {
    let platform = platform();
    let us = platform.resolve(&ShardKey::new("us")).unwrap();
    let user = us.create_user("a@example.com", UserRole::Athlete, Utc::now());

    let id = platform
        .create_synced(SyncedRecord::Sport(Sport::new(SportId(0), "hockey")))
        .unwrap();

    assert_eq!(us.chosen_sports_of(user.id).len(), 1);
    for shard in platform.registry().all_shards() {
        let category = shard.top_category(TopCategoryId(id)).unwrap();
        assert_eq!(category.name, "hockey");
        assert_eq!(category.sport, Some(SportId(id)));
    }
}

#[test]
fn new_top_category_backfills_closed_rows_for_existing_pairs() {
    let platform = platform();
    let ca = platform.resolve(&ShardKey::new("ca")).unwrap();
    ca.grant_permission(UserId(1), UserId(2), TopCategoryId(50), true);

    let id = platform
        .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
            TopCategoryId(0),
            "mobility",
        )))
        .unwrap();

    // The pair got a closed row for the new category; the old row is
    // untouched.
    assert_eq!(ca.permission(UserId(1), UserId(2), TopCategoryId(id)), Some(false));
    assert_eq!(ca.permission(UserId(1), UserId(2), TopCategoryId(50)), Some(true));
}

#[test]
fn promocode_update_aligns_diverged_shards_by_code() {
    let platform = platform();
    let ca = platform.resolve(&ShardKey::new("ca")).unwrap();
    let us = platform.resolve(&ShardKey::new("us")).unwrap();
    ca.upsert_promocode(Promocode::new(PromocodeId(1), "EARLYBIRD"));
    us.upsert_promocode(Promocode::new(PromocodeId(9), "EARLYBIRD"));

    let mut update = Promocode::new(PromocodeId(1), "EARLYBIRD");
    update.description = "first season".to_string();
    platform.create_synced(SyncedRecord::Promocode(update)).unwrap();

    assert_eq!(ca.promocode(PromocodeId(1)).unwrap().description, "first season");
    assert_eq!(us.promocode(PromocodeId(9)).unwrap().description, "first season");
}

#[test]
fn delete_synced_removes_everywhere_and_is_idempotent() {
    let platform = platform();
    let id = platform
        .create_synced(SyncedRecord::Format(AssessmentFormat::new(FormatId(0), "s")))
        .unwrap();

    platform.delete_synced(SyncedKind::Format, id).unwrap();
    platform.delete_synced(SyncedKind::Format, id).unwrap();
    for shard in platform.registry().all_shards() {
        assert!(shard.format(FormatId(id)).is_err());
    }
}

#[test]
fn assessment_with_both_privacy_flags_never_lands() {
    let platform = platform();
    platform
        .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
            TopCategoryId(0),
            "strength",
        )))
        .unwrap();
    platform
        .create_synced(SyncedRecord::SubCategory(AssessmentSubCategory::new(
            SubCategoryId(0),
            "lifts",
            SubCategoryParent::Top(TopCategoryId(1)),
        )))
        .unwrap();
    platform
        .create_synced(SyncedRecord::Format(AssessmentFormat::new(FormatId(0), "kg")))
        .unwrap();

    let err = platform
        .create_synced(SyncedRecord::Assessment(
            Assessment::new(AssessmentId(0), "squat", SubCategoryId(1), FormatId(1))
                .private()
                .public_everywhere(),
        ))
        .unwrap_err();
    let CoreError::PartialSync(partial) = err else {
        panic!("expected partial sync carrying the integrity errors");
    };
    assert!(partial.succeeded.is_empty());
    assert!(partial.failed.iter().all(|(_, reason)| reason.contains("private")));
    for shard in platform.registry().all_shards() {
        assert!(shard.assessments().is_empty());
    }
}

#[test]
fn writer_is_usable_without_the_facade() {
    // The writer works against a bare registry for hosts that skip the
    // Platform facade (deploy/migration tooling).
    let registry = talentgrid::ShardRegistry::from_keys([ShardKey::new("ca"), ShardKey::new("us")]);
    let writer = ReferenceSyncWriter::new(&registry);
    let id = writer
        .create_synced(SyncedRecord::Format(AssessmentFormat::new(FormatId(0), "W")))
        .unwrap();
    for shard in registry.all_shards() {
        assert!(shard.format(FormatId(id)).is_ok());
    }
}
