//! Recorded-value submission: the athlete-to-coach cooldown, dry runs,
//! per-item batch partitioning and corrections.

use chrono::{Duration, Utc};
use talentgrid::model::DEFAULT_OPEN_TOP_CATEGORY as LEADERSHIP;
use talentgrid::{
    Assessment, AssessmentFormat, AssessmentId, AssessmentSubCategory, AssessmentTopCategory,
    Correction, CoreError, FormatId, Platform, PlatformConfig, RelationshipKind, ShardHandle,
    ShardKey, SubCategoryId, SubCategoryParent, SubmissionItem, SyncedRecord, TopCategoryId, User,
    UserRole,
};

const SQUAT: AssessmentId = AssessmentId(1);
const PRESENCE: AssessmentId = AssessmentId(2);

fn setup() -> (Platform, ShardHandle, User, User) {
    let platform = Platform::new(PlatformConfig::new(["ca"]));
    platform
        .create_synced(SyncedRecord::Format(
            AssessmentFormat::new(FormatId(0), "score").with_regex(r"^\d+(\.\d+)?$"),
        ))
        .unwrap();
    platform
        .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
            TopCategoryId(0),
            "strength",
        )))
        .unwrap();
    platform
        .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
            LEADERSHIP,
            "general leadership",
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
        .create_synced(SyncedRecord::SubCategory(AssessmentSubCategory::new(
            SubCategoryId(0),
            "presence",
            SubCategoryParent::Top(LEADERSHIP),
        )))
        .unwrap();
    platform
        .create_synced(SyncedRecord::Assessment(
            Assessment::new(AssessmentId(0), "squat", SubCategoryId(1), FormatId(1))
                .with_relationships([
                    RelationshipKind::CoachToAthlete,
                    RelationshipKind::SelfAssessment,
                ]),
        ))
        .unwrap();
    platform
        .create_synced(SyncedRecord::Assessment(
            Assessment::new(
                AssessmentId(0),
                "leadership presence",
                SubCategoryId(2),
                FormatId(1),
            )
            .with_relationships([RelationshipKind::AthleteToCoach]),
        ))
        .unwrap();

    let shard = platform.resolve(&ShardKey::new("ca")).unwrap();
    let coach = shard.create_user("c@example.com", UserRole::Coach, Utc::now());
    let athlete = shard.create_user("a@example.com", UserRole::Athlete, Utc::now());
    platform
        .connections(&shard)
        .on_connection_confirmed(coach.id, athlete.id, None)
        .unwrap();
    (platform, shard, coach, athlete)
}

fn item(assessed: talentgrid::UserId, assessment: AssessmentId, value: f64) -> SubmissionItem {
    SubmissionItem {
        assessed,
        assessment,
        team: None,
        value,
    }
}

#[test]
fn recent_coach_assessment_triggers_cooldown() {
    let (platform, shard, coach, athlete) = setup();
    let now = Utc::now();
    shard.insert_recorded(
        coach.id,
        athlete.id,
        PRESENCE,
        None,
        4.0,
        now - Duration::days(6),
    );

    let outcome = platform
        .recorder(&shard)
        .submit(athlete.id, vec![item(coach.id, PRESENCE, 5.0)], false, now)
        .unwrap();
    assert!(outcome.valid.is_empty());
    let CoreError::CooldownActive { remaining_secs } = &outcome.rejected[0].1 else {
        panic!("expected cooldown, got {}", outcome.rejected[0].1);
    };
    // 30-day window minus the 6 elapsed days.
    assert!(*remaining_secs > 23 * 24 * 3600);
    assert!(*remaining_secs <= 24 * 24 * 3600);
}

#[test]
fn stale_coach_assessment_passes_cooldown() {
    let (platform, shard, coach, athlete) = setup();
    let now = Utc::now();
    shard.insert_recorded(
        coach.id,
        athlete.id,
        PRESENCE,
        None,
        4.0,
        now - Duration::days(31),
    );

    let outcome = platform
        .recorder(&shard)
        .submit(athlete.id, vec![item(coach.id, PRESENCE, 5.0)], false, now)
        .unwrap();
    assert!(outcome.is_clean());
    assert_eq!(shard.recorded_for_assessed(coach.id).len(), 2);
}

#[test]
fn dry_run_validates_without_recording() {
    let (platform, shard, coach, athlete) = setup();
    let recorder = platform.recorder(&shard);
    let now = Utc::now();

    let outcome = recorder
        .submit(athlete.id, vec![item(coach.id, PRESENCE, 5.0)], true, now)
        .unwrap();
    assert!(outcome.is_clean());
    assert!(shard.recorded_for_assessed(coach.id).is_empty());

    // A real submission starts the window; later dry runs hit the
    // cooldown like real ones.
    recorder
        .submit(athlete.id, vec![item(coach.id, PRESENCE, 5.0)], false, now)
        .unwrap();
    let outcome = recorder
        .submit(athlete.id, vec![item(coach.id, PRESENCE, 5.0)], true, now)
        .unwrap();
    assert!(matches!(outcome.rejected[0].1, CoreError::CooldownActive { .. }));
}

#[test]
fn batch_partitions_per_item() {
    let (platform, shard, coach, athlete) = setup();
    let outcome = platform
        .recorder(&shard)
        .submit(
            athlete.id,
            vec![
                // Self-assessment: allowed.
                item(athlete.id, SQUAT, 120.0),
                // Athlete assessing the coach's strength category: the
                // fan-out left that row closed.
                item(coach.id, SQUAT, 80.0),
            ],
            false,
            Utc::now(),
        )
        .unwrap();
    assert_eq!(outcome.valid.len(), 1);
    assert_eq!(outcome.rejected.len(), 1);
    assert!(matches!(
        outcome.rejected[0].1,
        CoreError::PermissionDenied { .. }
    ));
    assert_eq!(shard.recorded_for_assessed(athlete.id).len(), 1);
}

#[test]
fn value_format_is_checked_per_item() {
    let (platform, shard, _, athlete) = setup();
    let outcome = platform
        .recorder(&shard)
        .submit(
            athlete.id,
            vec![item(athlete.id, SQUAT, 120.0), item(athlete.id, SQUAT, -1.0)],
            false,
            Utc::now(),
        )
        .unwrap();
    assert_eq!(outcome.valid.len(), 1);
    assert!(matches!(outcome.rejected[0].1, CoreError::InvalidValue { .. }));
}

#[test]
fn unconnected_users_cannot_record() {
    let (platform, shard, _, _) = setup();
    let other_coach = shard.create_user("c2@example.com", UserRole::Coach, Utc::now());
    let other_athlete = shard.create_user("a2@example.com", UserRole::Athlete, Utc::now());

    let outcome = platform
        .recorder(&shard)
        .submit(
            other_coach.id,
            vec![item(other_athlete.id, SQUAT, 100.0)],
            false,
            Utc::now(),
        )
        .unwrap();
    assert!(matches!(outcome.rejected[0].1, CoreError::NotConnected { .. }));
}

#[test]
fn corrections_revalidate_and_update_in_place() {
    let (platform, shard, coach, athlete) = setup();
    let recorder = platform.recorder(&shard);
    let outcome = recorder
        .submit(coach.id, vec![item(athlete.id, SQUAT, 100.0)], false, Utc::now())
        .unwrap();
    let row = &outcome.valid[0];

    let corrected = recorder
        .correct(
            coach.id,
            vec![Correction {
                id: row.id,
                value: 102.5,
            }],
        )
        .unwrap();
    assert!(corrected.is_clean());
    assert_eq!(shard.recorded(row.id).unwrap().value, 102.5);

    // A malformed replacement value is rejected and leaves the row
    // untouched.
    let rejected = recorder
        .correct(
            coach.id,
            vec![Correction {
                id: row.id,
                value: -5.0,
            }],
        )
        .unwrap();
    assert!(matches!(rejected.rejected[0].1, CoreError::InvalidValue { .. }));
    assert_eq!(shard.recorded(row.id).unwrap().value, 102.5);
}
