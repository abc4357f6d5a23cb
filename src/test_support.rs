//! Fixture builders shared by the test suites: a small deterministic
//! catalog, and a seeded random catalog generator for larger scenarios.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{
    Assessment, AssessmentFormat, AssessmentId, AssessmentSubCategory, AssessmentTopCategory,
    FormatId, RelationshipKind, SubCategoryId, SubCategoryParent, TopCategoryId,
};
use crate::shard::ShardRegistry;
use crate::sync::{ReferenceSyncWriter, SyncedRecord};

/// Ids of the deterministic fixture catalog.
#[derive(Debug, Clone, Copy)]
pub struct CatalogSchema {
    pub top: TopCategoryId,
    pub sub: SubCategoryId,
    pub format: FormatId,
    pub public_assessment: AssessmentId,
    pub private_assessment: AssessmentId,
}

/// Sync a minimal catalog onto every shard: one top category, one sub
/// category, one public and one private assessment allowing every
/// relationship kind.
pub fn seed_catalog(registry: &ShardRegistry) -> CatalogSchema {
    let writer = ReferenceSyncWriter::new(registry);
    let format = writer
        .create_synced(SyncedRecord::Format(AssessmentFormat::new(FormatId(0), "kg")))
        .expect("format sync");
    let top = writer
        .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
            TopCategoryId(0),
            "strength",
        )))
        .expect("top category sync");
    let sub = writer
        .create_synced(SyncedRecord::SubCategory(AssessmentSubCategory::new(
            SubCategoryId(0),
            "lifts",
            SubCategoryParent::Top(TopCategoryId(top)),
        )))
        .expect("sub category sync");

    let all_kinds = [
        RelationshipKind::SelfAssessment,
        RelationshipKind::AthleteToCoach,
        RelationshipKind::CoachToAthlete,
    ];
    let public_assessment = writer
        .create_synced(SyncedRecord::Assessment(
            Assessment::new(AssessmentId(0), "squat", SubCategoryId(sub), FormatId(format))
                .with_relationships(all_kinds),
        ))
        .expect("public assessment sync");
    let private_assessment = writer
        .create_synced(SyncedRecord::Assessment(
            Assessment::new(
                AssessmentId(0),
                "club verticals",
                SubCategoryId(sub),
                FormatId(format),
            )
            .private()
            .with_relationships(all_kinds),
        ))
        .expect("private assessment sync");

    CatalogSchema {
        top: TopCategoryId(top),
        sub: SubCategoryId(sub),
        format: FormatId(format),
        public_assessment: AssessmentId(public_assessment),
        private_assessment: AssessmentId(private_assessment),
    }
}

/// Sync a randomized catalog of `top_count` top categories, each with a
/// handful of sub categories and assessments. Deterministic per seed.
pub fn generate_catalog(registry: &ShardRegistry, top_count: u32, seed: u64) -> Vec<AssessmentId> {
    let mut rng = StdRng::seed_from_u64(seed);
    let writer = ReferenceSyncWriter::new(registry);
    let format = writer
        .create_synced(SyncedRecord::Format(AssessmentFormat::new(FormatId(0), "score")))
        .expect("format sync");

    let mut assessments = Vec::new();
    for t in 0..top_count {
        let top = writer
            .create_synced(SyncedRecord::TopCategory(AssessmentTopCategory::new(
                TopCategoryId(0),
                format!("category-{t}"),
            )))
            .expect("top category sync");
        let sub_count = rng.random_range(1..4);
        for s in 0..sub_count {
            let sub = writer
                .create_synced(SyncedRecord::SubCategory(AssessmentSubCategory::new(
                    SubCategoryId(0),
                    format!("group-{t}-{s}"),
                    SubCategoryParent::Top(TopCategoryId(top)),
                )))
                .expect("sub category sync");
            for a in 0..rng.random_range(1..5) {
                let mut assessment = Assessment::new(
                    AssessmentId(0),
                    format!("metric-{t}-{s}-{a}"),
                    SubCategoryId(sub),
                    FormatId(format),
                )
                .with_relationships([
                    RelationshipKind::SelfAssessment,
                    RelationshipKind::CoachToAthlete,
                ]);
                if rng.random_bool(0.25) {
                    assessment.is_private = true;
                }
                let id = writer
                    .create_synced(SyncedRecord::Assessment(assessment))
                    .expect("assessment sync");
                assessments.push(AssessmentId(id));
            }
        }
    }
    assessments
}
