//! Per-viewer catalog visibility: the organisation allow-list rule, the
//! default rule, alien-privacy exclusion, and team-level privacy.

use chrono::Utc;
use talentgrid::{
    Assessment, AssessmentFormat, AssessmentId, AssessmentSubCategory, AssessmentTopCategory,
    FormatId, Organisation, OrgId, Platform, PlatformConfig, ShardHandle, ShardKey, SportId,
    SubCategoryId, SubCategoryParent, Team, TeamId, TopCategoryId, UserRole,
};

fn platform() -> (Platform, ShardHandle) {
    let platform = Platform::new(PlatformConfig::new(["ca"]));
    let shard = platform.resolve(&ShardKey::new("ca")).unwrap();
    (platform, shard)
}

/// One top category with one sub category and a format, ready for
/// assessments.
fn base_catalog(shard: &ShardHandle) {
    shard.upsert_top_category(AssessmentTopCategory::new(TopCategoryId(1), "strength"));
    shard
        .upsert_sub_category(AssessmentSubCategory::new(
            SubCategoryId(1),
            "lifts",
            SubCategoryParent::Top(TopCategoryId(1)),
        ))
        .unwrap();
    shard.upsert_format(AssessmentFormat::new(FormatId(1), "kg"));
}

fn add(shard: &ShardHandle, id: u32, sub: u32, private: bool, public_everywhere: bool) {
    let mut assessment = Assessment::new(
        AssessmentId(id),
        format!("metric-{id}"),
        SubCategoryId(sub),
        FormatId(1),
    );
    assessment.is_private = private;
    assessment.is_public_everywhere = public_everywhere;
    shard.upsert_assessment(assessment).unwrap();
}

fn ids(set: &rustc_hash::FxHashSet<AssessmentId>) -> Vec<u32> {
    let mut v: Vec<u32> = set.iter().map(|a| a.0).collect();
    v.sort();
    v
}

#[test]
fn viewer_without_organisations_sees_public_and_public_everywhere() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    add(&shard, 1, 1, false, false);
    add(&shard, 2, 1, true, false);
    add(&shard, 3, 1, false, true);

    // The private one belongs to someone else's organisation.
    let mut org = Organisation::new(OrgId(1), "Aliens");
    org.own_assessments.insert(AssessmentId(2));
    shard.upsert_organisation(org);

    let viewer = shard.create_user("v@example.com", UserRole::Athlete, Utc::now());
    let visible = platform
        .visibility(&shard)
        .visible_assessment_ids(viewer.id)
        .unwrap();
    assert_eq!(ids(&visible), vec![1, 3]);
}

#[test]
fn own_assessments_only_member_gets_the_allow_list() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    // P: org-curated private; Q: plain public in the same group.
    add(&shard, 1, 1, true, false);
    add(&shard, 2, 1, false, false);
    // E: public everywhere, in its own group.
    shard.upsert_top_category(AssessmentTopCategory::new(TopCategoryId(2), "endurance"));
    shard
        .upsert_sub_category(AssessmentSubCategory::new(
            SubCategoryId(2),
            "runs",
            SubCategoryParent::Top(TopCategoryId(2)),
        ))
        .unwrap();
    add(&shard, 3, 2, false, true);

    let member = shard.create_user("m@example.com", UserRole::Athlete, Utc::now());
    let mut org = Organisation::new(OrgId(1), "Curated Club");
    org.own_assessments_only = true;
    org.own_assessments.insert(AssessmentId(1));
    org.members.insert(member.id);
    shard.upsert_organisation(org);

    let visible = platform
        .visibility(&shard)
        .visible_assessment_ids(member.id)
        .unwrap();
    assert_eq!(ids(&visible), vec![1, 3]);
}

#[test]
fn extra_org_assessments_show_for_members_only() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    // P: private, curated by an org with the allow-list disabled.
    add(&shard, 1, 1, true, false);
    // Q: public, unrelated to the org.
    add(&shard, 2, 1, false, false);

    let member = shard.create_user("m@example.com", UserRole::Athlete, Utc::now());
    let outsider = shard.create_user("o@example.com", UserRole::Athlete, Utc::now());
    let mut org = Organisation::new(OrgId(1), "Open Club");
    org.own_assessments.insert(AssessmentId(1));
    org.members.insert(member.id);
    shard.upsert_organisation(org);

    let member_sees = platform
        .visibility(&shard)
        .visible_assessment_ids(member.id)
        .unwrap();
    assert_eq!(ids(&member_sees), vec![1, 2]);

    let outsider_sees = platform
        .visibility(&shard)
        .visible_assessment_ids(outsider.id)
        .unwrap();
    assert_eq!(ids(&outsider_sees), vec![2]);
}

#[test]
fn private_team_assessments_show_for_team_members_only() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    // R: private, held by a private team's assessment set.
    add(&shard, 1, 1, true, false);
    add(&shard, 2, 1, false, false);

    let coach = shard.create_user("c@example.com", UserRole::Coach, Utc::now());
    let member = shard.create_user("m@example.com", UserRole::Athlete, Utc::now());
    let outsider = shard.create_user("o@example.com", UserRole::Athlete, Utc::now());

    let mut team = Team::new(TeamId(1), "U18", coach.id, SportId(1));
    team.is_private = true;
    team.athletes.insert(member.id);
    team.assessments.insert(AssessmentId(1));
    shard.upsert_team(team);

    let member_sees = platform
        .visibility(&shard)
        .visible_assessment_ids(member.id)
        .unwrap();
    assert_eq!(ids(&member_sees), vec![1, 2]);

    let outsider_sees = platform
        .visibility(&shard)
        .visible_assessment_ids(outsider.id)
        .unwrap();
    assert_eq!(ids(&outsider_sees), vec![2]);

    // The owning coach counts as a team member too.
    let owner_sees = platform
        .visibility(&shard)
        .visible_assessment_ids(coach.id)
        .unwrap();
    assert_eq!(ids(&owner_sees), vec![1, 2]);
}

#[test]
fn org_membership_flows_through_owned_teams() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    add(&shard, 1, 1, true, false);

    let athlete = shard.create_user("a@example.com", UserRole::Athlete, Utc::now());
    let org_account = shard.create_user("org@example.com", UserRole::Organisation, Utc::now());

    let mut org = Organisation::new(OrgId(1), "Club");
    org.login_users.insert(org_account.id);
    org.own_assessments.insert(AssessmentId(1));
    shard.upsert_organisation(org);

    // The athlete is only a member of a team the organisation owns.
    let mut team = Team::new(TeamId(1), "Squad", org_account.id, SportId(1)).with_organisation(OrgId(1));
    team.athletes.insert(athlete.id);
    shard.upsert_team(team);

    let visible = platform
        .visibility(&shard)
        .visible_assessment_ids(athlete.id)
        .unwrap();
    assert_eq!(ids(&visible), vec![1]);
}

#[test]
fn rendered_tree_is_id_ordered_with_flat_hints() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    shard.upsert_top_category(AssessmentTopCategory::new(TopCategoryId(2), "endurance"));
    shard
        .upsert_sub_category(AssessmentSubCategory::new(
            SubCategoryId(2),
            "runs",
            SubCategoryParent::Top(TopCategoryId(2)),
        ))
        .unwrap();
    add(&shard, 1, 1, false, false);
    add(&shard, 2, 2, false, false);

    let viewer = shard.create_user("v@example.com", UserRole::Athlete, Utc::now());
    let rendered = platform.visibility(&shard).render(viewer.id).unwrap();

    let tops: Vec<TopCategoryId> = rendered.iter().map(|t| t.id).collect();
    assert_eq!(tops, vec![TopCategoryId(1), TopCategoryId(2)]);
    assert!(rendered.iter().all(|t| t.children[0].is_flat));
}

#[test]
fn deep_sub_categories_keep_their_ancestor_chain() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    // A nested sub category under the top-level one, holding the only
    // assessment.
    shard
        .upsert_sub_category(AssessmentSubCategory::new(
            SubCategoryId(2),
            "olympic lifts",
            SubCategoryParent::Sub(SubCategoryId(1)),
        ))
        .unwrap();
    add(&shard, 1, 2, false, false);

    let viewer = shard.create_user("v@example.com", UserRole::Athlete, Utc::now());
    let rendered = platform.visibility(&shard).render(viewer.id).unwrap();
    assert_eq!(rendered.len(), 1);
    let top_level = &rendered[0].children[0];
    assert_eq!(top_level.id, SubCategoryId(1));
    assert!(!top_level.is_flat);
    match &top_level.children {
        talentgrid::visibility::RenderedChildren::SubCategories(nested) => {
            assert_eq!(nested[0].id, SubCategoryId(2));
            assert!(!nested[0].is_flat);
        }
        other => panic!("expected nested sub categories, got {other:?}"),
    }
}

#[test]
fn permission_graph_is_consulted_separately_from_visibility() {
    // Seeing an assessment in the tree does not grant recording access;
    // that stays with the permission rows.
    let (platform, shard) = platform();
    base_catalog(&shard);
    add(&shard, 1, 1, false, false);

    let coach = shard.create_user("c@example.com", UserRole::Coach, Utc::now());
    let athlete = shard.create_user("a@example.com", UserRole::Athlete, Utc::now());

    let visible = platform
        .visibility(&shard)
        .visible_assessment_ids(coach.id)
        .unwrap();
    assert_eq!(ids(&visible), vec![1]);

    let assessor = shard.assessor_of(coach.id).unwrap();
    assert!(!platform
        .permissions(&shard)
        .has_access(&assessor, athlete.id, TopCategoryId(1), false));
}

#[test]
fn visible_set_respects_insertion_order_of_ids() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    for id in [3, 1, 2] {
        add(&shard, id, 1, false, false);
    }
    let viewer = shard.create_user("v@example.com", UserRole::Athlete, Utc::now());
    let rendered = platform.visibility(&shard).render(viewer.id).unwrap();
    match &rendered[0].children[0].children {
        talentgrid::visibility::RenderedChildren::Assessments(leaves) => {
            let leaf_ids: Vec<u32> = leaves.iter().map(|a| a.id.0).collect();
            assert_eq!(leaf_ids, vec![1, 2, 3]);
        }
        other => panic!("expected assessments, got {other:?}"),
    }
}

#[test]
fn catalog_cache_reflects_admin_edits_after_invalidation() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    add(&shard, 1, 1, false, false);
    let viewer = shard.create_user("v@example.com", UserRole::Athlete, Utc::now());

    let visible = platform
        .visibility(&shard)
        .visible_assessment_ids(viewer.id)
        .unwrap();
    assert_eq!(ids(&visible), vec![1]);

    add(&shard, 2, 1, false, false);
    platform.invalidate_catalog(&ShardKey::new("ca"));
    let visible = platform
        .visibility(&shard)
        .visible_assessment_ids(viewer.id)
        .unwrap();
    assert_eq!(ids(&visible), vec![1, 2]);
}

#[test]
fn rendered_tree_serializes_for_the_presentation_layer() {
    let (platform, shard) = platform();
    base_catalog(&shard);
    add(&shard, 1, 1, false, false);
    let viewer = shard.create_user("v@example.com", UserRole::Athlete, Utc::now());

    let rendered = platform.visibility(&shard).render(viewer.id).unwrap();
    let json = serde_json::to_value(&rendered).unwrap();
    assert_eq!(json[0]["name"], "strength");
    assert_eq!(json[0]["children"][0]["is_flat"], true);
}

#[test]
fn each_shard_renders_its_own_catalog_copy() {
    let platform = Platform::new(PlatformConfig::new(["ca", "us"]));
    let ca = platform.resolve(&ShardKey::new("ca")).unwrap();
    let us = platform.resolve(&ShardKey::new("us")).unwrap();
    base_catalog(&ca);
    base_catalog(&us);
    add(&ca, 1, 1, false, false);
    // The us copy diverged after creation: same id, renamed.
    let mut renamed = Assessment::new(AssessmentId(1), "renamed", SubCategoryId(1), FormatId(1));
    renamed.is_private = false;
    us.upsert_assessment(renamed).unwrap();

    let ca_viewer = ca.create_user("v@example.com", UserRole::Athlete, Utc::now());
    let us_viewer = us.create_user("v@example.com", UserRole::Athlete, Utc::now());

    let ca_tree = platform.visibility(&ca).render(ca_viewer.id).unwrap();
    let us_tree = platform.visibility(&us).render(us_viewer.id).unwrap();
    let leaf_name = |tree: &[talentgrid::RenderedTopCategory]| match &tree[0].children[0].children {
        talentgrid::visibility::RenderedChildren::Assessments(leaves) => leaves[0].name.clone(),
        _ => panic!("expected assessments"),
    };
    assert_eq!(leaf_name(&ca_tree), "metric-1");
    assert_eq!(leaf_name(&us_tree), "renamed");
}
