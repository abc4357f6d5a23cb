//! # Visibility Resolver
//!
//! Computes, for a viewer, which slice of a shard's assessment catalog
//! they may see, then renders that slice as a tree for the presentation
//! layer. The resolution is an explicit graph-closure algorithm (walk
//! parent pointers to the top-level ancestor, group, aggregate) rather
//! than a storage-engine recursive query, so it is portable to any
//! backing store.
//!
//! Two rules decide sub-category inclusion:
//! - a viewer belonging to at least one organisation with
//!   `own_assessments_only` gets a strict allow-list: only groups carrying
//!   an edge from such an organisation, plus anything public everywhere;
//! - everyone else gets the default rule: everything public, plus groups
//!   their organisations privately curate, minus groups privately scoped
//!   to organisations they are not part of.
//!
//! Team privacy (`Team.is_private` + the team's private assessment set) is
//! resolved per assessment at render time, independent of the
//! organisation rule.

use crate::error::Result;
use crate::model::{
    Assessment, AssessmentId, OrgId, RecordedValue, RelationshipKind, SubCategoryId, Team, TeamId,
    TopCategoryId, UserId, UserRole,
};
use crate::shard::ShardHandle;
use crate::tree::AssessmentTree;
use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::sync::Arc;

/// A leaf of the rendered tree.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedAssessment {
    pub id: AssessmentId,
    pub name: String,
    pub description: String,
    pub unit: String,
    pub format_description: String,
    pub relationship_kinds: Vec<RelationshipKind>,
    pub is_private: bool,
}

/// Children of a rendered sub category: either nested sub categories or
/// leaf assessments, never both.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderedChildren {
    SubCategories(Vec<RenderedSubCategory>),
    Assessments(Vec<RenderedAssessment>),
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedSubCategory {
    pub id: SubCategoryId,
    pub name: String,
    pub description: String,
    /// Rendering hint: set for sub categories holding leaf assessments
    /// directly under a top category.
    pub is_flat: bool,
    pub children: RenderedChildren,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedTopCategory {
    pub id: TopCategoryId,
    pub name: String,
    pub description: String,
    pub children: Vec<RenderedSubCategory>,
}

/// Filter for rendering an assessed user's recorded values.
#[derive(Debug, Clone, Default)]
pub struct RecordedFilter {
    pub assessment: Option<AssessmentId>,
    pub assessor: Option<UserId>,
    pub team: Option<TeamId>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl RecordedFilter {
    fn matches(&self, row: &RecordedValue) -> bool {
        self.assessment.is_none_or(|a| row.assessment == a)
            && self.assessor.is_none_or(|a| row.assessor == a)
            && self.team.is_none_or(|t| row.team == Some(t))
            && self.since.is_none_or(|d| row.date_assessed > d)
            && self.until.is_none_or(|d| row.date_assessed < d)
    }
}

/// A node of the recorded-values tree.
#[derive(Debug, Clone, Serialize)]
pub struct ChosenTreeNode {
    pub id: SubCategoryId,
    pub name: String,
    pub is_flat: bool,
    pub children: ChosenChildren,
}

/// Children of a recorded-values node: nested nodes, or per-assessment
/// groups of recorded values (assessments without values are skipped).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChosenChildren {
    SubCategories(Vec<ChosenTreeNode>),
    Values(Vec<Vec<RecordedValue>>),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChosenTreeTop {
    pub id: TopCategoryId,
    pub name: String,
    pub children: Vec<ChosenTreeNode>,
}

/// The viewer's organisation and team context on one shard.
struct ViewerContext {
    /// Organisations the viewer belongs to: direct member or login
    /// account, plus organisations owning a team the viewer plays or
    /// coaches in.
    our_orgs: FxHashSet<OrgId>,
    /// The subset of `our_orgs` with `own_assessments_only` set.
    own_only_orgs: FxHashSet<OrgId>,
    /// Private assessments of the viewer's teams (role-matched
    /// membership; coaches also count teams they own).
    team_assessments: FxHashSet<AssessmentId>,
}

impl ViewerContext {
    fn own_only_mode(&self) -> bool {
        !self.own_only_orgs.is_empty()
    }
}

/// Per-top-level-group aggregation of organisation edges.
#[derive(Debug, Default, Clone, Copy)]
struct GroupCounts {
    our_own_only_edges: usize,
    our_edges: usize,
    alien_edges: usize,
}

/// Per-sub-category aggregation of the public flags of its direct
/// assessments.
#[derive(Debug, Default, Clone, Copy)]
struct SubCounts {
    public_everywhere: usize,
    public: usize,
}

/// Resolves catalog visibility for viewers of one shard.
pub struct VisibilityResolver<'a> {
    shard: &'a ShardHandle,
    tree: Arc<AssessmentTree>,
}

impl<'a> VisibilityResolver<'a> {
    pub fn new(shard: &'a ShardHandle, tree: Arc<AssessmentTree>) -> Self {
        Self { shard, tree }
    }

    /// Render the catalog slice visible to the viewer, id-ordered.
    pub fn render(&self, viewer: UserId) -> Result<Vec<RenderedTopCategory>> {
        let ctx = self.viewer_context(viewer)?;
        let orgs_by_assessment = self.orgs_by_assessment();
        let included = self.included_sub_categories(&ctx, &orgs_by_assessment);

        let mut rendered = Vec::new();
        for top in self.tree.top_categories() {
            let children: Vec<RenderedSubCategory> = self
                .tree
                .subs_under_top(top.id)
                .iter()
                .copied()
                .filter(|sub| included.contains(sub))
                .map(|sub| self.render_sub(sub, &ctx, &orgs_by_assessment, &included))
                .collect();
            if !children.is_empty() {
                rendered.push(RenderedTopCategory {
                    id: top.id,
                    name: top.name.clone(),
                    description: top.description.clone(),
                    children,
                });
            }
        }
        Ok(rendered)
    }

    /// The flat set of assessment ids the viewer may see.
    pub fn visible_assessment_ids(&self, viewer: UserId) -> Result<FxHashSet<AssessmentId>> {
        let rendered = self.render(viewer)?;
        let mut ids = FxHashSet::default();
        fn walk(subs: &[RenderedSubCategory], ids: &mut FxHashSet<AssessmentId>) {
            for sub in subs {
                match &sub.children {
                    RenderedChildren::Assessments(leaves) => {
                        ids.extend(leaves.iter().map(|a| a.id));
                    }
                    RenderedChildren::SubCategories(nested) => walk(nested, ids),
                }
            }
        }
        for top in &rendered {
            walk(&top.children, &mut ids);
        }
        Ok(ids)
    }

    /// Render an assessed user's recorded values through the tree shape.
    /// With `averages` set, each assessment's values collapse to a single
    /// synthetic row carrying the mean (team dashboard rendering).
    pub fn render_chosen(
        &self,
        assessed: UserId,
        filter: &RecordedFilter,
        averages: bool,
    ) -> Vec<ChosenTreeTop> {
        let mut rows = self.shard.recorded_for_assessed(assessed);
        rows.retain(|r| filter.matches(r));
        rows.sort_by_key(|r| r.id);
        let mut by_assessment: FxHashMap<AssessmentId, Vec<RecordedValue>> = FxHashMap::default();
        for row in rows {
            by_assessment.entry(row.assessment).or_default().push(row);
        }

        self.tree
            .top_categories()
            .iter()
            .map(|top| ChosenTreeTop {
                id: top.id,
                name: top.name.clone(),
                children: self
                    .tree
                    .subs_under_top(top.id)
                    .iter()
                    .map(|sub| self.render_chosen_sub(*sub, &by_assessment, averages))
                    .collect(),
            })
            .collect()
    }

    fn render_chosen_sub(
        &self,
        sub: SubCategoryId,
        by_assessment: &FxHashMap<AssessmentId, Vec<RecordedValue>>,
        averages: bool,
    ) -> ChosenTreeNode {
        let node = self.tree.sub_category(sub).expect("sub category in tree");
        let leaf_ids = self.tree.assessments_under(sub);
        let children = if leaf_ids.is_empty() {
            ChosenChildren::SubCategories(
                self.tree
                    .subs_under_sub(sub)
                    .iter()
                    .map(|child| self.render_chosen_sub(*child, by_assessment, averages))
                    .collect(),
            )
        } else {
            let mut groups = Vec::new();
            for id in leaf_ids {
                let Some(values) = by_assessment.get(id) else {
                    continue;
                };
                if averages {
                    let mean = values.iter().map(|v| v.value).sum::<f64>() / values.len() as f64;
                    let mut synthetic = values[0].clone();
                    synthetic.value = mean;
                    groups.push(vec![synthetic]);
                } else {
                    groups.push(values.clone());
                }
            }
            ChosenChildren::Values(groups)
        };
        ChosenTreeNode {
            id: node.id,
            name: node.name.clone(),
            is_flat: self.tree.is_top_level(sub) && !leaf_ids.is_empty(),
            children,
        }
    }

    // ---- closure + aggregation -------------------------------------------

    fn viewer_context(&self, viewer: UserId) -> Result<ViewerContext> {
        let user = self.shard.user(viewer)?;
        let mut our_orgs = FxHashSet::default();
        let mut own_only_orgs = FxHashSet::default();

        let member_teams: Vec<Team> = match user.role {
            UserRole::Coach => {
                let mut teams = self.shard.teams_with_member(viewer);
                teams.extend(self.shard.teams_owned_by(viewer));
                teams
            }
            _ => self.shard.teams_with_member(viewer),
        };

        for org in self.shard.organisations() {
            let direct = org.has_member(viewer);
            // Organisation membership also flows through teams the
            // organisation owns, but not through mere team ownership.
            let via_team = self
                .shard
                .teams_with_member(viewer)
                .iter()
                .any(|t| t.organisation == Some(org.id));
            if direct || via_team {
                our_orgs.insert(org.id);
                if org.own_assessments_only {
                    own_only_orgs.insert(org.id);
                }
            }
        }

        let mut team_assessments = FxHashSet::default();
        for team in &member_teams {
            team_assessments.extend(team.assessments.iter().copied());
        }

        Ok(ViewerContext {
            our_orgs,
            own_only_orgs,
            team_assessments,
        })
    }

    /// Which organisations privately curate each assessment.
    fn orgs_by_assessment(&self) -> FxHashMap<AssessmentId, Vec<OrgId>> {
        let mut map: FxHashMap<AssessmentId, Vec<OrgId>> = FxHashMap::default();
        for org in self.shard.organisations() {
            for assessment in &org.own_assessments {
                map.entry(*assessment).or_default().push(org.id);
            }
        }
        map
    }

    /// The closure-and-aggregate pass: every sub category is tied to its
    /// top-level ancestor group; organisation edges aggregate per group,
    /// public flags per sub category; then the decision rule picks the
    /// included set and the parent chains needed to render it.
    fn included_sub_categories(
        &self,
        ctx: &ViewerContext,
        orgs_by_assessment: &FxHashMap<AssessmentId, Vec<OrgId>>,
    ) -> FxHashSet<SubCategoryId> {
        let mut group_of: FxHashMap<SubCategoryId, SubCategoryId> = FxHashMap::default();
        let mut group_counts: FxHashMap<SubCategoryId, GroupCounts> = FxHashMap::default();
        let mut sub_counts: FxHashMap<SubCategoryId, SubCounts> = FxHashMap::default();

        for sub in self.tree.sub_categories() {
            let Some((top_sub, _)) = self.tree.top_level_ancestor(sub.id) else {
                continue;
            };
            group_of.insert(sub.id, top_sub);
            let counts = sub_counts.entry(sub.id).or_default();
            for id in self.tree.assessments_under(sub.id) {
                let assessment = self.tree.assessment(*id).expect("assessment in tree");
                if assessment.is_public_everywhere {
                    counts.public_everywhere += 1;
                }
                if !assessment.is_private {
                    counts.public += 1;
                }
                let group = group_counts.entry(top_sub).or_default();
                for org in orgs_by_assessment.get(id).map_or(&[][..], Vec::as_slice) {
                    if ctx.own_only_orgs.contains(org) {
                        group.our_own_only_edges += 1;
                    }
                    if ctx.our_orgs.contains(org) {
                        group.our_edges += 1;
                    } else {
                        group.alien_edges += 1;
                    }
                }
            }
        }

        let mut included = FxHashSet::default();
        for (sub, group) in &group_of {
            let counts = sub_counts.get(sub).copied().unwrap_or_default();
            let group_counts = group_counts.get(group).copied().unwrap_or_default();
            let keep = if ctx.own_only_mode() {
                group_counts.our_own_only_edges > 0 || counts.public_everywhere > 0
            } else {
                group_counts.alien_edges == 0
                    || group_counts.our_edges > 0
                    || counts.public_everywhere > 0
                    || counts.public > 0
            };
            if keep {
                included.insert(*sub);
            }
        }

        // Minimal ancestor set: every included sub category must be
        // reachable from its top category.
        let chains: Vec<SubCategoryId> = included
            .iter()
            .flat_map(|sub| self.tree.ancestors(*sub))
            .collect();
        included.extend(chains);
        included
    }

    fn render_sub(
        &self,
        sub: SubCategoryId,
        ctx: &ViewerContext,
        orgs_by_assessment: &FxHashMap<AssessmentId, Vec<OrgId>>,
        included: &FxHashSet<SubCategoryId>,
    ) -> RenderedSubCategory {
        let node = self.tree.sub_category(sub).expect("sub category in tree");
        let leaf_ids = self.tree.assessments_under(sub);
        let children = if leaf_ids.is_empty() {
            RenderedChildren::SubCategories(
                self.tree
                    .subs_under_sub(sub)
                    .iter()
                    .copied()
                    .filter(|child| included.contains(child))
                    .map(|child| self.render_sub(child, ctx, orgs_by_assessment, included))
                    .collect(),
            )
        } else {
            RenderedChildren::Assessments(
                leaf_ids
                    .iter()
                    .filter_map(|id| {
                        let assessment = self.tree.assessment(*id).expect("assessment in tree");
                        self.assessment_visible(assessment, ctx, orgs_by_assessment)
                            .then(|| self.render_assessment(assessment))
                    })
                    .collect(),
            )
        };
        RenderedSubCategory {
            id: node.id,
            name: node.name.clone(),
            description: node.description.clone(),
            is_flat: self.tree.is_top_level(sub) && !leaf_ids.is_empty(),
            children,
        }
    }

    /// Per-assessment privacy resolution at render time.
    fn assessment_visible(
        &self,
        assessment: &Assessment,
        ctx: &ViewerContext,
        orgs_by_assessment: &FxHashMap<AssessmentId, Vec<OrgId>>,
    ) -> bool {
        if assessment.is_public_everywhere {
            return true;
        }
        if !ctx.own_only_mode() && !assessment.is_private {
            return true;
        }
        if assessment.is_private && ctx.team_assessments.contains(&assessment.id) {
            return true;
        }
        orgs_by_assessment
            .get(&assessment.id)
            .is_some_and(|orgs| orgs.iter().any(|org| ctx.our_orgs.contains(org)))
    }

    fn render_assessment(&self, assessment: &Assessment) -> RenderedAssessment {
        let format = self.shard.format(assessment.format).ok();
        let mut kinds: Vec<RelationshipKind> = assessment.relationship_kinds.iter().copied().collect();
        kinds.sort_by_key(|k| *k as u8);
        RenderedAssessment {
            id: assessment.id,
            name: assessment.name.clone(),
            description: assessment.description.clone(),
            unit: format.as_ref().map(|f| f.unit.clone()).unwrap_or_default(),
            format_description: format.map(|f| f.description).unwrap_or_default(),
            relationship_kinds: kinds,
            is_private: assessment.is_private,
        }
    }
}
