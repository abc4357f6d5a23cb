//! # Shard Store
//!
//! Per-shard storage for tenant rows and the shard's copy of the reference
//! catalog. Every operation is reached through an explicitly resolved
//! [`crate::shard::ShardHandle`]; there is no ambient "current shard" and
//! no default fallback, so a caller that forgets to resolve a shard does
//! not type-check.
//!
//! The store is the repository seam: the backing collaborator owns
//! connection handling and per-call timeouts, this module owns row
//! semantics (id assignment, upserts, integrity checks).

use crate::error::{CoreError, Result};
use crate::model::{
    Assessed, Assessment, AssessmentFormat, AssessmentId, AssessmentSubCategory,
    AssessmentTopCategory, Assessor, ChosenSport, Coaching, FormatId, Invite, InviteId,
    InviteStatus, Organisation, OrgId, Promocode, PromocodeId, RecordedValue, RecordedValueId,
    ShardKey, Sport, SportId, SubCategoryId, SubCategoryParent, Team, TeamId, TopCategoryId,
    TopCategoryPermission, User, UserId, UserRole,
};
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// All tables of one shard. Catalog tables are `BTreeMap` so readers see
/// id-ordered iteration without re-sorting.
#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    users_by_email: HashMap<String, UserId>,
    organisations: BTreeMap<OrgId, Organisation>,
    teams: BTreeMap<TeamId, Team>,

    sports: BTreeMap<SportId, Sport>,
    chosen_sports: Vec<ChosenSport>,
    top_categories: BTreeMap<TopCategoryId, AssessmentTopCategory>,
    sub_categories: BTreeMap<SubCategoryId, AssessmentSubCategory>,
    assessments: BTreeMap<AssessmentId, Assessment>,
    formats: BTreeMap<FormatId, AssessmentFormat>,
    promocodes: BTreeMap<PromocodeId, Promocode>,

    invites: BTreeMap<InviteId, Invite>,
    coachings: HashMap<(UserId, UserId), Coaching>,
    /// Keyed by (assessed, assessor, top category); at most one row per
    /// triple by construction.
    permissions: HashMap<(UserId, UserId, TopCategoryId), bool>,
    recorded: BTreeMap<RecordedValueId, RecordedValue>,

    next_user_id: u32,
    next_invite_id: u32,
    next_recorded_id: u32,
}

/// One shard's storage. Cheap to share behind an `Arc`; interior
/// mutability keeps repository calls `&self` while each call remains an
/// independent synchronous unit of work.
#[derive(Debug)]
pub struct ShardStore {
    key: ShardKey,
    tables: RwLock<Tables>,
}

impl ShardStore {
    pub fn new(key: ShardKey) -> Self {
        Self {
            key,
            tables: RwLock::new(Tables {
                next_user_id: 1,
                next_invite_id: 1,
                next_recorded_id: 1,
                ..Tables::default()
            }),
        }
    }

    /// The shard this store belongs to.
    pub fn key(&self) -> &ShardKey {
        &self.key
    }

    // ---- users ----------------------------------------------------------

    /// Create a user homed on this shard. The assessor/assessed
    /// projections exist implicitly from this point (their id is the user
    /// id), matching the atomic-creation invariant.
    pub fn create_user(&self, email: impl Into<String>, role: UserRole, now: DateTime<Utc>) -> User {
        let mut tables = self.tables.write();
        let id = UserId(tables.next_user_id);
        tables.next_user_id += 1;
        let user = User::new(id, email, self.key.clone(), role, now);
        tables
            .users_by_email
            .insert(user.email.to_lowercase(), user.id);
        tables.users.insert(id, user.clone());
        user
    }

    pub fn user(&self, id: UserId) -> Result<User> {
        self.tables
            .read()
            .users
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("user", id))
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        let tables = self.tables.read();
        let id = tables.users_by_email.get(&email.to_lowercase())?;
        tables.users.get(id).cloned()
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.tables.read().users.values().cloned().collect();
        users.sort_by_key(|u| u.id);
        users
    }

    /// The assessor projection of a user. Organisations are not
    /// assessors.
    pub fn assessor_of(&self, id: UserId) -> Result<Assessor> {
        let user = self.user(id)?;
        if user.role.is_organisation() {
            return Err(CoreError::IntegrityConflict(format!(
                "organisation account {id} has no assessor projection"
            )));
        }
        Ok(Assessor {
            user: user.id,
            role: user.role,
        })
    }

    /// The assessed projection of a user. Organisations are not
    /// assessable.
    pub fn assessed_of(&self, id: UserId) -> Result<Assessed> {
        let user = self.user(id)?;
        if user.role.is_organisation() {
            return Err(CoreError::IntegrityConflict(format!(
                "organisation account {id} has no assessed projection"
            )));
        }
        Ok(Assessed {
            user: user.id,
            role: user.role,
        })
    }

    // ---- organisations and teams ----------------------------------------

    pub fn upsert_organisation(&self, org: Organisation) {
        self.tables.write().organisations.insert(org.id, org);
    }

    pub fn organisation(&self, id: OrgId) -> Result<Organisation> {
        self.tables
            .read()
            .organisations
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("organisation", id))
    }

    pub fn organisations(&self) -> Vec<Organisation> {
        self.tables.read().organisations.values().cloned().collect()
    }

    pub fn upsert_team(&self, team: Team) {
        self.tables.write().teams.insert(team.id, team);
    }

    pub fn team(&self, id: TeamId) -> Result<Team> {
        self.tables
            .read()
            .teams
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("team", id))
    }

    pub fn teams(&self) -> Vec<Team> {
        self.tables.read().teams.values().cloned().collect()
    }

    /// Teams the user belongs to on the side matching their role.
    pub fn teams_with_member(&self, user: UserId) -> Vec<Team> {
        self.tables
            .read()
            .teams
            .values()
            .filter(|t| t.has_member(user))
            .cloned()
            .collect()
    }

    pub fn teams_owned_by(&self, user: UserId) -> Vec<Team> {
        self.tables
            .read()
            .teams
            .values()
            .filter(|t| t.owner == user)
            .cloned()
            .collect()
    }

    /// Add a user to a team on the side matching their role.
    pub fn add_team_member(&self, team: TeamId, user: UserId, role: UserRole) -> Result<()> {
        let mut tables = self.tables.write();
        let team = tables
            .teams
            .get_mut(&team)
            .ok_or_else(|| CoreError::unknown("team", team))?;
        team.add_member(user, role);
        Ok(())
    }

    pub fn remove_team_member(&self, team: TeamId, user: UserId) -> Result<()> {
        let mut tables = self.tables.write();
        let team = tables
            .teams
            .get_mut(&team)
            .ok_or_else(|| CoreError::unknown("team", team))?;
        team.athletes.remove(&user);
        team.coaches.remove(&user);
        Ok(())
    }

    // ---- reference catalog ----------------------------------------------

    pub fn upsert_sport(&self, sport: Sport) {
        self.tables.write().sports.insert(sport.id, sport);
    }

    pub fn sport(&self, id: SportId) -> Result<Sport> {
        self.tables
            .read()
            .sports
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("sport", id))
    }

    pub fn max_sport_id(&self) -> u32 {
        self.tables.read().sports.keys().last().map_or(0, |id| id.0)
    }

    pub fn add_chosen_sport(&self, row: ChosenSport) {
        let mut tables = self.tables.write();
        if !tables.chosen_sports.contains(&row) {
            tables.chosen_sports.push(row);
        }
    }

    pub fn chosen_sports_of(&self, user: UserId) -> Vec<ChosenSport> {
        self.tables
            .read()
            .chosen_sports
            .iter()
            .filter(|c| c.user == user)
            .copied()
            .collect()
    }

    pub fn upsert_top_category(&self, category: AssessmentTopCategory) {
        self.tables
            .write()
            .top_categories
            .insert(category.id, category);
    }

    pub fn top_category(&self, id: TopCategoryId) -> Result<AssessmentTopCategory> {
        self.tables
            .read()
            .top_categories
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("top category", id))
    }

    /// All top categories of this shard, id-ordered.
    pub fn top_categories(&self) -> Vec<AssessmentTopCategory> {
        self.tables.read().top_categories.values().cloned().collect()
    }

    pub fn max_top_category_id(&self) -> u32 {
        self.tables
            .read()
            .top_categories
            .keys()
            .last()
            .map_or(0, |id| id.0)
    }

    /// Insert or replace a sub category. The parent must already exist on
    /// this shard.
    pub fn upsert_sub_category(&self, category: AssessmentSubCategory) -> Result<()> {
        let mut tables = self.tables.write();
        match category.parent {
            SubCategoryParent::Top(top) => {
                if !tables.top_categories.contains_key(&top) {
                    return Err(CoreError::unknown("top category", top));
                }
            }
            SubCategoryParent::Sub(sub) => {
                if !tables.sub_categories.contains_key(&sub) {
                    return Err(CoreError::unknown("sub category", sub));
                }
            }
        }
        tables.sub_categories.insert(category.id, category);
        Ok(())
    }

    pub fn sub_category(&self, id: SubCategoryId) -> Result<AssessmentSubCategory> {
        self.tables
            .read()
            .sub_categories
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("sub category", id))
    }

    pub fn sub_categories(&self) -> Vec<AssessmentSubCategory> {
        self.tables.read().sub_categories.values().cloned().collect()
    }

    pub fn max_sub_category_id(&self) -> u32 {
        self.tables
            .read()
            .sub_categories
            .keys()
            .last()
            .map_or(0, |id| id.0)
    }

    /// Insert or replace an assessment. Rejects the mutually exclusive
    /// privacy flags and dangling parent/format references.
    pub fn upsert_assessment(&self, assessment: Assessment) -> Result<()> {
        if assessment.is_private && assessment.is_public_everywhere {
            return Err(CoreError::IntegrityConflict(format!(
                "assessment {} cannot be both private and public everywhere",
                assessment.id
            )));
        }
        let mut tables = self.tables.write();
        if !tables.sub_categories.contains_key(&assessment.sub_category) {
            return Err(CoreError::unknown("sub category", assessment.sub_category));
        }
        if !tables.formats.contains_key(&assessment.format) {
            return Err(CoreError::unknown("format", assessment.format));
        }
        tables.assessments.insert(assessment.id, assessment);
        Ok(())
    }

    pub fn assessment(&self, id: AssessmentId) -> Result<Assessment> {
        self.tables
            .read()
            .assessments
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("assessment", id))
    }

    pub fn assessments(&self) -> Vec<Assessment> {
        self.tables.read().assessments.values().cloned().collect()
    }

    pub fn max_assessment_id(&self) -> u32 {
        self.tables
            .read()
            .assessments
            .keys()
            .last()
            .map_or(0, |id| id.0)
    }

    pub fn upsert_format(&self, format: AssessmentFormat) {
        self.tables.write().formats.insert(format.id, format);
    }

    pub fn format(&self, id: FormatId) -> Result<AssessmentFormat> {
        self.tables
            .read()
            .formats
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("format", id))
    }

    pub fn max_format_id(&self) -> u32 {
        self.tables.read().formats.keys().last().map_or(0, |id| id.0)
    }

    pub fn upsert_promocode(&self, promocode: Promocode) {
        self.tables
            .write()
            .promocodes
            .insert(promocode.id, promocode);
    }

    pub fn promocode(&self, id: PromocodeId) -> Result<Promocode> {
        self.tables
            .read()
            .promocodes
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("promocode", id))
    }

    pub fn promocode_by_code(&self, code: &str) -> Option<Promocode> {
        self.tables
            .read()
            .promocodes
            .values()
            .find(|p| p.code == code)
            .cloned()
    }

    pub fn max_promocode_id(&self) -> u32 {
        self.tables
            .read()
            .promocodes
            .keys()
            .last()
            .map_or(0, |id| id.0)
    }

    /// Remove a reference row by id. Missing rows are not an error so
    /// cross-shard deletes stay idempotent.
    pub fn remove_sport(&self, id: SportId) -> bool {
        self.tables.write().sports.remove(&id).is_some()
    }

    pub fn remove_top_category(&self, id: TopCategoryId) -> bool {
        self.tables.write().top_categories.remove(&id).is_some()
    }

    pub fn remove_sub_category(&self, id: SubCategoryId) -> bool {
        self.tables.write().sub_categories.remove(&id).is_some()
    }

    pub fn remove_assessment(&self, id: AssessmentId) -> bool {
        self.tables.write().assessments.remove(&id).is_some()
    }

    pub fn remove_format(&self, id: FormatId) -> bool {
        self.tables.write().formats.remove(&id).is_some()
    }

    pub fn remove_promocode(&self, id: PromocodeId) -> bool {
        self.tables.write().promocodes.remove(&id).is_some()
    }

    // ---- invites and coaching links -------------------------------------

    pub fn create_invite(
        &self,
        requester: UserId,
        recipient_email: impl Into<String>,
        recipient_role: UserRole,
        team: Option<TeamId>,
        now: DateTime<Utc>,
    ) -> Invite {
        let mut tables = self.tables.write();
        let id = InviteId(tables.next_invite_id);
        tables.next_invite_id += 1;
        let invite = Invite {
            id,
            requester,
            recipient_email: recipient_email.into(),
            recipient_role,
            team,
            status: InviteStatus::Pending,
            date_sent: now,
        };
        tables.invites.insert(id, invite.clone());
        invite
    }

    pub fn invite(&self, id: InviteId) -> Result<Invite> {
        self.tables
            .read()
            .invites
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("invite", id))
    }

    pub fn set_invite_status(&self, id: InviteId, status: InviteStatus) -> Result<()> {
        let mut tables = self.tables.write();
        let invite = tables
            .invites
            .get_mut(&id)
            .ok_or_else(|| CoreError::unknown("invite", id))?;
        invite.status = status;
        Ok(())
    }

    /// Invites of any status matching a predicate.
    pub fn invites_matching<F: Fn(&Invite) -> bool>(&self, pred: F) -> Vec<Invite> {
        self.tables
            .read()
            .invites
            .values()
            .filter(|i| pred(i))
            .cloned()
            .collect()
    }

    /// Pending invites matching a predicate (date filtering is the
    /// caller's policy).
    pub fn pending_invites<F: Fn(&Invite) -> bool>(&self, pred: F) -> Vec<Invite> {
        self.tables
            .read()
            .invites
            .values()
            .filter(|i| i.status == InviteStatus::Pending && pred(i))
            .cloned()
            .collect()
    }

    pub fn delete_invites<F: Fn(&Invite) -> bool>(&self, pred: F) -> usize {
        let mut tables = self.tables.write();
        let doomed: Vec<InviteId> = tables
            .invites
            .values()
            .filter(|i| pred(i))
            .map(|i| i.id)
            .collect();
        for id in &doomed {
            tables.invites.remove(id);
        }
        doomed.len()
    }

    /// Create the athlete-coach link if it does not exist yet.
    pub fn link_coaching(&self, athlete: UserId, coach: UserId, now: DateTime<Utc>) {
        self.tables
            .write()
            .coachings
            .entry((athlete, coach))
            .or_insert(Coaching {
                athlete,
                coach,
                date_joined: now,
            });
    }

    pub fn unlink_coaching(&self, athlete: UserId, coach: UserId) -> bool {
        self.tables
            .write()
            .coachings
            .remove(&(athlete, coach))
            .is_some()
    }

    pub fn coaching_exists(&self, athlete: UserId, coach: UserId) -> bool {
        self.tables.read().coachings.contains_key(&(athlete, coach))
    }

    pub fn coachings_of(&self, user: UserId) -> Vec<Coaching> {
        self.tables
            .read()
            .coachings
            .values()
            .filter(|c| c.athlete == user || c.coach == user)
            .copied()
            .collect()
    }

    // ---- permission graph ------------------------------------------------

    /// `get_or_create` semantics: an existing row is never overwritten, so
    /// re-running a fan-out cannot clobber a value set through the
    /// explicit update endpoint.
    pub fn grant_permission(
        &self,
        assessed: UserId,
        assessor: UserId,
        top_category: TopCategoryId,
        assessor_has_access: bool,
    ) {
        self.tables
            .write()
            .permissions
            .entry((assessed, assessor, top_category))
            .or_insert(assessor_has_access);
    }

    /// Update an existing row. Unknown rows are an error, never created.
    pub fn set_permission(
        &self,
        assessed: UserId,
        assessor: UserId,
        top_category: TopCategoryId,
        assessor_has_access: bool,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        match tables.permissions.get_mut(&(assessed, assessor, top_category)) {
            Some(access) => {
                *access = assessor_has_access;
                Ok(())
            }
            None => Err(CoreError::unknown(
                "top category permission",
                format!("{assessed}/{assessor}/{top_category}"),
            )),
        }
    }

    pub fn permission(
        &self,
        assessed: UserId,
        assessor: UserId,
        top_category: TopCategoryId,
    ) -> Option<bool> {
        self.tables
            .read()
            .permissions
            .get(&(assessed, assessor, top_category))
            .copied()
    }

    pub fn permissions_for_assessed(&self, assessed: UserId) -> Vec<TopCategoryPermission> {
        let mut rows: Vec<TopCategoryPermission> = self
            .tables
            .read()
            .permissions
            .iter()
            .filter(|((a, _, _), _)| *a == assessed)
            .map(|((a, s, tc), access)| TopCategoryPermission {
                assessed: *a,
                assessor: *s,
                top_category: *tc,
                assessor_has_access: *access,
            })
            .collect();
        rows.sort_by_key(|r| (r.assessor, r.top_category));
        rows
    }

    /// Distinct (assessed, assessor) pairs present in the graph. Used to
    /// backfill rows when a new top category is synced onto the shard.
    pub fn permission_pairs(&self) -> Vec<(UserId, UserId)> {
        let mut pairs: Vec<(UserId, UserId)> = self
            .tables
            .read()
            .permissions
            .keys()
            .map(|(assessed, assessor, _)| (*assessed, *assessor))
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    /// Remove every row of one directed pair, across all top categories.
    pub fn delete_pair_permissions(&self, assessed: UserId, assessor: UserId) -> usize {
        let mut tables = self.tables.write();
        let doomed: Vec<(UserId, UserId, TopCategoryId)> = tables
            .permissions
            .keys()
            .filter(|(a, s, _)| *a == assessed && *s == assessor)
            .copied()
            .collect();
        for key in &doomed {
            tables.permissions.remove(key);
        }
        doomed.len()
    }

    /// Remove every row touching the user on either side.
    pub fn delete_user_permissions(&self, user: UserId) -> usize {
        let mut tables = self.tables.write();
        let doomed: Vec<(UserId, UserId, TopCategoryId)> = tables
            .permissions
            .keys()
            .filter(|(a, s, _)| *a == user || *s == user)
            .copied()
            .collect();
        for key in &doomed {
            tables.permissions.remove(key);
        }
        doomed.len()
    }

    // ---- recorded values -------------------------------------------------

    pub fn insert_recorded(
        &self,
        assessed: UserId,
        assessor: UserId,
        assessment: AssessmentId,
        team: Option<TeamId>,
        value: f64,
        now: DateTime<Utc>,
    ) -> RecordedValue {
        let mut tables = self.tables.write();
        let id = RecordedValueId(tables.next_recorded_id);
        tables.next_recorded_id += 1;
        let row = RecordedValue {
            id,
            assessed,
            assessor,
            assessment,
            team,
            value,
            date_assessed: now,
        };
        tables.recorded.insert(id, row.clone());
        row
    }

    pub fn recorded(&self, id: RecordedValueId) -> Result<RecordedValue> {
        self.tables
            .read()
            .recorded
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown("recorded value", id))
    }

    /// Explicit correction endpoint: adjust a stored value in place.
    pub fn correct_recorded(&self, id: RecordedValueId, value: f64) -> Result<RecordedValue> {
        let mut tables = self.tables.write();
        let row = tables
            .recorded
            .get_mut(&id)
            .ok_or_else(|| CoreError::unknown("recorded value", id))?;
        row.value = value;
        Ok(row.clone())
    }

    pub fn recorded_for_assessed(&self, assessed: UserId) -> Vec<RecordedValue> {
        self.tables
            .read()
            .recorded
            .values()
            .filter(|r| r.assessed == assessed)
            .cloned()
            .collect()
    }

    pub fn recorded_for_team(&self, team: TeamId) -> Vec<RecordedValue> {
        self.tables
            .read()
            .recorded
            .values()
            .filter(|r| r.team == Some(team))
            .cloned()
            .collect()
    }

    /// Most recent assessment date recorded about the user, if any.
    pub fn latest_assessed_date(&self, assessed: UserId) -> Option<DateTime<Utc>> {
        self.tables
            .read()
            .recorded
            .values()
            .filter(|r| r.assessed == assessed)
            .map(|r| r.date_assessed)
            .max()
    }
}
