//! # Data Model
//!
//! Core data structures for the sharded assessment platform: identifier
//! newtypes, tenant entities (users, organisations, teams), the assessment
//! catalog, and the connection/permission rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Opaque key identifying one isolated country shard (ISO country code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardKey(pub String);

impl ShardKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compact identifier for users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{}", self.0)
    }
}

/// Compact identifier for organisations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgId(pub u32);

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

/// Compact identifier for teams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub u32);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Compact identifier for sports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SportId(pub u32);

impl fmt::Display for SportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Compact identifier for assessment top categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopCategoryId(pub u32);

impl fmt::Display for TopCategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TC{}", self.0)
    }
}

/// Compact identifier for assessment sub categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubCategoryId(pub u32);

impl fmt::Display for SubCategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SC{}", self.0)
    }
}

/// Compact identifier for assessments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssessmentId(pub u32);

impl fmt::Display for AssessmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Compact identifier for assessment value formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormatId(pub u32);

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.0)
    }
}

/// Compact identifier for invites
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InviteId(pub u32);

impl fmt::Display for InviteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Compact identifier for recorded assessment values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordedValueId(pub u32);

impl fmt::Display for RecordedValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// Compact identifier for promo codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromocodeId(pub u32);

impl fmt::Display for PromocodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// The top category granted open to athletes by default on every new
/// connection ("general leadership").
pub const DEFAULT_OPEN_TOP_CATEGORY: TopCategoryId = TopCategoryId(10_001);

/// Role of a platform account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Athlete,
    Coach,
    Organisation,
}

impl UserRole {
    pub fn is_athlete(self) -> bool {
        self == UserRole::Athlete
    }

    pub fn is_coach(self) -> bool {
        self == UserRole::Coach
    }

    pub fn is_organisation(self) -> bool {
        self == UserRole::Organisation
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Athlete => write!(f, "athlete"),
            UserRole::Coach => write!(f, "coach"),
            UserRole::Organisation => write!(f, "organisation"),
        }
    }
}

/// A platform account, always homed on exactly one shard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// The user's home shard (country of registration).
    pub country: ShardKey,
    pub role: UserRole,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

impl User {
    pub fn new(
        id: UserId,
        email: impl Into<String>,
        country: ShardKey,
        role: UserRole,
        date_joined: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email: email.into(),
            country,
            role,
            first_name: String::new(),
            last_name: String::new(),
            is_active: true,
            date_joined,
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = first.into();
        self.last_name = last.into();
        self
    }
}

/// Assessor projection of a user (the side recording a value).
///
/// Created atomically with the user row; its id equals the user id and it
/// is never deleted independently of the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessor {
    pub user: UserId,
    pub role: UserRole,
}

/// Assessed projection of a user (the side a value is recorded about).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessed {
    pub user: UserId,
    pub role: UserRole,
}

/// An organisation account with its curated assessment set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organisation {
    pub id: OrgId,
    pub name: String,
    pub description: String,
    /// Accounts that can log in as the organisation.
    pub login_users: HashSet<UserId>,
    /// Individual members of the organisation.
    pub members: HashSet<UserId>,
    /// Private assessments curated by the organisation. Extra items shown
    /// together with the public set, or the only items shown when
    /// `own_assessments_only` is set.
    pub own_assessments: HashSet<AssessmentId>,
    pub own_assessments_only: bool,
}

impl Organisation {
    pub fn new(id: OrgId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            login_users: HashSet::new(),
            members: HashSet::new(),
            own_assessments: HashSet::new(),
            own_assessments_only: false,
        }
    }

    /// Whether the user is a direct member or a login account.
    pub fn has_member(&self, user: UserId) -> bool {
        self.members.contains(&user) || self.login_users.contains(&user)
    }
}

/// A team of athletes and coaches, optionally owned by an organisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    pub owner: UserId,
    pub sport: SportId,
    pub organisation: Option<OrgId>,
    pub athletes: HashSet<UserId>,
    pub coaches: HashSet<UserId>,
    pub is_private: bool,
    /// Private assessments visible only to members of this team.
    pub assessments: HashSet<AssessmentId>,
    pub date_created: DateTime<Utc>,
}

impl Team {
    pub fn new(id: TeamId, name: impl Into<String>, owner: UserId, sport: SportId) -> Self {
        Self {
            id,
            name: name.into(),
            owner,
            sport,
            organisation: None,
            athletes: HashSet::new(),
            coaches: HashSet::new(),
            is_private: false,
            assessments: HashSet::new(),
            date_created: DateTime::<Utc>::MIN_UTC,
        }
    }

    pub fn with_organisation(mut self, org: OrgId) -> Self {
        self.organisation = Some(org);
        self
    }

    /// Add a member to the role-matching side of the team.
    pub fn add_member(&mut self, user: UserId, role: UserRole) {
        match role {
            UserRole::Athlete => {
                self.athletes.insert(user);
            }
            UserRole::Coach => {
                self.coaches.insert(user);
            }
            UserRole::Organisation => {}
        }
    }

    pub fn has_member(&self, user: UserId) -> bool {
        self.athletes.contains(&user) || self.coaches.contains(&user)
    }
}

/// A sport in the reference catalog (synced across every shard).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sport {
    pub id: SportId,
    pub name: String,
    pub description: String,
}

impl Sport {
    pub fn new(id: SportId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
        }
    }
}

/// A user's sport selection row, created for every user when a sport is
/// synced onto their shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChosenSport {
    pub user: UserId,
    pub sport: SportId,
}

/// Root of the assessment catalog tree (synced across every shard).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentTopCategory {
    pub id: TopCategoryId,
    pub name: String,
    pub description: String,
    pub sport: Option<SportId>,
}

impl AssessmentTopCategory {
    pub fn new(id: TopCategoryId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            sport: None,
        }
    }
}

/// Parent link of a sub category: directly under a top category, or nested
/// under another sub category. Never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubCategoryParent {
    Top(TopCategoryId),
    Sub(SubCategoryId),
}

/// An inner node of the assessment catalog tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentSubCategory {
    pub id: SubCategoryId,
    pub name: String,
    pub description: String,
    pub parent: SubCategoryParent,
}

impl AssessmentSubCategory {
    pub fn new(id: SubCategoryId, name: impl Into<String>, parent: SubCategoryParent) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            parent,
        }
    }
}

/// Direction of an assessment relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// Assessments performed by the individual on themselves.
    SelfAssessment,
    /// Data going from the athlete to the coach.
    AthleteToCoach,
    /// Data going from the coach to the athlete.
    CoachToAthlete,
}

/// Value format attached to an assessment (synced reference data).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentFormat {
    pub id: FormatId,
    pub unit: String,
    pub description: String,
    /// Regex the submitted value must match, if any.
    pub validation_regex: Option<String>,
}

impl AssessmentFormat {
    pub fn new(id: FormatId, unit: impl Into<String>) -> Self {
        Self {
            id,
            unit: unit.into(),
            description: String::new(),
            validation_regex: None,
        }
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.validation_regex = Some(regex.into());
        self
    }
}

/// A leaf metric of the assessment catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: AssessmentId,
    pub name: String,
    pub description: String,
    pub sub_category: SubCategoryId,
    pub format: FormatId,
    pub relationship_kinds: HashSet<RelationshipKind>,
    pub is_private: bool,
    /// Treat as public everywhere (teams, organisations, ...) even though
    /// other privacy scoping exists.
    pub is_public_everywhere: bool,
}

impl Assessment {
    pub fn new(
        id: AssessmentId,
        name: impl Into<String>,
        sub_category: SubCategoryId,
        format: FormatId,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            sub_category,
            format,
            relationship_kinds: HashSet::new(),
            is_private: false,
            is_public_everywhere: false,
        }
    }

    pub fn private(mut self) -> Self {
        self.is_private = true;
        self
    }

    pub fn public_everywhere(mut self) -> Self {
        self.is_public_everywhere = true;
        self
    }

    pub fn with_relationships<I: IntoIterator<Item = RelationshipKind>>(mut self, kinds: I) -> Self {
        self.relationship_kinds = kinds.into_iter().collect();
        self
    }

    /// The relationship kind a given assessor/assessed pair would exercise,
    /// if this assessment allows it.
    pub fn relationship_kind_for(
        &self,
        assessed: &Assessed,
        assessor: &Assessor,
    ) -> Option<RelationshipKind> {
        let kind = if assessor.user == assessed.user {
            RelationshipKind::SelfAssessment
        } else if assessor.role.is_coach() && assessed.role.is_athlete() {
            RelationshipKind::CoachToAthlete
        } else if assessor.role.is_athlete() && assessed.role.is_coach() {
            RelationshipKind::AthleteToCoach
        } else {
            return None;
        };
        self.relationship_kinds.contains(&kind).then_some(kind)
    }
}

/// A promo code (synced reference data, matched by code on repair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promocode {
    pub id: PromocodeId,
    pub code: String,
    pub description: String,
}

impl Promocode {
    pub fn new(id: PromocodeId, code: impl Into<String>) -> Self {
        Self {
            id,
            code: code.into(),
            description: String::new(),
        }
    }
}

/// Lifecycle state of an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteStatus {
    Pending,
    Accepted,
    Canceled,
}

/// A pending connection request from one user to an email address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invite {
    pub id: InviteId,
    pub requester: UserId,
    pub recipient_email: String,
    pub recipient_role: UserRole,
    pub team: Option<TeamId>,
    pub status: InviteStatus,
    pub date_sent: DateTime<Utc>,
}

/// A confirmed direct athlete-coach link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coaching {
    pub athlete: UserId,
    pub coach: UserId,
    pub date_joined: DateTime<Utc>,
}

/// One access grant of the permission graph: whether `assessor` may record
/// values about `assessed` under `top_category`. At most one row per
/// triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopCategoryPermission {
    pub assessed: UserId,
    pub assessor: UserId,
    pub top_category: TopCategoryId,
    pub assessor_has_access: bool,
}

/// A recorded assessment value. Append-only history; updated in place only
/// through the explicit correction endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedValue {
    pub id: RecordedValueId,
    pub assessed: UserId,
    pub assessor: UserId,
    pub assessment: AssessmentId,
    pub team: Option<TeamId>,
    pub value: f64,
    pub date_assessed: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relationship_kind_resolution() {
        let assessment = Assessment::new(AssessmentId(1), "squat", SubCategoryId(1), FormatId(1))
            .with_relationships([
                RelationshipKind::CoachToAthlete,
                RelationshipKind::SelfAssessment,
            ]);

        let coach = Assessor {
            user: UserId(1),
            role: UserRole::Coach,
        };
        let athlete = Assessed {
            user: UserId(2),
            role: UserRole::Athlete,
        };
        assert_eq!(
            assessment.relationship_kind_for(&athlete, &coach),
            Some(RelationshipKind::CoachToAthlete)
        );

        // Athlete assessing the coach is not an allowed kind here.
        let athlete_assessor = Assessor {
            user: UserId(2),
            role: UserRole::Athlete,
        };
        let coach_assessed = Assessed {
            user: UserId(1),
            role: UserRole::Coach,
        };
        assert_eq!(
            assessment.relationship_kind_for(&coach_assessed, &athlete_assessor),
            None
        );

        // Same user on both sides resolves to a self assessment.
        let self_assessed = Assessed {
            user: UserId(1),
            role: UserRole::Coach,
        };
        assert_eq!(
            assessment.relationship_kind_for(&self_assessed, &coach),
            Some(RelationshipKind::SelfAssessment)
        );
    }

    #[test]
    fn test_org_membership_includes_login_users() {
        let mut org = Organisation::new(OrgId(1), "Northside");
        org.members.insert(UserId(1));
        org.login_users.insert(UserId(2));
        assert!(org.has_member(UserId(1)));
        assert!(org.has_member(UserId(2)));
        assert!(!org.has_member(UserId(3)));
    }

    #[test]
    fn test_team_add_member_by_role() {
        let mut team = Team::new(TeamId(1), "U18", UserId(9), SportId(1));
        team.add_member(UserId(1), UserRole::Athlete);
        team.add_member(UserId(2), UserRole::Coach);
        team.add_member(UserId(3), UserRole::Organisation);
        assert!(team.athletes.contains(&UserId(1)));
        assert!(team.coaches.contains(&UserId(2)));
        assert!(!team.has_member(UserId(3)));
    }
}
