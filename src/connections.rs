//! # Connection Orchestrator
//!
//! Invite lifecycle and the permission fan-out it triggers. A pair of
//! users moves `Unconnected -> Pending -> Connected` (and back on
//! revocation); every `Pending -> Connected` transition rewrites the
//! permission graph for the affected pairs.
//!
//! The fan-out is driven by a declarative rule table: a connection kind
//! and the two roles map to a set of directed grant rules over abstract
//! parties (requester, recipient, team owner, team members). Evaluating a
//! rule resolves the parties against the shard and upserts one permission
//! row per top category with `get_or_create` semantics, so re-running a
//! fan-out neither duplicates rows nor clobbers grants flipped through
//! the explicit permission endpoint.

use crate::config::ConnectionConfig;
use crate::error::{CoreError, Result};
use crate::model::{Invite, InviteId, InviteStatus, ShardKey, Team, TeamId, User, UserId, UserRole};
use crate::shard::ShardHandle;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};

/// How two users became connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// A direct one-to-one invite.
    Direct,
    /// The recipient joined a team.
    TeamJoin,
}

/// Abstract endpoint of a grant rule, resolved against the shard when the
/// rule is evaluated. Organisation accounts never resolve: organisations
/// are not assessable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Requester,
    Recipient,
    /// The team's owner, when that owner is a coach account (organisation
    /// owners are skipped).
    TeamOwner,
    TeamCoaches,
    TeamAthletes,
}

/// One directed grant: `assessor` gains rows about `assessed`. The access
/// level per top category follows from the assessor's role (coaches get
/// everything, athletes only the default-open category). `coaching` also
/// materializes the direct athlete-coach link for the pair.
#[derive(Debug, Clone, Copy)]
pub struct GrantRule {
    pub assessor: Party,
    pub assessed: Party,
    pub coaching: bool,
}

const fn rule(assessor: Party, assessed: Party, coaching: bool) -> GrantRule {
    GrantRule {
        assessor,
        assessed,
        coaching,
    }
}

/// The rule table. Everything the fan-out does for a connection event is
/// listed here; the orchestrator only evaluates.
pub fn grant_rules(
    kind: ConnectionKind,
    requester: UserRole,
    recipient: UserRole,
) -> Vec<GrantRule> {
    use Party::{Recipient, Requester, TeamAthletes, TeamCoaches, TeamOwner};

    let mut rules = Vec::new();

    // A direct athlete-coach pair is granted for both directions, whether
    // the connection is one-to-one or the invite carried a team.
    let direct_pair = !requester.is_organisation()
        && !recipient.is_organisation()
        && requester != recipient;
    if direct_pair {
        rules.push(rule(Recipient, Requester, true));
        rules.push(rule(Requester, Recipient, false));
    }

    if kind == ConnectionKind::TeamJoin {
        match recipient {
            UserRole::Athlete => {
                rules.push(rule(TeamCoaches, Recipient, true));
                rules.push(rule(Recipient, TeamCoaches, false));
                rules.push(rule(TeamOwner, Recipient, false));
                rules.push(rule(Recipient, TeamOwner, false));
            }
            UserRole::Coach => {
                rules.push(rule(Recipient, TeamAthletes, true));
                rules.push(rule(TeamAthletes, Recipient, false));
                rules.push(rule(Recipient, TeamOwner, false));
                rules.push(rule(TeamOwner, Recipient, false));
            }
            UserRole::Organisation => {}
        }
    }

    rules
}

/// Fire-and-forget notification collaborator. Failures are logged and
/// never roll back a graph mutation.
pub trait ConnectionNotifier: Send + Sync {
    fn invite_sent(&self, _shard: &ShardKey, _invite: &Invite) -> anyhow::Result<()> {
        Ok(())
    }

    fn connection_confirmed(
        &self,
        _shard: &ShardKey,
        _requester: UserId,
        _recipient: UserId,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    fn connection_revoked(&self, _shard: &ShardKey, _a: UserId, _b: UserId) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl ConnectionNotifier for NoopNotifier {}

/// Reacts to connection lifecycle events on one shard.
pub struct ConnectionOrchestrator<'a> {
    shard: &'a ShardHandle,
    config: &'a ConnectionConfig,
    notifier: &'a dyn ConnectionNotifier,
}

impl<'a> ConnectionOrchestrator<'a> {
    pub fn new(
        shard: &'a ShardHandle,
        config: &'a ConnectionConfig,
        notifier: &'a dyn ConnectionNotifier,
    ) -> Self {
        Self {
            shard,
            config,
            notifier,
        }
    }

    // ---- invite lifecycle ------------------------------------------------

    /// Create a pending invite from `requester` to an email address.
    pub fn invite(
        &self,
        requester: UserId,
        recipient_email: &str,
        recipient_role: UserRole,
        team: Option<TeamId>,
        now: DateTime<Utc>,
    ) -> Result<Invite> {
        let requester = self.shard.user(requester)?;
        if requester.email.eq_ignore_ascii_case(recipient_email) {
            return Err(CoreError::InviteRejected(
                "you can not send an invite to yourself".into(),
            ));
        }
        let team = team.map(|id| self.shard.team(id)).transpose()?;

        let expire_cutoff = now - Duration::seconds(self.config.invite_token_expires_secs);
        let duplicate = self.shard.pending_invites(|i| {
            i.requester == requester.id
                && i.recipient_email.eq_ignore_ascii_case(recipient_email)
                && i.date_sent > expire_cutoff
        });
        if !duplicate.is_empty() {
            return Err(CoreError::InviteRejected(
                "another pending non-expired invite already exists".into(),
            ));
        }

        let recipient = self.shard.user_by_email(recipient_email);
        if let (Some(team), Some(recipient)) = (&team, &recipient) {
            if team.has_member(recipient.id) || team.owner == recipient.id {
                return Err(CoreError::InviteRejected(format!(
                    "{recipient_email} already participates in team {}",
                    team.id
                )));
            }
        }
        if team.is_none() && recipient_role != requester.role {
            if let Some(recipient) = &recipient {
                let linked = match (requester.role, recipient.role) {
                    (UserRole::Coach, UserRole::Athlete) => {
                        self.shard.coaching_exists(recipient.id, requester.id)
                    }
                    (UserRole::Athlete, UserRole::Coach) => {
                        self.shard.coaching_exists(requester.id, recipient.id)
                    }
                    _ => false,
                };
                if linked {
                    return Err(CoreError::InviteRejected(
                        "users have been already connected".into(),
                    ));
                }
            }
        }

        let resend_cutoff = now - Duration::seconds(self.config.invite_resend_timeout_secs);
        let team_id = team.as_ref().map(|t| t.id);
        let recent = self.shard.invites_matching(|i| {
            i.requester == requester.id
                && i.recipient_email.eq_ignore_ascii_case(recipient_email)
                && i.team == team_id
                && i.date_sent > resend_cutoff
        });
        if !recent.is_empty() {
            return Err(CoreError::InviteRejected(
                "too frequent invitation requests, please try again later".into(),
            ));
        }

        let invite =
            self.shard
                .create_invite(requester.id, recipient_email, recipient_role, team_id, now);
        if let Err(e) = self.notifier.invite_sent(self.shard.key(), &invite) {
            warn!(invite = %invite.id, error = %e, "invite notification failed");
        }
        Ok(invite)
    }

    /// Confirm a pending invite: flip its status, add the recipient to
    /// the invite's team, and run the permission fan-out. Returns the
    /// recipient.
    pub fn confirm_invite(&self, invite: InviteId, now: DateTime<Utc>) -> Result<User> {
        let invite = self.shard.invite(invite)?;
        if invite.status != InviteStatus::Pending {
            return Err(CoreError::InviteRejected("invite is not pending".into()));
        }
        let expire_cutoff = now - Duration::seconds(self.config.invite_token_expires_secs);
        if invite.date_sent <= expire_cutoff {
            return Err(CoreError::InviteRejected("invite has expired".into()));
        }
        let recipient = self
            .shard
            .user_by_email(&invite.recipient_email)
            .ok_or_else(|| CoreError::unknown("user", &invite.recipient_email))?;
        if recipient.role.is_organisation() {
            return Err(CoreError::InviteRejected(
                "organisation accounts can not be connected".into(),
            ));
        }
        let requester = self.shard.user(invite.requester)?;

        self.shard
            .set_invite_status(invite.id, InviteStatus::Accepted)?;
        if let Some(team) = invite.team {
            self.shard.add_team_member(team, recipient.id, recipient.role)?;
        }
        self.on_connection_confirmed(requester.id, recipient.id, invite.team)?;
        Ok(recipient)
    }

    /// Cancel a specific pending invite.
    pub fn revoke_invite(&self, invite: InviteId) -> Result<()> {
        self.shard.invite(invite)?;
        self.shard.set_invite_status(invite, InviteStatus::Canceled)
    }

    /// Delete invites older than the expiry window. Returns the number
    /// removed.
    pub fn purge_expired_invites(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(self.config.invite_token_expires_secs);
        self.shard.delete_invites(|i| i.date_sent <= cutoff)
    }

    /// Pending, non-expired invites sent by or addressed to the user.
    pub fn pending_invites_of(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<Invite>> {
        let user = self.shard.user(user)?;
        let cutoff = now - Duration::seconds(self.config.invite_token_expires_secs);
        Ok(self.shard.pending_invites(|i| {
            i.date_sent > cutoff
                && (i.requester == user.id || i.recipient_email.eq_ignore_ascii_case(&user.email))
        }))
    }

    // ---- fan-out ---------------------------------------------------------

    /// Run the permission fan-out for a confirmed connection. Idempotent:
    /// re-running creates no duplicate rows and overwrites nothing.
    #[instrument(skip(self), fields(shard = %self.shard.key()))]
    pub fn on_connection_confirmed(
        &self,
        requester: UserId,
        recipient: UserId,
        team: Option<TeamId>,
    ) -> Result<()> {
        let requester = self.shard.user(requester)?;
        let recipient = self.shard.user(recipient)?;
        let team = team.map(|id| self.shard.team(id)).transpose()?;
        let kind = if team.is_some() {
            ConnectionKind::TeamJoin
        } else {
            ConnectionKind::Direct
        };

        let tops = self.shard.top_categories();
        let rules = grant_rules(kind, requester.role, recipient.role);
        let mut granted_pairs = 0usize;
        for rule in &rules {
            let assessors = self.resolve_party(rule.assessor, &requester, &recipient, team.as_ref())?;
            let assesseds = self.resolve_party(rule.assessed, &requester, &recipient, team.as_ref())?;
            for (assessor, assessor_role) in &assessors {
                for (assessed, assessed_role) in &assesseds {
                    if assessor == assessed {
                        continue;
                    }
                    for top in &tops {
                        let access = assessor_role.is_coach()
                            || top.id == self.config.default_open_top_category;
                        self.shard
                            .grant_permission(*assessed, *assessor, top.id, access);
                    }
                    if rule.coaching {
                        self.link_pair(*assessor, *assessor_role, *assessed, *assessed_role);
                    }
                    granted_pairs += 1;
                }
            }
        }
        debug!(
            kind = ?kind,
            rules = rules.len(),
            pairs = granted_pairs,
            top_categories = tops.len(),
            "connection fan-out applied"
        );

        if let Err(e) =
            self.notifier
                .connection_confirmed(self.shard.key(), requester.id, recipient.id)
        {
            warn!(error = %e, "connection notification failed");
        }
        Ok(())
    }

    /// Revoke the direct connection between two users: the coaching link
    /// and both directional permission row sets of exactly this pair.
    /// Team-mediated permissions with other members are untouched and
    /// need separate per-pair revocation.
    #[instrument(skip(self), fields(shard = %self.shard.key()))]
    pub fn on_connection_revoked(&self, a: UserId, b: UserId) -> Result<()> {
        if a == b {
            return Err(CoreError::IntegrityConflict(
                "you can not unlink yourself".into(),
            ));
        }
        let user_a = self.shard.user(a)?;
        let user_b = self.shard.user(b)?;

        self.shard.unlink_coaching(a, b);
        self.shard.unlink_coaching(b, a);

        // Cancel pending invites between the two, in either direction.
        let between = self.shard.pending_invites(|i| {
            (i.requester == a && i.recipient_email.eq_ignore_ascii_case(&user_b.email))
                || (i.requester == b && i.recipient_email.eq_ignore_ascii_case(&user_a.email))
        });
        for invite in between {
            self.shard
                .set_invite_status(invite.id, InviteStatus::Canceled)?;
        }

        let removed = self.shard.delete_pair_permissions(a, b)
            + self.shard.delete_pair_permissions(b, a);
        debug!(rows = removed, "connection revoked");

        if let Err(e) = self.notifier.connection_revoked(self.shard.key(), a, b) {
            warn!(error = %e, "revocation notification failed");
        }
        Ok(())
    }

    /// Drop every connection artifact touching the user (account
    /// deletion): permission rows on both sides and all coaching links.
    pub fn delete_all_connections(&self, user: UserId) -> Result<()> {
        self.shard.user(user)?;
        self.shard.delete_user_permissions(user);
        for coaching in self.shard.coachings_of(user) {
            self.shard.unlink_coaching(coaching.athlete, coaching.coach);
        }
        Ok(())
    }

    // ---- connection queries ---------------------------------------------

    /// Whether two users are connected directly or through a team.
    pub fn is_connected(&self, user: UserId, other: UserId) -> Result<bool> {
        let user = self.shard.user(user)?;
        Ok(match user.role {
            UserRole::Athlete => {
                self.shard.coaching_exists(user.id, other)
                    || self
                        .shard
                        .teams_with_member(user.id)
                        .iter()
                        .any(|t| t.coaches.contains(&other) || t.owner == other)
            }
            UserRole::Coach => {
                self.shard.coaching_exists(other, user.id)
                    || self
                        .shard
                        .teams_owned_by(user.id)
                        .iter()
                        .any(|t| t.athletes.contains(&other))
                    || self
                        .shard
                        .teams_with_member(user.id)
                        .iter()
                        .any(|t| t.athletes.contains(&other))
            }
            UserRole::Organisation => {
                let owned = self
                    .shard
                    .teams_owned_by(user.id)
                    .iter()
                    .any(|t| t.has_member(other));
                let via_org = self
                    .shard
                    .organisations()
                    .iter()
                    .filter(|org| org.has_member(user.id))
                    .any(|org| {
                        self.shard
                            .teams()
                            .iter()
                            .any(|t| t.organisation == Some(org.id) && t.has_member(other))
                    });
                owned || via_org
            }
        })
    }

    /// The users linked to this one: direct links plus team-mediated
    /// opposite-role members, deduplicated, id-ordered.
    pub fn linked_users(&self, user: UserId) -> Result<Vec<User>> {
        let user = self.shard.user(user)?;
        let mut ids: Vec<UserId> = Vec::new();
        match user.role {
            UserRole::Athlete => {
                ids.extend(
                    self.shard
                        .coachings_of(user.id)
                        .iter()
                        .filter(|c| c.athlete == user.id)
                        .map(|c| c.coach),
                );
                for team in self.shard.teams_with_member(user.id) {
                    ids.extend(team.coaches.iter().copied());
                }
            }
            UserRole::Coach => {
                ids.extend(
                    self.shard
                        .coachings_of(user.id)
                        .iter()
                        .filter(|c| c.coach == user.id)
                        .map(|c| c.athlete),
                );
                let mut teams = self.shard.teams_with_member(user.id);
                teams.extend(self.shard.teams_owned_by(user.id));
                for team in teams {
                    ids.extend(team.athletes.iter().copied());
                }
            }
            UserRole::Organisation => {}
        }
        ids.sort();
        ids.dedup();
        ids.into_iter().map(|id| self.shard.user(id)).collect()
    }

    // ---- helpers ---------------------------------------------------------

    fn resolve_party(
        &self,
        party: Party,
        requester: &User,
        recipient: &User,
        team: Option<&Team>,
    ) -> Result<Vec<(UserId, UserRole)>> {
        Ok(match party {
            Party::Requester => role_projection(requester),
            Party::Recipient => role_projection(recipient),
            Party::TeamOwner => match team {
                Some(team) => {
                    let owner = self.shard.user(team.owner)?;
                    if owner.role.is_coach() {
                        vec![(owner.id, owner.role)]
                    } else {
                        Vec::new()
                    }
                }
                None => Vec::new(),
            },
            Party::TeamCoaches => team.map_or_else(Vec::new, |team| {
                team.coaches
                    .iter()
                    .filter(|id| **id != recipient.id)
                    .map(|id| (*id, UserRole::Coach))
                    .collect()
            }),
            Party::TeamAthletes => team.map_or_else(Vec::new, |team| {
                team.athletes
                    .iter()
                    .filter(|id| **id != recipient.id)
                    .map(|id| (*id, UserRole::Athlete))
                    .collect()
            }),
        })
    }

    fn link_pair(&self, a: UserId, a_role: UserRole, b: UserId, b_role: UserRole) {
        let (athlete, coach) = match (a_role, b_role) {
            (UserRole::Athlete, UserRole::Coach) => (a, b),
            (UserRole::Coach, UserRole::Athlete) => (b, a),
            _ => return,
        };
        self.shard.link_coaching(athlete, coach, Utc::now());
    }
}

fn role_projection(user: &User) -> Vec<(UserId, UserRole)> {
    if user.role.is_organisation() {
        Vec::new()
    } else {
        vec![(user.id, user.role)]
    }
}
