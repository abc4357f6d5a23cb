//! # Assessment Recording
//!
//! Validated submission of recorded values. Batches are partitioned per
//! item into `{valid, rejected}` rather than failing wholesale: every
//! item independently passes the cooldown, connection, permission,
//! relationship and value-format checks.

use crate::config::ConnectionConfig;
use crate::connections::{ConnectionOrchestrator, NoopNotifier};
use crate::error::{BatchOutcome, CoreError, Result};
use crate::model::{
    Assessor, AssessmentId, RecordedValue, RecordedValueId, TeamId, UserId,
};
use crate::permissions::PermissionGraph;
use crate::shard::ShardHandle;
use crate::tree::AssessmentTree;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::Arc;

static NOOP: NoopNotifier = NoopNotifier;

/// One requested recording.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionItem {
    pub assessed: UserId,
    pub assessment: AssessmentId,
    pub team: Option<TeamId>,
    pub value: f64,
}

/// One requested correction of an already recorded value.
#[derive(Debug, Clone, Copy)]
pub struct Correction {
    pub id: RecordedValueId,
    pub value: f64,
}

/// Validates and records assessment values on one shard.
pub struct AssessmentRecorder<'a> {
    shard: &'a ShardHandle,
    config: &'a ConnectionConfig,
    tree: Arc<AssessmentTree>,
}

impl<'a> AssessmentRecorder<'a> {
    pub fn new(shard: &'a ShardHandle, config: &'a ConnectionConfig, tree: Arc<AssessmentTree>) -> Self {
        Self {
            shard,
            config,
            tree,
        }
    }

    /// Submit a batch of recordings as `assessor`. Valid items persist
    /// (unless `dry_run`), rejected items come back with their error.
    /// Dry-run receipts carry id 0 since nothing was written.
    pub fn submit(
        &self,
        assessor: UserId,
        items: Vec<SubmissionItem>,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome<RecordedValue, SubmissionItem>> {
        let assessor = self.shard.assessor_of(assessor)?;
        let mut outcome = BatchOutcome::new();
        for item in items {
            match self.validate_item(&assessor, &item, dry_run, now) {
                Ok(()) if dry_run => outcome.valid.push(RecordedValue {
                    id: RecordedValueId(0),
                    assessed: item.assessed,
                    assessor: assessor.user,
                    assessment: item.assessment,
                    team: item.team,
                    value: item.value,
                    date_assessed: now,
                }),
                Ok(()) => outcome.valid.push(self.shard.insert_recorded(
                    item.assessed,
                    assessor.user,
                    item.assessment,
                    item.team,
                    item.value,
                    now,
                )),
                Err(e) => outcome.rejected.push((item, e)),
            }
        }
        Ok(outcome)
    }

    /// Apply a batch of corrections, re-running the connection,
    /// permission, relationship and format checks against the stored
    /// rows.
    pub fn correct(
        &self,
        assessor: UserId,
        corrections: Vec<Correction>,
    ) -> Result<BatchOutcome<RecordedValue, Correction>> {
        let assessor = self.shard.assessor_of(assessor)?;
        let mut outcome = BatchOutcome::new();
        for correction in corrections {
            match self.validate_correction(&assessor, &correction) {
                Ok(()) => match self.shard.correct_recorded(correction.id, correction.value) {
                    Ok(row) => outcome.valid.push(row),
                    Err(e) => outcome.rejected.push((correction, e)),
                },
                Err(e) => outcome.rejected.push((correction, e)),
            }
        }
        Ok(outcome)
    }

    // ---- validation ------------------------------------------------------

    fn validate_item(
        &self,
        assessor: &Assessor,
        item: &SubmissionItem,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let assessed = self.shard.assessed_of(item.assessed)?;

        // Athletes assessing a coach other than themselves are
        // rate-limited on the coach's most recent recorded value.
        if assessor.role.is_athlete() && assessor.user != assessed.user && assessed.role.is_coach()
        {
            let cutoff = now - Duration::seconds(self.config.assessment_cooldown_secs);
            if let Some(latest) = self.shard.latest_assessed_date(assessed.user) {
                if latest > cutoff {
                    let remaining = latest + Duration::seconds(self.config.assessment_cooldown_secs) - now;
                    return Err(CoreError::CooldownActive {
                        remaining_secs: remaining.num_seconds(),
                    });
                }
            }
            // A dry run stops after the cooldown gate; the remaining
            // checks only matter when a write could happen.
            if dry_run {
                return Ok(());
            }
        }

        let assessment = self.shard.assessment(item.assessment)?;
        if let Some(team) = item.team {
            self.shard.team(team)?;
        }

        let connected = self.connected(assessor.user, assessed.user)?;
        if assessor.user != assessed.user && !connected {
            return Err(CoreError::NotConnected {
                assessor: assessor.user,
                assessed: assessed.user,
            });
        }

        let top_category = self
            .tree
            .top_category_of(assessment.id)
            .ok_or_else(|| CoreError::unknown("top category of assessment", assessment.id))?;
        PermissionGraph::new(self.shard, self.config.default_open_top_category).require_access(
            assessor,
            assessed.user,
            top_category,
            connected,
        )?;

        if assessment.relationship_kind_for(&assessed, assessor).is_none() {
            return Err(CoreError::InvalidRelationship {
                assessor: assessor.user,
                assessed: assessed.user,
            });
        }

        self.validate_format(assessment.format, item.value)
    }

    fn validate_correction(&self, assessor: &Assessor, correction: &Correction) -> Result<()> {
        let row = self.shard.recorded(correction.id)?;
        let assessed = self.shard.assessed_of(row.assessed)?;
        let assessment = self.shard.assessment(row.assessment)?;

        let connected = self.connected(assessor.user, assessed.user)?;
        if assessor.user != assessed.user && !connected {
            return Err(CoreError::NotConnected {
                assessor: assessor.user,
                assessed: assessed.user,
            });
        }

        let top_category = self
            .tree
            .top_category_of(assessment.id)
            .ok_or_else(|| CoreError::unknown("top category of assessment", assessment.id))?;
        PermissionGraph::new(self.shard, self.config.default_open_top_category).require_access(
            assessor,
            assessed.user,
            top_category,
            connected,
        )?;

        if assessment.relationship_kind_for(&assessed, assessor).is_none() {
            return Err(CoreError::InvalidRelationship {
                assessor: assessor.user,
                assessed: assessed.user,
            });
        }

        self.validate_format(assessment.format, correction.value)
    }

    fn connected(&self, assessor: UserId, assessed: UserId) -> Result<bool> {
        if assessor == assessed {
            return Ok(true);
        }
        ConnectionOrchestrator::new(self.shard, self.config, &NOOP).is_connected(assessor, assessed)
    }

    fn validate_format(&self, format: crate::model::FormatId, value: f64) -> Result<()> {
        let format = self.shard.format(format)?;
        let Some(pattern) = &format.validation_regex else {
            return Ok(());
        };
        let regex = Regex::new(pattern).map_err(|e| {
            CoreError::IntegrityConflict(format!("format {} has a broken regex: {e}", format.id))
        })?;
        if regex.is_match(&value.to_string()) {
            Ok(())
        } else {
            Err(CoreError::InvalidValue {
                expected: if format.description.is_empty() {
                    format.unit.clone()
                } else {
                    format.description.clone()
                },
            })
        }
    }
}
