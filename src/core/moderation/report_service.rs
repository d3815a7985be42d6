// Report lifecycle manager - the only writer of report rows.
//
// States: pending (initial) -> reviewing -> approved | rejected (terminal)
//                                        -> escalated -> approved | rejected
//
// Moderator decisions go through `transition`; the caller pairs every
// successful transition with one audit entry.

use super::moderation_models::{NewReport, Report, ReportStatus, MAX_PRIORITY};
use super::moderation_store::{ModerationError, ModerationStore};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub struct ReportService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> ReportService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Insert a new pending report. Used for both human and automatic reports.
    pub async fn create(&self, new_report: NewReport) -> Result<Report, ModerationError> {
        if new_report.priority > MAX_PRIORITY {
            return Err(ModerationError::InvalidInput(format!(
                "priority must be 0..={MAX_PRIORITY}, got {}",
                new_report.priority
            )));
        }
        if new_report
            .ai_score
            .is_some_and(|score| !(0.0..=100.0).contains(&score))
        {
            return Err(ModerationError::InvalidInput(
                "aiScore must be within 0..=100".to_string(),
            ));
        }

        let now = Utc::now();
        let report = Report {
            id: Uuid::new_v4().to_string(),
            subject_listing_id: new_report.subject_listing_id,
            reported_user_id: new_report.reported_user_id,
            reporter_id: new_report.reporter_id,
            reason: new_report.reason,
            description: new_report.description,
            ai_result: new_report.ai_result,
            ai_score: new_report.ai_score,
            status: ReportStatus::Pending,
            priority: new_report.priority,
            assigned_moderator_id: None,
            resolution_note: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        };

        self.store.insert_report(report.clone()).await?;

        tracing::info!(
            report_id = %report.id,
            reason = %report.reason,
            priority = report.priority,
            auto_flag = report.is_auto_flag(),
            "Report created"
        );

        Ok(report)
    }

    /// A report filed by a person. Requires a reporter and a subject.
    pub async fn submit(&self, new_report: NewReport) -> Result<Report, ModerationError> {
        if new_report.reporter_id.as_deref().map_or(true, str::is_empty) {
            return Err(ModerationError::InvalidInput(
                "human reports need a reporter".to_string(),
            ));
        }
        if new_report.subject_listing_id.is_none() && new_report.reported_user_id.is_none() {
            return Err(ModerationError::InvalidInput(
                "a report needs a listing or a user".to_string(),
            ));
        }
        self.create(new_report).await
    }

    pub async fn get(&self, id: &str) -> Result<Report, ModerationError> {
        self.store
            .get_report(id)
            .await?
            .ok_or_else(|| ModerationError::not_found("Report", id))
    }

    /// Move a report to `approved`, `rejected` or `escalated`.
    ///
    /// Terminal reports cannot move again. Resolving stamps `resolved_at` and
    /// keeps the note; escalating leaves the report unresolved. The write only
    /// lands if the status read here is still the stored one, so of two racing
    /// decisions exactly one succeeds.
    pub async fn transition(
        &self,
        id: &str,
        new_status: ReportStatus,
        moderator_id: &str,
        note: Option<&str>,
    ) -> Result<Report, ModerationError> {
        require_moderator(moderator_id)?;

        let mut report = self.get(id).await?;
        let from = report.status;

        if new_status.audit_action().is_none() || from.is_terminal() {
            tracing::warn!(
                report_id = %id,
                %from,
                to = %new_status,
                "Rejected illegal report transition"
            );
            return Err(ModerationError::IllegalTransition {
                from,
                to: new_status,
            });
        }

        let now = Utc::now();
        report.status = new_status;
        report.assigned_moderator_id = Some(moderator_id.to_string());
        report.updated_at = now;

        if new_status.is_terminal() {
            report.resolved_at = Some(now);
            if let Some(note) = note {
                report.resolution_note = Some(note.to_string());
            }
        } else {
            report.resolved_at = None;
        }

        self.store
            .update_report_from(&report, from)
            .await
            .inspect_err(|e| {
                tracing::warn!(report_id = %id, error = %e, "Report transition lost");
            })?;

        tracing::info!(
            report_id = %id,
            %from,
            to = %new_status,
            moderator_id,
            "Report transitioned"
        );

        Ok(report)
    }

    /// Claim a pending report for review.
    pub async fn start_review(&self, id: &str, moderator_id: &str) -> Result<Report, ModerationError> {
        require_moderator(moderator_id)?;

        let mut report = self.get(id).await?;
        let from = report.status;
        if !matches!(from, ReportStatus::Pending | ReportStatus::Reviewing) {
            return Err(ModerationError::IllegalTransition {
                from,
                to: ReportStatus::Reviewing,
            });
        }

        report.status = ReportStatus::Reviewing;
        report.assigned_moderator_id = Some(moderator_id.to_string());
        report.updated_at = Utc::now();
        self.store.update_report_from(&report, from).await?;

        tracing::debug!(report_id = %id, moderator_id, "Report claimed for review");

        Ok(report)
    }
}

pub(crate) fn require_moderator(moderator_id: &str) -> Result<(), ModerationError> {
    if moderator_id.trim().is_empty() {
        Err(ModerationError::InvalidInput(
            "moderator id is required".to_string(),
        ))
    } else {
        Ok(())
    }
}
