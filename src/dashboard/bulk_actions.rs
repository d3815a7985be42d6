// Bulk report actions from the dashboard's multi-select.
//
// Ids are processed one at a time in slice order. A failure is recorded and
// the loop moves on; earlier successes are never rolled back.

use super::triage_api::TriageApi;
use crate::core::moderation::{ModerationStore, Report, ReportStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkAction {
    Approve,
    Reject,
    Escalate,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkFailure {
    pub report_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkOutcome {
    pub updated: Vec<Report>,
    pub failed: Vec<BulkFailure>,
}

impl<S: ModerationStore> TriageApi<S> {
    pub async fn bulk_update(
        &self,
        report_ids: &[String],
        action: BulkAction,
        moderator_id: &str,
        note: Option<&str>,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();

        for report_id in report_ids {
            let result = match action {
                BulkAction::Approve => {
                    self.update_report_status(report_id, ReportStatus::Approved, moderator_id, note)
                        .await
                }
                BulkAction::Reject => {
                    self.update_report_status(report_id, ReportStatus::Rejected, moderator_id, note)
                        .await
                }
                BulkAction::Escalate => {
                    self.update_report_status(report_id, ReportStatus::Escalated, moderator_id, note)
                        .await
                }
                BulkAction::Dismiss => self.dismiss_report(report_id, moderator_id, note).await,
            };

            match result {
                Ok(report) => outcome.updated.push(report),
                Err(e) => {
                    tracing::warn!(
                        report_id = %report_id,
                        error = %e,
                        ?action,
                        "Bulk action skipped report"
                    );
                    outcome.failed.push(BulkFailure {
                        report_id: report_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            ?action,
            moderator_id,
            updated = outcome.updated.len(),
            failed = outcome.failed.len(),
            "Bulk action finished"
        );

        outcome
    }
}
