// Audit log - append-only record of moderator and system actions.
//
// Reports and bans only hold the latest moderator and reason; this log is
// the only place that keeps the full history. There is no update or delete.

use super::moderation_models::{ModerationAction, NewModerationAction};
use super::moderation_store::{ModerationError, ModerationStore, MAX_PAGE_LIMIT};
use super::report_service::require_moderator;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub struct AuditService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> AuditService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Append one immutable entry.
    pub async fn append(
        &self,
        action: NewModerationAction,
    ) -> Result<ModerationAction, ModerationError> {
        require_moderator(&action.moderator_id)?;

        let entry = ModerationAction {
            id: Uuid::new_v4().to_string(),
            report_id: action.report_id,
            moderator_id: action.moderator_id,
            action_type: action.action_type,
            target_user_id: action.target_user_id,
            target_listing_id: action.target_listing_id,
            reason: action.reason,
            metadata: action.metadata,
            created_at: Utc::now(),
        };
        self.store.append_action(entry.clone()).await?;

        tracing::debug!(
            action_id = %entry.id,
            action_type = %entry.action_type,
            moderator_id = %entry.moderator_id,
            report_id = ?entry.report_id,
            "Audit entry appended"
        );

        Ok(entry)
    }

    /// Most recent entries first.
    pub async fn list(&self, limit: usize) -> Result<Vec<ModerationAction>, ModerationError> {
        self.store.recent_actions(limit.min(MAX_PAGE_LIMIT)).await
    }

    /// Every entry recorded against one report, oldest first.
    pub async fn history(&self, report_id: &str) -> Result<Vec<ModerationAction>, ModerationError> {
        self.store.actions_for_report(report_id).await
    }
}
