// Triage queries - read side of the moderator dashboard.
//
// Filters arrive loosely typed from the dashboard (every field optional) and
// are normalized into store queries here. Reads are point-in-time; no locking.

use super::moderation_models::{
    AiAction, AiModerationLog, Page, ReportReason, ReportStatus, TriageReport, UserSummary,
    MAX_PRIORITY,
};
use super::moderation_store::{
    AiLogQuery, ModerationError, ModerationStore, ReportQuery, ReportSortField, SortOrder,
    UserQuery, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportFilters {
    pub status: Option<ReportStatus>,
    pub reason: Option<ReportReason>,
    pub priority: Option<u8>,
    pub search: Option<String>,
    pub sort_by: Option<ReportSortField>,
    pub sort_order: Option<SortOrder>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserFilters {
    pub search: Option<String>,
    pub banned_only: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiLogFilters {
    pub action: Option<AiAction>,
    pub flagged_only: Option<bool>,
    pub subject_listing_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Every paged read returns at most `MAX_PAGE_LIMIT` rows. `count` stays the
/// full total, so a capped caller sees more rows remain and pages on.
fn page_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT)
}

/// Trim and lowercase; blank terms mean "no search".
fn search_term(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
}

impl ReportFilters {
    pub fn to_query(&self) -> Result<ReportQuery, ModerationError> {
        if let Some(priority) = self.priority {
            if priority > MAX_PRIORITY {
                return Err(ModerationError::InvalidInput(format!(
                    "priority filter must be 0..={MAX_PRIORITY}, got {priority}"
                )));
            }
        }

        Ok(ReportQuery {
            status: self.status,
            reason: self.reason,
            priority: self.priority,
            search: search_term(self.search.as_deref()),
            sort_by: self.sort_by.unwrap_or_default(),
            sort_order: self.sort_order.unwrap_or_default(),
            limit: page_limit(self.limit),
            offset: self.offset.unwrap_or(0),
        })
    }
}

impl UserFilters {
    pub fn to_query(&self) -> UserQuery {
        UserQuery {
            search: search_term(self.search.as_deref()),
            banned_only: self.banned_only.unwrap_or(false),
            limit: page_limit(self.limit),
            offset: self.offset.unwrap_or(0),
        }
    }
}

impl AiLogFilters {
    pub fn to_query(&self) -> AiLogQuery {
        AiLogQuery {
            action: self.action,
            flagged_only: self.flagged_only.unwrap_or(false),
            subject_listing_id: self
                .subject_listing_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            limit: page_limit(self.limit),
            offset: self.offset.unwrap_or(0),
        }
    }
}

pub struct TriageService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> TriageService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Filtered, sorted page of reports. `count` ignores pagination.
    pub async fn get_reports(
        &self,
        filters: &ReportFilters,
    ) -> Result<Page<TriageReport>, ModerationError> {
        let query = filters.to_query()?;
        let page = self.store.query_reports(&query).await?;

        tracing::debug!(
            returned = page.data.len(),
            count = page.count,
            "Report triage query"
        );

        Ok(page)
    }

    /// Non-admin users with ban state and warning totals.
    pub async fn get_all_users(
        &self,
        filters: &UserFilters,
    ) -> Result<Page<UserSummary>, ModerationError> {
        self.store.query_users(&filters.to_query()).await
    }

    pub async fn get_ai_logs(
        &self,
        filters: &AiLogFilters,
    ) -> Result<Page<AiModerationLog>, ModerationError> {
        self.store.query_ai_logs(&filters.to_query()).await
    }
}
