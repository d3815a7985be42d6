// Storage port for the moderation pipeline.
//
// Every service talks to persistence only through `ModerationStore`.
// The infra layer provides two interchangeable implementations: a seeded
// in-memory fixture store and a SQLite store. Which one runs is decided once
// at startup by the composition root.

use super::moderation_models::{
    AiAction, AiModerationLog, ListingRef, ModerationAction, Page, Report, ReportReason,
    ReportStatus, TriageReport, UserBan, UserProfile, UserSummary, UserWarning,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Page size used when a caller does not pass a limit.
pub const DEFAULT_PAGE_LIMIT: usize = 20;
/// Upper bound on a single page.
pub const MAX_PAGE_LIMIT: usize = 100;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Illegal transition: {from} -> {to}")]
    IllegalTransition {
        from: ReportStatus,
        to: ReportStatus,
    },

    #[error("User {user_id} already has an active ban ({ban_id})")]
    AlreadyBanned { user_id: String, ban_id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl ModerationError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ModerationError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

// ============================================================================
// QUERIES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSortField {
    #[default]
    CreatedAt,
    Priority,
    AiScore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

/// Normalized report query. `search` is already trimmed and lowercased.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub status: Option<ReportStatus>,
    pub reason: Option<ReportReason>,
    pub priority: Option<u8>,
    pub search: Option<String>,
    pub sort_by: ReportSortField,
    pub sort_order: SortOrder,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ReportQuery {
    fn default() -> Self {
        Self {
            status: None,
            reason: None,
            priority: None,
            search: None,
            sort_by: ReportSortField::default(),
            sort_order: SortOrder::default(),
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl ReportQuery {
    /// Whether a joined report row passes every supplied filter.
    pub fn matches(&self, row: &TriageReport) -> bool {
        let report = &row.report;
        if self.status.is_some_and(|status| report.status != status) {
            return false;
        }
        if self.reason.is_some_and(|reason| report.reason != reason) {
            return false;
        }
        if self.priority.is_some_and(|priority| report.priority != priority) {
            return false;
        }
        match &self.search {
            Some(term) => [
                row.listing_title.as_deref(),
                row.reported_username.as_deref(),
                Some(report.description.as_str()),
            ]
            .into_iter()
            .flatten()
            .any(|field| field.to_lowercase().contains(term.as_str())),
            None => true,
        }
    }

    /// Primary sort key comparison. Callers must use a stable sort over rows
    /// already in insertion order so ties keep that order.
    ///
    /// Reports without an AI score sort last in either direction.
    pub fn compare(&self, a: &Report, b: &Report) -> Ordering {
        match self.sort_by {
            ReportSortField::CreatedAt => self.sort_order.apply(a.created_at.cmp(&b.created_at)),
            ReportSortField::Priority => self.sort_order.apply(a.priority.cmp(&b.priority)),
            ReportSortField::AiScore => match (a.ai_score, b.ai_score) {
                (Some(x), Some(y)) => self.sort_order.apply(x.total_cmp(&y)),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

/// Normalized user directory query. Administrators are never returned.
#[derive(Debug, Clone, PartialEq)]
pub struct UserQuery {
    pub search: Option<String>,
    pub banned_only: bool,
    pub limit: usize,
    pub offset: usize,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            search: None,
            banned_only: false,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl UserQuery {
    pub fn matches(&self, profile: &UserProfile, is_banned: bool) -> bool {
        if profile.is_admin {
            return false;
        }
        if self.banned_only && !is_banned {
            return false;
        }
        match &self.search {
            Some(term) => {
                profile.username.to_lowercase().contains(term.as_str())
                    || profile
                        .full_name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(term.as_str()))
            }
            None => true,
        }
    }
}

/// AI trace query, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct AiLogQuery {
    pub action: Option<AiAction>,
    pub flagged_only: bool,
    pub subject_listing_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for AiLogQuery {
    fn default() -> Self {
        Self {
            action: None,
            flagged_only: false,
            subject_listing_id: None,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl AiLogQuery {
    pub fn matches(&self, log: &AiModerationLog) -> bool {
        self.action.map_or(true, |action| log.action == action)
            && (!self.flagged_only || log.is_flagged)
            && self
                .subject_listing_id
                .as_deref()
                .map_or(true, |id| log.subject_listing_id.as_deref() == Some(id))
    }
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Uniform data access for the moderation pipeline.
///
/// Implementations store rows exactly as given; ids and timestamps are
/// assigned by the services. Lists come back in the documented order and
/// `Page::count` always ignores `limit`/`offset`.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    // Reports -----------------------------------------------------------

    async fn insert_report(&self, report: Report) -> Result<(), ModerationError>;

    async fn get_report(&self, id: &str) -> Result<Option<Report>, ModerationError>;

    /// Overwrite an existing report, but only while its stored status is still
    /// `expected`. The check and the write are atomic.
    ///
    /// Fails with `NotFound` for unknown ids and with `IllegalTransition`
    /// (from the status actually stored) when another writer got there first.
    async fn update_report_from(
        &self,
        report: &Report,
        expected: ReportStatus,
    ) -> Result<(), ModerationError>;

    /// Filter, sort and paginate reports joined with listing/user display fields.
    async fn query_reports(
        &self,
        query: &ReportQuery,
    ) -> Result<Page<TriageReport>, ModerationError>;

    /// Every report in insertion order (used for rollups).
    async fn all_reports(&self) -> Result<Vec<Report>, ModerationError>;

    // Audit log ---------------------------------------------------------

    async fn append_action(&self, action: ModerationAction) -> Result<(), ModerationError>;

    /// Most recent entries first.
    async fn recent_actions(&self, limit: usize) -> Result<Vec<ModerationAction>, ModerationError>;

    /// Entries for one report, oldest first.
    async fn actions_for_report(
        &self,
        report_id: &str,
    ) -> Result<Vec<ModerationAction>, ModerationError>;

    // Warnings ----------------------------------------------------------

    async fn insert_warning(&self, warning: UserWarning) -> Result<(), ModerationError>;

    /// Newest first.
    async fn warnings_for_user(&self, user_id: &str) -> Result<Vec<UserWarning>, ModerationError>;

    async fn count_warnings(&self) -> Result<u64, ModerationError>;

    // Bans --------------------------------------------------------------

    /// Insert a ban. An active ban for a user who already has one fails with
    /// `AlreadyBanned`; the check and the insert are atomic.
    async fn insert_ban(&self, ban: UserBan) -> Result<(), ModerationError>;

    async fn get_ban(&self, id: &str) -> Result<Option<UserBan>, ModerationError>;

    /// Overwrite an existing ban. Fails with `NotFound` for unknown ids.
    async fn update_ban(&self, ban: &UserBan) -> Result<(), ModerationError>;

    /// Newest first.
    async fn bans_for_user(&self, user_id: &str) -> Result<Vec<UserBan>, ModerationError>;

    async fn has_active_ban(&self, user_id: &str) -> Result<bool, ModerationError>;

    async fn count_active_bans(&self) -> Result<u64, ModerationError>;

    // AI traces ---------------------------------------------------------

    async fn insert_ai_log(&self, log: AiModerationLog) -> Result<(), ModerationError>;

    async fn query_ai_logs(
        &self,
        query: &AiLogQuery,
    ) -> Result<Page<AiModerationLog>, ModerationError>;

    // Directory (foreign data mirrored for search) ----------------------

    async fn upsert_profile(&self, profile: UserProfile) -> Result<(), ModerationError>;

    async fn upsert_listing(&self, listing: ListingRef) -> Result<(), ModerationError>;

    async fn listing_owner(&self, listing_id: &str) -> Result<Option<String>, ModerationError>;

    /// Non-admin users, newest account first.
    async fn query_users(&self, query: &UserQuery) -> Result<Page<UserSummary>, ModerationError>;
}
