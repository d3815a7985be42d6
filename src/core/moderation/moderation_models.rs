// Moderation domain models - reports, audit records, sanctions and AI traces.
//
// These are pure domain types with no storage dependencies.
// Field names serialize in camelCase and stay identical across the fixture
// and SQLite backends, so callers never see which one is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::moderation_store::ModerationError;

/// Highest report priority (urgent).
pub const MAX_PRIORITY: u8 = 3;

// ============================================================================
// ENUMS
// ============================================================================

/// Why a report was filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportReason {
    Spam,
    Scam,
    ProhibitedContent,
    Duplicate,
    Inappropriate,
    FakeListing,
    PersonalInfo,
    Other,
}

impl ReportReason {
    pub const ALL: [ReportReason; 8] = [
        ReportReason::Spam,
        ReportReason::Scam,
        ReportReason::ProhibitedContent,
        ReportReason::Duplicate,
        ReportReason::Inappropriate,
        ReportReason::FakeListing,
        ReportReason::PersonalInfo,
        ReportReason::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportReason::Spam => "spam",
            ReportReason::Scam => "scam",
            ReportReason::ProhibitedContent => "prohibited_content",
            ReportReason::Duplicate => "duplicate",
            ReportReason::Inappropriate => "inappropriate",
            ReportReason::FakeListing => "fake_listing",
            ReportReason::PersonalInfo => "personal_info",
            ReportReason::Other => "other",
        }
    }
}

impl FromStr for ReportReason {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportReason::ALL
            .into_iter()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| ModerationError::InvalidInput(format!("unknown report reason: {s}")))
    }
}

impl fmt::Display for ReportReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow state of a report.
///
/// `Approved` and `Rejected` are terminal. `Escalated` is not: an escalated
/// report still waits for a senior moderator's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
    Reviewing,
    Approved,
    Rejected,
    Escalated,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 5] = [
        ReportStatus::Pending,
        ReportStatus::Reviewing,
        ReportStatus::Approved,
        ReportStatus::Rejected,
        ReportStatus::Escalated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Reviewing => "reviewing",
            ReportStatus::Approved => "approved",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Escalated => "escalated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Approved | ReportStatus::Rejected)
    }

    /// The audit action that records a moderator moving a report into this
    /// status, if the status is a legal transition target.
    pub fn audit_action(&self) -> Option<ActionType> {
        match self {
            ReportStatus::Approved => Some(ActionType::Approve),
            ReportStatus::Rejected => Some(ActionType::Reject),
            ReportStatus::Escalated => Some(ActionType::Escalate),
            ReportStatus::Pending | ReportStatus::Reviewing => None,
        }
    }
}

impl FromStr for ReportStatus {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModerationError::InvalidInput(format!("unknown report status: {s}")))
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of audited moderator or system action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Approve,
    Reject,
    Warn,
    Ban,
    Unban,
    Escalate,
    Dismiss,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::Approve,
        ActionType::Reject,
        ActionType::Warn,
        ActionType::Ban,
        ActionType::Unban,
        ActionType::Escalate,
        ActionType::Dismiss,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Approve => "approve",
            ActionType::Reject => "reject",
            ActionType::Warn => "warn",
            ActionType::Ban => "ban",
            ActionType::Unban => "unban",
            ActionType::Escalate => "escalate",
            ActionType::Dismiss => "dismiss",
        }
    }
}

impl FromStr for ActionType {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| ModerationError::InvalidInput(format!("unknown action type: {s}")))
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which AI analysis produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiAction {
    /// Content safety check of a listing.
    Moderate,
    /// Near-duplicate listing check.
    Duplicate,
    /// Seller trust check.
    Trust,
}

impl AiAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiAction::Moderate => "moderate",
            AiAction::Duplicate => "duplicate",
            AiAction::Trust => "trust",
        }
    }
}

impl FromStr for AiAction {
    type Err = ModerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moderate" => Ok(AiAction::Moderate),
            "duplicate" => Ok(AiAction::Duplicate),
            "trust" => Ok(AiAction::Trust),
            other => Err(ModerationError::InvalidInput(format!(
                "unknown AI action: {other}"
            ))),
        }
    }
}

impl fmt::Display for AiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A claim that a listing or user needs review.
///
/// `resolved_at` is set exactly when the status is terminal. A report with
/// no `reporter_id` was synthesized by the auto-flag engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub subject_listing_id: Option<String>,
    pub reported_user_id: Option<String>,
    pub reporter_id: Option<String>,
    pub reason: ReportReason,
    pub description: String,
    pub ai_result: Option<Value>,
    pub ai_score: Option<f64>,
    pub status: ReportStatus,
    /// 0 = informational, 3 = urgent
    pub priority: u8,
    pub assigned_moderator_id: Option<String>,
    pub resolution_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn is_auto_flag(&self) -> bool {
        self.reporter_id.is_none()
    }
}

/// Input for creating a report, either from a human or from the auto-flag engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub subject_listing_id: Option<String>,
    pub reported_user_id: Option<String>,
    pub reporter_id: Option<String>,
    pub reason: ReportReason,
    pub description: String,
    pub ai_result: Option<Value>,
    pub ai_score: Option<f64>,
    pub priority: u8,
}

/// A report joined with the display fields the triage search matches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriageReport {
    #[serde(flatten)]
    pub report: Report,
    pub listing_title: Option<String>,
    pub reported_username: Option<String>,
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationAction {
    pub id: String,
    pub report_id: Option<String>,
    pub moderator_id: String,
    pub action_type: ActionType,
    pub target_user_id: Option<String>,
    pub target_listing_id: Option<String>,
    pub reason: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// Audit entry as submitted by a caller; id and timestamp are assigned on append.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewModerationAction {
    pub report_id: Option<String>,
    pub moderator_id: String,
    pub action_type: ActionType,
    pub target_user_id: Option<String>,
    pub target_listing_id: Option<String>,
    pub reason: Option<String>,
    pub metadata: Option<Value>,
}

impl NewModerationAction {
    pub fn new(moderator_id: impl Into<String>, action_type: ActionType) -> Self {
        Self {
            report_id: None,
            moderator_id: moderator_id.into(),
            action_type,
            target_user_id: None,
            target_listing_id: None,
            reason: None,
            metadata: None,
        }
    }

    pub fn report(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = Some(report_id.into());
        self
    }

    pub fn target_user(mut self, user_id: Option<String>) -> Self {
        self.target_user_id = user_id;
        self
    }

    pub fn target_listing(mut self, listing_id: Option<String>) -> Self {
        self.target_listing_id = listing_id;
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Non-blocking sanction recorded against a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserWarning {
    pub id: String,
    pub user_id: String,
    pub moderator_id: String,
    pub report_id: Option<String>,
    pub reason: String,
    /// 1..=3
    pub severity: u8,
    /// Flipped by the user-facing app, read-only here.
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

/// Blocking sanction. `expires_at == None` means permanent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBan {
    pub id: String,
    pub user_id: String,
    pub moderator_id: String,
    pub reason: String,
    pub banned_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub unbanned_at: Option<DateTime<Utc>>,
    pub unbanned_by: Option<String>,
}

impl UserBan {
    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }
}

/// Trace of one AI analysis invocation. Write-once, never consulted for
/// enforcement after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiModerationLog {
    pub id: String,
    pub subject_listing_id: Option<String>,
    pub subject_user_id: Option<String>,
    pub action: AiAction,
    pub input_snapshot: Value,
    pub result_snapshot: Value,
    pub score: Option<f64>,
    pub is_flagged: bool,
    pub processing_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// DIRECTORY (foreign, read-mostly)
// ============================================================================

/// A marketplace user as known to the moderation dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub full_name: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Minimal listing reference used for triage search and owner lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRef {
    pub id: String,
    pub title: String,
    pub owner_id: String,
}

/// Row of the moderator user listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub is_banned: bool,
    pub warning_count: u64,
}

/// One page of results plus the filtered total ignoring pagination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub count: u64,
}
