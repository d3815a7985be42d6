// Deterministic fixture dataset for the in-memory backend.
//
// Timestamps are offsets from a fixed base so every run sees the same data.

use crate::core::moderation::{
    ActionType, AiAction, AiModerationLog, ListingRef, ModerationAction, Report, ReportReason,
    ReportStatus, UserBan, UserProfile, UserWarning,
};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;

/// The one user with an active ban in the fixture set.
pub const BANNED_USER_ID: &str = "u5";

/// 2024-03-01T12:00:00Z
const BASE_TIMESTAMP: i64 = 1_709_294_400;

#[derive(Debug, Clone, Default)]
pub struct FixtureSet {
    pub profiles: Vec<UserProfile>,
    pub listings: Vec<ListingRef>,
    pub reports: Vec<Report>,
    pub actions: Vec<ModerationAction>,
    pub warnings: Vec<UserWarning>,
    pub bans: Vec<UserBan>,
    pub ai_logs: Vec<AiModerationLog>,
}

fn at(hours: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(BASE_TIMESTAMP, 0).unwrap_or_default() + Duration::hours(hours)
}

fn profile(id: &str, username: &str, full_name: Option<&str>, is_admin: bool, hours: i64) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        username: username.to_string(),
        full_name: full_name.map(str::to_string),
        is_admin,
        created_at: at(hours),
    }
}

fn listing(id: &str, title: &str, owner_id: &str) -> ListingRef {
    ListingRef {
        id: id.to_string(),
        title: title.to_string(),
        owner_id: owner_id.to_string(),
    }
}

struct ReportSeed<'a> {
    id: &'a str,
    listing: Option<&'a str>,
    user: &'a str,
    reporter: Option<&'a str>,
    reason: ReportReason,
    description: &'a str,
    status: ReportStatus,
    priority: u8,
    ai_score: Option<f64>,
    moderator: Option<&'a str>,
    note: Option<&'a str>,
    hours: i64,
}

impl ReportSeed<'_> {
    fn build(self) -> Report {
        let created_at = at(self.hours);
        let resolved_at = self
            .status
            .is_terminal()
            .then(|| created_at + Duration::hours(2));
        Report {
            id: self.id.to_string(),
            subject_listing_id: self.listing.map(str::to_string),
            reported_user_id: Some(self.user.to_string()),
            reporter_id: self.reporter.map(str::to_string),
            reason: self.reason,
            description: self.description.to_string(),
            ai_result: self.ai_score.map(|score| json!({ "score": score })),
            ai_score: self.ai_score,
            status: self.status,
            priority: self.priority,
            assigned_moderator_id: self.moderator.map(str::to_string),
            resolution_note: self.note.map(str::to_string),
            created_at,
            updated_at: resolved_at.unwrap_or(created_at),
            resolved_at,
        }
    }
}

fn action(
    id: &str,
    report_id: Option<&str>,
    action_type: ActionType,
    target_user_id: Option<&str>,
    reason: &str,
    hours: i64,
) -> ModerationAction {
    ModerationAction {
        id: id.to_string(),
        report_id: report_id.map(str::to_string),
        moderator_id: "mod_1".to_string(),
        action_type,
        target_user_id: target_user_id.map(str::to_string),
        target_listing_id: None,
        reason: Some(reason.to_string()),
        metadata: None,
        created_at: at(hours),
    }
}

/// Build the standard fixture set.
pub fn fixture_set() -> FixtureSet {
    let profiles = vec![
        profile("admin_1", "admin", Some("Site Admin"), true, -720),
        profile("mod_1", "maria_mod", Some("Maria Lopes"), true, -700),
        profile("u1", "carlos_m", Some("Carlos Mendes"), false, -500),
        profile("u2", "ana_souza", Some("Ana Souza"), false, -400),
        profile("u3", "joao_auto", Some("João Pereira"), false, -300),
        profile("u4", "bike_shop", Some("Bike Shop Ltda"), false, -200),
        profile(BANNED_USER_ID, "deals_4_u", None, false, -100),
    ];

    let listings = vec![
        listing("lst_101", "Honda Civic 2019 EX", "u3"),
        listing("lst_102", "iPhone 13 Pro 256GB", "u1"),
        listing("lst_103", "Mountain bike Caloi Elite", "u4"),
        listing("lst_104", "Rolex Submariner", "u1"),
    ];

    let reports = vec![
        ReportSeed {
            id: "rpt_001",
            listing: Some("lst_102"),
            user: "u1",
            reporter: Some("u2"),
            reason: ReportReason::Scam,
            description: "Seller asked for payment outside the platform",
            status: ReportStatus::Pending,
            priority: 2,
            ai_score: None,
            moderator: None,
            note: None,
            hours: 0,
        }
        .build(),
        ReportSeed {
            id: "rpt_002",
            listing: Some("lst_104"),
            user: "u1",
            reporter: None,
            reason: ReportReason::ProhibitedContent,
            description: "Counterfeit luxury goods",
            status: ReportStatus::Pending,
            priority: 3,
            ai_score: Some(12.0),
            moderator: None,
            note: None,
            hours: 1,
        }
        .build(),
        ReportSeed {
            id: "rpt_003",
            listing: Some("lst_101"),
            user: "u3",
            reporter: Some("u4"),
            reason: ReportReason::FakeListing,
            description: "Odometer reading looks tampered",
            status: ReportStatus::Reviewing,
            priority: 1,
            ai_score: None,
            moderator: Some("mod_1"),
            note: None,
            hours: 2,
        }
        .build(),
        ReportSeed {
            id: "rpt_004",
            listing: Some("lst_103"),
            user: "u4",
            reporter: None,
            reason: ReportReason::Duplicate,
            description: "Same bike posted twice",
            status: ReportStatus::Approved,
            priority: 1,
            ai_score: Some(45.0),
            moderator: Some("mod_1"),
            note: Some("Different frame sizes, not a duplicate"),
            hours: 3,
        }
        .build(),
        ReportSeed {
            id: "rpt_005",
            listing: None,
            user: "u1",
            reporter: Some("u3"),
            reason: ReportReason::Inappropriate,
            description: "Abusive chat messages",
            status: ReportStatus::Escalated,
            priority: 2,
            ai_score: None,
            moderator: Some("mod_1"),
            note: None,
            hours: 4,
        }
        .build(),
        ReportSeed {
            id: "rpt_006",
            listing: None,
            user: BANNED_USER_ID,
            reporter: Some("u2"),
            reason: ReportReason::Spam,
            description: "Mass messaging buyers with links",
            status: ReportStatus::Rejected,
            priority: 0,
            ai_score: None,
            moderator: Some("mod_1"),
            note: Some("Banned"),
            hours: 5,
        }
        .build(),
        ReportSeed {
            id: "rpt_007",
            listing: Some("lst_101"),
            user: "u3",
            reporter: Some("u1"),
            reason: ReportReason::PersonalInfo,
            description: "Phone number and address in photos",
            status: ReportStatus::Pending,
            priority: 0,
            ai_score: None,
            moderator: None,
            note: None,
            hours: 6,
        }
        .build(),
    ];

    let actions = vec![
        action("act_001", Some("rpt_004"), ActionType::Approve, Some("u4"), "Different frame sizes, not a duplicate", 5),
        action("act_002", Some("rpt_005"), ActionType::Escalate, Some("u1"), "Needs senior review", 6),
        action("act_003", Some("rpt_006"), ActionType::Reject, Some(BANNED_USER_ID), "Banned", 7),
        action("act_004", Some("rpt_006"), ActionType::Ban, Some(BANNED_USER_ID), "Spam bot", 7),
        action("act_005", None, ActionType::Warn, Some("u1"), "Off-platform payment request", 8),
        action("act_006", None, ActionType::Unban, Some("u1"), "Appeal accepted", 9),
    ];

    let warnings = vec![UserWarning {
        id: "wrn_001".to_string(),
        user_id: "u1".to_string(),
        moderator_id: "mod_1".to_string(),
        report_id: Some("rpt_001".to_string()),
        reason: "Off-platform payment request".to_string(),
        severity: 1,
        acknowledged: true,
        created_at: at(8),
    }];

    let bans = vec![
        UserBan {
            id: "ban_001".to_string(),
            user_id: "u1".to_string(),
            moderator_id: "mod_1".to_string(),
            reason: "Suspected account takeover".to_string(),
            banned_at: at(-48),
            expires_at: Some(at(-48) + Duration::days(7)),
            is_active: false,
            unbanned_at: Some(at(9)),
            unbanned_by: Some("mod_1".to_string()),
        },
        UserBan {
            id: "ban_002".to_string(),
            user_id: BANNED_USER_ID.to_string(),
            moderator_id: "mod_1".to_string(),
            reason: "Spam bot".to_string(),
            banned_at: at(7),
            expires_at: None,
            is_active: true,
            unbanned_at: None,
            unbanned_by: None,
        },
    ];

    let ai_logs = vec![
        AiModerationLog {
            id: "ail_001".to_string(),
            subject_listing_id: Some("lst_104".to_string()),
            subject_user_id: Some("u1".to_string()),
            action: AiAction::Moderate,
            input_snapshot: json!({ "title": "Rolex Submariner" }),
            result_snapshot: json!({ "score": 12, "isBlocked": true, "blockedReasons": ["counterfeit"] }),
            score: Some(12.0),
            is_flagged: true,
            processing_time_ms: 840,
            created_at: at(1),
        },
        AiModerationLog {
            id: "ail_002".to_string(),
            subject_listing_id: Some("lst_103".to_string()),
            subject_user_id: Some("u4".to_string()),
            action: AiAction::Duplicate,
            input_snapshot: json!({ "title": "Mountain bike Caloi Elite" }),
            result_snapshot: json!({ "score": 45, "isDuplicate": true }),
            score: Some(45.0),
            is_flagged: true,
            processing_time_ms: 610,
            created_at: at(3),
        },
        AiModerationLog {
            id: "ail_003".to_string(),
            subject_listing_id: None,
            subject_user_id: Some("u3".to_string()),
            action: AiAction::Trust,
            input_snapshot: json!({ "userId": "u3" }),
            result_snapshot: json!({ "score": 78, "level": "trusted" }),
            score: Some(78.0),
            is_flagged: false,
            processing_time_ms: 1_205,
            created_at: at(4),
        },
    ];

    FixtureSet {
        profiles,
        listings,
        reports,
        actions,
        warnings,
        bans,
        ai_logs,
    }
}
