// Triage API - the surface the moderator dashboard calls.
//
// Each state change is paired with its audit entry here: the lifecycle and
// enforcement services only mutate their own rows. The pairs are not atomic;
// if the audit append fails after the mutation, the error is returned and the
// mutation stays.

use crate::core::moderation::{
    check_warning, AiLogFilters, AiModerationLog, AuditService, AutoFlagDispatcher,
    AutoFlagEngine, AutoFlagPolicy, AutoFlagWorker, ActionType, EnforcementService,
    ModerationAction, ModerationError, ModerationStats, ModerationStore, NewModerationAction,
    NewReport, Page, Report, ReportFilters, ReportService, ReportStatus, StatsService,
    TriageReport, TriageService, UserBan, UserFilters, UserSummary, UserWarning,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Sanction applied together with rejecting a report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Sanction {
    Warn { severity: u8 },
    Ban { expires_at: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "record")]
pub enum SanctionRecord {
    Warning(UserWarning),
    Ban(UserBan),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementOutcome {
    pub report: Report,
    pub sanction: SanctionRecord,
}

pub struct TriageApi<S: ModerationStore> {
    store: Arc<S>,
    reports: ReportService<S>,
    enforcement: EnforcementService<S>,
    audit: AuditService<S>,
    triage: TriageService<S>,
    stats: StatsService<S>,
    policy: AutoFlagPolicy,
}

impl<S: ModerationStore> TriageApi<S> {
    pub fn new(store: Arc<S>, policy: AutoFlagPolicy) -> Self {
        Self {
            reports: ReportService::new(store.clone()),
            enforcement: EnforcementService::new(store.clone()),
            audit: AuditService::new(store.clone()),
            triage: TriageService::new(store.clone()),
            stats: StatsService::new(store.clone()),
            store,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_reports(
        &self,
        filters: &ReportFilters,
    ) -> Result<Page<TriageReport>, ModerationError> {
        self.triage.get_reports(filters).await
    }

    pub async fn get_all_users(
        &self,
        filters: &UserFilters,
    ) -> Result<Page<UserSummary>, ModerationError> {
        self.triage.get_all_users(filters).await
    }

    pub async fn get_user_warnings(
        &self,
        user_id: &str,
    ) -> Result<Vec<UserWarning>, ModerationError> {
        self.enforcement.warnings_for(user_id).await
    }

    pub async fn get_user_bans(&self, user_id: &str) -> Result<Vec<UserBan>, ModerationError> {
        self.enforcement.bans_for(user_id).await
    }

    pub async fn get_ai_logs(
        &self,
        filters: &AiLogFilters,
    ) -> Result<Page<AiModerationLog>, ModerationError> {
        self.triage.get_ai_logs(filters).await
    }

    pub async fn get_moderation_stats(&self) -> Result<ModerationStats, ModerationError> {
        self.stats.moderation_stats().await
    }

    pub async fn recent_actions(
        &self,
        limit: usize,
    ) -> Result<Vec<ModerationAction>, ModerationError> {
        self.audit.list(limit).await
    }

    pub async fn report_history(
        &self,
        report_id: &str,
    ) -> Result<Vec<ModerationAction>, ModerationError> {
        self.audit.history(report_id).await
    }

    pub async fn is_banned(&self, user_id: &str) -> Result<bool, ModerationError> {
        self.enforcement.is_banned(user_id).await
    }

    // ------------------------------------------------------------------
    // Report workflow
    // ------------------------------------------------------------------

    /// A report filed by a marketplace user.
    pub async fn submit_report(&self, new_report: NewReport) -> Result<Report, ModerationError> {
        self.reports.submit(new_report).await
    }

    /// Claim a report. Not audited.
    pub async fn start_review(
        &self,
        report_id: &str,
        moderator_id: &str,
    ) -> Result<Report, ModerationError> {
        self.reports.start_review(report_id, moderator_id).await
    }

    /// Approve, reject or escalate a report and record the matching audit entry.
    pub async fn update_report_status(
        &self,
        report_id: &str,
        status: ReportStatus,
        moderator_id: &str,
        note: Option<&str>,
    ) -> Result<Report, ModerationError> {
        let action_type = status.audit_action().ok_or_else(|| {
            ModerationError::InvalidInput(format!("{status} is not a moderator decision"))
        })?;
        self.decide(report_id, status, action_type, moderator_id, note)
            .await
    }

    /// Close a report as not actionable. Stored as `rejected`, audited as `dismiss`.
    pub async fn dismiss_report(
        &self,
        report_id: &str,
        moderator_id: &str,
        note: Option<&str>,
    ) -> Result<Report, ModerationError> {
        self.decide(
            report_id,
            ReportStatus::Rejected,
            ActionType::Dismiss,
            moderator_id,
            note,
        )
        .await
    }

    async fn decide(
        &self,
        report_id: &str,
        status: ReportStatus,
        action_type: ActionType,
        moderator_id: &str,
        note: Option<&str>,
    ) -> Result<Report, ModerationError> {
        let report = self
            .reports
            .transition(report_id, status, moderator_id, note)
            .await?;

        self.audit
            .append(
                NewModerationAction::new(moderator_id, action_type)
                    .report(report.id.as_str())
                    .target_user(report.reported_user_id.clone())
                    .target_listing(report.subject_listing_id.clone())
                    .reason(note.map(str::to_string)),
            )
            .await?;

        Ok(report)
    }

    /// Reject a report and sanction the reported user in one moderator step.
    /// Produces two audit entries: `reject` and then `warn` or `ban`.
    ///
    /// The sanction is validated before the report is rejected, so a bad
    /// severity or an already banned user leaves the report open for a retry.
    pub async fn enforce_on_report(
        &self,
        report_id: &str,
        moderator_id: &str,
        note: &str,
        sanction: Sanction,
    ) -> Result<EnforcementOutcome, ModerationError> {
        let report = self.reports.get(report_id).await?;
        let user_id = report.reported_user_id.clone().ok_or_else(|| {
            ModerationError::InvalidInput(format!("report {report_id} has no reported user"))
        })?;

        match sanction {
            Sanction::Warn { severity } => check_warning(&user_id, moderator_id, severity)?,
            Sanction::Ban { expires_at } => {
                self.enforcement
                    .check_can_ban(&user_id, moderator_id, expires_at)
                    .await?
            }
        }

        let report = self
            .update_report_status(report_id, ReportStatus::Rejected, moderator_id, Some(note))
            .await?;

        let sanction = match sanction {
            Sanction::Warn { severity } => SanctionRecord::Warning(
                self.warn_user(&user_id, moderator_id, note, severity, Some(report_id))
                    .await?,
            ),
            Sanction::Ban { expires_at } => SanctionRecord::Ban(
                self.ban_user_for_report(&user_id, moderator_id, note, expires_at, Some(report_id))
                    .await?,
            ),
        };

        Ok(EnforcementOutcome { report, sanction })
    }

    // ------------------------------------------------------------------
    // Audit + enforcement
    // ------------------------------------------------------------------

    /// Append an arbitrary audit entry.
    pub async fn log_action(
        &self,
        action: NewModerationAction,
    ) -> Result<ModerationAction, ModerationError> {
        self.audit.append(action).await
    }

    pub async fn warn_user(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
        severity: u8,
        report_id: Option<&str>,
    ) -> Result<UserWarning, ModerationError> {
        let warning = self
            .enforcement
            .warn(user_id, moderator_id, reason, severity, report_id)
            .await?;

        let mut action = NewModerationAction::new(moderator_id, ActionType::Warn)
            .target_user(Some(warning.user_id.clone()))
            .reason(Some(warning.reason.clone()))
            .metadata(json!({ "warningId": warning.id, "severity": warning.severity }));
        if let Some(report_id) = report_id {
            action = action.report(report_id);
        }
        self.audit.append(action).await?;

        Ok(warning)
    }

    pub async fn ban_user(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<UserBan, ModerationError> {
        self.ban_user_for_report(user_id, moderator_id, reason, expires_at, None)
            .await
    }

    async fn ban_user_for_report(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
        report_id: Option<&str>,
    ) -> Result<UserBan, ModerationError> {
        let ban = self
            .enforcement
            .ban(user_id, moderator_id, reason, expires_at)
            .await?;

        let mut action = NewModerationAction::new(moderator_id, ActionType::Ban)
            .target_user(Some(ban.user_id.clone()))
            .reason(Some(ban.reason.clone()))
            .metadata(json!({ "banId": ban.id, "expiresAt": ban.expires_at }));
        if let Some(report_id) = report_id {
            action = action.report(report_id);
        }
        self.audit.append(action).await?;

        Ok(ban)
    }

    /// Lift a ban. Repeating it on an inactive ban succeeds and is still audited.
    pub async fn unban_user(
        &self,
        ban_id: &str,
        moderator_id: &str,
    ) -> Result<UserBan, ModerationError> {
        let ban = self.enforcement.unban(ban_id, moderator_id).await?;

        self.audit
            .append(
                NewModerationAction::new(moderator_id, ActionType::Unban)
                    .target_user(Some(ban.user_id.clone()))
                    .metadata(json!({ "banId": ban.id })),
            )
            .await?;

        Ok(ban)
    }
}

impl<S: ModerationStore + 'static> TriageApi<S> {
    /// Start the auto-flag worker on this API's store and policy.
    pub fn spawn_auto_flag(&self, capacity: usize) -> (AutoFlagDispatcher, AutoFlagWorker) {
        let engine = AutoFlagEngine::new(self.store.clone(), self.policy);
        AutoFlagDispatcher::spawn(engine, capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{AiAction, AiAnalysis, ReportReason};
    use crate::infra::moderation::fixtures::BANNED_USER_ID;
    use crate::infra::moderation::InMemoryModerationStore;
    use chrono::Duration;

    fn fixture_api() -> TriageApi<InMemoryModerationStore> {
        TriageApi::new(
            Arc::new(InMemoryModerationStore::with_fixtures()),
            AutoFlagPolicy::default(),
        )
    }

    fn empty_api() -> TriageApi<InMemoryModerationStore> {
        TriageApi::new(
            Arc::new(InMemoryModerationStore::new()),
            AutoFlagPolicy::default(),
        )
    }

    #[tokio::test]
    async fn approving_a_report_appends_one_audit_entry() {
        let api = fixture_api();
        let before = api.report_history("rpt_001").await.unwrap().len();

        let report = api
            .update_report_status("rpt_001", ReportStatus::Approved, "mod_1", Some("looks fine"))
            .await
            .unwrap();

        assert_eq!(report.status, ReportStatus::Approved);
        assert!(report.resolved_at.is_some());
        assert_eq!(report.assigned_moderator_id.as_deref(), Some("mod_1"));

        let history = api.report_history("rpt_001").await.unwrap();
        assert_eq!(history.len(), before + 1);
        let entry = history.last().unwrap();
        assert_eq!(entry.action_type, ActionType::Approve);
        assert_eq!(entry.reason.as_deref(), Some("looks fine"));
        assert_eq!(entry.target_user_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn failed_transition_is_not_audited() {
        let api = fixture_api();
        let before = api.recent_actions(100).await.unwrap().len();

        let err = api
            .update_report_status("rpt_004", ReportStatus::Escalated, "mod_1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::IllegalTransition { .. }));

        let err = api
            .update_report_status("rpt_001", ReportStatus::Reviewing, "mod_1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::InvalidInput(_)));

        assert_eq!(api.recent_actions(100).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn warn_user_then_list_warnings() {
        let api = empty_api();
        api.warn_user("u1", "mod_1", "spam", 2, None).await.unwrap();

        let warnings = api.get_user_warnings("u1").await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, 2);
        assert!(!warnings[0].acknowledged);

        let actions = api.recent_actions(10).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Warn);
        assert_eq!(actions[0].metadata.as_ref().unwrap()["severity"], 2);
    }

    #[tokio::test]
    async fn ban_and_unban_are_each_audited() {
        let api = empty_api();

        let ban = api
            .ban_user("u7", "mod_1", "fraud", Some(Utc::now() + Duration::days(3)))
            .await
            .unwrap();
        assert!(api.is_banned("u7").await.unwrap());

        api.unban_user(&ban.id, "mod_1").await.unwrap();
        api.unban_user(&ban.id, "mod_1").await.unwrap();
        assert!(!api.is_banned("u7").await.unwrap());

        let kinds: Vec<ActionType> = api
            .recent_actions(10)
            .await
            .unwrap()
            .iter()
            .map(|a| a.action_type)
            .collect();
        assert_eq!(
            kinds,
            vec![ActionType::Unban, ActionType::Unban, ActionType::Ban]
        );
    }

    #[tokio::test]
    async fn banning_an_already_banned_user_fails_without_audit() {
        let api = fixture_api();
        let before = api.recent_actions(100).await.unwrap().len();

        let err = api
            .ban_user(BANNED_USER_ID, "mod_1", "again", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::AlreadyBanned { .. }));
        assert_eq!(api.recent_actions(100).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn enforce_on_report_rejects_and_sanctions() {
        let api = fixture_api();

        let outcome = api
            .enforce_on_report(
                "rpt_007",
                "mod_1",
                "Doxxing in photos",
                Sanction::Ban { expires_at: None },
            )
            .await
            .unwrap();

        assert_eq!(outcome.report.status, ReportStatus::Rejected);
        match outcome.sanction {
            SanctionRecord::Ban(ban) => assert_eq!(ban.user_id, "u3"),
            other => panic!("unexpected sanction: {other:?}"),
        }

        let kinds: Vec<ActionType> = api
            .report_history("rpt_007")
            .await
            .unwrap()
            .iter()
            .map(|a| a.action_type)
            .collect();
        assert_eq!(kinds, vec![ActionType::Reject, ActionType::Ban]);
    }

    #[tokio::test]
    async fn enforce_on_report_needs_a_reported_user() {
        let api = empty_api();
        let report = api
            .submit_report(NewReport {
                subject_listing_id: Some("L9".into()),
                reported_user_id: None,
                reporter_id: Some("u2".into()),
                reason: ReportReason::Other,
                description: "odd listing".into(),
                ai_result: None,
                ai_score: None,
                priority: 0,
            })
            .await
            .unwrap();

        let err = api
            .enforce_on_report(&report.id, "mod_1", "x", Sanction::Warn { severity: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::InvalidInput(_)));

        // Report untouched.
        let page = api.get_reports(&ReportFilters::default()).await.unwrap();
        assert_eq!(page.data[0].report.status, ReportStatus::Pending);
    }

    async fn assert_still_open(api: &TriageApi<InMemoryModerationStore>, report_id: &str) {
        let report = api.store().get_report(report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert!(report.resolved_at.is_none());
        assert!(api.report_history(report_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enforce_with_bad_severity_leaves_report_retryable() {
        let api = fixture_api();

        let err = api
            .enforce_on_report("rpt_007", "mod_1", "Doxxing", Sanction::Warn { severity: 9 })
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::InvalidInput(_)));
        assert_still_open(&api, "rpt_007").await;

        let outcome = api
            .enforce_on_report("rpt_007", "mod_1", "Doxxing", Sanction::Warn { severity: 2 })
            .await
            .unwrap();
        assert_eq!(outcome.report.status, ReportStatus::Rejected);
        assert!(matches!(outcome.sanction, SanctionRecord::Warning(_)));
    }

    #[tokio::test]
    async fn enforce_ban_on_banned_user_leaves_report_retryable() {
        let api = fixture_api();
        let report = api
            .submit_report(NewReport {
                subject_listing_id: None,
                reported_user_id: Some(BANNED_USER_ID.into()),
                reporter_id: Some("u2".into()),
                reason: ReportReason::Spam,
                description: "Still posting from another account".into(),
                ai_result: None,
                ai_score: None,
                priority: 1,
            })
            .await
            .unwrap();

        let err = api
            .enforce_on_report(&report.id, "mod_1", "spam", Sanction::Ban { expires_at: None })
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::AlreadyBanned { .. }));
        assert_still_open(&api, &report.id).await;

        let past = Utc::now() - Duration::hours(1);
        let err = api
            .enforce_on_report(&report.id, "mod_1", "spam", Sanction::Ban { expires_at: Some(past) })
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::InvalidInput(_)));
        assert_still_open(&api, &report.id).await;

        let outcome = api
            .enforce_on_report(&report.id, "mod_1", "spam", Sanction::Warn { severity: 3 })
            .await
            .unwrap();
        assert_eq!(outcome.report.status, ReportStatus::Rejected);
    }

    #[tokio::test]
    async fn dismiss_is_stored_as_rejected() {
        let api = fixture_api();
        let report = api.dismiss_report("rpt_003", "mod_1", None).await.unwrap();
        assert_eq!(report.status, ReportStatus::Rejected);

        let history = api.report_history("rpt_003").await.unwrap();
        assert_eq!(history.last().unwrap().action_type, ActionType::Dismiss);
    }

    #[tokio::test]
    async fn auto_flag_worker_feeds_triage_queue() {
        let api = empty_api();
        let (dispatcher, worker) = api.spawn_auto_flag(4);

        dispatcher.dispatch(AiAnalysis {
            action: AiAction::Moderate,
            subject_listing_id: Some("L1".into()),
            subject_user_id: None,
            input: json!({}),
            result: json!({ "isBlocked": true, "warnings": ["weapon listing"] }),
            processing_time_ms: 0,
        });
        drop(dispatcher);
        worker.join().await.unwrap();

        let page = api
            .get_reports(&ReportFilters {
                status: Some(ReportStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.data[0].report.priority, 3);

        let stats = api.get_moderation_stats().await.unwrap();
        assert_eq!(stats.auto_flagged_reports, 1);
        assert_eq!(stats.ai_flagged, 1);
    }
}
