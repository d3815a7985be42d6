// Auto-flag engine - turns AI analysis results into pending reports.
//
// Flow: raw AI result -> normalize -> AutoFlagPolicy::decide -> report + trace.
//
// The analysis caller never waits on this. Results are pushed onto a bounded
// queue and a single spawned worker does the writes. Worker failures are
// logged and forwarded on a side channel; they never reach the caller.

use super::ai_signal::{normalize, AiSignal};
use super::moderation_models::{AiAction, AiModerationLog, NewReport, Report, ReportReason};
use super::moderation_store::{ModerationError, ModerationStore};
use super::report_service::ReportService;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use uuid::Uuid;

/// Description used when the AI result carries no explanation.
pub const FALLBACK_DESCRIPTION: &str = "AI auto-flag";

/// Failures kept for inspection before the worker starts dropping them.
const FAILURE_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// DECISION POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoFlagPolicy {
    /// Scores below this flag the subject.
    pub score_threshold: f64,
    /// Scores below this bump a non-blocked flag to priority 2.
    pub urgent_score: f64,
}

impl Default for AutoFlagPolicy {
    fn default() -> Self {
        Self {
            score_threshold: 50.0,
            urgent_score: 30.0,
        }
    }
}

/// What a flagged analysis turns into.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagDecision {
    pub reason: ReportReason,
    pub priority: u8,
    pub description: String,
}

impl AutoFlagPolicy {
    /// `None` when the signal is clean or there is no listing to report.
    pub fn decide(&self, signal: &AiSignal, subject_listing_id: Option<&str>) -> Option<FlagDecision> {
        if !signal.flagged {
            return None;
        }
        subject_listing_id?;

        let reason = if signal.is_blocked {
            ReportReason::ProhibitedContent
        } else if signal.is_duplicate {
            ReportReason::Duplicate
        } else {
            ReportReason::Scam
        };

        let priority = if signal.is_blocked {
            3
        } else if signal.score.is_some_and(|score| score < self.urgent_score) {
            2
        } else {
            1
        };

        let description = signal
            .reason_hint
            .clone()
            .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string());

        Some(FlagDecision {
            reason,
            priority,
            description,
        })
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// One AI analysis invocation as handed over by the analysis service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAnalysis {
    pub action: AiAction,
    #[serde(default)]
    pub subject_listing_id: Option<String>,
    #[serde(default)]
    pub subject_user_id: Option<String>,
    #[serde(default)]
    pub input: Value,
    pub result: Value,
    #[serde(default)]
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone)]
pub struct AutoFlagOutcome {
    pub log: AiModerationLog,
    pub report: Option<Report>,
}

pub struct AutoFlagEngine<S: ModerationStore> {
    store: Arc<S>,
    reports: ReportService<S>,
    policy: AutoFlagPolicy,
}

impl<S: ModerationStore> AutoFlagEngine<S> {
    pub fn new(store: Arc<S>, policy: AutoFlagPolicy) -> Self {
        Self {
            reports: ReportService::new(store.clone()),
            store,
            policy,
        }
    }

    pub fn policy(&self) -> AutoFlagPolicy {
        self.policy
    }

    /// Record the trace and, when flagged, create the report.
    ///
    /// The trace is written whether or not a report follows, and the report
    /// is attempted even if the trace write failed. The two writes are not
    /// atomic; the first error is returned.
    pub async fn process(&self, analysis: AiAnalysis) -> Result<AutoFlagOutcome, ModerationError> {
        let signal = normalize(&analysis.result, self.policy.score_threshold);

        let log = AiModerationLog {
            id: Uuid::new_v4().to_string(),
            subject_listing_id: analysis.subject_listing_id.clone(),
            subject_user_id: analysis.subject_user_id.clone(),
            action: analysis.action,
            input_snapshot: analysis.input,
            result_snapshot: analysis.result.clone(),
            score: signal.score,
            is_flagged: signal.flagged,
            processing_time_ms: analysis.processing_time_ms,
            created_at: Utc::now(),
        };
        let log_written = self.store.insert_ai_log(log.clone()).await;

        let decision = self
            .policy
            .decide(&signal, analysis.subject_listing_id.as_deref());

        let report = match decision {
            Some(decision) => {
                let reported_user_id = match analysis.subject_user_id {
                    Some(user_id) => Some(user_id),
                    None => match analysis.subject_listing_id.as_deref() {
                        Some(listing_id) => match self.store.listing_owner(listing_id).await {
                            Ok(owner) => owner,
                            Err(e) => {
                                // The report still goes in, just without a user
                                tracing::warn!(
                                    listing_id,
                                    error = %e,
                                    "Listing owner lookup failed"
                                );
                                None
                            }
                        },
                        None => None,
                    },
                };

                let created = self
                    .reports
                    .create(NewReport {
                        subject_listing_id: analysis.subject_listing_id,
                        reported_user_id,
                        reporter_id: None,
                        reason: decision.reason,
                        description: decision.description,
                        ai_result: Some(analysis.result),
                        ai_score: signal.score,
                        priority: decision.priority,
                    })
                    .await;
                Some(created)
            }
            None => {
                if signal.flagged {
                    tracing::debug!(
                        log_id = %log.id,
                        "Flagged analysis has no listing subject, no report created"
                    );
                }
                None
            }
        };

        log_written?;
        let report = report.transpose()?;

        Ok(AutoFlagOutcome { log, report })
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Auto-flag queue is full")]
    QueueFull,

    #[error("Auto-flag worker has stopped")]
    Closed,
}

/// A side effect that failed inside the worker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoFlagFailure {
    pub action: AiAction,
    pub subject_listing_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSummary {
    pub processed: u64,
    pub flagged: u64,
    pub failed: u64,
    /// At most the first few failures; the rest are only in the logs.
    pub failures: Vec<AutoFlagFailure>,
}

/// Cheap handle for submitting analyses to the auto-flag worker.
#[derive(Clone)]
pub struct AutoFlagDispatcher {
    tx: mpsc::Sender<AiAnalysis>,
}

impl AutoFlagDispatcher {
    /// Start the worker. It runs until every dispatcher clone is dropped and
    /// the queue is drained.
    pub fn spawn<S>(engine: AutoFlagEngine<S>, capacity: usize) -> (Self, AutoFlagWorker)
    where
        S: ModerationStore + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (failure_tx, failure_rx) = mpsc::channel(FAILURE_CHANNEL_CAPACITY);

        tracing::info!(capacity = capacity.max(1), "Starting auto-flag worker");

        let handle = tokio::spawn(run_worker(engine, rx, failure_tx));

        (
            Self { tx },
            AutoFlagWorker {
                handle,
                failures: failure_rx,
            },
        )
    }

    /// Fire-and-forget. Never waits and never fails; dropped work is logged.
    pub fn dispatch(&self, analysis: AiAnalysis) {
        let subject = analysis.subject_listing_id.clone();
        if let Err(e) = self.try_dispatch(analysis) {
            tracing::warn!(
                error = %e,
                subject_listing_id = ?subject,
                "Auto-flag analysis dropped"
            );
        }
    }

    pub fn try_dispatch(&self, analysis: AiAnalysis) -> Result<(), DispatchError> {
        self.tx.try_send(analysis).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    /// Wait for queue space. For batch ingest, not for request handlers.
    pub async fn enqueue(&self, analysis: AiAnalysis) -> Result<(), DispatchError> {
        self.tx.send(analysis).await.map_err(|_| DispatchError::Closed)
    }
}

pub struct AutoFlagWorker {
    handle: JoinHandle<WorkerSummary>,
    failures: mpsc::Receiver<AutoFlagFailure>,
}

impl AutoFlagWorker {
    /// Live failure feed. Anything left unread is collected by `join`.
    pub fn failures(&mut self) -> &mut mpsc::Receiver<AutoFlagFailure> {
        &mut self.failures
    }

    /// Wait for the worker to drain the queue. Only returns once every
    /// dispatcher has been dropped.
    pub async fn join(mut self) -> Result<WorkerSummary, JoinError> {
        let mut summary = self.handle.await?;
        while let Ok(failure) = self.failures.try_recv() {
            summary.failures.push(failure);
        }
        Ok(summary)
    }
}

async fn run_worker<S: ModerationStore>(
    engine: AutoFlagEngine<S>,
    mut rx: mpsc::Receiver<AiAnalysis>,
    failure_tx: mpsc::Sender<AutoFlagFailure>,
) -> WorkerSummary {
    let mut summary = WorkerSummary::default();

    while let Some(analysis) = rx.recv().await {
        summary.processed += 1;
        let action = analysis.action;
        let subject_listing_id = analysis.subject_listing_id.clone();

        match engine.process(analysis).await {
            Ok(AutoFlagOutcome {
                report: Some(report),
                ..
            }) => {
                summary.flagged += 1;
                tracing::info!(
                    report_id = %report.id,
                    reason = %report.reason,
                    priority = report.priority,
                    "Auto-flag report created"
                );
            }
            Ok(_) => {}
            Err(e) => {
                summary.failed += 1;
                tracing::error!(
                    error = %e,
                    %action,
                    subject_listing_id = ?subject_listing_id,
                    "Auto-flag side effect failed"
                );
                let failure = AutoFlagFailure {
                    action,
                    subject_listing_id,
                    error: e.to_string(),
                };
                if failure_tx.try_send(failure).is_err() {
                    tracing::debug!("Auto-flag failure channel full");
                }
            }
        }
    }

    tracing::info!(
        processed = summary.processed,
        flagged = summary.flagged,
        failed = summary.failed,
        "Auto-flag worker stopped"
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{
        AiLogQuery, ListingRef, ModerationAction, Page, Report, ReportQuery, ReportStatus,
        TriageReport, UserBan, UserProfile, UserQuery, UserSummary, UserWarning,
    };
    use crate::infra::moderation::InMemoryModerationStore;
    use serde_json::json;

    fn analysis(listing: Option<&str>, result: Value) -> AiAnalysis {
        AiAnalysis {
            action: AiAction::Moderate,
            subject_listing_id: listing.map(str::to_string),
            subject_user_id: None,
            input: json!({ "title": "test" }),
            result,
            processing_time_ms: 120,
        }
    }

    fn signal(result: Value) -> AiSignal {
        normalize(&result, AutoFlagPolicy::default().score_threshold)
    }

    #[test]
    fn blocked_wins_over_duplicate() {
        let policy = AutoFlagPolicy::default();
        let decision = policy
            .decide(
                &signal(json!({ "isBlocked": true, "isDuplicate": true, "score": 90 })),
                Some("L1"),
            )
            .unwrap();
        assert_eq!(decision.reason, ReportReason::ProhibitedContent);
        assert_eq!(decision.priority, 3);
    }

    #[test]
    fn priority_follows_score_bands() {
        let policy = AutoFlagPolicy::default();

        let urgent = policy.decide(&signal(json!({ "score": 20 })), Some("L1")).unwrap();
        assert_eq!(urgent.reason, ReportReason::Scam);
        assert_eq!(urgent.priority, 2);

        let normal = policy.decide(&signal(json!({ "score": 40 })), Some("L1")).unwrap();
        assert_eq!(normal.priority, 1);

        let duplicate = policy
            .decide(&signal(json!({ "isDuplicate": true })), Some("L1"))
            .unwrap();
        assert_eq!(duplicate.reason, ReportReason::Duplicate);
        assert_eq!(duplicate.priority, 1);
        assert_eq!(duplicate.description, FALLBACK_DESCRIPTION);
    }

    #[test]
    fn clean_or_subjectless_results_are_not_reported() {
        let policy = AutoFlagPolicy::default();
        assert_eq!(policy.decide(&signal(json!({ "score": 85 })), Some("L1")), None);
        assert_eq!(policy.decide(&signal(json!({ "score": 10 })), None), None);
    }

    #[tokio::test]
    async fn blocked_listing_creates_urgent_report_and_flagged_trace() {
        let store = Arc::new(InMemoryModerationStore::new());
        let engine = AutoFlagEngine::new(store.clone(), AutoFlagPolicy::default());

        let outcome = engine
            .process(analysis(
                Some("L1"),
                json!({ "isBlocked": true, "warnings": ["weapon listing"] }),
            ))
            .await
            .unwrap();

        let report = outcome.report.unwrap();
        assert_eq!(report.reason, ReportReason::ProhibitedContent);
        assert_eq!(report.priority, 3);
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.reporter_id, None);
        assert_eq!(report.description, "weapon listing");

        let reports = store.query_reports(&ReportQuery::default()).await.unwrap();
        assert_eq!(reports.count, 1);

        let logs = store.query_ai_logs(&AiLogQuery::default()).await.unwrap();
        assert_eq!(logs.count, 1);
        assert!(logs.data[0].is_flagged);
    }

    #[tokio::test]
    async fn clean_listing_only_writes_trace() {
        let store = Arc::new(InMemoryModerationStore::new());
        let engine = AutoFlagEngine::new(store.clone(), AutoFlagPolicy::default());

        let outcome = engine
            .process(analysis(Some("L2"), json!({ "score": 85 })))
            .await
            .unwrap();
        assert!(outcome.report.is_none());
        assert_eq!(outcome.log.score, Some(85.0));

        let reports = store.query_reports(&ReportQuery::default()).await.unwrap();
        assert_eq!(reports.count, 0);

        let logs = store.query_ai_logs(&AiLogQuery::default()).await.unwrap();
        assert_eq!(logs.count, 1);
        assert!(!logs.data[0].is_flagged);
    }

    #[tokio::test]
    async fn reported_user_falls_back_to_listing_owner() {
        let store = Arc::new(InMemoryModerationStore::with_fixtures());
        let engine = AutoFlagEngine::new(store, AutoFlagPolicy::default());

        let outcome = engine
            .process(analysis(Some("lst_102"), json!({ "score": 15 })))
            .await
            .unwrap();
        let report = outcome.report.unwrap();
        assert_eq!(report.reported_user_id.as_deref(), Some("u1"));
        assert_eq!(report.ai_score, Some(15.0));

        let mut with_user = analysis(Some("lst_102"), json!({ "score": 15 }));
        with_user.subject_user_id = Some("u2".into());
        let report = engine.process(with_user).await.unwrap().report.unwrap();
        assert_eq!(report.reported_user_id.as_deref(), Some("u2"));
    }

    /// Fixture store whose listing directory is unreachable.
    struct DirectoryDown(InMemoryModerationStore);

    #[async_trait::async_trait]
    impl ModerationStore for DirectoryDown {
        async fn insert_report(&self, report: Report) -> Result<(), ModerationError> {
            self.0.insert_report(report).await
        }
        async fn get_report(&self, id: &str) -> Result<Option<Report>, ModerationError> {
            self.0.get_report(id).await
        }
        async fn update_report_from(
            &self,
            report: &Report,
            expected: ReportStatus,
        ) -> Result<(), ModerationError> {
            self.0.update_report_from(report, expected).await
        }
        async fn query_reports(
            &self,
            query: &ReportQuery,
        ) -> Result<Page<TriageReport>, ModerationError> {
            self.0.query_reports(query).await
        }
        async fn all_reports(&self) -> Result<Vec<Report>, ModerationError> {
            self.0.all_reports().await
        }
        async fn append_action(&self, action: ModerationAction) -> Result<(), ModerationError> {
            self.0.append_action(action).await
        }
        async fn recent_actions(
            &self,
            limit: usize,
        ) -> Result<Vec<ModerationAction>, ModerationError> {
            self.0.recent_actions(limit).await
        }
        async fn actions_for_report(
            &self,
            report_id: &str,
        ) -> Result<Vec<ModerationAction>, ModerationError> {
            self.0.actions_for_report(report_id).await
        }
        async fn insert_warning(&self, warning: UserWarning) -> Result<(), ModerationError> {
            self.0.insert_warning(warning).await
        }
        async fn warnings_for_user(
            &self,
            user_id: &str,
        ) -> Result<Vec<UserWarning>, ModerationError> {
            self.0.warnings_for_user(user_id).await
        }
        async fn count_warnings(&self) -> Result<u64, ModerationError> {
            self.0.count_warnings().await
        }
        async fn insert_ban(&self, ban: UserBan) -> Result<(), ModerationError> {
            self.0.insert_ban(ban).await
        }
        async fn get_ban(&self, id: &str) -> Result<Option<UserBan>, ModerationError> {
            self.0.get_ban(id).await
        }
        async fn update_ban(&self, ban: &UserBan) -> Result<(), ModerationError> {
            self.0.update_ban(ban).await
        }
        async fn bans_for_user(&self, user_id: &str) -> Result<Vec<UserBan>, ModerationError> {
            self.0.bans_for_user(user_id).await
        }
        async fn has_active_ban(&self, user_id: &str) -> Result<bool, ModerationError> {
            self.0.has_active_ban(user_id).await
        }
        async fn count_active_bans(&self) -> Result<u64, ModerationError> {
            self.0.count_active_bans().await
        }
        async fn insert_ai_log(&self, log: AiModerationLog) -> Result<(), ModerationError> {
            self.0.insert_ai_log(log).await
        }
        async fn query_ai_logs(
            &self,
            query: &AiLogQuery,
        ) -> Result<Page<AiModerationLog>, ModerationError> {
            self.0.query_ai_logs(query).await
        }
        async fn upsert_profile(&self, profile: UserProfile) -> Result<(), ModerationError> {
            self.0.upsert_profile(profile).await
        }
        async fn upsert_listing(&self, listing: ListingRef) -> Result<(), ModerationError> {
            self.0.upsert_listing(listing).await
        }
        async fn listing_owner(&self, _listing_id: &str) -> Result<Option<String>, ModerationError> {
            Err(ModerationError::StorageError("directory unavailable".into()))
        }
        async fn query_users(
            &self,
            query: &UserQuery,
        ) -> Result<Page<UserSummary>, ModerationError> {
            self.0.query_users(query).await
        }
    }

    #[tokio::test]
    async fn owner_lookup_failure_still_creates_report() {
        let store = Arc::new(DirectoryDown(InMemoryModerationStore::with_fixtures()));
        let engine = AutoFlagEngine::new(store.clone(), AutoFlagPolicy::default());

        let outcome = engine
            .process(analysis(Some("lst_102"), json!({ "score": 15 })))
            .await
            .unwrap();

        let report = outcome.report.unwrap();
        assert_eq!(report.reported_user_id, None);
        assert_eq!(report.status, ReportStatus::Pending);

        let flagged = store
            .query_ai_logs(&AiLogQuery {
                flagged_only: true,
                subject_listing_id: Some("lst_102".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(flagged.data.iter().any(|log| log.id == outcome.log.id));
    }

    #[tokio::test]
    async fn repeated_analysis_is_not_deduplicated() {
        let store = Arc::new(InMemoryModerationStore::new());
        let engine = AutoFlagEngine::new(store.clone(), AutoFlagPolicy::default());

        for _ in 0..2 {
            engine
                .process(analysis(Some("L1"), json!({ "score": 5 })))
                .await
                .unwrap();
        }

        let reports = store.query_reports(&ReportQuery::default()).await.unwrap();
        assert_eq!(reports.count, 2);
    }

    #[tokio::test]
    async fn worker_drains_queue_after_dispatchers_drop() {
        let store = Arc::new(InMemoryModerationStore::new());
        let engine = AutoFlagEngine::new(store.clone(), AutoFlagPolicy::default());
        let (dispatcher, worker) = AutoFlagDispatcher::spawn(engine, 8);

        dispatcher.dispatch(analysis(Some("L1"), json!({ "isBlocked": true })));
        dispatcher.dispatch(analysis(Some("L2"), json!({ "score": 85 })));
        dispatcher
            .enqueue(analysis(Some("L3"), json!({ "isDuplicate": true })))
            .await
            .unwrap();
        drop(dispatcher);

        let summary = worker.join().await.unwrap();
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.flagged, 2);
        assert_eq!(summary.failed, 0);
        assert!(summary.failures.is_empty());

        let logs = store.query_ai_logs(&AiLogQuery::default()).await.unwrap();
        assert_eq!(logs.count, 3);
    }

    #[tokio::test]
    async fn try_dispatch_reports_full_and_closed_queues() {
        let (tx, rx) = mpsc::channel(1);
        let dispatcher = AutoFlagDispatcher { tx };

        dispatcher
            .try_dispatch(analysis(Some("L1"), json!({})))
            .unwrap();
        assert_eq!(
            dispatcher.try_dispatch(analysis(Some("L1"), json!({}))),
            Err(DispatchError::QueueFull)
        );

        drop(rx);
        assert_eq!(
            dispatcher.try_dispatch(analysis(Some("L1"), json!({}))),
            Err(DispatchError::Closed)
        );

        // Never panics, even with nobody listening.
        dispatcher.dispatch(analysis(Some("L1"), json!({})));
    }
}
