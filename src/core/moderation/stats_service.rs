// Stats aggregator - one-shot rollup for the dashboard header.

use super::moderation_models::{Report, ReportReason, ReportStatus, MAX_PRIORITY};
use super::moderation_store::{AiLogQuery, ModerationError, ModerationStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const PRIORITY_LEVELS: usize = MAX_PRIORITY as usize + 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationStats {
    pub total_reports: u64,
    pub pending_reports: u64,
    pub reviewing_reports: u64,
    pub approved_reports: u64,
    pub rejected_reports: u64,
    pub escalated_reports: u64,
    pub auto_flagged_reports: u64,
    pub by_reason: BTreeMap<ReportReason, u64>,
    /// Index is the priority value.
    pub by_priority: [u64; PRIORITY_LEVELS],
    pub resolved_last_24h: u64,
    pub active_bans: u64,
    pub total_warnings: u64,
    pub ai_scans: u64,
    pub ai_flagged: u64,
    pub average_ai_score: Option<f64>,
}

/// Report-derived part of the rollup. Pure, so it can be tested without a store.
pub fn summarize(reports: &[Report], now: DateTime<Utc>) -> ModerationStats {
    let mut stats = ModerationStats {
        total_reports: reports.len() as u64,
        ..Default::default()
    };
    let since = now - Duration::hours(24);
    let mut score_sum = 0.0;
    let mut scored = 0u64;

    for report in reports {
        match report.status {
            ReportStatus::Pending => stats.pending_reports += 1,
            ReportStatus::Reviewing => stats.reviewing_reports += 1,
            ReportStatus::Approved => stats.approved_reports += 1,
            ReportStatus::Rejected => stats.rejected_reports += 1,
            ReportStatus::Escalated => stats.escalated_reports += 1,
        }
        if report.is_auto_flag() {
            stats.auto_flagged_reports += 1;
        }
        *stats.by_reason.entry(report.reason).or_insert(0) += 1;
        if let Some(bucket) = stats.by_priority.get_mut(report.priority as usize) {
            *bucket += 1;
        }
        if report.resolved_at.is_some_and(|at| at >= since) {
            stats.resolved_last_24h += 1;
        }
        if let Some(score) = report.ai_score {
            score_sum += score;
            scored += 1;
        }
    }

    if scored > 0 {
        stats.average_ai_score = Some(score_sum / scored as f64);
    }

    stats
}

pub struct StatsService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> StatsService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn moderation_stats(&self) -> Result<ModerationStats, ModerationError> {
        let reports = self.store.all_reports().await?;
        let mut stats = summarize(&reports, Utc::now());

        stats.active_bans = self.store.count_active_bans().await?;
        stats.total_warnings = self.store.count_warnings().await?;

        // limit 0: only the counts are needed
        let scans = self
            .store
            .query_ai_logs(&AiLogQuery {
                limit: 0,
                ..Default::default()
            })
            .await?;
        let flagged = self
            .store
            .query_ai_logs(&AiLogQuery {
                flagged_only: true,
                limit: 0,
                ..Default::default()
            })
            .await?;
        stats.ai_scans = scans.count;
        stats.ai_flagged = flagged.count;

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::moderation::fixtures::fixture_set;
    use crate::infra::moderation::InMemoryModerationStore;

    #[test]
    fn summarize_counts_fixture_reports() {
        let reports = fixture_set().reports;
        let now = reports
            .iter()
            .filter_map(|r| r.resolved_at)
            .max()
            .unwrap();

        let stats = summarize(&reports, now);
        assert_eq!(stats.total_reports, 7);
        assert_eq!(stats.pending_reports, 3);
        assert_eq!(stats.reviewing_reports, 1);
        assert_eq!(stats.approved_reports, 1);
        assert_eq!(stats.rejected_reports, 1);
        assert_eq!(stats.escalated_reports, 1);
        assert_eq!(stats.auto_flagged_reports, 2);
        assert_eq!(stats.by_priority, [2, 2, 2, 1]);
        assert_eq!(stats.by_reason.get(&ReportReason::Scam), Some(&1));
        assert_eq!(stats.resolved_last_24h, 2);
        assert_eq!(stats.average_ai_score, Some(28.5));
    }

    #[test]
    fn empty_input_has_no_average() {
        let stats = summarize(&[], Utc::now());
        assert_eq!(stats.total_reports, 0);
        assert_eq!(stats.average_ai_score, None);
        assert!(stats.by_reason.is_empty());
    }

    #[tokio::test]
    async fn service_adds_sanction_and_ai_counts() {
        let service = StatsService::new(Arc::new(InMemoryModerationStore::with_fixtures()));
        let stats = service.moderation_stats().await.unwrap();

        assert_eq!(stats.total_reports, 7);
        assert_eq!(stats.active_bans, 1);
        assert_eq!(stats.total_warnings, 1);
        assert_eq!(stats.ai_scans, 3);
        assert_eq!(stats.ai_flagged, 2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["byReason"]["prohibited_content"], 1);
        assert_eq!(json["activeBans"], 1);
    }
}
