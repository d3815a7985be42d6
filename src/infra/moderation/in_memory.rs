// In-memory implementation of ModerationStore.
//
// Backs the fixture mode: deterministic, optionally seeded with the
// fixture set, mutated in place for the lifetime of the process. Every row
// carries an insertion sequence number so sorts can fall back to insertion
// order on ties.

use super::fixtures::{self, FixtureSet};
use crate::core::moderation::{
    AiLogQuery, AiModerationLog, ListingRef, ModerationAction, ModerationError, ModerationStore,
    Page, Report, ReportQuery, ReportStatus, TriageReport, UserBan, UserProfile, UserQuery,
    UserSummary, UserWarning,
};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A stored row plus its insertion sequence.
#[derive(Clone, Debug)]
struct Sequenced<T> {
    seq: u64,
    value: T,
}

/// Fixture backend.
///
/// **DashMap:**
/// Handlers run concurrently, so every table is a concurrent map. The one
/// cross-row rule (a single active ban per user) is enforced through the
/// `active_bans` index with the entry API, so check-and-insert is atomic.
pub struct InMemoryModerationStore {
    next_seq: AtomicU64,
    reports: DashMap<String, Sequenced<Report>>,
    actions: DashMap<String, Sequenced<ModerationAction>>,
    warnings: DashMap<String, Sequenced<UserWarning>>,
    bans: DashMap<String, Sequenced<UserBan>>,
    /// user_id -> id of that user's active ban
    active_bans: DashMap<String, String>,
    ai_logs: DashMap<String, Sequenced<AiModerationLog>>,
    profiles: DashMap<String, Sequenced<UserProfile>>,
    listings: DashMap<String, ListingRef>,
}

impl InMemoryModerationStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            reports: DashMap::new(),
            actions: DashMap::new(),
            warnings: DashMap::new(),
            bans: DashMap::new(),
            active_bans: DashMap::new(),
            ai_logs: DashMap::new(),
            profiles: DashMap::new(),
            listings: DashMap::new(),
        }
    }

    /// Create a store seeded with the standard fixture set.
    pub fn with_fixtures() -> Self {
        Self::from_fixtures(fixtures::fixture_set())
    }

    pub fn from_fixtures(set: FixtureSet) -> Self {
        let store = Self::new();
        for profile in set.profiles {
            store.put(&store.profiles, profile.id.clone(), profile);
        }
        for listing in set.listings {
            store.listings.insert(listing.id.clone(), listing);
        }
        for report in set.reports {
            store.put(&store.reports, report.id.clone(), report);
        }
        for action in set.actions {
            store.put(&store.actions, action.id.clone(), action);
        }
        for warning in set.warnings {
            store.put(&store.warnings, warning.id.clone(), warning);
        }
        for ban in set.bans {
            if ban.is_active {
                store.active_bans.insert(ban.user_id.clone(), ban.id.clone());
            }
            store.put(&store.bans, ban.id.clone(), ban);
        }
        for log in set.ai_logs {
            store.put(&store.ai_logs, log.id.clone(), log);
        }
        store
    }

    fn put<T>(&self, table: &DashMap<String, Sequenced<T>>, id: String, value: T) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        table.insert(id, Sequenced { seq, value });
    }

    /// Rows matching `keep`, in insertion order.
    fn in_order<T: Clone>(
        table: &DashMap<String, Sequenced<T>>,
        keep: impl Fn(&T) -> bool,
    ) -> Vec<T> {
        let mut rows: Vec<(u64, T)> = table
            .iter()
            .filter(|entry| keep(&entry.value))
            .map(|entry| (entry.seq, entry.value.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, value)| value).collect()
    }

    fn triage_row(&self, report: Report) -> TriageReport {
        let listing_title = report
            .subject_listing_id
            .as_ref()
            .and_then(|id| self.listings.get(id).map(|listing| listing.title.clone()));
        let reported_username = report
            .reported_user_id
            .as_ref()
            .and_then(|id| self.profiles.get(id).map(|p| p.value.username.clone()));

        TriageReport {
            report,
            listing_title,
            reported_username,
        }
    }
}

// Default trait implementation for convenient initialization
impl Default for InMemoryModerationStore {
    fn default() -> Self {
        Self::new()
    }
}

fn paginate<T>(rows: Vec<T>, limit: usize, offset: usize) -> Page<T> {
    let count = rows.len() as u64;
    let data = rows.into_iter().skip(offset).take(limit).collect();
    Page { data, count }
}

#[async_trait]
impl ModerationStore for InMemoryModerationStore {
    async fn insert_report(&self, report: Report) -> Result<(), ModerationError> {
        self.put(&self.reports, report.id.clone(), report);
        Ok(())
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>, ModerationError> {
        Ok(self.reports.get(id).map(|entry| entry.value.clone()))
    }

    async fn update_report_from(
        &self,
        report: &Report,
        expected: ReportStatus,
    ) -> Result<(), ModerationError> {
        // get_mut holds the shard write lock across the check and the write
        match self.reports.get_mut(&report.id) {
            Some(mut entry) if entry.value.status == expected => {
                entry.value = report.clone();
                Ok(())
            }
            Some(entry) => Err(ModerationError::IllegalTransition {
                from: entry.value.status,
                to: report.status,
            }),
            None => Err(ModerationError::not_found("Report", report.id.as_str())),
        }
    }

    async fn query_reports(
        &self,
        query: &ReportQuery,
    ) -> Result<Page<TriageReport>, ModerationError> {
        let mut rows: Vec<TriageReport> = Self::in_order(&self.reports, |_| true)
            .into_iter()
            .map(|report| self.triage_row(report))
            .filter(|row| query.matches(row))
            .collect();

        // sort_by is stable, so ties keep insertion order
        rows.sort_by(|a, b| query.compare(&a.report, &b.report));

        Ok(paginate(rows, query.limit, query.offset))
    }

    async fn all_reports(&self) -> Result<Vec<Report>, ModerationError> {
        Ok(Self::in_order(&self.reports, |_| true))
    }

    async fn append_action(&self, action: ModerationAction) -> Result<(), ModerationError> {
        self.put(&self.actions, action.id.clone(), action);
        Ok(())
    }

    async fn recent_actions(&self, limit: usize) -> Result<Vec<ModerationAction>, ModerationError> {
        let mut actions = Self::in_order(&self.actions, |_| true);
        actions.reverse();
        // stable: equal timestamps stay newest-inserted first
        actions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        actions.truncate(limit);
        Ok(actions)
    }

    async fn actions_for_report(
        &self,
        report_id: &str,
    ) -> Result<Vec<ModerationAction>, ModerationError> {
        let mut actions = Self::in_order(&self.actions, |action| {
            action.report_id.as_deref() == Some(report_id)
        });
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(actions)
    }

    async fn insert_warning(&self, warning: UserWarning) -> Result<(), ModerationError> {
        self.put(&self.warnings, warning.id.clone(), warning);
        Ok(())
    }

    async fn warnings_for_user(&self, user_id: &str) -> Result<Vec<UserWarning>, ModerationError> {
        let mut warnings = Self::in_order(&self.warnings, |w| w.user_id == user_id);
        warnings.reverse();
        warnings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(warnings)
    }

    async fn count_warnings(&self) -> Result<u64, ModerationError> {
        Ok(self.warnings.len() as u64)
    }

    async fn insert_ban(&self, ban: UserBan) -> Result<(), ModerationError> {
        if ban.is_active {
            match self.active_bans.entry(ban.user_id.clone()) {
                Entry::Occupied(existing) => {
                    return Err(ModerationError::AlreadyBanned {
                        user_id: ban.user_id.clone(),
                        ban_id: existing.get().clone(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(ban.id.clone());
                }
            }
        }
        self.put(&self.bans, ban.id.clone(), ban);
        Ok(())
    }

    async fn get_ban(&self, id: &str) -> Result<Option<UserBan>, ModerationError> {
        Ok(self.bans.get(id).map(|entry| entry.value.clone()))
    }

    async fn update_ban(&self, ban: &UserBan) -> Result<(), ModerationError> {
        match self.bans.get_mut(&ban.id) {
            Some(mut entry) => entry.value = ban.clone(),
            None => return Err(ModerationError::not_found("Ban", ban.id.as_str())),
        }

        if ban.is_active {
            self.active_bans.insert(ban.user_id.clone(), ban.id.clone());
        } else {
            self.active_bans
                .remove_if(&ban.user_id, |_, active_id| *active_id == ban.id);
        }
        Ok(())
    }

    async fn bans_for_user(&self, user_id: &str) -> Result<Vec<UserBan>, ModerationError> {
        let mut bans = Self::in_order(&self.bans, |ban| ban.user_id == user_id);
        bans.reverse();
        bans.sort_by(|a, b| b.banned_at.cmp(&a.banned_at));
        Ok(bans)
    }

    async fn has_active_ban(&self, user_id: &str) -> Result<bool, ModerationError> {
        Ok(self.active_bans.contains_key(user_id))
    }

    async fn count_active_bans(&self) -> Result<u64, ModerationError> {
        Ok(self.active_bans.len() as u64)
    }

    async fn insert_ai_log(&self, log: AiModerationLog) -> Result<(), ModerationError> {
        self.put(&self.ai_logs, log.id.clone(), log);
        Ok(())
    }

    async fn query_ai_logs(
        &self,
        query: &AiLogQuery,
    ) -> Result<Page<AiModerationLog>, ModerationError> {
        let mut logs = Self::in_order(&self.ai_logs, |log| query.matches(log));
        logs.reverse();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(logs, query.limit, query.offset))
    }

    async fn upsert_profile(&self, profile: UserProfile) -> Result<(), ModerationError> {
        match self.profiles.get_mut(&profile.id) {
            Some(mut entry) => entry.value = profile,
            None => self.put(&self.profiles, profile.id.clone(), profile),
        }
        Ok(())
    }

    async fn upsert_listing(&self, listing: ListingRef) -> Result<(), ModerationError> {
        self.listings.insert(listing.id.clone(), listing);
        Ok(())
    }

    async fn listing_owner(&self, listing_id: &str) -> Result<Option<String>, ModerationError> {
        Ok(self
            .listings
            .get(listing_id)
            .map(|listing| listing.owner_id.clone()))
    }

    async fn query_users(&self, query: &UserQuery) -> Result<Page<UserSummary>, ModerationError> {
        let mut users: Vec<UserSummary> = Self::in_order(&self.profiles, |_| true)
            .into_iter()
            .filter_map(|profile| {
                let is_banned = self.active_bans.contains_key(&profile.id);
                if !query.matches(&profile, is_banned) {
                    return None;
                }
                let warning_count = self
                    .warnings
                    .iter()
                    .filter(|entry| entry.value.user_id == profile.id)
                    .count() as u64;
                Some(UserSummary {
                    profile,
                    is_banned,
                    warning_count,
                })
            })
            .collect();

        users.sort_by(|a, b| b.profile.created_at.cmp(&a.profile.created_at));

        Ok(paginate(users, query.limit, query.offset))
    }
}
