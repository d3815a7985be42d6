// Enforcement module - warnings (non-blocking) and bans (blocking).
//
// This module only mutates sanction rows. Recording the matching audit entry
// is the caller's job, so every warn/ban/unban here is paired with exactly one
// append by the dashboard API.

use super::moderation_models::{UserBan, UserWarning};
use super::moderation_store::{ModerationError, ModerationStore};
use super::report_service::require_moderator;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub const MIN_SEVERITY: u8 = 1;
pub const MAX_SEVERITY: u8 = 3;

pub struct EnforcementService<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> EnforcementService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record a warning. Never touches report status.
    pub async fn warn(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
        severity: u8,
        report_id: Option<&str>,
    ) -> Result<UserWarning, ModerationError> {
        check_warning(user_id, moderator_id, severity)?;

        let warning = UserWarning {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            moderator_id: moderator_id.to_string(),
            report_id: report_id.map(str::to_string),
            reason: reason.to_string(),
            severity,
            acknowledged: false,
            created_at: Utc::now(),
        };
        self.store.insert_warning(warning.clone()).await?;

        tracing::info!(
            warning_id = %warning.id,
            user_id,
            moderator_id,
            severity,
            "User warned"
        );

        Ok(warning)
    }

    /// Create an active ban. A user holds at most one active ban; a second
    /// one fails with `AlreadyBanned`.
    pub async fn ban(
        &self,
        user_id: &str,
        moderator_id: &str,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<UserBan, ModerationError> {
        let now = Utc::now();
        check_ban_input(user_id, moderator_id, expires_at, now)?;

        let ban = UserBan {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            moderator_id: moderator_id.to_string(),
            reason: reason.to_string(),
            banned_at: now,
            expires_at,
            is_active: true,
            unbanned_at: None,
            unbanned_by: None,
        };
        self.store.insert_ban(ban.clone()).await?;

        tracing::warn!(
            ban_id = %ban.id,
            user_id,
            moderator_id,
            expires_at = ?expires_at,
            "User banned"
        );

        Ok(ban)
    }

    /// Lift a ban. Lifting an already inactive ban succeeds and changes nothing.
    pub async fn unban(&self, ban_id: &str, moderator_id: &str) -> Result<UserBan, ModerationError> {
        require_moderator(moderator_id)?;

        let mut ban = self
            .store
            .get_ban(ban_id)
            .await?
            .ok_or_else(|| ModerationError::not_found("Ban", ban_id))?;

        if !ban.is_active {
            tracing::debug!(ban_id, "Ban already inactive, nothing to lift");
            return Ok(ban);
        }

        ban.is_active = false;
        ban.unbanned_at = Some(Utc::now());
        ban.unbanned_by = Some(moderator_id.to_string());
        self.store.update_ban(&ban).await?;

        tracing::info!(ban_id, user_id = %ban.user_id, moderator_id, "User unbanned");

        Ok(ban)
    }

    /// Everything `ban` would refuse, checked without writing: bad input, or a
    /// user who already holds an active ban. A concurrent ban can still win
    /// between this check and `ban`; the store's own check stays authoritative.
    pub async fn check_can_ban(
        &self,
        user_id: &str,
        moderator_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(), ModerationError> {
        check_ban_input(user_id, moderator_id, expires_at, Utc::now())?;

        let active = self
            .store
            .bans_for_user(user_id)
            .await?
            .into_iter()
            .find(|ban| ban.is_active);
        match active {
            Some(ban) => Err(ModerationError::AlreadyBanned {
                user_id: user_id.to_string(),
                ban_id: ban.id,
            }),
            None => Ok(()),
        }
    }

    /// True iff the user has any active ban.
    pub async fn is_banned(&self, user_id: &str) -> Result<bool, ModerationError> {
        self.store.has_active_ban(user_id).await
    }

    pub async fn warnings_for(&self, user_id: &str) -> Result<Vec<UserWarning>, ModerationError> {
        self.store.warnings_for_user(user_id).await
    }

    pub async fn bans_for(&self, user_id: &str) -> Result<Vec<UserBan>, ModerationError> {
        self.store.bans_for_user(user_id).await
    }
}

/// Input rules for a warning, shared by `warn` and callers that must
/// validate before committing to other writes.
pub fn check_warning(user_id: &str, moderator_id: &str, severity: u8) -> Result<(), ModerationError> {
    require_user(user_id)?;
    require_moderator(moderator_id)?;
    if !(MIN_SEVERITY..=MAX_SEVERITY).contains(&severity) {
        return Err(ModerationError::InvalidInput(format!(
            "severity must be {MIN_SEVERITY}..={MAX_SEVERITY}, got {severity}"
        )));
    }
    Ok(())
}

fn check_ban_input(
    user_id: &str,
    moderator_id: &str,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), ModerationError> {
    require_user(user_id)?;
    require_moderator(moderator_id)?;
    if expires_at.is_some_and(|expiry| expiry <= now) {
        return Err(ModerationError::InvalidInput(
            "ban expiry must be in the future".to_string(),
        ));
    }
    Ok(())
}

fn require_user(user_id: &str) -> Result<(), ModerationError> {
    if user_id.trim().is_empty() {
        Err(ModerationError::InvalidInput("user id is required".to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::moderation::InMemoryModerationStore;
    use chrono::Duration;

    fn make_service() -> EnforcementService<InMemoryModerationStore> {
        EnforcementService::new(Arc::new(InMemoryModerationStore::new()))
    }

    #[tokio::test]
    async fn warn_creates_unacknowledged_warning() {
        let service = make_service();
        service.warn("u1", "mod_1", "spam", 2, None).await.unwrap();

        let warnings = service.warnings_for("u1").await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, 2);
        assert!(!warnings[0].acknowledged);
    }

    #[tokio::test]
    async fn warn_rejects_bad_severity() {
        let service = make_service();
        assert!(service.warn("u1", "mod_1", "spam", 0, None).await.is_err());
        assert!(service.warn("u1", "mod_1", "spam", 4, None).await.is_err());
    }

    #[tokio::test]
    async fn ban_then_unban_toggles_is_banned() {
        let service = make_service();

        let ban = service.ban("u1", "mod_1", "scam", None).await.unwrap();
        assert!(ban.is_active);
        assert!(ban.is_permanent());
        assert!(service.is_banned("u1").await.unwrap());

        let lifted = service.unban(&ban.id, "mod_2").await.unwrap();
        assert!(!lifted.is_active);
        assert_eq!(lifted.unbanned_by.as_deref(), Some("mod_2"));
        assert!(lifted.unbanned_at.is_some());
        assert!(!service.is_banned("u1").await.unwrap());
    }

    #[tokio::test]
    async fn is_banned_ignores_older_inactive_bans() {
        let service = make_service();

        let first = service.ban("u1", "mod_1", "scam", None).await.unwrap();
        service.unban(&first.id, "mod_1").await.unwrap();

        let expiry = Utc::now() + Duration::days(7);
        let second = service.ban("u1", "mod_1", "again", Some(expiry)).await.unwrap();
        assert!(service.is_banned("u1").await.unwrap());

        service.unban(&second.id, "mod_1").await.unwrap();
        assert!(!service.is_banned("u1").await.unwrap());
        assert_eq!(service.bans_for("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn second_active_ban_is_refused() {
        let service = make_service();
        let ban = service.ban("u1", "mod_1", "scam", None).await.unwrap();

        let err = service.ban("u1", "mod_2", "scam", None).await.unwrap_err();
        match err {
            ModerationError::AlreadyBanned { user_id, ban_id } => {
                assert_eq!(user_id, "u1");
                assert_eq!(ban_id, ban.id);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unban_twice_is_idempotent() {
        let service = make_service();
        let ban = service.ban("u1", "mod_1", "scam", None).await.unwrap();

        let first = service.unban(&ban.id, "mod_1").await.unwrap();
        let second = service.unban(&ban.id, "mod_2").await.unwrap();

        assert!(!second.is_active);
        assert_eq!(second.unbanned_by, first.unbanned_by);
    }

    #[tokio::test]
    async fn unban_unknown_ban_is_not_found() {
        let service = make_service();
        let err = service.unban("nope", "mod_1").await.unwrap_err();
        assert!(matches!(err, ModerationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn check_can_ban_reports_existing_ban_without_writing() {
        let service = make_service();
        service.check_can_ban("u1", "mod_1", None).await.unwrap();

        let ban = service.ban("u1", "mod_1", "scam", None).await.unwrap();
        match service.check_can_ban("u1", "mod_1", None).await.unwrap_err() {
            ModerationError::AlreadyBanned { ban_id, .. } => assert_eq!(ban_id, ban.id),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(service.bans_for("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ban_rejects_past_expiry() {
        let service = make_service();
        let past = Utc::now() - Duration::hours(1);
        assert!(service.ban("u1", "mod_1", "scam", Some(past)).await.is_err());
    }
}
