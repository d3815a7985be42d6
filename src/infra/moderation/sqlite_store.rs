// SQLite-backed moderation store.
//
// Tables:
// - reports: report workflow rows
// - moderation_actions: append-only audit log
// - user_warnings / user_bans: sanctions (one active ban per user, enforced by index)
// - ai_moderation_logs: AI analysis traces
// - profiles / listings: directory mirror used by triage search
//
// Insertion order is the implicit rowid, used as the tie-breaker in every sort.
// Searchable text also lives in `*_lc` columns lowercased in Rust: SQLite's
// LOWER() only folds ASCII, and search must match the in-memory backend.

use crate::core::moderation::{
    AiLogQuery, AiModerationLog, ListingRef, ModerationAction, ModerationError, ModerationStore,
    Page, Report, ReportQuery, ReportSortField, ReportStatus, SortOrder, TriageReport, UserBan,
    UserProfile, UserQuery, UserSummary, UserWarning,
};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::path::Path;

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

fn storage_error(e: impl std::fmt::Display) -> ModerationError {
    ModerationError::StorageError(e.to_string())
}

impl SqliteModerationStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Ensure the file exists if it's a file path
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Call `migrate` before use.
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS reports (
                id TEXT PRIMARY KEY,
                subject_listing_id TEXT,
                reported_user_id TEXT,
                reporter_id TEXT,
                reason TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                description_lc TEXT NOT NULL DEFAULT '',
                ai_result TEXT,
                ai_score REAL,
                status TEXT NOT NULL DEFAULT 'pending',
                priority INTEGER NOT NULL DEFAULT 0,
                assigned_moderator_id TEXT,
                resolution_note TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                resolved_at TEXT
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_reports_status ON reports (status);",
            r#"
            CREATE TABLE IF NOT EXISTS moderation_actions (
                id TEXT PRIMARY KEY,
                report_id TEXT,
                moderator_id TEXT NOT NULL,
                action_type TEXT NOT NULL,
                target_user_id TEXT,
                target_listing_id TEXT,
                reason TEXT,
                metadata TEXT,
                created_at TEXT NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_actions_report ON moderation_actions (report_id);",
            r#"
            CREATE TABLE IF NOT EXISTS user_warnings (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                moderator_id TEXT NOT NULL,
                report_id TEXT,
                reason TEXT NOT NULL,
                severity INTEGER NOT NULL,
                acknowledged BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS user_bans (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                moderator_id TEXT NOT NULL,
                reason TEXT NOT NULL,
                banned_at TEXT NOT NULL,
                expires_at TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                unbanned_at TEXT,
                unbanned_by TEXT
            );
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_user_bans_one_active
                ON user_bans (user_id) WHERE is_active = 1;
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS ai_moderation_logs (
                id TEXT PRIMARY KEY,
                subject_listing_id TEXT,
                subject_user_id TEXT,
                action TEXT NOT NULL,
                input_snapshot TEXT NOT NULL,
                result_snapshot TEXT NOT NULL,
                score REAL,
                is_flagged BOOLEAN NOT NULL,
                processing_time_ms INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                username_lc TEXT NOT NULL,
                full_name TEXT,
                full_name_lc TEXT,
                is_admin BOOLEAN NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS listings (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                title_lc TEXT NOT NULL,
                owner_id TEXT NOT NULL
            );
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_error)?;
        }

        Ok(())
    }

    async fn active_ban_id(&self, user_id: &str) -> Result<Option<String>, ModerationError> {
        let row = sqlx::query("SELECT id FROM user_bans WHERE user_id = ? AND is_active = 1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.map(|row| row.try_get("id").map_err(storage_error))
            .transpose()
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn to_json(value: &Value) -> Result<String, ModerationError> {
    serde_json::to_string(value).map_err(storage_error)
}

fn from_json(text: &str) -> Result<Value, ModerationError> {
    serde_json::from_str(text).map_err(storage_error)
}

fn optional_json(row: &SqliteRow, column: &str) -> Result<Option<Value>, ModerationError> {
    let text: Option<String> = row.try_get(column).map_err(storage_error)?;
    text.as_deref().map(from_json).transpose()
}

fn parsed<T>(row: &SqliteRow, column: &str) -> Result<T, ModerationError>
where
    T: std::str::FromStr<Err = ModerationError>,
{
    let text: String = row.try_get(column).map_err(storage_error)?;
    text.parse()
}

fn small_int(row: &SqliteRow, column: &str) -> Result<u8, ModerationError> {
    let value: i64 = row.try_get(column).map_err(storage_error)?;
    u8::try_from(value).map_err(storage_error)
}

fn row_to_report(row: &SqliteRow) -> Result<Report, ModerationError> {
    Ok(Report {
        id: row.try_get("id").map_err(storage_error)?,
        subject_listing_id: row.try_get("subject_listing_id").map_err(storage_error)?,
        reported_user_id: row.try_get("reported_user_id").map_err(storage_error)?,
        reporter_id: row.try_get("reporter_id").map_err(storage_error)?,
        reason: parsed(row, "reason")?,
        description: row.try_get("description").map_err(storage_error)?,
        ai_result: optional_json(row, "ai_result")?,
        ai_score: row.try_get("ai_score").map_err(storage_error)?,
        status: parsed(row, "status")?,
        priority: small_int(row, "priority")?,
        assigned_moderator_id: row.try_get("assigned_moderator_id").map_err(storage_error)?,
        resolution_note: row.try_get("resolution_note").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
        updated_at: row.try_get("updated_at").map_err(storage_error)?,
        resolved_at: row.try_get("resolved_at").map_err(storage_error)?,
    })
}

fn row_to_action(row: &SqliteRow) -> Result<ModerationAction, ModerationError> {
    Ok(ModerationAction {
        id: row.try_get("id").map_err(storage_error)?,
        report_id: row.try_get("report_id").map_err(storage_error)?,
        moderator_id: row.try_get("moderator_id").map_err(storage_error)?,
        action_type: parsed(row, "action_type")?,
        target_user_id: row.try_get("target_user_id").map_err(storage_error)?,
        target_listing_id: row.try_get("target_listing_id").map_err(storage_error)?,
        reason: row.try_get("reason").map_err(storage_error)?,
        metadata: optional_json(row, "metadata")?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn row_to_warning(row: &SqliteRow) -> Result<UserWarning, ModerationError> {
    Ok(UserWarning {
        id: row.try_get("id").map_err(storage_error)?,
        user_id: row.try_get("user_id").map_err(storage_error)?,
        moderator_id: row.try_get("moderator_id").map_err(storage_error)?,
        report_id: row.try_get("report_id").map_err(storage_error)?,
        reason: row.try_get("reason").map_err(storage_error)?,
        severity: small_int(row, "severity")?,
        acknowledged: row.try_get("acknowledged").map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn row_to_ban(row: &SqliteRow) -> Result<UserBan, ModerationError> {
    Ok(UserBan {
        id: row.try_get("id").map_err(storage_error)?,
        user_id: row.try_get("user_id").map_err(storage_error)?,
        moderator_id: row.try_get("moderator_id").map_err(storage_error)?,
        reason: row.try_get("reason").map_err(storage_error)?,
        banned_at: row.try_get("banned_at").map_err(storage_error)?,
        expires_at: row.try_get("expires_at").map_err(storage_error)?,
        is_active: row.try_get("is_active").map_err(storage_error)?,
        unbanned_at: row.try_get("unbanned_at").map_err(storage_error)?,
        unbanned_by: row.try_get("unbanned_by").map_err(storage_error)?,
    })
}

fn row_to_ai_log(row: &SqliteRow) -> Result<AiModerationLog, ModerationError> {
    let input: String = row.try_get("input_snapshot").map_err(storage_error)?;
    let result: String = row.try_get("result_snapshot").map_err(storage_error)?;
    let processing_time_ms: i64 = row.try_get("processing_time_ms").map_err(storage_error)?;

    Ok(AiModerationLog {
        id: row.try_get("id").map_err(storage_error)?,
        subject_listing_id: row.try_get("subject_listing_id").map_err(storage_error)?,
        subject_user_id: row.try_get("subject_user_id").map_err(storage_error)?,
        action: parsed(row, "action")?,
        input_snapshot: from_json(&input)?,
        result_snapshot: from_json(&result)?,
        score: row.try_get("score").map_err(storage_error)?,
        is_flagged: row.try_get("is_flagged").map_err(storage_error)?,
        processing_time_ms: u64::try_from(processing_time_ms).map_err(storage_error)?,
        created_at: row.try_get("created_at").map_err(storage_error)?,
    })
}

fn row_to_user_summary(row: &SqliteRow) -> Result<UserSummary, ModerationError> {
    let warning_count: i64 = row.try_get("warning_count").map_err(storage_error)?;
    Ok(UserSummary {
        profile: UserProfile {
            id: row.try_get("id").map_err(storage_error)?,
            username: row.try_get("username").map_err(storage_error)?,
            full_name: row.try_get("full_name").map_err(storage_error)?,
            is_admin: row.try_get("is_admin").map_err(storage_error)?,
            created_at: row.try_get("created_at").map_err(storage_error)?,
        },
        is_banned: row.try_get("is_banned").map_err(storage_error)?,
        warning_count: u64::try_from(warning_count).map_err(storage_error)?,
    })
}

fn collect<T>(
    rows: &[SqliteRow],
    map: fn(&SqliteRow) -> Result<T, ModerationError>,
) -> Result<Vec<T>, ModerationError> {
    rows.iter().map(map).collect()
}

// ============================================================================
// DYNAMIC QUERY FRAGMENTS
// ============================================================================

const REPORT_JOINS: &str = " FROM reports r \
     LEFT JOIN listings l ON l.id = r.subject_listing_id \
     LEFT JOIN profiles p ON p.id = r.reported_user_id";

fn push_report_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &ReportQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(status) = query.status {
        builder.push(" AND r.status = ").push_bind(status.as_str());
    }
    if let Some(reason) = query.reason {
        builder.push(" AND r.reason = ").push_bind(reason.as_str());
    }
    if let Some(priority) = query.priority {
        builder.push(" AND r.priority = ").push_bind(i64::from(priority));
    }
    if let Some(term) = &query.search {
        builder
            .push(" AND (instr(COALESCE(l.title_lc, ''), ")
            .push_bind(term.clone())
            .push(") > 0 OR instr(COALESCE(p.username_lc, ''), ")
            .push_bind(term.clone())
            .push(") > 0 OR instr(r.description_lc, ")
            .push_bind(term.clone())
            .push(") > 0)");
    }
}

fn report_order_clause(query: &ReportQuery) -> String {
    let direction = match query.sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    match query.sort_by {
        ReportSortField::CreatedAt => format!(" ORDER BY r.created_at {direction}, r.rowid ASC"),
        ReportSortField::Priority => format!(" ORDER BY r.priority {direction}, r.rowid ASC"),
        ReportSortField::AiScore => {
            format!(" ORDER BY r.ai_score IS NULL, r.ai_score {direction}, r.rowid ASC")
        }
    }
}

const USER_ACTIVE_BAN: &str =
    "EXISTS (SELECT 1 FROM user_bans b WHERE b.user_id = p.id AND b.is_active = 1)";

fn push_user_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &UserQuery) {
    builder.push(" FROM profiles p WHERE p.is_admin = 0");
    if let Some(term) = &query.search {
        builder
            .push(" AND (instr(p.username_lc, ")
            .push_bind(term.clone())
            .push(") > 0 OR instr(COALESCE(p.full_name_lc, ''), ")
            .push_bind(term.clone())
            .push(") > 0)");
    }
    if query.banned_only {
        builder.push(" AND ").push(USER_ACTIVE_BAN);
    }
}

fn push_ai_log_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &AiLogQuery) {
    builder.push(" FROM ai_moderation_logs WHERE 1 = 1");
    if let Some(action) = query.action {
        builder.push(" AND action = ").push_bind(action.as_str());
    }
    if query.flagged_only {
        builder.push(" AND is_flagged = 1");
    }
    if let Some(listing_id) = &query.subject_listing_id {
        builder
            .push(" AND subject_listing_id = ")
            .push_bind(listing_id.clone());
    }
}

fn push_page(builder: &mut QueryBuilder<'_, Sqlite>, limit: usize, offset: usize) {
    builder
        .push(" LIMIT ")
        .push_bind(limit as i64)
        .push(" OFFSET ")
        .push_bind(offset as i64);
}

#[async_trait]
impl ModerationStore for SqliteModerationStore {
    async fn insert_report(&self, report: Report) -> Result<(), ModerationError> {
        let ai_result = report.ai_result.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO reports (
                id, subject_listing_id, reported_user_id, reporter_id, reason,
                description, description_lc, ai_result, ai_score, status, priority,
                assigned_moderator_id, resolution_note, created_at, updated_at, resolved_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&report.id)
        .bind(&report.subject_listing_id)
        .bind(&report.reported_user_id)
        .bind(&report.reporter_id)
        .bind(report.reason.as_str())
        .bind(&report.description)
        .bind(report.description.to_lowercase())
        .bind(ai_result)
        .bind(report.ai_score)
        .bind(report.status.as_str())
        .bind(i64::from(report.priority))
        .bind(&report.assigned_moderator_id)
        .bind(&report.resolution_note)
        .bind(report.created_at)
        .bind(report.updated_at)
        .bind(report.resolved_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn get_report(&self, id: &str) -> Result<Option<Report>, ModerationError> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(row_to_report).transpose()
    }

    async fn update_report_from(
        &self,
        report: &Report,
        expected: ReportStatus,
    ) -> Result<(), ModerationError> {
        let ai_result = report.ai_result.as_ref().map(to_json).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE reports SET
                subject_listing_id = ?,
                reported_user_id = ?,
                reporter_id = ?,
                reason = ?,
                description = ?,
                description_lc = ?,
                ai_result = ?,
                ai_score = ?,
                status = ?,
                priority = ?,
                assigned_moderator_id = ?,
                resolution_note = ?,
                updated_at = ?,
                resolved_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(&report.subject_listing_id)
        .bind(&report.reported_user_id)
        .bind(&report.reporter_id)
        .bind(report.reason.as_str())
        .bind(&report.description)
        .bind(report.description.to_lowercase())
        .bind(ai_result)
        .bind(report.ai_score)
        .bind(report.status.as_str())
        .bind(i64::from(report.priority))
        .bind(&report.assigned_moderator_id)
        .bind(&report.resolution_note)
        .bind(report.updated_at)
        .bind(report.resolved_at)
        .bind(&report.id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            // Either the row is gone or its status moved under us.
            return Err(match self.get_report(&report.id).await? {
                Some(current) => ModerationError::IllegalTransition {
                    from: current.status,
                    to: report.status,
                },
                None => ModerationError::not_found("Report", report.id.as_str()),
            });
        }
        Ok(())
    }

    async fn query_reports(
        &self,
        query: &ReportQuery,
    ) -> Result<Page<TriageReport>, ModerationError> {
        let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        count_builder.push(REPORT_JOINS);
        push_report_filters(&mut count_builder, query);
        let count: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT r.*, l.title AS listing_title, p.username AS reported_username",
        );
        builder.push(REPORT_JOINS);
        push_report_filters(&mut builder, query);
        builder.push(report_order_clause(query));
        push_page(&mut builder, query.limit, query.offset);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        let data = rows
            .iter()
            .map(|row| {
                Ok(TriageReport {
                    report: row_to_report(row)?,
                    listing_title: row.try_get("listing_title").map_err(storage_error)?,
                    reported_username: row.try_get("reported_username").map_err(storage_error)?,
                })
            })
            .collect::<Result<Vec<_>, ModerationError>>()?;

        Ok(Page {
            data,
            count: count as u64,
        })
    }

    async fn all_reports(&self) -> Result<Vec<Report>, ModerationError> {
        let rows = sqlx::query("SELECT * FROM reports ORDER BY rowid ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;
        collect(&rows, row_to_report)
    }

    async fn append_action(&self, action: ModerationAction) -> Result<(), ModerationError> {
        let metadata = action.metadata.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO moderation_actions (
                id, report_id, moderator_id, action_type, target_user_id,
                target_listing_id, reason, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&action.id)
        .bind(&action.report_id)
        .bind(&action.moderator_id)
        .bind(action.action_type.as_str())
        .bind(&action.target_user_id)
        .bind(&action.target_listing_id)
        .bind(&action.reason)
        .bind(metadata)
        .bind(action.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn recent_actions(&self, limit: usize) -> Result<Vec<ModerationAction>, ModerationError> {
        let rows = sqlx::query(
            "SELECT * FROM moderation_actions ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        collect(&rows, row_to_action)
    }

    async fn actions_for_report(
        &self,
        report_id: &str,
    ) -> Result<Vec<ModerationAction>, ModerationError> {
        let rows = sqlx::query(
            "SELECT * FROM moderation_actions WHERE report_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(report_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        collect(&rows, row_to_action)
    }

    async fn insert_warning(&self, warning: UserWarning) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO user_warnings (
                id, user_id, moderator_id, report_id, reason, severity, acknowledged, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&warning.id)
        .bind(&warning.user_id)
        .bind(&warning.moderator_id)
        .bind(&warning.report_id)
        .bind(&warning.reason)
        .bind(i64::from(warning.severity))
        .bind(warning.acknowledged)
        .bind(warning.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn warnings_for_user(&self, user_id: &str) -> Result<Vec<UserWarning>, ModerationError> {
        let rows = sqlx::query(
            "SELECT * FROM user_warnings WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        collect(&rows, row_to_warning)
    }

    async fn count_warnings(&self) -> Result<u64, ModerationError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_warnings")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count as u64)
    }

    async fn insert_ban(&self, ban: UserBan) -> Result<(), ModerationError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_bans (
                id, user_id, moderator_id, reason, banned_at, expires_at,
                is_active, unbanned_at, unbanned_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ban.id)
        .bind(&ban.user_id)
        .bind(&ban.moderator_id)
        .bind(&ban.reason)
        .bind(ban.banned_at)
        .bind(ban.expires_at)
        .bind(ban.is_active)
        .bind(ban.unbanned_at)
        .bind(&ban.unbanned_by)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                let existing = self.active_ban_id(&ban.user_id).await?.unwrap_or_default();
                Err(ModerationError::AlreadyBanned {
                    user_id: ban.user_id,
                    ban_id: existing,
                })
            }
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn get_ban(&self, id: &str) -> Result<Option<UserBan>, ModerationError> {
        let row = sqlx::query("SELECT * FROM user_bans WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        row.as_ref().map(row_to_ban).transpose()
    }

    async fn update_ban(&self, ban: &UserBan) -> Result<(), ModerationError> {
        let result = sqlx::query(
            r#"
            UPDATE user_bans SET
                reason = ?,
                expires_at = ?,
                is_active = ?,
                unbanned_at = ?,
                unbanned_by = ?
            WHERE id = ?
            "#,
        )
        .bind(&ban.reason)
        .bind(ban.expires_at)
        .bind(ban.is_active)
        .bind(ban.unbanned_at)
        .bind(&ban.unbanned_by)
        .bind(&ban.id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(ModerationError::not_found("Ban", ban.id.as_str()));
        }
        Ok(())
    }

    async fn bans_for_user(&self, user_id: &str) -> Result<Vec<UserBan>, ModerationError> {
        let rows = sqlx::query(
            "SELECT * FROM user_bans WHERE user_id = ? ORDER BY banned_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;
        collect(&rows, row_to_ban)
    }

    async fn has_active_ban(&self, user_id: &str) -> Result<bool, ModerationError> {
        Ok(self.active_ban_id(user_id).await?.is_some())
    }

    async fn count_active_bans(&self) -> Result<u64, ModerationError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_bans WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(count as u64)
    }

    async fn insert_ai_log(&self, log: AiModerationLog) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO ai_moderation_logs (
                id, subject_listing_id, subject_user_id, action, input_snapshot,
                result_snapshot, score, is_flagged, processing_time_ms, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&log.id)
        .bind(&log.subject_listing_id)
        .bind(&log.subject_user_id)
        .bind(log.action.as_str())
        .bind(to_json(&log.input_snapshot)?)
        .bind(to_json(&log.result_snapshot)?)
        .bind(log.score)
        .bind(log.is_flagged)
        .bind(i64::try_from(log.processing_time_ms).unwrap_or(i64::MAX))
        .bind(log.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn query_ai_logs(
        &self,
        query: &AiLogQuery,
    ) -> Result<Page<AiModerationLog>, ModerationError> {
        let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        push_ai_log_filters(&mut count_builder, query);
        let count: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT *");
        push_ai_log_filters(&mut builder, query);
        builder.push(" ORDER BY created_at DESC, rowid DESC");
        push_page(&mut builder, query.limit, query.offset);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(Page {
            data: collect(&rows, row_to_ai_log)?,
            count: count as u64,
        })
    }

    async fn upsert_profile(&self, profile: UserProfile) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO profiles (
                id, username, username_lc, full_name, full_name_lc, is_admin, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                username_lc = excluded.username_lc,
                full_name = excluded.full_name,
                full_name_lc = excluded.full_name_lc,
                is_admin = excluded.is_admin
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.username)
        .bind(profile.username.to_lowercase())
        .bind(&profile.full_name)
        .bind(profile.full_name.as_deref().map(str::to_lowercase))
        .bind(profile.is_admin)
        .bind(profile.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn upsert_listing(&self, listing: ListingRef) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO listings (id, title, title_lc, owner_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                title_lc = excluded.title_lc,
                owner_id = excluded.owner_id
            "#,
        )
        .bind(&listing.id)
        .bind(&listing.title)
        .bind(listing.title.to_lowercase())
        .bind(&listing.owner_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn listing_owner(&self, listing_id: &str) -> Result<Option<String>, ModerationError> {
        let owner: Option<String> = sqlx::query_scalar("SELECT owner_id FROM listings WHERE id = ?")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(owner)
    }

    async fn query_users(&self, query: &UserQuery) -> Result<Page<UserSummary>, ModerationError> {
        let mut count_builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*)");
        push_user_filters(&mut count_builder, query);
        let count: i64 = count_builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut builder = QueryBuilder::<Sqlite>::new("SELECT p.*, ");
        builder
            .push(USER_ACTIVE_BAN)
            .push(" AS is_banned, (SELECT COUNT(*) FROM user_warnings w WHERE w.user_id = p.id) AS warning_count");
        push_user_filters(&mut builder, query);
        builder.push(" ORDER BY p.created_at DESC, p.rowid ASC");
        push_page(&mut builder, query.limit, query.offset);

        let rows = builder
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(Page {
            data: collect(&rows, row_to_user_summary)?,
            count: count as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{
        NewReport, ReportFilters, ReportReason, ReportService, ReportSortField, TriageService,
        UserFilters,
    };
    use crate::infra::moderation::fixtures::{fixture_set, BANNED_USER_ID};
    use crate::infra::moderation::InMemoryModerationStore;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn seeded_store() -> (SqliteModerationStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moderation.db");
        let store = SqliteModerationStore::new(path.to_str().unwrap())
            .await
            .unwrap();

        let set = fixture_set();
        for profile in set.profiles {
            store.upsert_profile(profile).await.unwrap();
        }
        for listing in set.listings {
            store.upsert_listing(listing).await.unwrap();
        }
        for report in set.reports {
            store.insert_report(report).await.unwrap();
        }
        for action in set.actions {
            store.append_action(action).await.unwrap();
        }
        for warning in set.warnings {
            store.insert_warning(warning).await.unwrap();
        }
        for ban in set.bans {
            store.insert_ban(ban).await.unwrap();
        }
        for log in set.ai_logs {
            store.insert_ai_log(log).await.unwrap();
        }

        (store, dir)
    }

    #[tokio::test]
    async fn report_round_trips_through_sqlite() {
        let (store, _dir) = seeded_store().await;
        let expected = fixture_set()
            .reports
            .into_iter()
            .find(|r| r.id == "rpt_002")
            .unwrap();

        let stored = store.get_report("rpt_002").await.unwrap().unwrap();
        assert_eq!(stored, expected);
    }

    #[tokio::test]
    async fn filters_and_counts_match_the_fixture_backend() {
        let (store, _dir) = seeded_store().await;
        let query = ReportQuery {
            status: Some(ReportStatus::Pending),
            sort_by: ReportSortField::Priority,
            limit: 2,
            ..Default::default()
        };

        let page = store.query_reports(&query).await.unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].report.id, "rpt_002");
        assert_eq!(page.data[0].listing_title.as_deref(), Some("Rolex Submariner"));
        assert_eq!(page.data[0].reported_username.as_deref(), Some("carlos_m"));
        assert!(page
            .data
            .iter()
            .all(|row| row.report.status == ReportStatus::Pending));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let (store, _dir) = seeded_store().await;
        let query = ReportQuery {
            search: Some("rolex".into()),
            ..Default::default()
        };

        let page = store.query_reports(&query).await.unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.data[0].report.id, "rpt_002");
    }

    #[tokio::test]
    async fn partial_index_refuses_second_active_ban() {
        let (store, _dir) = seeded_store().await;
        let mut ban = fixture_set()
            .bans
            .into_iter()
            .find(|b| b.is_active)
            .unwrap();
        ban.id = "ban_dup".into();

        let err = store.insert_ban(ban).await.unwrap_err();
        match err {
            ModerationError::AlreadyBanned { user_id, ban_id } => {
                assert_eq!(user_id, BANNED_USER_ID);
                assert_eq!(ban_id, "ban_002");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn users_listing_skips_admins() {
        let (store, _dir) = seeded_store().await;

        let page = store.query_users(&UserQuery::default()).await.unwrap();
        assert_eq!(page.count, 5);
        assert!(page.data.iter().all(|u| !u.profile.is_admin));

        let carlos = page.data.iter().find(|u| u.profile.id == "u1").unwrap();
        assert!(!carlos.is_banned);
        assert_eq!(carlos.warning_count, 1);

        let banned = store
            .query_users(&UserQuery {
                banned_only: true,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(banned.count, 1);
        assert_eq!(banned.data[0].profile.id, BANNED_USER_ID);
    }

    #[tokio::test]
    async fn update_of_missing_ban_is_not_found() {
        let (store, _dir) = seeded_store().await;
        let mut ban = fixture_set().bans.remove(0);
        ban.id = "ghost".into();

        let err = store.update_ban(&ban).await.unwrap_err();
        assert!(matches!(err, ModerationError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_decisions_on_one_report_resolve_once() {
        let (store, _dir) = seeded_store().await;
        let service = Arc::new(ReportService::new(Arc::new(store)));

        for i in 0..50 {
            let report = service
                .create(NewReport {
                    subject_listing_id: Some("L1".into()),
                    reported_user_id: Some("u1".into()),
                    reporter_id: Some("u2".into()),
                    reason: ReportReason::Scam,
                    description: format!("race {i}"),
                    ai_result: None,
                    ai_score: None,
                    priority: 1,
                })
                .await
                .unwrap();

            let decide = |status: ReportStatus, moderator: &'static str| {
                let service = service.clone();
                let id = report.id.clone();
                tokio::spawn(async move { service.transition(&id, status, moderator, None).await })
            };
            let approve = decide(ReportStatus::Approved, "mod_a");
            let reject = decide(ReportStatus::Rejected, "mod_b");
            let results = [approve.await.unwrap(), reject.await.unwrap()];

            let succeeded = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(succeeded, 1, "iteration {i}: {results:?}");
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(ModerationError::IllegalTransition { .. }))));
        }
    }

    #[tokio::test]
    async fn stale_update_reports_the_stored_status() {
        let (store, _dir) = seeded_store().await;
        let mut report = store.get_report("rpt_004").await.unwrap().unwrap();
        report.status = ReportStatus::Rejected;

        let err = store
            .update_report_from(&report, ReportStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ModerationError::IllegalTransition {
                from: ReportStatus::Approved,
                to: ReportStatus::Rejected
            }
        ));

        report.id = "ghost".into();
        let err = store
            .update_report_from(&report, ReportStatus::Approved)
            .await
            .unwrap_err();
        assert!(matches!(err, ModerationError::NotFound { .. }));
    }

    fn croatian_report() -> Report {
        let now = Utc::now();
        Report {
            id: "rpt_hr".into(),
            subject_listing_id: Some("L_hr".into()),
            reported_user_id: Some("u_hr".into()),
            reporter_id: Some("u2".into()),
            reason: ReportReason::FakeListing,
            description: "Oglas je lažan".into(),
            ai_result: None,
            ai_score: None,
            status: ReportStatus::Pending,
            priority: 1,
            assigned_moderator_id: None,
            resolution_note: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn non_ascii_search_matches_the_fixture_backend() {
        let (sqlite, _dir) = seeded_store().await;
        let sqlite = Arc::new(sqlite);
        let memory = Arc::new(InMemoryModerationStore::with_fixtures());

        let profile = UserProfile {
            id: "u_hr".into(),
            username: "Šime_Ćorić".into(),
            full_name: Some("Šime Ćorić".into()),
            is_admin: false,
            created_at: Utc::now(),
        };
        let listing = ListingRef {
            id: "L_hr".into(),
            title: "Čamac na prodaju".into(),
            owner_id: "u_hr".into(),
        };
        sqlite.upsert_profile(profile.clone()).await.unwrap();
        sqlite.upsert_listing(listing.clone()).await.unwrap();
        sqlite.insert_report(croatian_report()).await.unwrap();
        memory.upsert_profile(profile).await.unwrap();
        memory.upsert_listing(listing).await.unwrap();
        memory.insert_report(croatian_report()).await.unwrap();

        let sqlite = TriageService::new(sqlite);
        let memory = TriageService::new(memory);

        let users = UserFilters {
            search: Some("ŠIME".into()),
            ..Default::default()
        };
        let from_sqlite = sqlite.get_all_users(&users).await.unwrap();
        let from_memory = memory.get_all_users(&users).await.unwrap();
        assert_eq!(from_memory.count, 1);
        assert_eq!(from_sqlite.count, from_memory.count);
        assert_eq!(from_sqlite.data[0].profile.id, "u_hr");

        for term in ["ČAMAC", "LAŽAN", "ćorić"] {
            let filters = ReportFilters {
                search: Some(term.into()),
                ..Default::default()
            };
            let from_sqlite = sqlite.get_reports(&filters).await.unwrap();
            let from_memory = memory.get_reports(&filters).await.unwrap();
            assert_eq!(from_memory.count, 1, "term {term}");
            assert_eq!(from_sqlite.count, from_memory.count, "term {term}");
            assert_eq!(from_sqlite.data[0].report.id, "rpt_hr");
        }
    }
}
