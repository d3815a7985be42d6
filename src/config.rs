// Runtime configuration, read once at startup.
//
// Everything comes from environment variables (optionally loaded from a
// `.env` file). Bad values fall back to the default with a warning rather
// than stopping the process.

use crate::core::moderation::AutoFlagPolicy;
use std::str::FromStr;

pub const DEFAULT_DATABASE_URL: &str = "data/moderation.db";
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct ModerationConfig {
    /// Fixture store instead of SQLite. Evaluated once, never per call.
    pub use_fixtures: bool,
    pub database_url: String,
    pub auto_flag_queue_capacity: usize,
    pub auto_flag_policy: AutoFlagPolicy,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            use_fixtures: true,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            auto_flag_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            auto_flag_policy: AutoFlagPolicy::default(),
        }
    }
}

impl ModerationConfig {
    pub fn from_env() -> Self {
        // Load environment variables from .env file (if it exists)
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Used by `from_env` and by tests.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let database_url = lookup("MODERATION_DATABASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.database_url);

        let queue_capacity = parse_or(
            &lookup,
            "AUTO_FLAG_QUEUE_CAPACITY",
            defaults.auto_flag_queue_capacity,
        );
        let auto_flag_queue_capacity = if queue_capacity == 0 {
            tracing::warn!("AUTO_FLAG_QUEUE_CAPACITY must be positive, using default");
            DEFAULT_QUEUE_CAPACITY
        } else {
            queue_capacity
        };

        let policy = AutoFlagPolicy {
            score_threshold: parse_score(
                &lookup,
                "AUTO_FLAG_SCORE_THRESHOLD",
                defaults.auto_flag_policy.score_threshold,
            ),
            urgent_score: parse_score(
                &lookup,
                "AUTO_FLAG_URGENT_SCORE",
                defaults.auto_flag_policy.urgent_score,
            ),
        };

        Self {
            use_fixtures: parse_or(&lookup, "MODERATION_USE_FIXTURES", defaults.use_fixtures),
            database_url,
            auto_flag_queue_capacity,
            auto_flag_policy: policy,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value {:?}, using default {:?}", key, raw, default);
            default
        }),
    }
}

fn parse_score(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    let value = parse_or(lookup, key, default);
    if (0.0..=100.0).contains(&value) {
        value
    } else {
        tracing::warn!("{} must be within 0..=100, using default {}", key, default);
        default
    }
}
