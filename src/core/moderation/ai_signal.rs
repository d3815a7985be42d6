// AI signal normalizer.
//
// The external AI collaborator returns a loosely shaped JSON object whose
// fields depend on the analysis (content check, duplicate check, trust check).
// Any field may be missing or carry the wrong type; we read what is there and
// ignore the rest.

use serde_json::Value;

/// Normalized signal extracted from one AI analysis result.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AiSignal {
    /// Safety/trust score clamped to 0..=100, if the model produced one.
    pub score: Option<f64>,
    pub is_blocked: bool,
    pub is_duplicate: bool,
    /// Whether the result crosses the auto-flag line.
    pub flagged: bool,
    /// Best human-readable explanation found in the payload.
    pub reason_hint: Option<String>,
    pub confidence: Option<f64>,
    pub recommendation: Option<String>,
    pub level: Option<String>,
}

/// Extract an [`AiSignal`] from a raw result.
///
/// `flagged` is `score < score_threshold || isBlocked || isDuplicate`.
pub fn normalize(result: &Value, score_threshold: f64) -> AiSignal {
    let score = number(result, &["score", "safetyScore", "trustScore"]).map(|s| s.clamp(0.0, 100.0));
    let is_blocked = flag(result, &["isBlocked", "is_blocked"]);
    let is_duplicate = flag(result, &["isDuplicate", "is_duplicate"]);

    let flagged = score.is_some_and(|s| s < score_threshold) || is_blocked || is_duplicate;

    AiSignal {
        score,
        is_blocked,
        is_duplicate,
        flagged,
        reason_hint: reason_hint(result),
        confidence: number(result, &["confidence"]),
        recommendation: text(result, &["recommendation"]),
        level: text(result, &["level"]),
    }
}

/// First non-empty of: `reason`, joined `warnings`, joined `blockedReasons`.
fn reason_hint(result: &Value) -> Option<String> {
    text(result, &["reason"])
        .or_else(|| joined(result, &["warnings"]))
        .or_else(|| joined(result, &["blockedReasons", "blocked_reasons"]))
}

fn lookup<'a>(result: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| result.get(*key))
}

fn number(result: &Value, keys: &[&str]) -> Option<f64> {
    lookup(result, keys)
        .and_then(Value::as_f64)
        .filter(|n| n.is_finite())
}

fn flag(result: &Value, keys: &[&str]) -> bool {
    lookup(result, keys).and_then(Value::as_bool).unwrap_or(false)
}

fn text(result: &Value, keys: &[&str]) -> Option<String> {
    lookup(result, keys)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn joined(result: &Value, keys: &[&str]) -> Option<String> {
    let items: Vec<&str> = lookup(result, keys)?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        None
    } else {
        Some(items.join(", "))
    }
}
