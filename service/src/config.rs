use chrono::Duration;
use chrono_tz::Tz;
use url::Url;

/// All tunables of the orchestration core, gathered from the environment
/// once at startup. Every TTL, window, and sweep period is independent; a
/// value that fails to parse falls back to its default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Lock TTL for a running run. No heartbeat for this long ⇒ the lock
    /// reaper force-releases it.
    pub lock_ttl: Duration,
    /// Broader staleness bound for any running run, lock recorded or not.
    pub run_stale_ttl: Duration,
    /// How long post-submission verification keeps polling the platform.
    pub verify_window: Duration,
    pub verify_poll_interval: Duration,
    /// Lifetime the execution platform should honor an idempotency key for.
    pub idempotency_key_ttl: Duration,
    /// Queued runs older than this with a correlation id are re-evaluated.
    pub stale_queued_max_age: Duration,
    /// Dispatch attempts per logical unit of work before permanent failure.
    pub stale_queued_max_attempts: i64,
    /// Approved proposals unchanged for this long count as stuck.
    pub decision_stuck_after: Duration,
    /// Cases parked in a human-attention status for this long with no open
    /// proposal get a fallback proposal.
    pub orphan_after: Duration,
    /// Inbound activity newer than this keeps the deadline sweep away.
    pub recent_activity_window: Duration,
    /// Classifier confidence below this is treated as no intent.
    pub min_intent_confidence: f64,
    /// Pause between follow-up cycles once one dispatches.
    pub follow_up_cadence: Duration,
    /// Consecutive follow-up errors before a schedule is marked failed.
    pub follow_up_max_errors: i32,
    /// Bound on rows any single sweep pass will touch.
    pub sweep_batch_limit: i64,
    /// Wall-clock timezone for per-cycle scheduled keys.
    pub sweep_timezone: Tz,

    pub follow_up_sweep_period: std::time::Duration,
    pub deadline_sweep_period: std::time::Duration,
    pub orphan_sweep_period: std::time::Duration,
    pub stuck_decision_sweep_period: std::time::Duration,
    pub stale_queued_sweep_period: std::time::Duration,
    pub stuck_locks_sweep_period: std::time::Duration,
    pub stale_runs_sweep_period: std::time::Duration,

    pub platform_base_url: Url,
    pub platform_token: Option<String>,
    pub notify_webhook_url: Option<Url>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            lock_ttl: minutes_env("LOCK_TTL_MINUTES", 30),
            run_stale_ttl: minutes_env("RUN_STALE_TTL_MINUTES", 120),
            verify_window: seconds_env("VERIFY_WINDOW_SECONDS", 90),
            verify_poll_interval: seconds_env("VERIFY_POLL_INTERVAL_SECONDS", 5),
            idempotency_key_ttl: minutes_env("IDEMPOTENCY_KEY_TTL_MINUTES", 24 * 60),
            stale_queued_max_age: minutes_env("STALE_QUEUED_MAX_AGE_MINUTES", 10),
            stale_queued_max_attempts: int_env("STALE_QUEUED_MAX_ATTEMPTS", 3),
            decision_stuck_after: minutes_env("DECISION_STUCK_AFTER_MINUTES", 5),
            orphan_after: minutes_env("ORPHAN_AFTER_MINUTES", 24 * 60),
            recent_activity_window: minutes_env("RECENT_ACTIVITY_WINDOW_MINUTES", 72 * 60),
            min_intent_confidence: float_env("MIN_INTENT_CONFIDENCE", 0.6),
            follow_up_cadence: minutes_env("FOLLOW_UP_CADENCE_MINUTES", 7 * 24 * 60),
            follow_up_max_errors: int_env("FOLLOW_UP_MAX_ERRORS", 3) as i32,
            sweep_batch_limit: int_env("SWEEP_BATCH_LIMIT", 25),
            sweep_timezone: tz_env("SWEEP_TIMEZONE", chrono_tz::America::New_York),

            follow_up_sweep_period: period_env("FOLLOW_UP_SWEEP_SECONDS", 300),
            deadline_sweep_period: period_env("DEADLINE_SWEEP_SECONDS", 3600),
            orphan_sweep_period: period_env("ORPHAN_SWEEP_SECONDS", 6 * 3600),
            stuck_decision_sweep_period: period_env("STUCK_DECISION_SWEEP_SECONDS", 120),
            stale_queued_sweep_period: period_env("STALE_QUEUED_SWEEP_SECONDS", 300),
            stuck_locks_sweep_period: period_env("STUCK_LOCKS_SWEEP_SECONDS", 300),
            stale_runs_sweep_period: period_env("STALE_RUNS_SWEEP_SECONDS", 1800),

            platform_base_url: url_env("PLATFORM_BASE_URL", "http://localhost:4100"),
            platform_token: std::env::var("PLATFORM_TOKEN").ok().filter(|t| !t.is_empty()),
            notify_webhook_url: std::env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .and_then(|raw| Url::parse(&raw).ok()),
        }
    }
}

fn int_env(var: &str, default: i64) -> i64 {
    parse_int(std::env::var(var).ok().as_deref(), default)
}

fn float_env(var: &str, default: f64) -> f64 {
    parse_float(std::env::var(var).ok().as_deref(), default)
}

fn minutes_env(var: &str, default: i64) -> Duration {
    Duration::minutes(int_env(var, default))
}

fn seconds_env(var: &str, default: i64) -> Duration {
    Duration::seconds(int_env(var, default))
}

fn period_env(var: &str, default: u64) -> std::time::Duration {
    let secs = parse_int(std::env::var(var).ok().as_deref(), default as i64);
    std::time::Duration::from_secs(secs.max(1) as u64)
}

fn tz_env(var: &str, default: Tz) -> Tz {
    std::env::var(var)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn url_env(var: &str, default: &str) -> Url {
    std::env::var(var)
        .ok()
        .and_then(|raw| Url::parse(&raw).ok())
        .unwrap_or_else(|| Url::parse(default).expect("default url is valid"))
}

fn parse_int(raw: Option<&str>, default: i64) -> i64 {
    raw.and_then(|v| v.trim().parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn parse_float(raw: Option<&str>, default: f64) -> f64 {
    raw.and_then(|v| v.trim().parse().ok())
        .filter(|v| (0.0..=1.0).contains(v))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::{parse_float, parse_int};

    #[test]
    fn int_parsing_falls_back_on_garbage() {
        assert_eq!(parse_int(Some("45"), 30), 45);
        assert_eq!(parse_int(Some(" 45 "), 30), 45);
        assert_eq!(parse_int(Some("fast"), 30), 30);
        assert_eq!(parse_int(Some("-5"), 30), 30);
        assert_eq!(parse_int(Some("0"), 30), 30);
        assert_eq!(parse_int(None, 30), 30);
    }

    #[test]
    fn float_parsing_requires_unit_interval() {
        assert_eq!(parse_float(Some("0.8"), 0.6), 0.8);
        assert_eq!(parse_float(Some("1.5"), 0.6), 0.6);
        assert_eq!(parse_float(Some("nope"), 0.6), 0.6);
        assert_eq!(parse_float(None, 0.6), 0.6);
    }
}
