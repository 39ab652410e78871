//! Error recovery — retry policy, circuit breaking, and the bounded error
//! history that feeds [`crate::metrics`].
//!
//! Generalises a single fixed backoff into a full per-[`nodes::ErrorKind`]
//! policy table, with a `WorkflowError`/retry state machine driving it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use nodes::ErrorKind;
use rand::Rng;
use serde_json::Value;

use crate::models::CircuitBreakerState;

const ERROR_HISTORY_CAPACITY: usize = 1000;
const BREAKER_FAILURE_THRESHOLD: u32 = 5;
const BREAKER_OPEN_SECONDS: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Retry,
    SkipNode,
    UseFallback,
    UseCachedResult,
    UseDefaultValue,
    FailFast,
    Rollback,
    CircuitBreak,
}

impl RecoveryStrategy {
    pub fn name(self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::SkipNode => "skip_node",
            RecoveryStrategy::UseFallback => "use_fallback",
            RecoveryStrategy::UseCachedResult => "use_cached_result",
            RecoveryStrategy::UseDefaultValue => "use_default_value",
            RecoveryStrategy::FailFast => "fail_fast",
            RecoveryStrategy::Rollback => "rollback",
            RecoveryStrategy::CircuitBreak => "circuit_break",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "retry" => RecoveryStrategy::Retry,
            "skip_node" => RecoveryStrategy::SkipNode,
            "use_fallback" => RecoveryStrategy::UseFallback,
            "use_cached_result" => RecoveryStrategy::UseCachedResult,
            "use_default_value" => RecoveryStrategy::UseDefaultValue,
            "fail_fast" => RecoveryStrategy::FailFast,
            "rollback" => RecoveryStrategy::Rollback,
            "circuit_break" => RecoveryStrategy::CircuitBreak,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    ExponentialBackoff,
    LinearBackoff,
    FixedDelay,
    Immediate,
    NoRetry,
}

impl BackoffStrategy {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "exponential_backoff" => BackoffStrategy::ExponentialBackoff,
            "linear_backoff" => BackoffStrategy::LinearBackoff,
            "fixed_delay" => BackoffStrategy::FixedDelay,
            "immediate" => BackoffStrategy::Immediate,
            "no_retry" => BackoffStrategy::NoRetry,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub strategy: BackoffStrategy,
    pub max_retries: u32,
    pub initial_delay: f64,
    pub max_delay: f64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub timeout_multiplier: f64,
}

/// Per-node circuit breaker tuning, read from `node.config.recovery` and
/// defaulting to the same values every node got before these were
/// configurable (5 failures / 60s open).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_seconds: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: BREAKER_FAILURE_THRESHOLD,
            open_seconds: BREAKER_OPEN_SECONDS,
        }
    }
}

/// Default per-[`ErrorKind`] policy. Node-level
/// overrides live in `config.recovery` and are merged over these defaults
/// by [`RecoveryPolicy::for_node`].
fn default_policy(kind: ErrorKind) -> (RecoveryStrategy, RetryConfig) {
    let retry = |strategy, max_retries, initial_delay, max_delay, multiplier| RetryConfig {
        strategy,
        max_retries,
        initial_delay,
        max_delay,
        backoff_multiplier: multiplier,
        jitter: true,
        timeout_multiplier: 1.5,
    };

    match kind {
        ErrorKind::Timeout => (
            RecoveryStrategy::Retry,
            retry(BackoffStrategy::LinearBackoff, 3, 2.0, 20.0, 1.0),
        ),
        ErrorKind::Network => (
            RecoveryStrategy::Retry,
            retry(BackoffStrategy::ExponentialBackoff, 5, 1.0, 30.0, 2.0),
        ),
        ErrorKind::Resource => (
            RecoveryStrategy::Retry,
            retry(BackoffStrategy::LinearBackoff, 3, 5.0, 60.0, 1.0),
        ),
        ErrorKind::Dependency => (
            RecoveryStrategy::UseFallback,
            retry(BackoffStrategy::FixedDelay, 1, 1.0, 1.0, 1.0),
        ),
        ErrorKind::Data => (
            RecoveryStrategy::UseDefaultValue,
            retry(BackoffStrategy::Immediate, 1, 0.0, 0.0, 1.0),
        ),
        ErrorKind::Validation => (
            RecoveryStrategy::FailFast,
            retry(BackoffStrategy::NoRetry, 0, 0.0, 0.0, 1.0),
        ),
        ErrorKind::Execution => (
            RecoveryStrategy::Retry,
            retry(BackoffStrategy::FixedDelay, 2, 1.0, 1.0, 1.0),
        ),
        ErrorKind::Configuration => (
            RecoveryStrategy::UseDefaultValue,
            retry(BackoffStrategy::NoRetry, 0, 0.0, 0.0, 1.0),
        ),
        ErrorKind::Permission => (
            RecoveryStrategy::FailFast,
            retry(BackoffStrategy::NoRetry, 0, 0.0, 0.0, 1.0),
        ),
        ErrorKind::Quota => (
            RecoveryStrategy::CircuitBreak,
            retry(BackoffStrategy::ExponentialBackoff, 2, 30.0, 60.0, 2.0),
        ),
    }
}

/// The fallback payload surfaced when a policy gives up (retry exhaustion,
/// `use_fallback`/`use_default_value`/`use_cached_result`/`skip_node`, or a
/// `circuit_break` policy whose retries are exhausted rather than an
/// already-open breaker). Per-`ErrorKind` shapes from the default policy
/// table; every payload carries `success: false`.
pub fn default_fallback(kind: ErrorKind, message: &str) -> Value {
    let mut payload = match kind {
        ErrorKind::Dependency => serde_json::json!({"error": "dependency_unavailable", "data": null}),
        ErrorKind::Data => serde_json::json!({"error": "data_format_error", "data": {}}),
        ErrorKind::Configuration => serde_json::json!({"error": "config_error", "data": {}}),
        _ => serde_json::json!({"error": message, "data": null}),
    };
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("success".into(), Value::Bool(false));
    }
    payload
}

/// The fallback surfaced when an *already open* circuit breaker
/// short-circuits the call without invoking the node runtime at all.
pub fn circuit_open_fallback(message: &str) -> Value {
    serde_json::json!({"error": message, "data": null, "success": false})
}

/// Parse a per-node recovery override from `node.config.recovery`, falling
/// back to the default per-[`ErrorKind`] policy when absent or malformed.
/// Shape: `{"strategy": "retry", "backoff": "exponential_backoff",
/// "max_retries": 5, "initial_delay": 1.0, "max_delay": 30.0,
/// "backoff_multiplier": 2.0, "jitter": true, "timeout_multiplier": 1.0}`.
pub fn parse_node_recovery_override(config: &Value) -> Option<(RecoveryStrategy, RetryConfig)> {
    let cfg = config.get("recovery")?.as_object()?;
    let strategy = cfg.get("strategy")?.as_str().and_then(RecoveryStrategy::from_name)?;
    let backoff = cfg
        .get("backoff")
        .and_then(|v| v.as_str())
        .and_then(BackoffStrategy::from_name)
        .unwrap_or(BackoffStrategy::FixedDelay);
    let f = |key: &str, default: f64| cfg.get(key).and_then(|v| v.as_f64()).unwrap_or(default);
    let retry = RetryConfig {
        strategy: backoff,
        max_retries: cfg.get("max_retries").and_then(|v| v.as_u64()).unwrap_or(1) as u32,
        initial_delay: f("initial_delay", 1.0),
        max_delay: f("max_delay", 30.0),
        backoff_multiplier: f("backoff_multiplier", 2.0),
        jitter: cfg.get("jitter").and_then(|v| v.as_bool()).unwrap_or(true),
        timeout_multiplier: f("timeout_multiplier", 1.0),
    };
    Some((strategy, retry))
}

/// Parse per-node circuit breaker tuning from `node.config.recovery`,
/// independent of whether that object also carries a full strategy
/// override — a node can raise or lower `circuit_breaker_threshold`/
/// `circuit_breaker_timeout` while still using the default per-[`ErrorKind`]
/// strategy. Missing keys, a missing `recovery` object, or a non-object
/// value all fall back to [`BreakerConfig::default`].
pub fn parse_breaker_config(config: &Value) -> BreakerConfig {
    let Some(cfg) = config.get("recovery").and_then(|v| v.as_object()) else {
        return BreakerConfig::default();
    };
    let default = BreakerConfig::default();
    BreakerConfig {
        failure_threshold: cfg
            .get("circuit_breaker_threshold")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(default.failure_threshold),
        open_seconds: cfg
            .get("circuit_breaker_timeout")
            .and_then(|v| v.as_f64())
            .unwrap_or(default.open_seconds),
    }
}

/// The error/attempt carrier surfaced to callers and logged into history.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowError {
    pub message: String,
    pub kind: String,
    pub node_id: String,
    pub step_id: Option<uuid::Uuid>,
    pub recoverable: bool,
    pub retry_after: Option<f64>,
    pub context: Value,
}

pub fn delay_for_attempt(retry: &RetryConfig, attempt: u32) -> Duration {
    let raw = match retry.strategy {
        BackoffStrategy::ExponentialBackoff => {
            retry.initial_delay * retry.backoff_multiplier.powi(attempt as i32)
        }
        BackoffStrategy::LinearBackoff => retry.initial_delay * (attempt as f64 + 1.0),
        BackoffStrategy::FixedDelay => retry.initial_delay,
        BackoffStrategy::Immediate | BackoffStrategy::NoRetry => 0.0,
    };
    let clamped = raw.min(retry.max_delay).max(0.0);
    let jittered = if retry.jitter && clamped > 0.0 {
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        clamped * factor
    } else {
        clamped
    };
    Duration::from_secs_f64(jittered)
}

/// Per-node circuit breaker state plus a bounded, shared error history.
/// One instance lives for the whole engine process (shared across
/// executions), with the same process-lifetime scope as the node registry.
pub struct RecoveryState {
    breakers: Mutex<HashMap<String, CircuitBreakerState>>,
    retry_counts: Mutex<HashMap<(uuid::Uuid, String), u32>>,
    history: Mutex<VecDeque<WorkflowError>>,
}

impl Default for RecoveryState {
    fn default() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            retry_counts: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(ERROR_HISTORY_CAPACITY)),
        }
    }
}

impl RecoveryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the breaker isn't open; `Some(seconds_remaining)` when a
    /// call should be short-circuited without being attempted.
    pub fn breaker_block(&self, node_id: &str, now_unix: f64, breaker: &BreakerConfig) -> Option<f64> {
        let breakers = self.breakers.lock().unwrap();
        let state = breakers.get(node_id)?;
        if !state.is_open {
            return None;
        }
        let opened_at = state.last_failure_time?;
        let elapsed = now_unix - opened_at;
        if elapsed >= breaker.open_seconds {
            // Half-open: the next call is allowed to probe.
            None
        } else {
            Some(breaker.open_seconds - elapsed)
        }
    }

    pub fn record_success(&self, node_id: &str) {
        let mut breakers = self.breakers.lock().unwrap();
        let state = breakers.entry(node_id.to_string()).or_default();
        state.success_count += 1;
        state.total_calls += 1;
        state.failure_count = 0;
        state.is_open = false;
    }

    pub fn record_failure(&self, node_id: &str, now_unix: f64, breaker: &BreakerConfig) -> bool {
        let mut breakers = self.breakers.lock().unwrap();
        let state = breakers.entry(node_id.to_string()).or_default();
        state.failure_count += 1;
        state.total_calls += 1;
        state.last_failure_time = Some(now_unix);
        if state.failure_count >= breaker.failure_threshold {
            state.is_open = true;
        }
        state.is_open
    }

    pub fn reset_breaker(&self, node_id: &str) {
        self.breakers.lock().unwrap().remove(node_id);
    }

    pub fn reset_all_breakers(&self) {
        self.breakers.lock().unwrap().clear();
    }

    pub fn next_attempt(&self, execution_id: uuid::Uuid, node_id: &str) -> u32 {
        let mut counts = self.retry_counts.lock().unwrap();
        let entry = counts.entry((execution_id, node_id.to_string())).or_insert(0);
        let attempt = *entry;
        *entry += 1;
        attempt
    }

    pub fn clear_retry_counts(&self, execution_id: uuid::Uuid) {
        self.retry_counts
            .lock()
            .unwrap()
            .retain(|(eid, _), _| *eid != execution_id);
    }

    pub fn push_history(&self, error: WorkflowError) {
        let mut history = self.history.lock().unwrap();
        if history.len() >= ERROR_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(error);
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    pub fn recent_history(&self, limit: usize) -> Vec<WorkflowError> {
        let history = self.history.lock().unwrap();
        history.iter().rev().take(limit).cloned().collect()
    }
}

/// The decision the handler loop takes for a single failed attempt.
pub enum RecoveryDecision {
    /// Sleep `delay`, then retry the node.
    RetryAfter(Duration),
    /// Give up and run `fallback_key`'s policy-specific terminal behaviour.
    Give(RecoveryStrategy),
}

/// One step of the recovery handler loop: classify, consult policy +
/// circuit breaker, decide whether to retry again or surface a terminal
/// strategy. Callers loop this until a terminal decision is reached; the
/// bound is the policy's own `max_retries` — executed attempts must never
/// exceed `max_retries + 1`, so the attempt budget is never clamped below
/// what the policy grants (a `network` node with a 5-retry policy must be
/// able to reach 5 attempts).
pub fn decide(
    state: &RecoveryState,
    node_id: &str,
    execution_id: uuid::Uuid,
    kind: ErrorKind,
    node_override: Option<(RecoveryStrategy, RetryConfig)>,
    breaker: &BreakerConfig,
    now_unix: f64,
) -> RecoveryDecision {
    let (strategy, retry) = node_override.unwrap_or_else(|| default_policy(kind));

    if strategy == RecoveryStrategy::CircuitBreak {
        let is_open = state.record_failure(node_id, now_unix, breaker);
        if is_open {
            return RecoveryDecision::Give(RecoveryStrategy::CircuitBreak);
        }
    }

    let attempt = state.next_attempt(execution_id, node_id);
    if attempt >= retry.max_retries || retry.strategy == BackoffStrategy::NoRetry {
        return RecoveryDecision::Give(strategy);
    }

    RecoveryDecision::RetryAfter(delay_for_attempt(&retry, attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_grows_and_clamps() {
        let retry = RetryConfig {
            strategy: BackoffStrategy::ExponentialBackoff,
            max_retries: 5,
            initial_delay: 1.0,
            max_delay: 3.0,
            backoff_multiplier: 2.0,
            jitter: false,
            timeout_multiplier: 1.0,
        };
        assert_eq!(delay_for_attempt(&retry, 0), Duration::from_secs_f64(1.0));
        assert_eq!(delay_for_attempt(&retry, 1), Duration::from_secs_f64(2.0));
        // 1 * 2^2 = 4, clamped to max_delay = 3.0
        assert_eq!(delay_for_attempt(&retry, 2), Duration::from_secs_f64(3.0));
    }

    #[test]
    fn linear_backoff_scales_with_attempt_number() {
        let retry = RetryConfig {
            strategy: BackoffStrategy::LinearBackoff,
            max_retries: 5,
            initial_delay: 2.0,
            max_delay: 100.0,
            backoff_multiplier: 1.0,
            jitter: false,
            timeout_multiplier: 1.0,
        };
        assert_eq!(delay_for_attempt(&retry, 0), Duration::from_secs_f64(2.0));
        assert_eq!(delay_for_attempt(&retry, 2), Duration::from_secs_f64(6.0));
    }

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let state = RecoveryState::new();
        let breaker = BreakerConfig::default();
        for _ in 0..BREAKER_FAILURE_THRESHOLD - 1 {
            assert!(!state.record_failure("n1", 0.0, &breaker));
        }
        assert!(state.record_failure("n1", 0.0, &breaker));
        assert!(state.breaker_block("n1", 1.0, &breaker).is_some());
    }

    #[test]
    fn breaker_half_opens_after_timeout_elapses() {
        let state = RecoveryState::new();
        let breaker = BreakerConfig::default();
        for _ in 0..BREAKER_FAILURE_THRESHOLD {
            state.record_failure("n1", 0.0, &breaker);
        }
        assert!(state.breaker_block("n1", BREAKER_OPEN_SECONDS + 1.0, &breaker).is_none());
    }

    #[test]
    fn success_resets_failure_count() {
        let state = RecoveryState::new();
        let breaker = BreakerConfig::default();
        state.record_failure("n1", 0.0, &breaker);
        state.record_success("n1");
        assert!(state.breaker_block("n1", 0.0, &breaker).is_none());
    }

    /// Seed case 4 (§8): a node configured with `circuit_breaker_threshold: 3`
    /// must open its breaker after 3 failures, not the default 5.
    #[test]
    fn configured_threshold_opens_breaker_earlier_than_the_default() {
        let state = RecoveryState::new();
        let breaker = BreakerConfig { failure_threshold: 3, open_seconds: 60.0 };
        assert!(!state.record_failure("n1", 0.0, &breaker));
        assert!(!state.record_failure("n1", 0.0, &breaker));
        assert!(state.record_failure("n1", 0.0, &breaker));
        assert!(state.breaker_block("n1", 1.0, &breaker).is_some());
    }

    #[test]
    fn parse_breaker_config_reads_overrides_and_falls_back_to_defaults() {
        let cfg = serde_json::json!({
            "recovery": {"circuit_breaker_threshold": 3, "circuit_breaker_timeout": 10.0}
        });
        let breaker = parse_breaker_config(&cfg);
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.open_seconds, 10.0);

        let default = parse_breaker_config(&Value::Null);
        assert_eq!(default.failure_threshold, BREAKER_FAILURE_THRESHOLD);
        assert_eq!(default.open_seconds, BREAKER_OPEN_SECONDS);
    }

    #[test]
    fn history_is_bounded_to_capacity() {
        let state = RecoveryState::new();
        for i in 0..(ERROR_HISTORY_CAPACITY + 10) {
            state.push_history(WorkflowError {
                message: format!("err {i}"),
                kind: "execution".into(),
                node_id: "n1".into(),
                step_id: None,
                recoverable: true,
                retry_after: None,
                context: Value::Null,
            });
        }
        assert_eq!(state.recent_history(usize::MAX).len(), ERROR_HISTORY_CAPACITY);
    }
}
