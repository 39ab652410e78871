//! Monitoring & Metrics — in-process observability: per-node and
//! per-workflow duration history, threshold-based alert rules.
//!
//! `AlertSeverity`, `AlertRule`, and `WorkflowMetrics`/`NodeMetrics` are
//! idiomatic Rust structs guarded by a single `std::sync::Mutex`, the same
//! style `engine::recovery::RecoveryState` uses.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

const DURATION_HISTORY_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Equal,
}

impl Comparator {
    fn holds(self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterThan => observed > threshold,
            Comparator::LessThan => observed < threshold,
            Comparator::GreaterOrEqual => observed >= threshold,
            Comparator::LessOrEqual => observed <= threshold,
            Comparator::Equal => (observed - threshold).abs() < f64::EPSILON,
        }
    }
}

/// A threshold rule evaluated against a named metric each time it updates.
/// Three defaults are ported from the original monitor: a slow-workflow
/// duration rule, a high node-error-rate rule, and a long-queue-wait rule.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: &'static str,
    pub metric: &'static str,
    pub comparator: Comparator,
    pub threshold: f64,
    pub severity: AlertSeverity,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub rule_name: &'static str,
    pub metric: &'static str,
    pub severity: AlertSeverity,
    pub observed: f64,
    pub threshold: f64,
}

fn default_rules() -> Vec<AlertRule> {
    vec![
        AlertRule {
            name: "slow_workflow",
            metric: "workflow_duration_seconds",
            comparator: Comparator::GreaterThan,
            threshold: 30.0,
            severity: AlertSeverity::Warning,
        },
        AlertRule {
            name: "high_node_error_rate",
            metric: "node_error_rate",
            comparator: Comparator::GreaterThan,
            threshold: 0.25,
            severity: AlertSeverity::Critical,
        },
        AlertRule {
            name: "long_queue_wait",
            metric: "queue_wait_seconds",
            comparator: Comparator::GreaterThan,
            threshold: 5.0,
            severity: AlertSeverity::Info,
        },
    ]
}

/// Running counters and a bounded duration-history ring for a single node
/// id, shared across every execution that touches it — the same
/// last-100-observations ring the scheduler consults for duration
/// estimates.
#[derive(Debug, Default, Clone)]
pub struct NodeMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub errors: u64,
    pub recovered: u64,
    pub durations: Vec<f64>,
}

impl NodeMetrics {
    fn record(&mut self, duration_secs: f64, outcome: NodeOutcome) {
        self.invocations += 1;
        match outcome {
            NodeOutcome::Success => self.successes += 1,
            NodeOutcome::Error => self.errors += 1,
            NodeOutcome::Recovered => self.recovered += 1,
        }
        if self.durations.len() >= DURATION_HISTORY_CAPACITY {
            self.durations.remove(0);
        }
        self.durations.push(duration_secs);
    }

    pub fn error_rate(&self) -> f64 {
        if self.invocations == 0 {
            0.0
        } else {
            self.errors as f64 / self.invocations as f64
        }
    }

    pub fn mean_duration(&self) -> Option<f64> {
        if self.durations.is_empty() {
            None
        } else {
            Some(self.durations.iter().sum::<f64>() / self.durations.len() as f64)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum NodeOutcome {
    Success,
    Error,
    Recovered,
}

/// Per-workflow counters: completed execution count, running total of
/// duration (for a process-lifetime average), and error count.
#[derive(Debug, Default, Clone)]
pub struct WorkflowMetrics {
    pub executions: u64,
    pub errors: u64,
    pub total_duration_secs: f64,
}

impl WorkflowMetrics {
    pub fn mean_duration(&self) -> Option<f64> {
        if self.executions == 0 {
            None
        } else {
            Some(self.total_duration_secs / self.executions as f64)
        }
    }
}

/// Process-lifetime metrics store, one per engine instance. Mutated by the
/// driver (C6) and the scheduler (C5) on every node/execution completion.
pub struct MetricsRegistry {
    nodes: Mutex<HashMap<String, NodeMetrics>>,
    workflows: Mutex<HashMap<uuid::Uuid, WorkflowMetrics>>,
    alerts: Mutex<Vec<Alert>>,
    rules: Vec<AlertRule>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            workflows: Mutex::new(HashMap::new()),
            alerts: Mutex::new(Vec::new()),
            rules: default_rules(),
        }
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_node(&self, node_id: &str, duration_secs: f64, outcome: NodeOutcome) {
        let mut nodes = self.nodes.lock().unwrap();
        let entry = nodes.entry(node_id.to_string()).or_default();
        entry.record(duration_secs, outcome);
        let error_rate = entry.error_rate();
        drop(nodes);
        self.evaluate_rule("node_error_rate", error_rate);
    }

    pub fn record_workflow(&self, workflow_id: uuid::Uuid, duration_secs: f64, errored: bool) {
        let mut workflows = self.workflows.lock().unwrap();
        let entry = workflows.entry(workflow_id).or_default();
        entry.executions += 1;
        entry.total_duration_secs += duration_secs;
        if errored {
            entry.errors += 1;
        }
        drop(workflows);
        self.evaluate_rule("workflow_duration_seconds", duration_secs);
    }

    pub fn record_queue_wait(&self, wait_secs: f64) {
        self.evaluate_rule("queue_wait_seconds", wait_secs);
    }

    fn evaluate_rule(&self, metric: &str, observed: f64) {
        for rule in &self.rules {
            if rule.metric != metric {
                continue;
            }
            if rule.comparator.holds(observed, rule.threshold) {
                self.alerts.lock().unwrap().push(Alert {
                    rule_name: rule.name,
                    metric: rule.metric,
                    severity: rule.severity,
                    observed,
                    threshold: rule.threshold,
                });
            }
        }
    }

    pub fn node_snapshot(&self, node_id: &str) -> Option<NodeMetrics> {
        self.nodes.lock().unwrap().get(node_id).cloned()
    }

    pub fn workflow_snapshot(&self, workflow_id: uuid::Uuid) -> Option<WorkflowMetrics> {
        self.workflows.lock().unwrap().get(&workflow_id).cloned()
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let alerts = self.alerts.lock().unwrap();
        alerts.iter().rev().take(limit).cloned().collect()
    }

    pub fn duration_history(&self, node_id: &str) -> Vec<f64> {
        self.nodes
            .lock()
            .unwrap()
            .get(node_id)
            .map(|m| m.durations.clone())
            .unwrap_or_default()
    }

    pub fn clear_alerts(&self) {
        self.alerts.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_error_rate_computed_over_invocations() {
        let registry = MetricsRegistry::new();
        registry.record_node("n1", 0.1, NodeOutcome::Success);
        registry.record_node("n1", 0.1, NodeOutcome::Error);
        let snap = registry.node_snapshot("n1").unwrap();
        assert_eq!(snap.error_rate(), 0.5);
    }

    #[test]
    fn high_error_rate_fires_alert() {
        let registry = MetricsRegistry::new();
        for _ in 0..3 {
            registry.record_node("n1", 0.1, NodeOutcome::Error);
        }
        let alerts = registry.recent_alerts(10);
        assert!(alerts.iter().any(|a| a.rule_name == "high_node_error_rate"));
    }

    #[test]
    fn slow_workflow_fires_alert() {
        let registry = MetricsRegistry::new();
        registry.record_workflow(uuid::Uuid::new_v4(), 45.0, false);
        let alerts = registry.recent_alerts(10);
        assert!(alerts.iter().any(|a| a.rule_name == "slow_workflow"));
    }

    #[test]
    fn duration_history_is_bounded() {
        let registry = MetricsRegistry::new();
        for i in 0..(DURATION_HISTORY_CAPACITY + 5) {
            registry.record_node("n1", i as f64, NodeOutcome::Success);
        }
        assert_eq!(registry.duration_history("n1").len(), DURATION_HISTORY_CAPACITY);
    }
}
