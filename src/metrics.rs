use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Label used for requests no rule matched.
pub const UNMATCHED: &str = "unmatched";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleMetrics {
    pub total_requests: u64,
    pub immediate_admissions: u64,
    pub deferred_admissions: u64,
    pub retried_responses: u64,
}

/// Per-rule admission and retry counters, shared across clones.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    rule_metrics: Arc<RwLock<HashMap<String, ThrottleMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an admission decision for `rule`.
    pub fn record_admission(&self, rule: &str, immediate: bool) {
        let mut metrics = self.rule_metrics.write();
        let rule_metrics = metrics.entry(rule.to_string()).or_default();

        rule_metrics.total_requests += 1;
        if immediate {
            rule_metrics.immediate_admissions += 1;
        } else {
            rule_metrics.deferred_admissions += 1;
        }
    }

    /// Record that a response for `rule` was scheduled for resubmission.
    pub fn record_retry(&self, rule: &str) {
        let mut metrics = self.rule_metrics.write();
        metrics.entry(rule.to_string()).or_default().retried_responses += 1;
    }

    pub fn get_rule_metrics(&self, rule: &str) -> Option<ThrottleMetrics> {
        self.rule_metrics.read().get(rule).cloned()
    }

    pub fn get_all_metrics(&self) -> HashMap<String, ThrottleMetrics> {
        self.rule_metrics.read().clone()
    }

    pub fn reset_rule_metrics(&self, rule: &str) {
        if let Some(rule_metrics) = self.rule_metrics.write().get_mut(rule) {
            *rule_metrics = ThrottleMetrics::default();
        }
    }

    pub fn get_global_metrics(&self) -> ThrottleMetrics {
        let metrics = self.rule_metrics.read();
        let mut global = ThrottleMetrics::default();

        for rule_metrics in metrics.values() {
            global.total_requests += rule_metrics.total_requests;
            global.immediate_admissions += rule_metrics.immediate_admissions;
            global.deferred_admissions += rule_metrics.deferred_admissions;
            global.retried_responses += rule_metrics.retried_responses;
        }

        global
    }
}
