//! Observability for the adaptation loop
//!
//! Prometheus metrics (cycle counts and latency, health score, knowledge
//! growth) and a structured event logger on top of tracing.

use prometheus::{
    register_gauge_vec, register_histogram, register_int_gauge, register_int_gauge_vec,
    GaugeVec, Histogram, IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle durations (seconds); cycles include the
/// stabilization wait, so the tail is long
const CYCLE_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 45.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<LoopMetricsInner> = OnceLock::new();

struct LoopMetricsInner {
    cycle_duration_seconds: Histogram,
    cycles_by_status: IntGaugeVec,
    adaptations_total: IntGauge,
    adaptations_successful: IntGauge,
    service_health_score: GaugeVec,
    patterns_known: IntGauge,
    value_table_entries: IntGauge,
    execution_errors: IntGauge,
}

impl LoopMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "aware_cycle_duration_seconds",
                "Wall-clock duration of one adaptation cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            cycles_by_status: register_int_gauge_vec!(
                "aware_cycles_total",
                "Adaptation cycles by terminal status",
                &["status"]
            )
            .expect("Failed to register cycles_total"),

            adaptations_total: register_int_gauge!(
                "aware_adaptations_total",
                "Total adaptation actions executed"
            )
            .expect("Failed to register adaptations_total"),

            adaptations_successful: register_int_gauge!(
                "aware_adaptations_successful_total",
                "Adaptation cycles whose reflection judged them successful"
            )
            .expect("Failed to register adaptations_successful_total"),

            service_health_score: register_gauge_vec!(
                "aware_service_health_score",
                "Latest assessed health score per service",
                &["service"]
            )
            .expect("Failed to register service_health_score"),

            patterns_known: register_int_gauge!(
                "aware_patterns_known",
                "Promoted patterns currently in the knowledge store"
            )
            .expect("Failed to register patterns_known"),

            value_table_entries: register_int_gauge!(
                "aware_value_table_entries",
                "State-action pairs in the learned value table"
            )
            .expect("Failed to register value_table_entries"),

            execution_errors: register_int_gauge!(
                "aware_execution_errors_total",
                "Control-plane actions that failed or timed out"
            )
            .expect("Failed to register execution_errors_total"),
        }
    }
}

/// Lightweight handle to the global loop metrics
#[derive(Clone)]
pub struct LoopMetrics {
    _private: (),
}

impl Default for LoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(LoopMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &LoopMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn inc_cycle(&self, status: &str) {
        self.inner().cycles_by_status.with_label_values(&[status]).inc();
    }

    pub fn inc_adaptations(&self, executed: usize) {
        self.inner().adaptations_total.add(executed as i64);
    }

    pub fn inc_successful_adaptation(&self) {
        self.inner().adaptations_successful.inc();
    }

    pub fn set_health_score(&self, service: &str, score: f64) {
        self.inner().service_health_score.with_label_values(&[service]).set(score);
    }

    pub fn set_knowledge_sizes(&self, patterns: usize, values: usize) {
        self.inner().patterns_known.set(patterns as i64);
        self.inner().value_table_entries.set(values as i64);
    }

    pub fn inc_execution_errors(&self, count: usize) {
        self.inner().execution_errors.add(count as i64);
    }
}

/// Consistent event-shaped log records for significant loop events.
///
/// The injected sink is tracing itself; with no subscriber installed the
/// calls are no-ops, which replaces any print-style fallback.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self { instance: instance.into() }
    }

    pub fn log_cycle_start(&self, cycle: u64, service: &str) {
        info!(
            event = "cycle_started",
            instance = %self.instance,
            cycle,
            service = %service,
            "Starting adaptation cycle"
        );
    }

    pub fn log_cycle_end(
        &self,
        cycle: u64,
        service: &str,
        status: &str,
        duration_secs: f64,
        reason: Option<&str>,
    ) {
        info!(
            event = "cycle_finished",
            instance = %self.instance,
            cycle,
            service = %service,
            status = %status,
            duration_secs,
            reason = reason.unwrap_or(""),
            "Adaptation cycle finished"
        );
    }

    pub fn log_decision(&self, service: &str, actions: usize, confidence: f64, rationale: &str) {
        info!(
            event = "decision_made",
            instance = %self.instance,
            service = %service,
            actions,
            confidence,
            rationale = %rationale,
            "Decision made"
        );
    }

    pub fn log_execution(&self, service: &str, success: bool, errors: &[String]) {
        if success {
            info!(
                event = "actions_executed",
                instance = %self.instance,
                service = %service,
                "Adaptation actions executed"
            );
        } else {
            warn!(
                event = "actions_failed",
                instance = %self.instance,
                service = %service,
                errors = ?errors,
                "Adaptation actions failed"
            );
        }
    }

    pub fn log_reflection(&self, service: &str, success: bool, health_delta: f64) {
        info!(
            event = "outcome_evaluated",
            instance = %self.instance,
            service = %service,
            success,
            health_delta,
            "Adaptation outcome evaluated"
        );
    }

    pub fn log_knowledge_export(&self, path: &str) {
        info!(
            event = "knowledge_exported",
            instance = %self.instance,
            path = %path,
            "Knowledge exported"
        );
    }

    pub fn log_startup(&self, version: &str, services: usize) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            services,
            "Adaptation agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Adaptation agent shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_metrics_observations() {
        // metric registration is global; exercise the full surface once
        let metrics = LoopMetrics::new();
        metrics.observe_cycle_duration(31.5);
        metrics.inc_cycle("completed");
        metrics.inc_cycle("stable");
        metrics.inc_adaptations(1);
        metrics.inc_successful_adaptation();
        metrics.set_health_score("checkout", 87.5);
        metrics.set_knowledge_sizes(3, 12);
        metrics.inc_execution_errors(0);
    }

    #[test]
    fn test_structured_logger_construction() {
        let logger = StructuredLogger::new("node-1");
        assert_eq!(logger.instance, "node-1");
        logger.log_cycle_start(1, "checkout");
        logger.log_cycle_end(1, "checkout", "stable", 0.2, None);
    }
}
