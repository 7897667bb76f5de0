//! Metric catalog: monitored metrics, derived metrics, SLO thresholds
//! and severity mapping
//!
//! The catalog is the static vocabulary the whole loop speaks. Raw
//! metrics are queried from the telemetry source, derived metrics are
//! computed per snapshot, and the SLO table drives violation checks.

use crate::models::ViolationDirection;
use std::collections::HashMap;

/// One metric to request from the telemetry source
#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub id: &'static str,
    /// Aggregation over time within one step
    pub time_aggregation: &'static str,
    /// Aggregation across the group scope
    pub group_aggregation: &'static str,
}

const fn metric(id: &'static str, agg: &'static str) -> MetricDef {
    MetricDef { id, time_aggregation: agg, group_aggregation: agg }
}

/// Curated metrics monitored each cycle.
///
/// Peaks ("max") for saturation-style gauges, sums for counters over the
/// window, averages for ratios.
pub const METRICS: &[MetricDef] = &[
    // system
    metric("cpu.used.percent", "max"),
    metric("memory.used.percent", "max"),
    metric("cpu.iowait.percent", "avg"),
    metric("load.average.1m", "avg"),
    metric("fd.used.percent", "max"),
    // application
    metric("net.http.request.time", "max"),
    metric("net.http.request.count", "sum"),
    metric("net.http.error.count", "sum"),
    metric("net.http.statuscode.error.count", "sum"),
    metric("net.sql.error.count", "sum"),
    // network
    metric("net.bytes.in", "sum"),
    metric("net.connection.count.total", "max"),
    metric("net.tcp.queue.len", "max"),
    // kubernetes
    metric("kubernetes.pod.status.ready", "avg"),
    metric("kubernetes.pod.restart.count", "sum"),
    metric("kubernetes.node.memoryPressure", "max"),
    // cost
    metric("cost.workload.cpu.total", "sum"),
    metric("cost.workload.memory.total", "sum"),
    metric("cost.workload.storage.total", "sum"),
];

/// Derived metric identifiers
pub mod derived {
    pub const ERROR_RATE: &str = "http.error.rate";
    pub const LATENCY: &str = "http.latency";
    pub const THROUGHPUT: &str = "http.throughput";
    pub const COST_PER_REQUEST: &str = "cost.per.request";

    pub const ALL: &[&str] = &[ERROR_RATE, LATENCY, THROUGHPUT, COST_PER_REQUEST];
}

/// Compute the derived metrics for one set of raw values.
///
/// Missing inputs default to zero, request counts are floored at one to
/// keep the ratios total. A metric is `None` only when its inputs make
/// the computation meaningless (kept for forward compatibility; the
/// current four always produce a value).
pub fn compute_derived(raw: &HashMap<String, f64>) -> HashMap<String, Option<f64>> {
    let get = |id: &str| raw.get(id).copied().unwrap_or(0.0);
    let requests = get("net.http.request.count").max(1.0);

    let mut out = HashMap::with_capacity(derived::ALL.len());
    out.insert(
        derived::ERROR_RATE.to_string(),
        Some(get("net.http.error.count") / requests),
    );
    out.insert(derived::LATENCY.to_string(), Some(get("net.http.request.time")));
    // requests-per-second, assuming a 60 s sampling window
    out.insert(
        derived::THROUGHPUT.to_string(),
        Some(get("net.http.request.count") / 60.0),
    );
    out.insert(
        derived::COST_PER_REQUEST.to_string(),
        Some(
            (get("cost.workload.cpu.total")
                + get("cost.workload.memory.total")
                + get("cost.workload.storage.total"))
                / requests,
        ),
    );
    out
}

/// Thresholds the decision rules plan against
#[derive(Debug, Clone)]
pub struct PlanningThresholds {
    /// Maximum acceptable HTTP error rate
    pub max_error_rate: f64,
    /// Maximum acceptable latency in milliseconds
    pub max_latency_ms: f64,
    /// Minimum expected throughput in requests per second
    pub min_throughput: f64,
    /// Maximum acceptable dollars per request
    pub max_cost_per_request: f64,
}

impl Default for PlanningThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 0.05,
            max_latency_ms: 1000.0,
            min_throughput: 10.0,
            max_cost_per_request: 0.001,
        }
    }
}

/// One SLO rule: breach when the value passes the threshold in the
/// given direction
#[derive(Debug, Clone, Copy)]
pub struct SloThreshold {
    pub metric: &'static str,
    pub direction: ViolationDirection,
    pub threshold: f64,
}

const fn above(metric: &'static str, threshold: f64) -> SloThreshold {
    SloThreshold { metric, direction: ViolationDirection::Above, threshold }
}

const fn below(metric: &'static str, threshold: f64) -> SloThreshold {
    SloThreshold { metric, direction: ViolationDirection::Below, threshold }
}

/// Service-level objectives over raw and derived metrics
pub const SLO_THRESHOLDS: &[SloThreshold] = &[
    above("cpu.used.percent", 85.0),
    above("memory.used.percent", 85.0),
    above("cpu.iowait.percent", 20.0),
    above("load.average.1m", 2.0),
    above("fd.used.percent", 90.0),
    above("net.http.request.time", 500.0),
    above("net.http.error.count", 50.0),
    above("net.http.statuscode.error.count", 50.0),
    above("net.sql.error.count", 10.0),
    above("net.bytes.in", 1e9),
    above("net.connection.count.total", 8000.0),
    above("net.tcp.queue.len", 500.0),
    below("kubernetes.pod.status.ready", 0.9),
    above("kubernetes.pod.restart.count", 5.0),
    above("kubernetes.node.memoryPressure", 0.0),
    above("cost.workload.cpu.total", 50.0),
    above("cost.workload.memory.total", 50.0),
    above("cost.workload.storage.total", 20.0),
    above(derived::ERROR_RATE, 0.05),
    above(derived::COST_PER_REQUEST, 0.01),
];

/// Default severity for metrics without an explicit mapping
pub const DEFAULT_SEVERITY: u8 = 4;

/// Syslog-style severity per metric, 1 (alert) through 7 (debug)
pub fn severity(metric: &str) -> u8 {
    match metric {
        "net.http.error.count"
        | "net.http.statuscode.error.count"
        | "kubernetes.node.memoryPressure"
        | derived::ERROR_RATE => 1,
        "cpu.iowait.percent"
        | "memory.used.percent"
        | "fd.used.percent"
        | "kubernetes.pod.restart.count"
        | "cost.workload.cpu.total"
        | "cost.workload.memory.total"
        | derived::COST_PER_REQUEST => 2,
        "cpu.used.percent" | "kubernetes.pod.status.ready" | "cost.workload.storage.total" => 3,
        "load.average.1m" => 4,
        "net.bytes.in" => 6,
        _ => DEFAULT_SEVERITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_error_rate_uses_floored_request_count() {
        let derived = compute_derived(&raw(&[("net.http.error.count", 4.0)]));
        // no requests observed -> divisor floored at 1
        assert_eq!(derived["http.error.rate"], Some(4.0));

        let derived = compute_derived(&raw(&[
            ("net.http.error.count", 8.0),
            ("net.http.request.count", 100.0),
        ]));
        assert_eq!(derived["http.error.rate"], Some(0.08));
    }

    #[test]
    fn test_cost_per_request_sums_cost_components() {
        let derived = compute_derived(&raw(&[
            ("cost.workload.cpu.total", 0.5),
            ("cost.workload.memory.total", 0.3),
            ("cost.workload.storage.total", 0.2),
            ("net.http.request.count", 1000.0),
        ]));
        assert_eq!(derived["cost.per.request"], Some(0.001));
    }

    #[test]
    fn test_throughput_assumes_sixty_second_window() {
        let derived = compute_derived(&raw(&[("net.http.request.count", 600.0)]));
        assert_eq!(derived["http.throughput"], Some(10.0));
    }

    #[test]
    fn test_derived_metrics_present_for_empty_input() {
        let derived = compute_derived(&HashMap::new());
        for id in derived::ALL {
            assert!(derived.contains_key(*id), "missing {}", id);
        }
    }

    #[test]
    fn test_severity_defaults_to_warning() {
        assert_eq!(severity("http.error.rate"), 1);
        assert_eq!(severity("cpu.used.percent"), 3);
        assert_eq!(severity("jvm.heap.used.percent"), DEFAULT_SEVERITY);
    }

    #[test]
    fn test_slo_table_covers_derived_error_rate() {
        let slo = SLO_THRESHOLDS
            .iter()
            .find(|s| s.metric == derived::ERROR_RATE)
            .unwrap();
        assert_eq!(slo.direction, ViolationDirection::Above);
        assert_eq!(slo.threshold, 0.05);
    }
}
