//! Assess phase: turn telemetry into a scored system snapshot
//!
//! Queries the telemetry source, extracts the latest value per metric,
//! computes derived metrics, runs anomaly detection per series, checks
//! SLO thresholds and condenses everything into a health score.

use crate::anomaly::{AnomalyDetector, MIN_SAMPLES};
use crate::catalog::{self, MetricDef, SLO_THRESHOLDS};
use crate::errors::CycleError;
use crate::models::{SloViolation, SystemSnapshot, ViolationDirection};
use crate::telemetry::{TelemetrySource, TimeWindow};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the assess phase
#[derive(Debug, Clone)]
pub struct AssessConfig {
    /// Sampling window length in seconds
    pub window_secs: u64,
    /// Sampling step in seconds
    pub step_secs: u32,
    /// Snapshots retained per service
    pub history_limit: usize,
}

impl Default for AssessConfig {
    fn default() -> Self {
        Self { window_secs: 600, step_secs: 60, history_limit: 100 }
    }
}

/// Produces [`SystemSnapshot`]s and keeps a bounded per-service history
pub struct AssessAgent {
    telemetry: Arc<dyn TelemetrySource>,
    detector: Arc<dyn AnomalyDetector>,
    config: AssessConfig,
    history: DashMap<String, Vec<SystemSnapshot>>,
}

impl AssessAgent {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        detector: Arc<dyn AnomalyDetector>,
        config: AssessConfig,
    ) -> Self {
        Self { telemetry, detector, config, history: DashMap::new() }
    }

    /// Assess one service.
    ///
    /// Fails only when no telemetry could be collected; every later step
    /// degrades (empty anomaly map, empty violation list) rather than
    /// failing the cycle.
    pub async fn assess(
        &self,
        service: &str,
        scope: Option<&str>,
    ) -> Result<SystemSnapshot, CycleError> {
        debug!(service = %service, "starting assessment");

        let window = TimeWindow::last(self.config.window_secs);
        let series = self
            .telemetry
            .query(catalog::METRICS, window, self.config.step_secs, scope)
            .await
            .map_err(|e| CycleError::Collection(e.to_string()))?;

        if series.is_empty() {
            return Err(CycleError::Collection(format!("no samples returned for {}", service)));
        }

        let raw_metrics = self.extract_latest(&series, catalog::METRICS);
        let derived_metrics = catalog::compute_derived(&raw_metrics);
        let anomalies = self.detect_anomalies(&series, catalog::METRICS);
        let slo_violations = check_slo_violations(&raw_metrics, &derived_metrics);
        let health_score = health_score(&slo_violations, &anomalies);

        let snapshot = SystemSnapshot {
            timestamp: Utc::now(),
            service: service.to_string(),
            raw_metrics,
            derived_metrics,
            slo_violations,
            anomalies,
            health_score,
        };

        info!(
            service = %service,
            health = snapshot.health_score,
            violations = snapshot.violation_count(),
            anomalous_metrics = snapshot.anomalous_metric_count(),
            "assessment complete"
        );

        self.record(service, snapshot.clone());
        Ok(snapshot)
    }

    /// Latest non-null value per metric id
    fn extract_latest(
        &self,
        series: &crate::telemetry::MetricSeries,
        metrics: &[MetricDef],
    ) -> HashMap<String, f64> {
        let mut latest = HashMap::with_capacity(metrics.len());
        for (idx, def) in metrics.iter().enumerate() {
            if let Some(value) = series.latest(idx) {
                latest.insert(def.id.to_string(), value);
            }
        }
        latest
    }

    /// Run the detector over every metric series with enough samples
    fn detect_anomalies(
        &self,
        series: &crate::telemetry::MetricSeries,
        metrics: &[MetricDef],
    ) -> HashMap<String, Vec<usize>> {
        let mut anomalies = HashMap::new();
        for (idx, def) in metrics.iter().enumerate() {
            let values = series.column(idx);
            if values.len() < MIN_SAMPLES {
                continue;
            }
            let indices = self.detector.detect(&values);
            if !indices.is_empty() {
                debug!(metric = %def.id, count = indices.len(), "anomalous samples");
                anomalies.insert(def.id.to_string(), indices);
            }
        }
        anomalies
    }

    fn record(&self, service: &str, snapshot: SystemSnapshot) {
        let mut entry = self.history.entry(service.to_string()).or_default();
        entry.push(snapshot);
        let excess = entry.len().saturating_sub(self.config.history_limit);
        if excess > 0 {
            entry.drain(0..excess);
        }
    }

    /// Most recent snapshots for a service, oldest first
    pub fn history(&self, service: &str, lookback: usize) -> Vec<SystemSnapshot> {
        match self.history.get(service) {
            Some(entry) => {
                let skip = entry.len().saturating_sub(lookback);
                entry[skip..].to_vec()
            }
            None => Vec::new(),
        }
    }
}

/// Check every SLO rule against the combined raw + derived values
fn check_slo_violations(
    raw: &HashMap<String, f64>,
    derived: &HashMap<String, Option<f64>>,
) -> Vec<SloViolation> {
    let mut violations = Vec::new();

    for slo in SLO_THRESHOLDS {
        let value = raw
            .get(slo.metric)
            .copied()
            .or_else(|| derived.get(slo.metric).copied().flatten());
        let Some(value) = value else { continue };

        let breached = match slo.direction {
            ViolationDirection::Above => value > slo.threshold,
            ViolationDirection::Below => value < slo.threshold,
        };
        if breached {
            violations.push(SloViolation {
                metric: slo.metric.to_string(),
                value,
                threshold: slo.threshold,
                direction: slo.direction,
                severity: catalog::severity(slo.metric),
            });
        }
    }

    if !violations.is_empty() {
        warn!(count = violations.len(), "SLO violations detected");
    }
    violations
}

/// Health score from 0 (critical) to 100 (healthy).
///
/// Each violation costs 10/severity points, each anomalous sample half a
/// point.
fn health_score(violations: &[SloViolation], anomalies: &HashMap<String, Vec<usize>>) -> f64 {
    let mut score = 100.0;
    for violation in violations {
        score -= 10.0 / f64::from(violation.severity.max(1));
    }
    let total_anomalies: usize = anomalies.values().map(Vec::len).sum();
    score -= total_anomalies as f64 * 0.5;
    score.max(0.0)
}
