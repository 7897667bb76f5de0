//! Telemetry source contract
//!
//! The monitoring backend is an external collaborator. The agent only
//! requires ordered rows of sampled values aligned to the requested
//! metric ids; everything protocol-specific lives behind this trait.

use crate::catalog::MetricDef;
use anyhow::Result;
use async_trait::async_trait;

/// Query window relative to "now", in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Negative offset of the window start, e.g. -600
    pub start: i64,
    /// Offset of the window end, 0 meaning "now"
    pub end: i64,
}

impl TimeWindow {
    /// Window covering the last `seconds` seconds
    pub fn last(seconds: u64) -> Self {
        Self { start: -(seconds as i64), end: 0 }
    }
}

/// One sampled row, values aligned positionally to the queried metrics
#[derive(Debug, Clone)]
pub struct SampleRow {
    pub timestamp: i64,
    pub values: Vec<Option<f64>>,
}

/// An ordered series of sampled rows
#[derive(Debug, Clone, Default)]
pub struct MetricSeries {
    pub rows: Vec<SampleRow>,
}

impl MetricSeries {
    /// Non-null samples of the metric at column `index`, in row order
    pub fn column(&self, index: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|row| row.values.get(index).copied().flatten())
            .collect()
    }

    /// Latest non-null sample of the metric at column `index`
    pub fn latest(&self, index: usize) -> Option<f64> {
        self.rows
            .iter()
            .rev()
            .find_map(|row| row.values.get(index).copied().flatten())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read-only access to the monitoring backend
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Query `metrics` over `window` at `step_secs` resolution, optionally
    /// restricted to a scope expression (namespace, pod, ...).
    async fn query(
        &self,
        metrics: &[MetricDef],
        window: TimeWindow,
        step_secs: u32,
        scope: Option<&str>,
    ) -> Result<MetricSeries>;
}
