//! Core data models for the adaptation agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction of an SLO threshold breach
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationDirection {
    /// Observed value exceeded an upper bound
    Above,
    /// Observed value fell below a lower bound
    Below,
}

/// A single SLO threshold breach observed during assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloViolation {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub direction: ViolationDirection,
    /// Syslog-style severity, 1 (most severe) through 7
    pub severity: u8,
}

/// One assessed view of a service's state
///
/// Immutable once returned by the assess phase. A derived metric that
/// could not be computed is carried as `None` rather than dropped, so
/// downstream comparison logic can distinguish "absent" from "zero".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub raw_metrics: HashMap<String, f64>,
    pub derived_metrics: HashMap<String, Option<f64>>,
    pub slo_violations: Vec<SloViolation>,
    /// Metric id -> indices of anomalous samples in the queried series
    pub anomalies: HashMap<String, Vec<usize>>,
    /// Composite health, 0 (critical) to 100 (healthy)
    pub health_score: f64,
}

impl SystemSnapshot {
    /// Derived metric value, flattening the absent and failed cases
    pub fn derived(&self, metric: &str) -> Option<f64> {
        self.derived_metrics.get(metric).copied().flatten()
    }

    pub fn violation_count(&self) -> usize {
        self.slo_violations.len()
    }

    /// Number of metrics carrying at least one anomalous sample
    pub fn anomalous_metric_count(&self) -> usize {
        self.anomalies.len()
    }
}

/// A concrete adaptation the agent can apply to a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdaptationAction {
    /// Add replicas
    ScaleOut { amount: u32 },
    /// Remove replicas
    ScaleIn { amount: u32 },
    /// Grow CPU/memory requests and limits by `factor`
    ResizeUp { factor: f64 },
    /// Shrink CPU/memory requests and limits; the executor applies the
    /// reciprocal of `factor`
    ResizeDown { factor: f64 },
    /// Rolling restart
    Restart,
}

impl AdaptationAction {
    /// Stable key identifying the (kind, operation) pair.
    ///
    /// This is the vocabulary of the learned value table, so the five
    /// strings here are a fixed, enumerable space.
    pub fn policy_key(&self) -> &'static str {
        match self {
            AdaptationAction::ScaleOut { .. } => "horizontal_increase",
            AdaptationAction::ScaleIn { .. } => "horizontal_decrease",
            AdaptationAction::ResizeUp { .. } => "vertical_increase",
            AdaptationAction::ResizeDown { .. } => "vertical_decrease",
            AdaptationAction::Restart => "restart",
        }
    }

    /// Action family without the operation direction
    pub fn kind_name(&self) -> &'static str {
        match self {
            AdaptationAction::ScaleOut { .. } | AdaptationAction::ScaleIn { .. } => "horizontal",
            AdaptationAction::ResizeUp { .. } | AdaptationAction::ResizeDown { .. } => "vertical",
            AdaptationAction::Restart => "restart",
        }
    }

    /// Operation direction, empty for restarts
    pub fn operation(&self) -> &'static str {
        match self {
            AdaptationAction::ScaleOut { .. } | AdaptationAction::ResizeUp { .. } => "increase",
            AdaptationAction::ScaleIn { .. } | AdaptationAction::ResizeDown { .. } => "decrease",
            AdaptationAction::Restart => "",
        }
    }
}

/// A possible adaptation produced by one decision rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub action: AdaptationAction,
    /// Urgency tier, 0 (highest) through 3 (lowest)
    pub priority: u8,
    pub reason: String,
    /// Assigned by utility scoring; zero until scored
    pub utility: f64,
}

/// The decision package produced once per cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    /// Selected actions, currently capped at one; empty means "stable"
    pub actions: Vec<Candidate>,
    pub rationale: String,
    pub candidates_evaluated: usize,
    /// Confidence in the recommendation, 0 to 1
    pub confidence: f64,
    /// (policy key, utility) for every candidate that was scored
    pub utility_scores: Vec<(String, f64)>,
}

impl Decision {
    pub fn is_stable(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Outcome of applying one action from a decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    /// Policy key of the action this result belongs to
    pub action: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_replicas: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_replicas: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionResult {
    pub fn failed(action: &AdaptationAction, error: impl Into<String>) -> Self {
        Self {
            action: action.policy_key().to_string(),
            success: false,
            error: Some(error.into()),
            previous_replicas: None,
            new_replicas: None,
            message: None,
        }
    }
}

/// Outcome of applying a whole decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True only if every action succeeded
    pub success: bool,
    pub actions_executed: usize,
    pub results: Vec<ActionResult>,
    pub errors: Vec<String>,
}

impl ExecutionResult {
    /// Result for a decision with no actions
    pub fn empty() -> Self {
        Self { success: true, actions_executed: 0, results: Vec::new(), errors: Vec::new() }
    }
}

/// Percent change of one derived metric across an adaptation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricChange {
    pub metric: String,
    pub pre_value: f64,
    pub post_value: f64,
    pub change_pct: f64,
}

/// Evaluation of one completed adaptation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflection {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    /// Set when the evaluation was short-circuited (execution failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub pre_health: f64,
    pub post_health: f64,
    pub health_delta: f64,
    pub improvements: Vec<MetricChange>,
    pub degradations: Vec<MetricChange>,
    pub side_effects: Vec<String>,
    pub recommendations: Vec<String>,
    pub actions_taken: Vec<String>,
}

/// A mined (state buckets, action) association that met the support and
/// confidence floors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedPattern {
    pub pattern_key: String,
    pub action_type: String,
    pub operation: String,
    pub support: u64,
    pub confidence: f64,
    pub avg_health_delta: f64,
}

/// What one learning pass produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub timestamp: DateTime<Utc>,
    pub learning_cycle: u64,
    pub patterns_learned: Vec<LearnedPattern>,
    pub policies_updated: Vec<String>,
    pub pattern_table_size: usize,
    pub value_table_size: usize,
}
