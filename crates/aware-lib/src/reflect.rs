//! Reflect phase: compare pre- and post-adaptation state
//!
//! Classifies per-metric changes as improvements or degradations using
//! a fixed metric-direction table, scores the cycle's overall success
//! and looks for unintended side effects. Output is audit material; the
//! learning phase consumes the success flag and health delta.

use crate::catalog::derived;
use crate::models::{
    AdaptationAction, Decision, ExecutionResult, MetricChange, Reflection, SystemSnapshot,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::info;

/// Configuration for outcome evaluation
#[derive(Debug, Clone)]
pub struct ReflectConfig {
    /// Health-delta fraction above which the cycle is an outright success
    pub success_threshold: f64,
    /// Health-delta fraction below which the cycle is an outright failure
    pub degradation_threshold: f64,
    /// Percent-change magnitude treated as noise
    pub noise_pct: f64,
    /// Reflections retained per agent
    pub history_limit: usize,
}

impl Default for ReflectConfig {
    fn default() -> Self {
        Self {
            success_threshold: 0.8,
            degradation_threshold: -0.1,
            noise_pct: 5.0,
            history_limit: 100,
        }
    }
}

/// Summary over recent reflections
#[derive(Debug, Clone, Serialize)]
pub struct ReflectionSummary {
    pub total_reflections: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub avg_health_delta: f64,
}

/// Whether lower values are better for a derived metric; `None` for
/// metrics without a known direction (skipped in comparison)
fn lower_is_better(metric: &str) -> Option<bool> {
    match metric {
        derived::ERROR_RATE | derived::LATENCY | derived::COST_PER_REQUEST => Some(true),
        derived::THROUGHPUT => Some(false),
        _ => None,
    }
}

/// Evaluates adaptation outcomes
pub struct ReflectAgent {
    config: ReflectConfig,
    history: Mutex<Vec<Reflection>>,
}

impl ReflectAgent {
    pub fn new(config: ReflectConfig) -> Self {
        Self { config, history: Mutex::new(Vec::new()) }
    }

    /// Analyze the outcome of one adaptation cycle
    pub fn reflect(
        &self,
        pre: &SystemSnapshot,
        post: &SystemSnapshot,
        decision: &Decision,
        execution: &ExecutionResult,
    ) -> Reflection {
        // a failed execution short-circuits: no metric comparison is
        // meaningful when the adaptation never landed
        if !execution.success {
            let reflection = Reflection {
                timestamp: Utc::now(),
                success: false,
                reason: Some("execution failed".to_string()),
                pre_health: pre.health_score,
                post_health: pre.health_score,
                health_delta: 0.0,
                improvements: Vec::new(),
                degradations: Vec::new(),
                side_effects: Vec::new(),
                recommendations: vec![
                    "review execution errors".to_string(),
                    "check control-plane permissions".to_string(),
                ],
                actions_taken: actions_taken(decision),
            };
            self.record(reflection.clone());
            return reflection;
        }

        let (improvements, degradations) = self.compare_metrics(pre, post);
        let health_delta = post.health_score - pre.health_score;
        let success = self.evaluate_success(health_delta, &improvements, &degradations);
        let side_effects = detect_side_effects(pre, post, decision);
        let recommendations =
            recommendations(success, &improvements, &degradations, &side_effects);

        let reflection = Reflection {
            timestamp: Utc::now(),
            success,
            reason: None,
            pre_health: pre.health_score,
            post_health: post.health_score,
            health_delta,
            improvements,
            degradations,
            side_effects,
            recommendations,
            actions_taken: actions_taken(decision),
        };

        info!(
            service = %pre.service,
            success,
            health_delta,
            improvements = reflection.improvements.len(),
            degradations = reflection.degradations.len(),
            "reflection complete"
        );

        self.record(reflection.clone());
        reflection
    }

    /// Percent change per derived metric present and non-null in both
    /// snapshots, split by the direction table and filtered for noise
    fn compare_metrics(
        &self,
        pre: &SystemSnapshot,
        post: &SystemSnapshot,
    ) -> (Vec<MetricChange>, Vec<MetricChange>) {
        let mut improvements = Vec::new();
        let mut degradations = Vec::new();

        for (metric, post_value) in &post.derived_metrics {
            let Some(post_value) = post_value else { continue };
            let Some(pre_value) = pre.derived(metric) else { continue };
            let Some(lower_better) = lower_is_better(metric) else { continue };

            let change_pct = if pre_value != 0.0 {
                (post_value - pre_value) / pre_value.abs() * 100.0
            } else {
                0.0
            };
            if change_pct.abs() <= self.config.noise_pct {
                continue;
            }

            let change = MetricChange {
                metric: metric.clone(),
                pre_value,
                post_value: *post_value,
                change_pct,
            };
            let improved = if lower_better {
                *post_value < pre_value
            } else {
                *post_value > pre_value
            };
            if improved {
                improvements.push(change);
            } else {
                degradations.push(change);
            }
        }

        (improvements, degradations)
    }

    /// Overall success: decisive health movement first, then the
    /// improvement/degradation comparison with a magnitude tiebreak
    fn evaluate_success(
        &self,
        health_delta: f64,
        improvements: &[MetricChange],
        degradations: &[MetricChange],
    ) -> bool {
        if health_delta > self.config.success_threshold * 100.0 {
            return true;
        }
        if health_delta < self.config.degradation_threshold * 100.0 {
            return false;
        }

        if improvements.len() > degradations.len() {
            return true;
        }
        if !improvements.is_empty() && !degradations.is_empty() {
            let avg = |changes: &[MetricChange]| {
                changes.iter().map(|c| c.change_pct.abs()).sum::<f64>() / changes.len() as f64
            };
            return avg(improvements) > avg(degradations);
        }
        // improvements with no degradations is a win; anything else,
        // including no observable change, is not
        !improvements.is_empty()
    }

    fn record(&self, reflection: Reflection) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push(reflection);
        let excess = history.len().saturating_sub(self.config.history_limit);
        if excess > 0 {
            history.drain(0..excess);
        }
    }

    /// Summary over the most recent `lookback` reflections (all when 0)
    pub fn summary(&self, lookback: usize) -> ReflectionSummary {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let slice: &[Reflection] = if lookback == 0 {
            &history
        } else {
            &history[history.len().saturating_sub(lookback)..]
        };

        let total = slice.len();
        let successful = slice.iter().filter(|r| r.success).count();
        let avg_health_delta = if total > 0 {
            slice.iter().map(|r| r.health_delta).sum::<f64>() / total as f64
        } else {
            0.0
        };

        ReflectionSummary {
            total_reflections: total,
            successful,
            failed: total - successful,
            success_rate: if total > 0 { successful as f64 / total as f64 } else { 0.0 },
            avg_health_delta,
        }
    }
}

fn actions_taken(decision: &Decision) -> Vec<String> {
    decision.actions.iter().map(|c| c.action.policy_key().to_string()).collect()
}

/// Unintended consequences: violations or anomalies present only after
/// the adaptation, and cost blowups following a scale-out
fn detect_side_effects(
    pre: &SystemSnapshot,
    post: &SystemSnapshot,
    decision: &Decision,
) -> Vec<String> {
    let mut side_effects = Vec::new();

    let pre_violations: HashSet<&str> =
        pre.slo_violations.iter().map(|v| v.metric.as_str()).collect();
    let mut new_violations: Vec<&str> = post
        .slo_violations
        .iter()
        .map(|v| v.metric.as_str())
        .filter(|m| !pre_violations.contains(m))
        .collect();
    new_violations.sort_unstable();
    new_violations.dedup();
    if !new_violations.is_empty() {
        side_effects
            .push(format!("new SLO violations introduced: {}", new_violations.join(", ")));
    }

    let mut new_anomalies: Vec<&str> = post
        .anomalies
        .keys()
        .map(String::as_str)
        .filter(|m| !pre.anomalies.contains_key(*m))
        .collect();
    new_anomalies.sort_unstable();
    if !new_anomalies.is_empty() {
        side_effects.push(format!("new anomalies detected: {}", new_anomalies.join(", ")));
    }

    let scaled_out = decision
        .actions
        .iter()
        .any(|c| matches!(c.action, AdaptationAction::ScaleOut { .. }));
    if scaled_out {
        let pre_cost = pre.derived(derived::COST_PER_REQUEST).unwrap_or(0.0);
        let post_cost = post.derived(derived::COST_PER_REQUEST).unwrap_or(0.0);
        if post_cost > pre_cost * 1.5 {
            side_effects
                .push("cost per request increased significantly after scaling up".to_string());
        }
    }

    side_effects
}

fn recommendations(
    success: bool,
    improvements: &[MetricChange],
    degradations: &[MetricChange],
    side_effects: &[String],
) -> Vec<String> {
    let mut recs = Vec::new();

    if success {
        recs.push("adaptation was successful - consider similar actions for similar conditions".to_string());
        if let Some(top) = improvements
            .iter()
            .max_by(|a, b| a.change_pct.abs().total_cmp(&b.change_pct.abs()))
        {
            recs.push(format!("best improvement: {} ({:+.1}%)", top.metric, top.change_pct));
        }
    } else {
        recs.push("adaptation did not achieve desired outcome - consider alternative strategies".to_string());
        if let Some(worst) = degradations
            .iter()
            .max_by(|a, b| a.change_pct.abs().total_cmp(&b.change_pct.abs()))
        {
            recs.push(format!("address degradation in {} ({:+.1}%)", worst.metric, worst.change_pct));
        }
    }

    if !side_effects.is_empty() {
        recs.push("monitor side effects and consider corrective actions".to_string());
        recs.extend(side_effects.iter().cloned());
    }

    if improvements.is_empty() && degradations.is_empty() {
        recs.push("no significant metric changes observed - may need longer observation window".to_string());
    }

    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, SloViolation, ViolationDirection};
    use std::collections::HashMap;

    fn snapshot(health: f64, derived_pairs: &[(&str, f64)]) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: Utc::now(),
            service: "checkout".to_string(),
            raw_metrics: HashMap::new(),
            derived_metrics: derived_pairs
                .iter()
                .map(|(id, v)| (id.to_string(), Some(*v)))
                .collect(),
            slo_violations: Vec::new(),
            anomalies: HashMap::new(),
            health_score: health,
        }
    }

    fn decision(actions: Vec<AdaptationAction>) -> Decision {
        Decision {
            timestamp: Utc::now(),
            service: "checkout".to_string(),
            actions: actions
                .into_iter()
                .map(|action| Candidate { action, priority: 1, reason: String::new(), utility: 50.0 })
                .collect(),
            rationale: String::new(),
            candidates_evaluated: 1,
            confidence: 0.5,
            utility_scores: Vec::new(),
        }
    }

    fn ok_execution() -> ExecutionResult {
        ExecutionResult { success: true, actions_executed: 1, results: Vec::new(), errors: Vec::new() }
    }

    fn failed_execution() -> ExecutionResult {
        ExecutionResult {
            success: false,
            actions_executed: 1,
            results: Vec::new(),
            errors: vec!["replica write failed".to_string()],
        }
    }

    #[test]
    fn test_execution_failure_short_circuits() {
        let agent = ReflectAgent::new(ReflectConfig::default());
        // metrics improved dramatically, but the execution failed
        let pre = snapshot(40.0, &[("http.error.rate", 0.10)]);
        let post = snapshot(90.0, &[("http.error.rate", 0.01)]);

        let reflection = agent.reflect(
            &pre,
            &post,
            &decision(vec![AdaptationAction::ScaleOut { amount: 1 }]),
            &failed_execution(),
        );

        assert!(!reflection.success);
        assert_eq!(reflection.reason.as_deref(), Some("execution failed"));
        assert!(reflection.improvements.is_empty());
        assert_eq!(reflection.health_delta, 0.0);
    }

    #[test]
    fn test_noise_filter_suppresses_small_changes() {
        let agent = ReflectAgent::new(ReflectConfig::default());
        let pre = snapshot(80.0, &[("http.latency", 100.0)]);
        let post = snapshot(80.0, &[("http.latency", 96.0)]); // -4%

        let reflection = agent.reflect(&pre, &post, &decision(vec![]), &ok_execution());
        assert!(reflection.improvements.is_empty());
        assert!(!reflection.success); // no observable change
    }

    #[test]
    fn test_direction_table_classifies_changes() {
        let agent = ReflectAgent::new(ReflectConfig::default());
        let pre = snapshot(80.0, &[("http.latency", 100.0), ("http.throughput", 10.0)]);
        let post = snapshot(80.0, &[("http.latency", 80.0), ("http.throughput", 8.0)]);

        let reflection = agent.reflect(&pre, &post, &decision(vec![]), &ok_execution());
        assert_eq!(reflection.improvements.len(), 1);
        assert_eq!(reflection.improvements[0].metric, "http.latency");
        assert_eq!(reflection.degradations.len(), 1);
        assert_eq!(reflection.degradations[0].metric, "http.throughput");
    }

    #[test]
    fn test_improvement_count_tiebreak() {
        let agent = ReflectAgent::new(ReflectConfig::default());
        // pre health 60, post 75: delta 15 is under the 80-point outright
        // success bar, so the 3-vs-1 improvement count decides
        let pre = snapshot(
            60.0,
            &[
                ("http.error.rate", 0.10),
                ("http.latency", 1000.0),
                ("cost.per.request", 0.002),
                ("http.throughput", 10.0),
            ],
        );
        let post = snapshot(
            75.0,
            &[
                ("http.error.rate", 0.05),
                ("http.latency", 700.0),
                ("cost.per.request", 0.001),
                ("http.throughput", 9.0),
            ],
        );

        let reflection = agent.reflect(&pre, &post, &decision(vec![]), &ok_execution());
        assert_eq!(reflection.improvements.len(), 3);
        assert_eq!(reflection.degradations.len(), 1);
        assert!(reflection.success);
    }

    #[test]
    fn test_decisive_health_movement_overrides_counts() {
        let agent = ReflectAgent::new(ReflectConfig::default());

        let pre = snapshot(10.0, &[]);
        let post = snapshot(95.0, &[]);
        let reflection = agent.reflect(&pre, &post, &decision(vec![]), &ok_execution());
        assert!(reflection.success); // delta 85 > 80

        let pre = snapshot(60.0, &[("http.error.rate", 0.05)]);
        let post = snapshot(40.0, &[("http.error.rate", 0.01)]);
        let reflection = agent.reflect(&pre, &post, &decision(vec![]), &ok_execution());
        assert!(!reflection.success); // delta -20 < -10, despite the improvement
    }

    #[test]
    fn test_magnitude_tiebreak_on_equal_counts() {
        let agent = ReflectAgent::new(ReflectConfig::default());
        let pre = snapshot(80.0, &[("http.latency", 100.0), ("http.throughput", 100.0)]);
        // latency improved 50%, throughput degraded 10%
        let post = snapshot(80.0, &[("http.latency", 50.0), ("http.throughput", 90.0)]);

        let reflection = agent.reflect(&pre, &post, &decision(vec![]), &ok_execution());
        assert_eq!(reflection.improvements.len(), 1);
        assert_eq!(reflection.degradations.len(), 1);
        assert!(reflection.success);
    }

    #[test]
    fn test_side_effects_detected() {
        let agent = ReflectAgent::new(ReflectConfig::default());
        let pre = snapshot(80.0, &[("cost.per.request", 0.001)]);
        let mut post = snapshot(80.0, &[("cost.per.request", 0.002)]);
        post.slo_violations.push(SloViolation {
            metric: "memory.used.percent".to_string(),
            value: 90.0,
            threshold: 85.0,
            direction: ViolationDirection::Above,
            severity: 2,
        });
        post.anomalies.insert("net.tcp.queue.len".to_string(), vec![4, 7]);

        let reflection = agent.reflect(
            &pre,
            &post,
            &decision(vec![AdaptationAction::ScaleOut { amount: 1 }]),
            &ok_execution(),
        );

        assert_eq!(reflection.side_effects.len(), 3);
        assert!(reflection.side_effects[0].contains("memory.used.percent"));
        assert!(reflection.side_effects[1].contains("net.tcp.queue.len"));
        assert!(reflection.side_effects[2].contains("cost per request"));
    }

    #[test]
    fn test_summary_aggregates_history() {
        let agent = ReflectAgent::new(ReflectConfig::default());
        let pre = snapshot(60.0, &[]);

        agent.reflect(&pre, &snapshot(100.0, &[]), &decision(vec![]), &ok_execution());
        agent.reflect(&pre, &snapshot(40.0, &[]), &decision(vec![]), &ok_execution());

        let summary = agent.summary(0);
        assert_eq!(summary.total_reflections, 2);
        assert_eq!(summary.successful, 0); // deltas 40 and -20 both miss the bar
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_health_delta, 10.0);
    }
}
