//! Weigh phase: candidate generation, utility scoring and selection
//!
//! An ordered set of pure rules inspects the snapshot and each
//! contributes at most one candidate. Candidates are scored by a
//! utility function of priority tier and current state, and the single
//! best one is selected. Rule order is part of the contract: a utility
//! tie goes to the earlier rule.

use crate::catalog::{derived, PlanningThresholds};
use crate::knowledge::{self, KnowledgeData};
use crate::models::{AdaptationAction, Candidate, Decision, SystemSnapshot};
use chrono::Utc;
use std::sync::Mutex;
use tracing::{debug, info};

/// Read-only state the rules evaluate against
pub struct RuleContext<'a> {
    pub error_rate: f64,
    pub latency_ms: f64,
    pub throughput: f64,
    pub cost_per_request: f64,
    pub health: f64,
    /// Count of SLO violations with severity <= 2
    pub critical_violations: usize,
    /// Count of metrics carrying anomalies
    pub anomalous_metrics: usize,
    pub thresholds: &'a PlanningThresholds,
}

type Rule = fn(&RuleContext) -> Option<Candidate>;

/// The candidate-generation rules, in contract order
pub const RULES: &[(&str, Rule)] = &[
    ("scale_out_on_pressure", scale_out_on_pressure),
    ("scale_in_on_low_load", scale_in_on_low_load),
    ("resize_up_on_cost", resize_up_on_cost),
    ("resize_down_on_cost", resize_down_on_cost),
    ("emergency_scale_out", emergency_scale_out),
    ("restart_on_anomalies", restart_on_anomalies),
];

/// High error rate or latency -> add a replica
fn scale_out_on_pressure(ctx: &RuleContext) -> Option<Candidate> {
    if ctx.error_rate > ctx.thresholds.max_error_rate || ctx.latency_ms > ctx.thresholds.max_latency_ms
    {
        return Some(Candidate {
            action: AdaptationAction::ScaleOut { amount: 1 },
            priority: 1,
            reason: format!(
                "high error rate ({:.2}%) or latency ({:.0}ms)",
                ctx.error_rate * 100.0,
                ctx.latency_ms
            ),
            utility: 0.0,
        });
    }
    None
}

/// Comfortably idle on every axis -> drop a replica.
///
/// The guards are strictly tighter than the scale-out rule's, so the
/// two can never co-fire.
fn scale_in_on_low_load(ctx: &RuleContext) -> Option<Candidate> {
    if ctx.error_rate < ctx.thresholds.max_error_rate * 0.25
        && ctx.latency_ms < ctx.thresholds.max_latency_ms * 0.5
        && ctx.throughput < ctx.thresholds.min_throughput
    {
        return Some(Candidate {
            action: AdaptationAction::ScaleIn { amount: 1 },
            priority: 3,
            reason: format!(
                "low load: error rate {:.2}%, latency {:.0}ms",
                ctx.error_rate * 100.0,
                ctx.latency_ms
            ),
            utility: 0.0,
        });
    }
    None
}

/// Cost per request over budget -> grow per-pod resources
fn resize_up_on_cost(ctx: &RuleContext) -> Option<Candidate> {
    if ctx.cost_per_request > ctx.thresholds.max_cost_per_request * 1.05 {
        return Some(Candidate {
            action: AdaptationAction::ResizeUp { factor: 1.5 },
            priority: 2,
            reason: format!("high cost per request: ${:.4}", ctx.cost_per_request),
            utility: 0.0,
        });
    }
    None
}

/// Cost per request well under budget -> shrink per-pod resources
fn resize_down_on_cost(ctx: &RuleContext) -> Option<Candidate> {
    if ctx.cost_per_request < ctx.thresholds.max_cost_per_request * 0.5 {
        return Some(Candidate {
            action: AdaptationAction::ResizeDown { factor: 0.75 },
            priority: 3,
            reason: format!("low resource utilization: ${:.4} per request", ctx.cost_per_request),
            utility: 0.0,
        });
    }
    None
}

/// Any critical (severity <= 2) violation -> aggressive scale-out,
/// independent of the pressure rule
fn emergency_scale_out(ctx: &RuleContext) -> Option<Candidate> {
    if ctx.critical_violations > 0 {
        return Some(Candidate {
            action: AdaptationAction::ScaleOut { amount: 2 },
            priority: 0,
            reason: format!("critical SLO violations: {} detected", ctx.critical_violations),
            utility: 0.0,
        });
    }
    None
}

/// Anomalies spread across many metrics -> rolling restart
fn restart_on_anomalies(ctx: &RuleContext) -> Option<Candidate> {
    if ctx.anomalous_metrics > 5 {
        return Some(Candidate {
            action: AdaptationAction::Restart,
            priority: 2,
            reason: format!(
                "multiple anomalies detected: {} metrics affected",
                ctx.anomalous_metrics
            ),
            utility: 0.0,
        });
    }
    None
}

/// Configuration for the weigh phase
#[derive(Debug, Clone)]
pub struct WeighConfig {
    pub thresholds: PlanningThresholds,
    /// Decisions retained for audit
    pub history_limit: usize,
}

impl Default for WeighConfig {
    fn default() -> Self {
        Self { thresholds: PlanningThresholds::default(), history_limit: 100 }
    }
}

/// Turns a snapshot into a ranked decision
pub struct WeighAgent {
    config: WeighConfig,
    history: Mutex<Vec<Decision>>,
}

impl WeighAgent {
    pub fn new(config: WeighConfig) -> Self {
        Self { config, history: Mutex::new(Vec::new()) }
    }

    /// Produce the cycle's decision. An empty action list means the
    /// system is considered stable.
    pub fn weigh(&self, snapshot: &SystemSnapshot, learned: &KnowledgeData) -> Decision {
        let ctx = self.rule_context(snapshot);

        let mut candidates: Vec<Candidate> = Vec::new();
        for (name, rule) in RULES {
            if let Some(candidate) = rule(&ctx) {
                debug!(rule = name, action = candidate.action.policy_key(), "rule fired");
                candidates.push(candidate);
            }
        }

        for candidate in &mut candidates {
            candidate.utility = utility(candidate, &ctx);
        }

        let selected = select(&candidates);
        self.consult_learned_policy(snapshot, &selected, learned);

        let confidence = confidence(&selected, snapshot.health_score);
        let decision = Decision {
            timestamp: Utc::now(),
            service: snapshot.service.clone(),
            rationale: rationale(&selected, snapshot),
            candidates_evaluated: candidates.len(),
            confidence,
            utility_scores: candidates
                .iter()
                .map(|c| (c.action.policy_key().to_string(), c.utility))
                .collect(),
            actions: selected,
        };

        info!(
            service = %decision.service,
            actions = decision.actions.len(),
            confidence = decision.confidence,
            "decision made"
        );

        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.push(decision.clone());
        let excess = history.len().saturating_sub(self.config.history_limit);
        if excess > 0 {
            history.drain(0..excess);
        }

        decision
    }

    /// Recent decisions, oldest first
    pub fn decision_history(&self, lookback: usize) -> Vec<Decision> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let skip = history.len().saturating_sub(lookback);
        history[skip..].to_vec()
    }

    fn rule_context<'a>(&'a self, snapshot: &SystemSnapshot) -> RuleContext<'a> {
        RuleContext {
            error_rate: snapshot.derived(derived::ERROR_RATE).unwrap_or(0.0),
            latency_ms: snapshot.derived(derived::LATENCY).unwrap_or(0.0),
            throughput: snapshot.derived(derived::THROUGHPUT).unwrap_or(0.0),
            cost_per_request: snapshot.derived(derived::COST_PER_REQUEST).unwrap_or(0.0),
            health: snapshot.health_score,
            critical_violations: snapshot
                .slo_violations
                .iter()
                .filter(|v| v.severity <= 2)
                .count(),
            anomalous_metrics: snapshot.anomalous_metric_count(),
            thresholds: &self.config.thresholds,
        }
    }

    /// The learned policy may veto or re-rank in the future; today it is
    /// consulted for audit only and never raises an action above its
    /// utility rank.
    fn consult_learned_policy(
        &self,
        snapshot: &SystemSnapshot,
        selected: &[Candidate],
        learned: &KnowledgeData,
    ) {
        let state = knowledge::state_key(snapshot);
        if let Some(preferred) = learned.best_action(&state) {
            let chosen = selected.first().map(|c| c.action.policy_key());
            if chosen != Some(preferred) {
                debug!(
                    state = %state,
                    learned = preferred,
                    chosen = chosen.unwrap_or("none"),
                    "learned preference differs from utility ranking"
                );
            }
        }
    }
}

/// Utility of one candidate: base from the priority tier, scaled by how
/// much the current state wants this kind of action
fn utility(candidate: &Candidate, ctx: &RuleContext) -> f64 {
    let base = 100.0 - f64::from(candidate.priority) * 20.0;
    let health_ratio = ctx.health / 100.0;
    let cost_ratio = ctx.cost_per_request / ctx.thresholds.max_cost_per_request;

    match &candidate.action {
        // adding replicas is worth more the less healthy we are
        AdaptationAction::ScaleOut { .. } => base * (1.0 - health_ratio),
        // removing replicas is only attractive when healthy
        AdaptationAction::ScaleIn { .. } => base * health_ratio,
        AdaptationAction::ResizeUp { .. } => base * cost_ratio.min(2.0),
        AdaptationAction::ResizeDown { .. } => base * (1.0 - cost_ratio).max(0.5),
        AdaptationAction::Restart => base * (1.0 - health_ratio),
    }
}

/// Single best candidate by utility, first-listed order breaking ties
fn select(candidates: &[Candidate]) -> Vec<Candidate> {
    let mut best: Option<&Candidate> = None;
    for candidate in candidates {
        if best.map_or(true, |b| candidate.utility > b.utility) {
            best = Some(candidate);
        }
    }
    best.into_iter().cloned().collect()
}

/// Confidence in the recommendation.
///
/// With an action: the normalized best utility. Without one: high when
/// the system looks healthy, guarded otherwise.
fn confidence(selected: &[Candidate], health: f64) -> f64 {
    if selected.is_empty() {
        return if health > 80.0 { 0.9 } else { 0.5 };
    }
    let best = selected.iter().map(|c| c.utility).fold(f64::NEG_INFINITY, f64::max);
    (best / 100.0).min(1.0)
}

fn rationale(selected: &[Candidate], snapshot: &SystemSnapshot) -> String {
    if selected.is_empty() {
        return "no actions needed - system operating within normal parameters".to_string();
    }

    let mut parts = vec![format!("system health: {:.1}/100", snapshot.health_score)];
    if snapshot.violation_count() > 0 {
        parts.push(format!("{} SLO violations detected", snapshot.violation_count()));
    }
    if snapshot.anomalous_metric_count() > 0 {
        parts.push(format!("{} metric anomalies detected", snapshot.anomalous_metric_count()));
    }
    for candidate in selected {
        parts.push(format!("action: {} - {}", candidate.action.policy_key(), candidate.reason));
    }
    parts.join("; ")
}
