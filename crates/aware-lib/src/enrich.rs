//! Enrich phase: learn from each cycle's outcome
//!
//! Two learners feed the knowledge store: frequency-based pattern
//! mining over discretized pre-adaptation state, and a one-step tabular
//! value update over (state, action) pairs. Aggregate statistics are
//! maintained unconditionally. The store is persisted every N cycles
//! and the in-memory state survives a failed save.

use crate::knowledge::{
    self, value_key, KnowledgeStore, ACTION_SPACE,
};
use crate::models::{Decision, EnrichmentResult, LearnedPattern, Reflection, SystemSnapshot};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the learning engine
#[derive(Debug, Clone)]
pub struct LearningConfig {
    /// Step size of the value update
    pub learning_rate: f64,
    /// Discount applied to the next-state value
    pub discount_factor: f64,
    /// Minimum-support floor, scaled by 10 into an occurrence count
    pub min_support: f64,
    /// Minimum success rate for pattern promotion
    pub min_confidence: f64,
    /// Persist the knowledge store every this many learning cycles
    pub persist_every: u64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            discount_factor: 0.95,
            min_support: 0.3,
            min_confidence: 0.7,
            persist_every: 10,
        }
    }
}

/// Learns from reflections and maintains the knowledge store
pub struct EnrichAgent {
    store: Arc<KnowledgeStore>,
    config: LearningConfig,
    learning_cycles: AtomicU64,
}

impl EnrichAgent {
    pub fn new(store: Arc<KnowledgeStore>, config: LearningConfig) -> Self {
        Self { store, config, learning_cycles: AtomicU64::new(0) }
    }

    /// Learning cycles completed so far
    pub fn learning_cycles(&self) -> u64 {
        self.learning_cycles.load(Ordering::SeqCst)
    }

    /// Consume one completed cycle. Each cycle is consumed exactly once;
    /// the learning-cycle counter advances by one per call.
    pub async fn enrich(
        &self,
        reflection: &Reflection,
        decision: &Decision,
        pre: &SystemSnapshot,
        post: &SystemSnapshot,
    ) -> EnrichmentResult {
        let cycle = self.learning_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let success = reflection.success;
        let health_delta = reflection.health_delta;

        let reward = reward(health_delta, success);
        let pre_state = knowledge::state_key(pre);
        let post_state = knowledge::state_key(post);

        let (patterns_learned, policies_updated, pattern_table_size, value_table_size) = self
            .store
            .mutate(|data| {
                let mut patterns_learned = Vec::new();
                let mut policies_updated = Vec::new();

                for candidate in &decision.actions {
                    // pattern mining over the discretized pre-state
                    let key = pattern_key(pre, &candidate.action);
                    let count = data.pattern_counts.entry(key.clone()).or_insert(0);
                    *count += 1;
                    let support = *count;
                    if success {
                        *data.pattern_successes.entry(key.clone()).or_insert(0) += 1;
                    }
                    let successes = data.pattern_successes.get(&key).copied().unwrap_or(0);
                    let confidence = successes as f64 / support as f64;

                    if support as f64 >= self.config.min_support * 10.0
                        && confidence >= self.config.min_confidence
                    {
                        let pattern = LearnedPattern {
                            pattern_key: key.clone(),
                            action_type: candidate.action.kind_name().to_string(),
                            operation: candidate.action.operation().to_string(),
                            support,
                            confidence,
                            avg_health_delta: health_delta,
                        };
                        data.patterns.insert(key, pattern.clone());
                        patterns_learned.push(pattern);
                    }

                    // one-step value update; the next-state max ranges
                    // over the fixed action space, not observed history
                    let action_key = candidate.action.policy_key();
                    let q_key = value_key(&pre_state, action_key);
                    let current = data.values.get(&q_key).copied().unwrap_or(0.0);
                    let next_max = ACTION_SPACE
                        .iter()
                        .map(|a| data.q_value(&post_state, a))
                        .fold(f64::NEG_INFINITY, f64::max);
                    let updated = current
                        + self.config.learning_rate
                            * (reward + self.config.discount_factor * next_max - current);
                    data.values.insert(q_key.clone(), updated);
                    policies_updated.push(q_key);

                    // aggregate statistics
                    let kind = candidate.action.kind_name().to_string();
                    *data.stats.action_counts.entry(kind.clone()).or_insert(0) += 1;
                    if success {
                        *data.stats.action_successes.entry(kind).or_insert(0) += 1;
                    }
                }

                data.stats.total_adaptations += 1;
                if success {
                    data.stats.successful_adaptations += 1;
                }

                (patterns_learned, policies_updated, data.patterns.len(), data.values.len())
            })
            .await;

        if cycle % self.config.persist_every == 0 {
            if let Err(e) = self.store.persist().await {
                // in-memory state is intact; the next periodic save retries
                warn!(error = %e, "knowledge persistence failed");
            } else {
                debug!(cycle, "knowledge store persisted");
            }
        }

        info!(
            cycle,
            patterns = patterns_learned.len(),
            policies = policies_updated.len(),
            "enrichment complete"
        );

        EnrichmentResult {
            timestamp: Utc::now(),
            learning_cycle: cycle,
            patterns_learned,
            policies_updated,
            pattern_table_size,
            value_table_size,
        }
    }
}

/// Reward: normalized health movement plus a success bonus or failure
/// penalty
fn reward(health_delta: f64, success: bool) -> f64 {
    let base = health_delta / 10.0;
    if success {
        base + 10.0
    } else {
        base - 5.0
    }
}

/// Pattern key: discretized (error, latency, throughput) plus the
/// action's kind and operation
fn pattern_key(pre: &SystemSnapshot, action: &crate::models::AdaptationAction) -> String {
    let error_rate = pre.derived(crate::catalog::derived::ERROR_RATE).unwrap_or(0.0);
    let latency = pre.derived(crate::catalog::derived::LATENCY).unwrap_or(0.0);
    let throughput = pre.derived(crate::catalog::derived::THROUGHPUT).unwrap_or(0.0);
    format!(
        "{}_{}_{}_{}_{}",
        knowledge::error_level(error_rate),
        knowledge::latency_level(latency),
        knowledge::throughput_level(throughput),
        action.kind_name(),
        action.operation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdaptationAction, Candidate};
    use std::collections::HashMap;

    fn snapshot(health: f64, error_rate: f64, latency: f64, throughput: f64) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: Utc::now(),
            service: "checkout".to_string(),
            raw_metrics: HashMap::new(),
            derived_metrics: HashMap::from([
                ("http.error.rate".to_string(), Some(error_rate)),
                ("http.latency".to_string(), Some(latency)),
                ("http.throughput".to_string(), Some(throughput)),
                ("cost.per.request".to_string(), Some(0.0006)),
            ]),
            slo_violations: Vec::new(),
            anomalies: HashMap::new(),
            health_score: health,
        }
    }

    fn decision(action: AdaptationAction) -> Decision {
        Decision {
            timestamp: Utc::now(),
            service: "checkout".to_string(),
            actions: vec![Candidate { action, priority: 1, reason: String::new(), utility: 48.0 }],
            rationale: String::new(),
            candidates_evaluated: 1,
            confidence: 0.48,
            utility_scores: Vec::new(),
        }
    }

    fn reflection(success: bool, health_delta: f64) -> Reflection {
        Reflection {
            timestamp: Utc::now(),
            success,
            reason: None,
            pre_health: 50.0,
            post_health: 50.0 + health_delta,
            health_delta,
            improvements: Vec::new(),
            degradations: Vec::new(),
            side_effects: Vec::new(),
            recommendations: Vec::new(),
            actions_taken: Vec::new(),
        }
    }

    fn agent() -> EnrichAgent {
        EnrichAgent::new(Arc::new(KnowledgeStore::in_memory()), LearningConfig::default())
    }

    #[tokio::test]
    async fn test_counter_advances_exactly_once_per_call() {
        let agent = agent();
        let pre = snapshot(40.0, 0.08, 200.0, 20.0);
        let post = snapshot(55.0, 0.03, 200.0, 20.0);
        let dec = decision(AdaptationAction::ScaleOut { amount: 1 });
        let refl = reflection(true, 15.0);

        assert_eq!(agent.learning_cycles(), 0);
        let first = agent.enrich(&refl, &dec, &pre, &post).await;
        assert_eq!(first.learning_cycle, 1);
        let second = agent.enrich(&refl, &dec, &pre, &post).await;
        assert_eq!(second.learning_cycle, 2);
        assert_eq!(agent.learning_cycles(), 2);
    }

    #[tokio::test]
    async fn test_statistics_updated_every_cycle() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let agent = EnrichAgent::new(store.clone(), LearningConfig::default());
        let pre = snapshot(40.0, 0.08, 200.0, 20.0);
        let post = snapshot(55.0, 0.03, 200.0, 20.0);

        agent
            .enrich(
                &reflection(true, 15.0),
                &decision(AdaptationAction::ScaleOut { amount: 1 }),
                &pre,
                &post,
            )
            .await;
        agent
            .enrich(
                &reflection(false, -5.0),
                &decision(AdaptationAction::Restart),
                &pre,
                &post,
            )
            .await;

        let data = store.snapshot().await;
        assert_eq!(data.stats.total_adaptations, 2);
        assert_eq!(data.stats.successful_adaptations, 1);
        assert_eq!(data.stats.action_counts["horizontal"], 1);
        assert_eq!(data.stats.action_counts["restart"], 1);
        assert_eq!(data.stats.action_successes.get("restart"), None);
    }

    #[tokio::test]
    async fn test_fresh_value_update_is_scaled_reward() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let agent = EnrichAgent::new(store.clone(), LearningConfig::default());
        // pre: high error, low latency, critical health
        let pre = snapshot(40.0, 0.08, 200.0, 20.0);
        let post = snapshot(60.0, 0.03, 200.0, 20.0);

        agent
            .enrich(
                &reflection(true, 20.0),
                &decision(AdaptationAction::ScaleOut { amount: 1 }),
                &pre,
                &post,
            )
            .await;

        // reward = 20/10 + 10 = 12; empty table makes the next-state max
        // zero, so Q = 0 + 0.1 * 12
        let data = store.snapshot().await;
        let q = data.q_value("high_low_critical", "horizontal_increase");
        assert!((q - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_next_state_max_feeds_update() {
        let store = Arc::new(KnowledgeStore::in_memory());
        store
            .mutate(|data| {
                // learned value for the post state, on an action never
                // taken from the pre state
                data.values.insert(value_key("medium_low_degraded", "restart"), 2.0);
            })
            .await;
        let agent = EnrichAgent::new(store.clone(), LearningConfig::default());

        let pre = snapshot(40.0, 0.08, 200.0, 20.0); // high_low_critical
        let post = snapshot(60.0, 0.03, 200.0, 20.0); // medium_low_degraded

        agent
            .enrich(
                &reflection(true, 20.0),
                &decision(AdaptationAction::ScaleOut { amount: 1 }),
                &pre,
                &post,
            )
            .await;

        // Q = 0 + 0.1 * (12 + 0.95 * 2.0 - 0) = 1.39
        let data = store.snapshot().await;
        let q = data.q_value("high_low_critical", "horizontal_increase");
        assert!((q - 1.39).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_pattern_promotion_needs_support_and_confidence() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let agent = EnrichAgent::new(store.clone(), LearningConfig::default());
        let pre = snapshot(40.0, 0.08, 200.0, 20.0);
        let post = snapshot(55.0, 0.03, 200.0, 20.0);
        let dec = decision(AdaptationAction::ScaleOut { amount: 1 });

        // two successful occurrences: support 2 < 3, not yet promoted
        for _ in 0..2 {
            let result = agent.enrich(&reflection(true, 10.0), &dec, &pre, &post).await;
            assert!(result.patterns_learned.is_empty());
        }

        // third success crosses the support floor at confidence 1.0
        let result = agent.enrich(&reflection(true, 10.0), &dec, &pre, &post).await;
        assert_eq!(result.patterns_learned.len(), 1);
        let pattern = &result.patterns_learned[0];
        assert_eq!(pattern.pattern_key, "high_low_medium_horizontal_increase");
        assert_eq!(pattern.support, 3);
        assert_eq!(pattern.confidence, 1.0);

        let data = store.snapshot().await;
        assert!(data.patterns.contains_key("high_low_medium_horizontal_increase"));
    }

    #[tokio::test]
    async fn test_low_confidence_pattern_not_promoted() {
        let agent = agent();
        let pre = snapshot(40.0, 0.08, 200.0, 20.0);
        let post = snapshot(55.0, 0.03, 200.0, 20.0);
        let dec = decision(AdaptationAction::ScaleOut { amount: 1 });

        // one success then three failures: confidence 0.25 at support 4
        agent.enrich(&reflection(true, 10.0), &dec, &pre, &post).await;
        for _ in 0..3 {
            let result = agent.enrich(&reflection(false, -10.0), &dec, &pre, &post).await;
            assert!(result.patterns_learned.is_empty());
        }
    }

    #[tokio::test]
    async fn test_stable_cycle_still_counts() {
        let store = Arc::new(KnowledgeStore::in_memory());
        let agent = EnrichAgent::new(store.clone(), LearningConfig::default());
        let pre = snapshot(90.0, 0.005, 100.0, 20.0);

        let stable = Decision {
            timestamp: Utc::now(),
            service: "checkout".to_string(),
            actions: Vec::new(),
            rationale: String::new(),
            candidates_evaluated: 0,
            confidence: 0.9,
            utility_scores: Vec::new(),
        };
        let result = agent.enrich(&reflection(true, 0.0), &stable, &pre, &pre).await;

        assert!(result.patterns_learned.is_empty());
        assert!(result.policies_updated.is_empty());
        let data = store.snapshot().await;
        assert_eq!(data.stats.total_adaptations, 1);
    }

    #[tokio::test]
    async fn test_periodic_persistence_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        let store = Arc::new(KnowledgeStore::open(&path));
        let agent = EnrichAgent::new(
            store,
            LearningConfig { persist_every: 2, ..LearningConfig::default() },
        );
        let pre = snapshot(40.0, 0.08, 200.0, 20.0);
        let post = snapshot(55.0, 0.03, 200.0, 20.0);
        let dec = decision(AdaptationAction::ScaleOut { amount: 1 });

        agent.enrich(&reflection(true, 10.0), &dec, &pre, &post).await;
        assert!(!path.exists());
        agent.enrich(&reflection(true, 10.0), &dec, &pre, &post).await;
        assert!(path.exists());
    }
}
