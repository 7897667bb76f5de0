//! Cycle orchestrator: sequences the five phases as one transaction per
//! service per interval
//!
//! `ASSESS -> WEIGH -> [stable] -> ACT -> STABILIZE -> ASSESS(post) ->
//! REFLECT -> ENRICH -> complete`. Any stage failure terminates the
//! cycle at a recorded terminal state; the next interval proceeds
//! independently. Every terminal state is logged with per-phase
//! durations and appended to the CSV audit log.

use crate::act::MutationExecutor;
use crate::assess::AssessAgent;
use crate::audit::{CycleAuditLog, CycleAuditRecord};
use crate::enrich::EnrichAgent;
use crate::knowledge::{KnowledgeStore, KnowledgeSummary};
use crate::models::{Decision, ExecutionResult, Reflection, SystemSnapshot};
use crate::observability::{LoopMetrics, StructuredLogger};
use crate::reflect::{ReflectAgent, ReflectionSummary};
use crate::weigh::WeighAgent;
use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, warn};

/// Configuration for cycle sequencing
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Wait between acting and re-assessing, letting the adaptation take
    /// observable effect
    pub stabilize_wait: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { stabilize_wait: Duration::from_secs(30) }
    }
}

/// Terminal state of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleStatus {
    /// No adaptation was needed
    Stable,
    /// Full cycle ran through enrichment
    Completed,
    /// Assessment produced no snapshot
    Aborted,
    /// A stage failed
    Error,
}

impl CycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStatus::Stable => "stable",
            CycleStatus::Completed => "completed",
            CycleStatus::Aborted => "aborted",
            CycleStatus::Error => "error",
        }
    }
}

/// Duration of one phase within a cycle
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub phase: &'static str,
    pub duration_secs: f64,
}

/// Everything recorded about one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub service: String,
    pub status: CycleStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adaptation_success: Option<bool>,
    pub health_pre: Option<f64>,
    pub health_post: Option<f64>,
    pub health_delta: Option<f64>,
    pub phases: Vec<PhaseTiming>,
    pub total_duration_secs: f64,
}

/// Summary across recent cycles
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub total_cycles: u64,
    pub reflection: ReflectionSummary,
    pub knowledge: KnowledgeSummary,
}

/// Coordinates the five agents over the shared knowledge store
pub struct CycleOrchestrator {
    assess: AssessAgent,
    weigh: WeighAgent,
    executor: MutationExecutor,
    reflect: ReflectAgent,
    enrich: EnrichAgent,
    knowledge: Arc<KnowledgeStore>,
    audit: Option<Mutex<CycleAuditLog>>,
    metrics: LoopMetrics,
    logger: StructuredLogger,
    cycle_count: AtomicU64,
    config: OrchestratorConfig,
}

impl CycleOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        assess: AssessAgent,
        weigh: WeighAgent,
        executor: MutationExecutor,
        reflect: ReflectAgent,
        enrich: EnrichAgent,
        knowledge: Arc<KnowledgeStore>,
        logger: StructuredLogger,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            assess,
            weigh,
            executor,
            reflect,
            enrich,
            knowledge,
            audit: None,
            metrics: LoopMetrics::new(),
            logger,
            cycle_count: AtomicU64::new(0),
            config,
        }
    }

    /// Attach the CSV audit log
    pub fn with_audit(mut self, audit: CycleAuditLog) -> Self {
        self.audit = Some(Mutex::new(audit));
        self
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::SeqCst)
    }

    /// Run one full cycle for a service. Never panics or propagates:
    /// every outcome lands in the report's terminal status.
    pub async fn run_cycle(&self, service: &str, scope: Option<&str>) -> CycleReport {
        let cycle = self.cycle_count.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let mut phases: Vec<PhaseTiming> = Vec::with_capacity(6);

        self.logger.log_cycle_start(cycle, service);

        // ASSESS
        let phase_start = Instant::now();
        let pre = self.assess.assess(service, scope).await;
        push_phase(&mut phases, "assess", phase_start);

        let pre = match pre {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(service = %service, error = %e, "assessment failed, aborting cycle");
                return self.finish(
                    cycle,
                    service,
                    CycleStatus::Aborted,
                    Some(e.to_string()),
                    None,
                    None,
                    None,
                    None,
                    phases,
                    started,
                );
            }
        };
        self.metrics.set_health_score(service, pre.health_score);

        // WEIGH
        let phase_start = Instant::now();
        let learned = self.knowledge.snapshot().await;
        let decision = self.weigh.weigh(&pre, &learned);
        push_phase(&mut phases, "weigh", phase_start);
        self.logger.log_decision(
            service,
            decision.actions.len(),
            decision.confidence,
            &decision.rationale,
        );

        if decision.is_stable() {
            return self.finish(
                cycle,
                service,
                CycleStatus::Stable,
                Some("no adaptations required".to_string()),
                None,
                Some(&pre),
                None,
                None,
                phases,
                started,
            );
        }

        // ACT
        let phase_start = Instant::now();
        let execution = self.executor.apply(&decision).await;
        push_phase(&mut phases, "act", phase_start);
        self.logger.log_execution(service, execution.success, &execution.errors);
        self.metrics.inc_adaptations(execution.actions_executed);

        if !execution.success {
            // the adaptation never landed; reflecting on unchanged state
            // would only teach noise
            self.metrics.inc_execution_errors(execution.errors.len());
            return self.finish(
                cycle,
                service,
                CycleStatus::Error,
                Some(format!("execution failed: {}", execution.errors.join("; "))),
                Some(&decision),
                Some(&pre),
                Some(&execution),
                None,
                phases,
                started,
            );
        }

        // STABILIZE
        let phase_start = Instant::now();
        tokio::time::sleep(self.config.stabilize_wait).await;
        push_phase(&mut phases, "stabilize", phase_start);

        // ASSESS (post)
        let phase_start = Instant::now();
        let post = match self.assess.assess(service, scope).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // fall back to the pre-state so reflection still closes
                // the cycle; it will see no movement
                warn!(service = %service, error = %e, "post-adaptation assessment failed");
                pre.clone()
            }
        };
        push_phase(&mut phases, "assess_post", phase_start);

        // REFLECT
        let phase_start = Instant::now();
        let reflection = self.reflect.reflect(&pre, &post, &decision, &execution);
        push_phase(&mut phases, "reflect", phase_start);
        self.logger.log_reflection(service, reflection.success, reflection.health_delta);
        if reflection.success {
            self.metrics.inc_successful_adaptation();
        }

        // ENRICH
        let phase_start = Instant::now();
        let enrichment = self.enrich.enrich(&reflection, &decision, &pre, &post).await;
        push_phase(&mut phases, "enrich", phase_start);
        self.metrics
            .set_knowledge_sizes(enrichment.pattern_table_size, enrichment.value_table_size);

        self.finish_completed(
            cycle,
            service,
            &pre,
            &decision,
            &execution,
            &reflection,
            enrichment.patterns_learned.len(),
            enrichment.policies_updated.len(),
            phases,
            started,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        cycle: u64,
        service: &str,
        status: CycleStatus,
        reason: Option<String>,
        decision: Option<&Decision>,
        pre: Option<&SystemSnapshot>,
        execution: Option<&ExecutionResult>,
        reflection: Option<&Reflection>,
        phases: Vec<PhaseTiming>,
        started: Instant,
    ) -> CycleReport {
        let total = started.elapsed();
        let report = CycleReport {
            cycle_number: cycle,
            service: service.to_string(),
            status,
            reason: reason.clone(),
            adaptation_success: reflection.map(|r| r.success),
            health_pre: pre.map(|s| s.health_score),
            health_post: reflection.map(|r| r.post_health),
            health_delta: reflection.map(|r| r.health_delta),
            phases,
            total_duration_secs: total.as_secs_f64(),
        };

        self.metrics.inc_cycle(status.as_str());
        self.metrics.observe_cycle_duration(total.as_secs_f64());
        self.logger.log_cycle_end(
            cycle,
            service,
            status.as_str(),
            total.as_secs_f64(),
            reason.as_deref(),
        );
        if status == CycleStatus::Error {
            error!(service = %service, reason = reason.as_deref().unwrap_or(""), "cycle failed");
        }

        self.append_audit(&report, pre, decision, execution, reflection, 0, 0);
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_completed(
        &self,
        cycle: u64,
        service: &str,
        pre: &SystemSnapshot,
        decision: &Decision,
        execution: &ExecutionResult,
        reflection: &Reflection,
        patterns_learned: usize,
        policies_updated: usize,
        phases: Vec<PhaseTiming>,
        started: Instant,
    ) -> CycleReport {
        let total = started.elapsed();
        let report = CycleReport {
            cycle_number: cycle,
            service: service.to_string(),
            status: CycleStatus::Completed,
            reason: None,
            adaptation_success: Some(reflection.success),
            health_pre: Some(reflection.pre_health),
            health_post: Some(reflection.post_health),
            health_delta: Some(reflection.health_delta),
            phases,
            total_duration_secs: total.as_secs_f64(),
        };

        self.metrics.inc_cycle(CycleStatus::Completed.as_str());
        self.metrics.observe_cycle_duration(total.as_secs_f64());
        self.logger.log_cycle_end(cycle, service, "completed", total.as_secs_f64(), None);

        self.append_audit(
            &report,
            Some(pre),
            Some(decision),
            Some(execution),
            Some(reflection),
            patterns_learned,
            policies_updated,
        );
        report
    }

    #[allow(clippy::too_many_arguments)]
    fn append_audit(
        &self,
        report: &CycleReport,
        pre: Option<&SystemSnapshot>,
        decision: Option<&Decision>,
        execution: Option<&ExecutionResult>,
        reflection: Option<&Reflection>,
        patterns_learned: usize,
        policies_updated: usize,
    ) {
        let Some(audit) = &self.audit else { return };

        let record = CycleAuditRecord {
            cycle_number: report.cycle_number,
            service: report.service.clone(),
            status: report.status.as_str().to_string(),
            health_pre: report
                .health_pre
                .or_else(|| pre.map(|s| s.health_score))
                .unwrap_or(0.0),
            health_post: report.health_post.unwrap_or(0.0),
            health_delta: report.health_delta.unwrap_or(0.0),
            slo_violations: pre.map_or(0, |s| s.violation_count()),
            anomalies: pre.map_or(0, |s| s.anomalous_metric_count()),
            actions_planned: decision.map_or(0, |d| d.actions.len()),
            actions_executed: execution.map_or(0, |e| e.actions_executed),
            adaptation_success: reflection.map_or(false, |r| r.success),
            patterns_learned,
            policies_updated,
            cycle_duration_secs: report.total_duration_secs,
        };

        let guard = audit.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = guard.append(&record) {
            warn!(error = %e, "failed to append audit row");
        }
    }

    /// Summary over recent reflections and the knowledge store
    pub async fn cycle_summary(&self, lookback: usize) -> CycleSummary {
        CycleSummary {
            total_cycles: self.cycle_count(),
            reflection: self.reflect.summary(lookback),
            knowledge: self.knowledge.summary().await,
        }
    }

    /// Export learned knowledge in human-readable form
    pub async fn export_knowledge(&self, path: &Path) -> Result<()> {
        self.knowledge.export(path, self.enrich.learning_cycles()).await?;
        self.logger.log_knowledge_export(&path.display().to_string());
        Ok(())
    }

    /// Flush the knowledge store; called on shutdown and after the last
    /// in-flight cycle finished its stage
    pub async fn flush_knowledge(&self) -> Result<()> {
        self.knowledge.persist().await
    }
}

fn push_phase(phases: &mut Vec<PhaseTiming>, phase: &'static str, started: Instant) {
    phases.push(PhaseTiming { phase, duration_secs: started.elapsed().as_secs_f64() });
}
