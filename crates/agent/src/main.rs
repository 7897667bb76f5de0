//! AURORA adaptation agent
//!
//! Runs the Assess -> Weigh -> Act -> Reflect -> Enrich loop for every
//! discovered service on a fixed interval, learning across cycles into
//! a persistent knowledge store.

use anyhow::Result;
use aware_lib::{
    act::{ExecutorConfig, MutationExecutor},
    anomaly::ThreeSigmaDetector,
    assess::{AssessAgent, AssessConfig},
    audit::CycleAuditLog,
    discovery::{self, PodDiscovery, StaticPodDiscovery},
    enrich::{EnrichAgent, LearningConfig},
    health::{components, HealthRegistry},
    knowledge::KnowledgeStore,
    observability::StructuredLogger,
    orchestrator::{CycleOrchestrator, OrchestratorConfig},
    reflect::{ReflectAgent, ReflectConfig},
    weigh::{WeighAgent, WeighConfig},
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod sim;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs with env-filter control
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting aurora-agent");

    let config = config::AgentConfig::load()?;
    info!(instance = %config.instance_name, namespace = %config.namespace, "Agent configured");

    let health_registry = HealthRegistry::new();
    health_registry.register(components::TELEMETRY).await;
    health_registry.register(components::DECISION).await;
    health_registry.register(components::EXECUTOR).await;
    health_registry.register(components::KNOWLEDGE).await;

    let logger = StructuredLogger::new(&config.instance_name);

    // collaborators: the simulated cluster stands in for the monitoring
    // backend and control plane until real integrations are wired up
    let cluster = Arc::new(match config.static_pods() {
        pods if pods.is_empty() => sim::SimulatedCluster::with_default_pods(),
        pods => sim::SimulatedCluster::new(pods),
    });
    let discovery: Arc<dyn PodDiscovery> = if config.static_pods().is_empty() {
        cluster.clone()
    } else {
        Arc::new(StaticPodDiscovery::new(config.static_pods()))
    };

    let knowledge = Arc::new(KnowledgeStore::open(&config.knowledge_path));

    let orchestrator = Arc::new(
        CycleOrchestrator::new(
            AssessAgent::new(
                cluster.clone(),
                Arc::new(ThreeSigmaDetector::default()),
                AssessConfig::default(),
            ),
            WeighAgent::new(WeighConfig::default()),
            MutationExecutor::new(cluster.clone(), ExecutorConfig::default()),
            ReflectAgent::new(ReflectConfig::default()),
            EnrichAgent::new(knowledge.clone(), LearningConfig::default()),
            knowledge.clone(),
            logger.clone(),
            OrchestratorConfig {
                stabilize_wait: Duration::from_secs(config.stabilize_secs),
            },
        )
        .with_audit(CycleAuditLog::new(&config.audit_log_path)),
    );

    // health and metrics server
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), orchestrator.clone()));
    let api_port = config.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            warn!(error = %e, "API server exited");
        }
    });

    health_registry.set_ready(true).await;

    let pods = discovery.list_pods(&config.namespace).await.unwrap_or_default();
    logger.log_startup(AGENT_VERSION, discovery::services_from_pods(&pods).len());

    run_monitoring_loop(&config, discovery, orchestrator.clone(), &health_registry).await;

    // an in-flight round has already finished; flush learned state
    logger.log_shutdown("signal received");
    if let Err(e) = orchestrator.flush_knowledge().await {
        warn!(error = %e, "failed to flush knowledge store");
    }
    if let Err(e) = orchestrator.export_knowledge(Path::new(&config.knowledge_export_path)).await {
        warn!(error = %e, "failed to export knowledge");
    }
    info!("Shutting down");

    Ok(())
}

/// Run adaptation rounds until a shutdown signal arrives.
///
/// Each round runs one cycle per discovered service, concurrently; the
/// signal is only observed between rounds, so an in-flight round always
/// completes its stages.
async fn run_monitoring_loop(
    config: &config::AgentConfig,
    discovery: Arc<dyn PodDiscovery>,
    orchestrator: Arc<CycleOrchestrator>,
    health: &HealthRegistry,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
    let mut round = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                round += 1;
                run_round(config, &discovery, &orchestrator, health, round).await;

                if round % config.export_every_rounds == 0 {
                    let path = Path::new(&config.knowledge_export_path);
                    if let Err(e) = orchestrator.export_knowledge(path).await {
                        warn!(error = %e, "periodic knowledge export failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

/// One adaptation round over every discovered service
async fn run_round(
    config: &config::AgentConfig,
    discovery: &Arc<dyn PodDiscovery>,
    orchestrator: &Arc<CycleOrchestrator>,
    health: &HealthRegistry,
    round: u64,
) {
    let pods = match discovery.list_pods(&config.namespace).await {
        Ok(pods) => {
            health.mark_healthy(components::TELEMETRY).await;
            pods
        }
        Err(e) => {
            warn!(error = %e, "pod discovery failed, skipping round");
            health.mark_degraded(components::TELEMETRY, e.to_string()).await;
            return;
        }
    };

    let services = discovery::services_from_pods(&pods);
    info!(round, services = services.len(), "starting adaptation round");

    let mut handles = Vec::with_capacity(services.len());
    for service in services {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            let report = orchestrator.run_cycle(&service, Some(&service)).await;
            (service, report.status)
        }));
    }

    for handle in handles {
        match handle.await {
            Ok((service, status)) => {
                info!(service = %service, status = status.as_str(), "cycle finished")
            }
            Err(e) => warn!(error = %e, "cycle task panicked"),
        }
    }
}
