//! Core library for the AURORA adaptation agent
//!
//! Implements the five-phase adaptation loop for cluster workloads:
//! - Assess: telemetry, anomaly detection, SLO checks, health scoring
//! - Weigh: rule-based candidate generation and utility selection
//! - Act: conflict-safe mutations against the cluster control plane
//! - Reflect: pre/post outcome evaluation and side-effect detection
//! - Enrich: pattern mining and tabular value learning
//!
//! plus the knowledge store the loop learns into, the per-cycle
//! orchestrator, audit logging, service discovery and observability.

pub mod act;
pub mod anomaly;
pub mod assess;
pub mod audit;
pub mod catalog;
pub mod discovery;
pub mod enrich;
pub mod errors;
pub mod health;
pub mod knowledge;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod reflect;
pub mod telemetry;
pub mod weigh;

pub use errors::CycleError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{LoopMetrics, StructuredLogger};
pub use orchestrator::{CycleOrchestrator, CycleReport, CycleStatus, OrchestratorConfig};
