//! Simulated cluster collaborators
//!
//! Stands in for the monitoring backend, control plane and pod
//! discovery when no live cluster is configured, so the full loop can
//! run end to end. Load responds to adaptations: error pressure falls
//! as replicas are added, cost rises with allocated resources.

use anyhow::Result;
use async_trait::async_trait;
use aware_lib::act::{ContainerResources, ControlPlane, PatchOutcome, ResourceSpec};
use aware_lib::catalog::MetricDef;
use aware_lib::discovery::PodDiscovery;
use aware_lib::telemetry::{MetricSeries, SampleRow, TelemetrySource, TimeWindow};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::debug;

/// Baseline HTTP request volume per sampling window
const REQUESTS_PER_WINDOW: f64 = 600.0;

/// Error pressure divided by the replica count yields the error count
const ERROR_PRESSURE: f64 = 120.0;

#[derive(Debug, Clone)]
struct SimService {
    replicas: u32,
    /// Monotonic spec version used as the patch token
    spec_version: u64,
    cpu_request_millis: u64,
    memory_request_mi: u64,
    /// Restart clears accumulated degradation
    degradation: f64,
}

impl Default for SimService {
    fn default() -> Self {
        Self {
            replicas: 2,
            spec_version: 1,
            cpu_request_millis: 500,
            memory_request_mi: 256,
            degradation: 0.0,
        }
    }
}

/// Shared simulated cluster state
pub struct SimulatedCluster {
    services: Mutex<HashMap<String, SimService>>,
    pods: Vec<String>,
}

impl SimulatedCluster {
    pub fn new(pods: Vec<String>) -> Self {
        Self { services: Mutex::new(HashMap::new()), pods }
    }

    /// Default two-service topology
    pub fn with_default_pods() -> Self {
        Self::new(vec![
            "checkout-7d4b9c6f4-x2x9p".to_string(),
            "checkout-7d4b9c6f4-9kq1z".to_string(),
            "catalog-66f5c9d8b-mm4tw".to_string(),
        ])
    }

    fn with_service<T>(&self, scope: Option<&str>, f: impl FnOnce(&mut SimService) -> T) -> T {
        let key = scope.unwrap_or("default").to_string();
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        f(services.entry(key).or_default())
    }

    fn service_entry<T>(&self, service: &str, f: impl FnOnce(&mut SimService) -> T) -> T {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        f(services.entry(service.to_string()).or_default())
    }
}

#[async_trait]
impl TelemetrySource for SimulatedCluster {
    async fn query(
        &self,
        metrics: &[MetricDef],
        _window: TimeWindow,
        step_secs: u32,
        scope: Option<&str>,
    ) -> Result<MetricSeries> {
        let (replicas, cpu_millis, degradation) = self.with_service(scope, |s| {
            // each observation accrues a little wear that a restart clears
            s.degradation = (s.degradation + 0.5).min(20.0);
            (s.replicas, s.cpu_request_millis, s.degradation)
        });

        let errors = ERROR_PRESSURE / f64::from(replicas.max(1)) + degradation;
        let cpu_cost = 0.05 * f64::from(replicas) * (cpu_millis as f64 / 500.0);

        let values: HashMap<&str, f64> = HashMap::from([
            ("cpu.used.percent", 40.0 + 10.0 * ERROR_PRESSURE / f64::from(replicas.max(1)) / 60.0),
            ("memory.used.percent", 55.0),
            ("net.http.request.count", REQUESTS_PER_WINDOW),
            ("net.http.error.count", errors),
            ("net.http.request.time", 150.0 + degradation * 10.0),
            ("kubernetes.pod.status.ready", 1.0),
            ("cost.workload.cpu.total", cpu_cost),
            ("cost.workload.memory.total", cpu_cost * 0.6),
            ("cost.workload.storage.total", 0.05),
        ]);

        debug!(scope = scope.unwrap_or("default"), replicas, errors, "simulated sample");

        let rows = (0..10)
            .map(|i| SampleRow {
                timestamp: i64::from(i) * i64::from(step_secs),
                values: metrics
                    .iter()
                    .map(|m| values.get(m.id).copied().or(Some(0.0)))
                    .collect(),
            })
            .collect();
        Ok(MetricSeries { rows })
    }
}

#[async_trait]
impl ControlPlane for SimulatedCluster {
    async fn replica_count(&self, service: &str) -> Result<u32> {
        Ok(self.service_entry(service, |s| s.replicas))
    }

    async fn set_replica_count(&self, service: &str, replicas: u32) -> Result<()> {
        self.service_entry(service, |s| s.replicas = replicas);
        Ok(())
    }

    async fn resource_spec(&self, service: &str) -> Result<ResourceSpec> {
        Ok(self.service_entry(service, |s| ResourceSpec {
            version: s.spec_version.to_string(),
            containers: vec![ContainerResources {
                name: "app".to_string(),
                requests: BTreeMap::from([
                    ("cpu".to_string(), format!("{}m", s.cpu_request_millis)),
                    ("memory".to_string(), format!("{}Mi", s.memory_request_mi)),
                ]),
                limits: BTreeMap::from([
                    ("cpu".to_string(), format!("{}m", s.cpu_request_millis * 2)),
                    ("memory".to_string(), format!("{}Mi", s.memory_request_mi * 2)),
                ]),
            }],
        }))
    }

    async fn patch_resource_spec(
        &self,
        service: &str,
        spec: &ResourceSpec,
    ) -> Result<PatchOutcome> {
        Ok(self.service_entry(service, |s| {
            if spec.version != s.spec_version.to_string() {
                return PatchOutcome::Conflict;
            }
            if let Some(container) = spec.containers.first() {
                if let Some(cpu) = container
                    .requests
                    .get("cpu")
                    .and_then(|q| q.strip_suffix('m'))
                    .and_then(|q| q.parse().ok())
                {
                    s.cpu_request_millis = cpu;
                }
                if let Some(memory) = container
                    .requests
                    .get("memory")
                    .and_then(|q| q.strip_suffix("Mi"))
                    .and_then(|q| q.parse().ok())
                {
                    s.memory_request_mi = memory;
                }
            }
            s.spec_version += 1;
            PatchOutcome::Applied
        }))
    }

    async fn trigger_restart(&self, service: &str) -> Result<()> {
        self.service_entry(service, |s| s.degradation = 0.0);
        Ok(())
    }
}

#[async_trait]
impl PodDiscovery for SimulatedCluster {
    async fn list_pods(&self, _namespace: &str) -> Result<Vec<String>> {
        Ok(self.pods.clone())
    }
}
