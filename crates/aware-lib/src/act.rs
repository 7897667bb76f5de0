//! Act phase: apply adaptation decisions against the cluster control
//! plane
//!
//! Each action in a decision executes independently; one failing never
//! blocks its siblings. Every control-plane call is timeout-bounded so
//! a hang surfaces as a reported failure. The resource-resize path is
//! the only true read-modify-write and uses optimistic-concurrency
//! retry against the spec's version token.

use crate::models::{ActionResult, AdaptationAction, Decision, ExecutionResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Resource requests and limits for one container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub name: String,
    /// Resource name ("cpu", "memory") -> quantity ("500m", "1Gi")
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

/// A service's live resource spec plus its concurrency version token.
///
/// The control plane rejects a patch whose version is stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub version: String,
    pub containers: Vec<ContainerResources>,
}

/// Result of a versioned patch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The version token was stale; re-fetch and retry
    Conflict,
}

/// Write access to the cluster control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn replica_count(&self, service: &str) -> Result<u32>;
    async fn set_replica_count(&self, service: &str, replicas: u32) -> Result<()>;
    async fn resource_spec(&self, service: &str) -> Result<ResourceSpec>;
    /// Patch carrying the version from the fetched spec
    async fn patch_resource_spec(&self, service: &str, spec: &ResourceSpec)
        -> Result<PatchOutcome>;
    async fn trigger_restart(&self, service: &str) -> Result<()>;
}

/// Configuration for the mutation executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper replica bound for scale-out
    pub max_pods: u32,
    /// Total patch attempts on version conflict
    pub max_patch_attempts: u32,
    /// Timeout for reads and scale writes
    pub scale_timeout: Duration,
    /// Timeout for restart acknowledgment
    pub restart_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_pods: 5,
            max_patch_attempts: 3,
            scale_timeout: Duration::from_secs(10),
            restart_timeout: Duration::from_secs(30),
        }
    }
}

/// Applies decisions to the cluster
pub struct MutationExecutor {
    control_plane: Arc<dyn ControlPlane>,
    config: ExecutorConfig,
}

impl MutationExecutor {
    pub fn new(control_plane: Arc<dyn ControlPlane>, config: ExecutorConfig) -> Self {
        Self { control_plane, config }
    }

    /// Execute every action in the decision, one result per action
    pub async fn apply(&self, decision: &Decision) -> ExecutionResult {
        if decision.actions.is_empty() {
            return ExecutionResult::empty();
        }

        let mut results = Vec::with_capacity(decision.actions.len());
        let mut errors = Vec::new();

        for candidate in &decision.actions {
            let result = self.execute(&decision.service, &candidate.action).await;
            if !result.success {
                if let Some(error) = &result.error {
                    errors.push(error.clone());
                }
            }
            results.push(result);
        }

        let success = results.iter().all(|r| r.success);
        info!(
            service = %decision.service,
            actions = results.len(),
            success,
            "execution complete"
        );

        ExecutionResult { success, actions_executed: results.len(), results, errors }
    }

    async fn execute(&self, service: &str, action: &AdaptationAction) -> ActionResult {
        match action {
            AdaptationAction::ScaleOut { amount } => {
                self.scale(service, action, i64::from(*amount)).await
            }
            AdaptationAction::ScaleIn { amount } => {
                self.scale(service, action, -i64::from(*amount)).await
            }
            AdaptationAction::ResizeUp { factor } => self.resize(service, action, *factor).await,
            // a decrease applies the reciprocal of the configured factor
            AdaptationAction::ResizeDown { factor } => {
                self.resize(service, action, 1.0 / *factor).await
            }
            AdaptationAction::Restart => self.restart(service, action).await,
        }
    }

    /// Adjust the replica count, clamped to [1, max_pods].
    ///
    /// Never retried here: the next cycle re-reads the live count, so
    /// drift self-corrects.
    async fn scale(&self, service: &str, action: &AdaptationAction, delta: i64) -> ActionResult {
        let current = match self
            .bounded(self.config.scale_timeout, "replica read", self.control_plane.replica_count(service))
            .await
        {
            Ok(count) => count,
            Err(e) => return ActionResult::failed(action, e),
        };

        let target = (i64::from(current) + delta)
            .clamp(1, i64::from(self.config.max_pods)) as u32;

        if let Err(e) = self
            .bounded(self.config.scale_timeout, "replica write", self.control_plane.set_replica_count(service, target))
            .await
        {
            return ActionResult::failed(action, e);
        }

        info!(service = %service, from = current, to = target, "replicas scaled");
        ActionResult {
            action: action.policy_key().to_string(),
            success: true,
            error: None,
            previous_replicas: Some(current),
            new_replicas: Some(target),
            message: Some(format!("scaled from {} to {} replicas", current, target)),
        }
    }

    /// Multiply every present request/limit quantity by `multiplier`,
    /// writing the whole spec back under optimistic-concurrency retry.
    async fn resize(
        &self,
        service: &str,
        action: &AdaptationAction,
        multiplier: f64,
    ) -> ActionResult {
        for attempt in 0..self.config.max_patch_attempts {
            let mut spec = match self
                .bounded(self.config.scale_timeout, "spec read", self.control_plane.resource_spec(service))
                .await
            {
                Ok(spec) => spec,
                Err(e) => return ActionResult::failed(action, e),
            };

            scale_resources(&mut spec, multiplier);

            match self
                .bounded(
                    self.config.scale_timeout,
                    "spec patch",
                    self.control_plane.patch_resource_spec(service, &spec),
                )
                .await
            {
                Ok(PatchOutcome::Applied) => {
                    info!(service = %service, multiplier, "resources resized");
                    return ActionResult {
                        action: action.policy_key().to_string(),
                        success: true,
                        error: None,
                        previous_replicas: None,
                        new_replicas: None,
                        message: Some(format!("adjusted resources by {:.2}x", multiplier)),
                    };
                }
                Ok(PatchOutcome::Conflict) => {
                    warn!(
                        service = %service,
                        attempt = attempt + 1,
                        attempts = self.config.max_patch_attempts,
                        "conflicting update, re-fetching"
                    );
                    // back off before retrying against the fresh object
                    let backoff =
                        Duration::from_millis(1000 + 500 * u64::from(attempt));
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return ActionResult::failed(action, e),
            }
        }

        ActionResult::failed(
            action,
            format!(
                "conflicting update on {} after {} attempts",
                service, self.config.max_patch_attempts
            ),
        )
    }

    /// Fire-and-forget rolling restart; success is control-plane
    /// acknowledgment, not pod readiness
    async fn restart(&self, service: &str, action: &AdaptationAction) -> ActionResult {
        match self
            .bounded(self.config.restart_timeout, "restart", self.control_plane.trigger_restart(service))
            .await
        {
            Ok(()) => {
                info!(service = %service, "restart triggered");
                ActionResult {
                    action: action.policy_key().to_string(),
                    success: true,
                    error: None,
                    previous_replicas: None,
                    new_replicas: None,
                    message: Some("restart triggered successfully".to_string()),
                }
            }
            Err(e) => ActionResult::failed(action, e),
        }
    }

    /// Bound a control-plane call, converting a hang into an error string
    async fn bounded<T>(
        &self,
        timeout: Duration,
        what: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T, String> {
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{} failed: {}", what, e)),
            Err(_) => Err(format!("{} timed out after {:?}", what, timeout)),
        }
    }
}

/// Apply the multiplicative transform to every present quantity
fn scale_resources(spec: &mut ResourceSpec, multiplier: f64) {
    for container in &mut spec.containers {
        for quantity in container.requests.values_mut().chain(container.limits.values_mut()) {
            *quantity = scale_quantity(quantity, multiplier);
        }
    }
}

/// Scale one Kubernetes quantity string.
///
/// Millicores and Mi/Gi byte quantities truncate to whole units; bare
/// values (cores, bytes) round to two decimals. Unparseable values pass
/// through unchanged.
fn scale_quantity(value: &str, factor: f64) -> String {
    if let Some(base) = value.strip_suffix('m').and_then(|v| v.parse::<f64>().ok()) {
        return format!("{}m", (base * factor) as u64);
    }
    if let Some(base) = value.strip_suffix("Mi").and_then(|v| v.parse::<f64>().ok()) {
        return format!("{}Mi", (base * factor) as u64);
    }
    if let Some(base) = value.strip_suffix("Gi").and_then(|v| v.parse::<f64>().ok()) {
        return format!("{}Gi", (base * factor) as u64);
    }
    match value.parse::<f64>() {
        Ok(base) => format!("{}", (base * factor * 100.0).round() / 100.0),
        Err(_) => {
            warn!(quantity = %value, "unparseable resource quantity left unchanged");
            value.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;
    use anyhow::bail;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn decision_with(actions: Vec<AdaptationAction>) -> Decision {
        Decision {
            timestamp: Utc::now(),
            service: "checkout".to_string(),
            actions: actions
                .into_iter()
                .map(|action| Candidate {
                    action,
                    priority: 1,
                    reason: "test".to_string(),
                    utility: 50.0,
                })
                .collect(),
            rationale: String::new(),
            candidates_evaluated: 1,
            confidence: 0.5,
            utility_scores: Vec::new(),
        }
    }

    fn spec(version: &str, cpu_request: &str) -> ResourceSpec {
        ResourceSpec {
            version: version.to_string(),
            containers: vec![ContainerResources {
                name: "app".to_string(),
                requests: BTreeMap::from([
                    ("cpu".to_string(), cpu_request.to_string()),
                    ("memory".to_string(), "256Mi".to_string()),
                ]),
                limits: BTreeMap::from([("cpu".to_string(), "1".to_string())]),
            }],
        }
    }

    /// Control plane that serves a fresh spec version per fetch and
    /// reports conflicts for a configurable number of patch attempts
    struct ConflictingControlPlane {
        fetches: AtomicU32,
        patches: Mutex<Vec<ResourceSpec>>,
        conflicts_before_success: u32,
        replicas: AtomicU32,
        fail_scale: bool,
    }

    impl ConflictingControlPlane {
        fn new(conflicts_before_success: u32) -> Self {
            Self {
                fetches: AtomicU32::new(0),
                patches: Mutex::new(Vec::new()),
                conflicts_before_success,
                replicas: AtomicU32::new(3),
                fail_scale: false,
            }
        }
    }

    #[async_trait]
    impl ControlPlane for ConflictingControlPlane {
        async fn replica_count(&self, _service: &str) -> Result<u32> {
            if self.fail_scale {
                bail!("control plane unavailable");
            }
            Ok(self.replicas.load(Ordering::SeqCst))
        }

        async fn set_replica_count(&self, _service: &str, replicas: u32) -> Result<()> {
            if self.fail_scale {
                bail!("control plane unavailable");
            }
            self.replicas.store(replicas, Ordering::SeqCst);
            Ok(())
        }

        async fn resource_spec(&self, _service: &str) -> Result<ResourceSpec> {
            let fetch = self.fetches.fetch_add(1, Ordering::SeqCst);
            // a concurrent writer bumps the version and cpu between fetches
            Ok(spec(&format!("v{}", fetch), &format!("{}m", 100 * (fetch + 1))))
        }

        async fn patch_resource_spec(
            &self,
            _service: &str,
            patched: &ResourceSpec,
        ) -> Result<PatchOutcome> {
            let mut patches = self.patches.lock().unwrap();
            patches.push(patched.clone());
            if (patches.len() as u32) <= self.conflicts_before_success {
                Ok(PatchOutcome::Conflict)
            } else {
                Ok(PatchOutcome::Applied)
            }
        }

        async fn trigger_restart(&self, _service: &str) -> Result<()> {
            Ok(())
        }
    }

    fn executor(cp: Arc<dyn ControlPlane>) -> MutationExecutor {
        MutationExecutor::new(cp, ExecutorConfig::default())
    }

    #[test]
    fn test_scale_quantity_units() {
        assert_eq!(scale_quantity("500m", 1.5), "750m");
        assert_eq!(scale_quantity("256Mi", 1.5), "384Mi");
        assert_eq!(scale_quantity("2Gi", 1.5), "3Gi");
        assert_eq!(scale_quantity("0.5", 1.5), "0.75");
        assert_eq!(scale_quantity("garbage", 1.5), "garbage");
    }

    #[test]
    fn test_scale_quantity_truncates_suffixed_units() {
        assert_eq!(scale_quantity("100m", 1.0 / 0.75), "133m");
        assert_eq!(scale_quantity("1Gi", 1.5), "1Gi");
    }

    #[tokio::test]
    async fn test_empty_decision_succeeds() {
        let cp = Arc::new(ConflictingControlPlane::new(0));
        let result = executor(cp).apply(&decision_with(vec![])).await;
        assert!(result.success);
        assert_eq!(result.actions_executed, 0);
    }

    #[tokio::test]
    async fn test_scale_out_clamps_to_max_pods() {
        let cp = Arc::new(ConflictingControlPlane::new(0));
        cp.replicas.store(4, Ordering::SeqCst);

        let result = executor(cp.clone())
            .apply(&decision_with(vec![AdaptationAction::ScaleOut { amount: 2 }]))
            .await;

        assert!(result.success);
        assert_eq!(result.results[0].previous_replicas, Some(4));
        assert_eq!(result.results[0].new_replicas, Some(5));
        assert_eq!(cp.replicas.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_scale_in_never_drops_below_one() {
        let cp = Arc::new(ConflictingControlPlane::new(0));
        cp.replicas.store(1, Ordering::SeqCst);

        let result = executor(cp.clone())
            .apply(&decision_with(vec![AdaptationAction::ScaleIn { amount: 3 }]))
            .await;

        assert!(result.success);
        assert_eq!(result.results[0].new_replicas, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_retries_against_fresh_spec() {
        let cp = Arc::new(ConflictingControlPlane::new(2));

        let result = executor(cp.clone())
            .apply(&decision_with(vec![AdaptationAction::ResizeUp { factor: 1.5 }]))
            .await;

        assert!(result.success);
        assert_eq!(cp.fetches.load(Ordering::SeqCst), 3);

        let patches = cp.patches.lock().unwrap();
        assert_eq!(patches.len(), 3);
        // every attempt transformed the freshly fetched object, not a
        // stale one: fetch n served cpu = 100*(n+1) millicores
        assert_eq!(patches[0].containers[0].requests["cpu"], "150m");
        assert_eq!(patches[1].containers[0].requests["cpu"], "300m");
        assert_eq!(patches[2].containers[0].requests["cpu"], "450m");
        assert_eq!(patches[2].version, "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_exhaustion_reports_failure() {
        let cp = Arc::new(ConflictingControlPlane::new(10));

        let result = executor(cp)
            .apply(&decision_with(vec![AdaptationAction::ResizeUp { factor: 1.5 }]))
            .await;

        assert!(!result.success);
        assert!(result.errors[0].contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn test_failing_action_does_not_block_siblings() {
        let mut cp = ConflictingControlPlane::new(0);
        cp.fail_scale = true;
        let cp = Arc::new(cp);

        let result = executor(cp)
            .apply(&decision_with(vec![
                AdaptationAction::ScaleOut { amount: 1 },
                AdaptationAction::Restart,
            ]))
            .await;

        assert!(!result.success);
        assert_eq!(result.actions_executed, 2);
        assert!(!result.results[0].success);
        assert!(result.results[1].success);
        assert_eq!(result.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_restart_reports_acknowledgment() {
        let cp = Arc::new(ConflictingControlPlane::new(0));
        let result = executor(cp)
            .apply(&decision_with(vec![AdaptationAction::Restart]))
            .await;
        assert!(result.success);
        assert_eq!(result.results[0].action, "restart");
    }
}
