//! Service discovery: pod listing and name normalization
//!
//! Pod names carry a replica-set hash and a random suffix
//! (`checkout-7d4b9c6f4-x2x9p`). Stripping the last two hyphen-delimited
//! segments yields the stable service identifier the rest of the loop
//! keys on.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Lists the pods the agent should adapt
#[async_trait]
pub trait PodDiscovery: Send + Sync {
    async fn list_pods(&self, namespace: &str) -> Result<Vec<String>>;
}

/// Discovery over a fixed pod list, for tests and static deployments
pub struct StaticPodDiscovery {
    pods: Vec<String>,
}

impl StaticPodDiscovery {
    pub fn new(pods: Vec<String>) -> Self {
        Self { pods }
    }
}

#[async_trait]
impl PodDiscovery for StaticPodDiscovery {
    async fn list_pods(&self, _namespace: &str) -> Result<Vec<String>> {
        Ok(self.pods.clone())
    }
}

/// Derive the stable service name from a pod name.
///
/// Strips the trailing replica-set hash and random suffix. Names with
/// too few segments to carry both are returned unchanged.
pub fn normalize_service_name(pod_name: &str) -> String {
    let parts: Vec<&str> = pod_name.split('-').collect();
    if parts.len() <= 2 {
        return pod_name.to_string();
    }
    parts[..parts.len() - 2].join("-")
}

/// Deduplicated service names for a pod list, preserving nothing of the
/// pod-level identity
pub fn services_from_pods(pods: &[String]) -> Vec<String> {
    let unique: BTreeSet<String> =
        pods.iter().map(|p| normalize_service_name(p)).collect();
    unique.into_iter().collect()
}
