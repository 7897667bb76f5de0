//! Agent configuration

use anyhow::Result;
use serde::Deserialize;

/// Agent configuration, loaded from `AURORA_`-prefixed environment
/// variables with per-field defaults
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Instance name used in structured log records
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// Kubernetes namespace whose pods are adapted
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// HTTP port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between adaptation cycles per service
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Seconds to wait after acting before re-assessing
    #[serde(default = "default_stabilize")]
    pub stabilize_secs: u64,

    /// Path of the persisted knowledge store
    #[serde(default = "default_knowledge_path")]
    pub knowledge_path: String,

    /// Path of the CSV audit log
    #[serde(default = "default_audit_path")]
    pub audit_log_path: String,

    /// Path the knowledge export is written to
    #[serde(default = "default_export_path")]
    pub knowledge_export_path: String,

    /// Export the knowledge store every this many monitoring rounds
    #[serde(default = "default_export_every")]
    pub export_every_rounds: u64,

    /// Pods to adapt when discovery is static (comma-separated)
    #[serde(default)]
    pub pods: Option<String>,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "aurora-agent".to_string())
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    300
}

fn default_stabilize() -> u64 {
    30
}

fn default_knowledge_path() -> String {
    "knowledge_base.json".to_string()
}

fn default_audit_path() -> String {
    "aware_loop_log.csv".to_string()
}

fn default_export_path() -> String {
    "knowledge_export.json".to_string()
}

fn default_export_every() -> u64 {
    10
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("AURORA"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| Self::defaults()))
    }

    fn defaults() -> Self {
        Self {
            instance_name: default_instance_name(),
            namespace: default_namespace(),
            api_port: default_api_port(),
            interval_secs: default_interval(),
            stabilize_secs: default_stabilize(),
            knowledge_path: default_knowledge_path(),
            audit_log_path: default_audit_path(),
            knowledge_export_path: default_export_path(),
            export_every_rounds: default_export_every(),
            pods: None,
        }
    }

    /// Static pod list from configuration, if provided
    pub fn static_pods(&self) -> Vec<String> {
        self.pods
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}
