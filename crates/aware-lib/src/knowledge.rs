//! Shared knowledge store: mined patterns, state-action values and
//! aggregate statistics
//!
//! One store serves every service's cycles. All mutation goes through a
//! single writer lock; the decision engine reads a cheap cloned snapshot
//! so a write in flight never blocks planning. The store is loaded at
//! startup, persisted periodically and flushed at shutdown.

use crate::models::{LearnedPattern, SystemSnapshot};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The five learnable action keys.
///
/// The value-table "next state max" ranges over this fixed space, not
/// over actions observed so far.
pub const ACTION_SPACE: &[&str] = &[
    "horizontal_increase",
    "horizontal_decrease",
    "vertical_increase",
    "vertical_decrease",
    "restart",
];

/// Aggregate adaptation statistics, updated every learning cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptationStats {
    pub total_adaptations: u64,
    pub successful_adaptations: u64,
    pub action_counts: BTreeMap<String, u64>,
    pub action_successes: BTreeMap<String, u64>,
}

/// Everything the store persists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeData {
    /// Promoted patterns by pattern key
    pub patterns: BTreeMap<String, LearnedPattern>,
    /// Occurrences per pattern key, promoted or not
    pub pattern_counts: BTreeMap<String, u64>,
    /// Successful occurrences per pattern key
    pub pattern_successes: BTreeMap<String, u64>,
    /// State-action values keyed by `"{state}|{action}"`
    pub values: BTreeMap<String, f64>,
    pub stats: AdaptationStats,
}

impl KnowledgeData {
    /// Value-table lookup; unseen pairs read as zero
    pub fn q_value(&self, state_key: &str, action_key: &str) -> f64 {
        self.values.get(&value_key(state_key, action_key)).copied().unwrap_or(0.0)
    }

    /// Learned best action for a state, if any value is known for it.
    ///
    /// Ranges over the fixed action space; returns `None` when every
    /// action still sits at the lazy default.
    pub fn best_action(&self, state_key: &str) -> Option<&'static str> {
        let (best, value) = ACTION_SPACE
            .iter()
            .map(|action| (*action, self.q_value(state_key, action)))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        if value == 0.0 && !self.values.contains_key(&value_key(state_key, best)) {
            return None;
        }
        Some(best)
    }
}

/// Composite key for the value table
pub fn value_key(state_key: &str, action_key: &str) -> String {
    format!("{}|{}", state_key, action_key)
}

/// Discretized error-rate level
pub fn error_level(error_rate: f64) -> &'static str {
    if error_rate > 0.05 {
        "high"
    } else if error_rate > 0.01 {
        "medium"
    } else {
        "low"
    }
}

/// Discretized latency level (milliseconds)
pub fn latency_level(latency_ms: f64) -> &'static str {
    if latency_ms > 1000.0 {
        "high"
    } else if latency_ms > 500.0 {
        "medium"
    } else {
        "low"
    }
}

/// Discretized throughput level (requests per second)
pub fn throughput_level(throughput: f64) -> &'static str {
    if throughput > 50.0 {
        "high"
    } else if throughput > 10.0 {
        "medium"
    } else {
        "low"
    }
}

/// Discretized health level
pub fn health_level(health: f64) -> &'static str {
    if health < 50.0 {
        "critical"
    } else if health < 80.0 {
        "degraded"
    } else {
        "healthy"
    }
}

/// State key for the value table: (error, latency, health) levels
pub fn state_key(snapshot: &SystemSnapshot) -> String {
    let error_rate = snapshot.derived(crate::catalog::derived::ERROR_RATE).unwrap_or(0.0);
    let latency = snapshot.derived(crate::catalog::derived::LATENCY).unwrap_or(0.0);
    format!(
        "{}_{}_{}",
        error_level(error_rate),
        latency_level(latency),
        health_level(snapshot.health_score)
    )
}

/// Human-readable export payload
#[derive(Debug, Serialize, Deserialize)]
pub struct KnowledgeExport {
    pub metadata: ExportMetadata,
    pub summary: KnowledgeSummary,
    pub patterns: BTreeMap<String, LearnedPattern>,
    pub statistics: AdaptationStats,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub export_time: String,
    pub learning_cycles: u64,
}

/// Summary statistics over the store contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSummary {
    pub total_patterns: usize,
    pub value_table_size: usize,
    pub total_adaptations: u64,
    pub successful_adaptations: u64,
    pub success_rate: f64,
}

/// Concurrency-safe wrapper around [`KnowledgeData`]
pub struct KnowledgeStore {
    path: Option<PathBuf>,
    inner: RwLock<KnowledgeData>,
}

impl KnowledgeStore {
    /// In-memory store without persistence
    pub fn in_memory() -> Self {
        Self { path: None, inner: RwLock::new(KnowledgeData::default()) }
    }

    /// Open a store backed by `path`, loading existing data if present.
    ///
    /// A corrupt or unreadable file starts the store fresh rather than
    /// failing startup; the condition is logged.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match load_data(&path) {
            Ok(Some(data)) => {
                info!(path = %path.display(), patterns = data.patterns.len(), "loaded knowledge store");
                data
            }
            Ok(None) => {
                info!(path = %path.display(), "no existing knowledge store, starting fresh");
                KnowledgeData::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load knowledge store, starting fresh");
                KnowledgeData::default()
            }
        };
        Self { path: Some(path), inner: RwLock::new(data) }
    }

    /// Stable read-only copy for the decision engine
    pub async fn snapshot(&self) -> KnowledgeData {
        self.inner.read().await.clone()
    }

    /// Run `f` under the single writer lock
    pub async fn mutate<T>(&self, f: impl FnOnce(&mut KnowledgeData) -> T) -> T {
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }

    /// Persist the current contents atomically (write, sync, rename)
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let data = self.inner.read().await.clone();
        save_data(path, &data)?;
        debug!(path = %path.display(), values = data.values.len(), "knowledge store persisted");
        Ok(())
    }

    /// Export a human-readable JSON document (patterns + statistics; the
    /// raw value table stays internal)
    pub async fn export(&self, path: &Path, learning_cycles: u64) -> Result<()> {
        let data = self.inner.read().await.clone();
        let export = KnowledgeExport {
            metadata: ExportMetadata {
                export_time: Utc::now().to_rfc3339(),
                learning_cycles,
            },
            summary: summarize(&data),
            patterns: data.patterns,
            statistics: data.stats,
        };

        let json = serde_json::to_vec_pretty(&export).context("failed to serialize export")?;
        write_atomic(path, &json)?;
        info!(path = %path.display(), "knowledge exported");
        Ok(())
    }

    pub async fn summary(&self) -> KnowledgeSummary {
        summarize(&*self.inner.read().await)
    }
}

fn summarize(data: &KnowledgeData) -> KnowledgeSummary {
    let total = data.stats.total_adaptations;
    KnowledgeSummary {
        total_patterns: data.patterns.len(),
        value_table_size: data.values.len(),
        total_adaptations: total,
        successful_adaptations: data.stats.successful_adaptations,
        success_rate: if total > 0 {
            data.stats.successful_adaptations as f64 / total as f64
        } else {
            0.0
        },
    }
}

fn load_data(path: &Path) -> Result<Option<KnowledgeData>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).context("failed to read knowledge store")?;
    let data = serde_json::from_slice(&buf).context("failed to deserialize knowledge store")?;
    Ok(Some(data))
}

fn save_data(path: &Path, data: &KnowledgeData) -> Result<()> {
    let json = serde_json::to_vec(data).context("failed to serialize knowledge store")?;
    write_atomic(path, &json)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("failed to create {}", temp_path.display()))?;
    file.write_all(bytes).context("failed to write data")?;
    file.sync_all().context("failed to sync data")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename {} to {}", temp_path.display(), path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pattern(key: &str) -> LearnedPattern {
        LearnedPattern {
            pattern_key: key.to_string(),
            action_type: "horizontal".to_string(),
            operation: "increase".to_string(),
            support: 4,
            confidence: 0.75,
            avg_health_delta: 6.0,
        }
    }

    #[test]
    fn test_q_value_defaults_to_zero() {
        let data = KnowledgeData::default();
        assert_eq!(data.q_value("low_low_healthy", "restart"), 0.0);
    }

    #[test]
    fn test_best_action_requires_observed_value() {
        let mut data = KnowledgeData::default();
        assert_eq!(data.best_action("low_low_healthy"), None);

        data.values.insert(value_key("low_low_healthy", "horizontal_decrease"), 2.5);
        data.values.insert(value_key("low_low_healthy", "restart"), -1.0);
        assert_eq!(data.best_action("low_low_healthy"), Some("horizontal_decrease"));
    }

    #[test]
    fn test_discretization_boundaries() {
        assert_eq!(error_level(0.06), "high");
        assert_eq!(error_level(0.02), "medium");
        assert_eq!(error_level(0.01), "low");
        assert_eq!(latency_level(1200.0), "high");
        assert_eq!(latency_level(600.0), "medium");
        assert_eq!(throughput_level(55.0), "high");
        assert_eq!(throughput_level(5.0), "low");
        assert_eq!(health_level(49.9), "critical");
        assert_eq!(health_level(79.9), "degraded");
        assert_eq!(health_level(80.0), "healthy");
    }

    #[tokio::test]
    async fn test_persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");

        let store = KnowledgeStore::open(&path);
        store
            .mutate(|data| {
                data.patterns.insert("p1".to_string(), sample_pattern("p1"));
                data.pattern_counts.insert("p1".to_string(), 4);
                data.pattern_successes.insert("p1".to_string(), 3);
                data.values.insert(value_key("low_low_healthy", "restart"), 1.25);
                data.stats.total_adaptations = 7;
                data.stats.successful_adaptations = 5;
                data.stats.action_counts.insert("horizontal".to_string(), 6);
            })
            .await;
        store.persist().await.unwrap();

        let reloaded = KnowledgeStore::open(&path);
        let data = reloaded.snapshot().await;
        assert_eq!(data.patterns.len(), 1);
        assert_eq!(data.patterns["p1"].support, 4);
        assert_eq!(data.pattern_counts["p1"], 4);
        assert_eq!(data.values[&value_key("low_low_healthy", "restart")], 1.25);
        assert_eq!(data.stats.total_adaptations, 7);
        assert_eq!(data.stats.action_counts["horizontal"], 6);
    }

    #[tokio::test]
    async fn test_corrupt_store_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = KnowledgeStore::open(&path);
        assert_eq!(store.snapshot().await.patterns.len(), 0);
    }

    #[tokio::test]
    async fn test_export_contains_summary_and_patterns() {
        let dir = tempfile::tempdir().unwrap();
        let store = KnowledgeStore::in_memory();
        store
            .mutate(|data| {
                data.patterns.insert("p1".to_string(), sample_pattern("p1"));
                data.stats.total_adaptations = 4;
                data.stats.successful_adaptations = 2;
            })
            .await;

        let export_path = dir.path().join("export.json");
        store.export(&export_path, 12).await.unwrap();

        let parsed: KnowledgeExport =
            serde_json::from_slice(&std::fs::read(&export_path).unwrap()).unwrap();
        assert_eq!(parsed.metadata.learning_cycles, 12);
        assert_eq!(parsed.summary.total_patterns, 1);
        assert_eq!(parsed.summary.success_rate, 0.5);
        assert!(parsed.patterns.contains_key("p1"));
    }

    #[tokio::test]
    async fn test_in_memory_persist_is_noop() {
        let store = KnowledgeStore::in_memory();
        store.persist().await.unwrap();
    }
}
