//! Append-only CSV audit log, one row per adaptation cycle
//!
//! The log is export-only: the agent never reads it back. The header
//! row is written when the file is first created.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const HEADER: &str = "timestamp,cycle_number,service,status,\
health_score_pre,health_score_post,health_delta,\
slo_violations,anomalies,actions_planned,actions_executed,\
adaptation_success,patterns_learned,policies_updated,cycle_duration_secs";

/// One audit row
#[derive(Debug, Clone)]
pub struct CycleAuditRecord {
    pub cycle_number: u64,
    pub service: String,
    pub status: String,
    pub health_pre: f64,
    pub health_post: f64,
    pub health_delta: f64,
    pub slo_violations: usize,
    pub anomalies: usize,
    pub actions_planned: usize,
    pub actions_executed: usize,
    pub adaptation_success: bool,
    pub patterns_learned: usize,
    pub policies_updated: usize,
    pub cycle_duration_secs: f64,
}

impl CycleAuditRecord {
    fn to_row(&self) -> String {
        format!(
            "{},{},{},{},{:.1},{:.1},{:.1},{},{},{},{},{},{},{},{:.2}",
            Utc::now().to_rfc3339(),
            self.cycle_number,
            self.service,
            self.status,
            self.health_pre,
            self.health_post,
            self.health_delta,
            self.slo_violations,
            self.anomalies,
            self.actions_planned,
            self.actions_executed,
            self.adaptation_success,
            self.patterns_learned,
            self.policies_updated,
            self.cycle_duration_secs,
        )
    }
}

/// CSV writer for cycle outcomes
pub struct CycleAuditLog {
    path: PathBuf,
}

impl CycleAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row, creating the file with its header if needed
    pub fn append(&self, record: &CycleAuditRecord) -> Result<()> {
        let fresh = !self.path.exists();
        if fresh {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;

        if fresh {
            writeln!(file, "{}", HEADER).context("failed to write audit header")?;
        }
        writeln!(file, "{}", record.to_row()).context("failed to write audit row")?;

        debug!(path = %self.path.display(), cycle = record.cycle_number, "audit row appended");
        Ok(())
    }
}
