// ALLOCBENCH RUN METADATA
// key=value SNAPSHOT OF THE INVOCATION, OVERWRITTEN AT THE END OF EVERY RUN.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::RunConfig;
use crate::error::BenchResult;

pub const META_FILE: &str = "bench_meta.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    Interrupted,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            RunStatus::Complete => "complete",
            RunStatus::Interrupted => "interrupted",
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunMeta {
    pub timestamp: DateTime<Utc>,
    pub bins: Vec<PathBuf>,
    pub threads_spec: String,
    pub ops_per_thread: u64,
    pub workloads_spec: String,
    pub seed: u64,
    pub timeout_secs: u64,
    pub status: RunStatus,
}

impl RunMeta {
    pub fn from_config(cfg: &RunConfig, status: RunStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            bins: cfg.bins.clone(),
            threads_spec: cfg.threads_spec(),
            ops_per_thread: cfg.ops_per_thread,
            workloads_spec: cfg.workloads_spec(),
            seed: cfg.seed,
            timeout_secs: cfg.timeout_secs(),
            status,
        }
    }

    pub fn render(&self) -> String {
        let bins: Vec<String> = self.bins.iter().map(|b| b.display().to_string()).collect();
        let mut out = String::new();
        for (k, v) in [
            ("timestamp", self.timestamp.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()),
            ("bins", bins.join(",")),
            ("threads", self.threads_spec.clone()),
            ("ops_per_thread", self.ops_per_thread.to_string()),
            ("workloads", self.workloads_spec.clone()),
            ("seed", self.seed.to_string()),
            ("timeout", self.timeout_secs.to_string()),
            ("status", self.status.as_str().to_string()),
        ] {
            out.push_str(k);
            out.push('=');
            out.push_str(&v);
            out.push('\n');
        }
        out
    }
}

// METADATA LIVES NEXT TO THE LEDGER
pub fn meta_path(ledger: &Path) -> PathBuf {
    ledger
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.join(META_FILE))
        .unwrap_or_else(|| PathBuf::from(META_FILE))
}

pub fn record(ledger: &Path, meta: &RunMeta) -> BenchResult<PathBuf> {
    let path = meta_path(ledger);
    fs::write(&path, meta.render())?;
    Ok(path)
}
