// ALLOCBENCH CONFIGURATION MATRIX
// DETERMINISTIC ENUMERATION OF WHAT TO RUN.
//
// BULK MODE (NO TIMEOUT): ONE CHILD PER BINARY, THE BINARY WALKS ITS OWN MATRIX.
// FINE-GRAINED MODE (TIMEOUT): ONE CHILD PER (BINARY, WORKLOAD, THREADS) CELL SO A
// HANG CAN BE ATTRIBUTED TO, AND RECOVERED FROM, A SINGLE CELL.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::RunConfig;
use crate::error::BenchError;

const BINARY_PREFIX: &str = "bench_";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchmarkConfig {
    pub allocator_label: String,
    pub workload: String,
    pub threads: u32,
    pub ops_per_thread: u64,
    pub seed: u64,
}

impl BenchmarkConfig {
    pub fn key(&self) -> String {
        completion_key(
            &self.allocator_label,
            &self.workload,
            self.threads,
            self.ops_per_thread,
        )
    }
}

// SEED IS DELIBERATELY NOT PART OF THE KEY
pub fn completion_key(allocator: &str, workload: &str, threads: u32, ops_per_thread: u64) -> String {
    format!("{}|{}|{}|{}", allocator, workload, threads, ops_per_thread)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Bulk,
    FineGrained,
}

// ONE CHILD INVOCATION. cells LISTS EVERY CONFIGURATION THE CHILD IS EXPECTED TO COVER.
#[derive(Clone, Debug)]
pub struct WorkItem {
    pub binary: PathBuf,
    pub label: String,
    pub threads_arg: String,
    pub workloads_arg: String,
    pub ops_per_thread: u64,
    pub seed: u64,
    pub cells: Vec<BenchmarkConfig>,
}

impl WorkItem {
    pub fn is_complete(&self, done: &HashSet<String>) -> bool {
        !self.cells.is_empty() && self.cells.iter().all(|c| done.contains(&c.key()))
    }

    pub fn describe(&self) -> String {
        format!(
            "{} threads={} ops={} workloads={}",
            self.binary.display(),
            self.threads_arg,
            self.ops_per_thread,
            self.workloads_arg
        )
    }
}

pub struct ConfigMatrix {
    pub mode: Mode,
    pub items: Vec<WorkItem>,
    pub missing: Vec<PathBuf>,
}

impl ConfigMatrix {
    pub fn build(cfg: &RunConfig) -> Self {
        Self::build_with(cfg, |p| p.exists())
    }

    // exists IS INJECTED SO ENUMERATION CAN BE TESTED WITHOUT REAL FILES
    pub fn build_with(cfg: &RunConfig, exists: impl Fn(&Path) -> bool) -> Self {
        let mode = if cfg.timeout.is_some() { Mode::FineGrained } else { Mode::Bulk };
        let mut items = Vec::new();
        let mut missing = Vec::new();

        for bin in &cfg.bins {
            if !exists(bin) {
                warn!("{} -- skipping", BenchError::MissingBinary(bin.clone()));
                missing.push(bin.clone());
                continue;
            }
            let label = allocator_label(bin);
            let cell = |workload: &str, threads: u32| BenchmarkConfig {
                allocator_label: label.clone(),
                workload: workload.to_string(),
                threads,
                ops_per_thread: cfg.ops_per_thread,
                seed: cfg.seed,
            };

            match mode {
                Mode::Bulk => {
                    let cells = cfg
                        .workloads
                        .iter()
                        .flat_map(|w| cfg.threads.iter().map(move |&t| (w, t)))
                        .map(|(w, t)| cell(w.as_str(), t))
                        .collect();
                    items.push(WorkItem {
                        binary: bin.clone(),
                        label: label.clone(),
                        threads_arg: cfg.threads_spec(),
                        workloads_arg: cfg.workloads_spec(),
                        ops_per_thread: cfg.ops_per_thread,
                        seed: cfg.seed,
                        cells,
                    });
                }
                Mode::FineGrained => {
                    for workload in &cfg.workloads {
                        for &threads in &cfg.threads {
                            items.push(WorkItem {
                                binary: bin.clone(),
                                label: label.clone(),
                                threads_arg: threads.to_string(),
                                workloads_arg: workload.clone(),
                                ops_per_thread: cfg.ops_per_thread,
                                seed: cfg.seed,
                                cells: vec![cell(workload.as_str(), threads)],
                            });
                        }
                    }
                }
            }
        }

        Self { mode, items, missing }
    }
}

// bench/bin/bench_jemalloc -> "jemalloc"
pub fn allocator_label(bin: &Path) -> String {
    let stem = bin
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match stem.strip_prefix(BINARY_PREFIX) {
        Some(rest) if !rest.is_empty() => rest.to_string(),
        _ => stem,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_config(bins: &str, timeout: u64) -> RunConfig {
        RunConfig::new(bins, "out.csv", "1,2", 100, "w1,w2", 7, false, timeout).unwrap()
    }

    #[test]
    fn fine_grained_cross_product() {
        let m = ConfigMatrix::build_with(&run_config("A,B", 5), |_| true);
        assert_eq!(m.mode, Mode::FineGrained);
        assert_eq!(m.items.len(), 8);
        let order: Vec<(String, String, String)> = m
            .items
            .iter()
            .map(|i| (i.label.clone(), i.workloads_arg.clone(), i.threads_arg.clone()))
            .collect();
        assert_eq!(order[0], ("A".into(), "w1".into(), "1".into()));
        assert_eq!(order[1], ("A".into(), "w1".into(), "2".into()));
        assert_eq!(order[2], ("A".into(), "w2".into(), "1".into()));
        assert_eq!(order[7], ("B".into(), "w2".into(), "2".into()));
        assert!(m.items.iter().all(|i| i.cells.len() == 1));
    }

    #[test]
    fn bulk_one_item_per_binary() {
        let m = ConfigMatrix::build_with(&run_config("A,B", 0), |_| true);
        assert_eq!(m.mode, Mode::Bulk);
        assert_eq!(m.items.len(), 2);
        assert_eq!(m.items[0].threads_arg, "1,2");
        assert_eq!(m.items[0].workloads_arg, "w1,w2");
        assert_eq!(m.items[0].cells.len(), 4);
    }

    #[test]
    fn missing_binaries_skipped() {
        let m = ConfigMatrix::build_with(&run_config("A,gone,B", 5), |p| p != Path::new("gone"));
        assert_eq!(m.missing, vec![PathBuf::from("gone")]);
        assert_eq!(m.items.len(), 8);
        assert!(m.items.iter().all(|i| i.label != "gone"));
    }

    #[test]
    fn label_strips_prefix() {
        assert_eq!(allocator_label(Path::new("build/bench_jemalloc")), "jemalloc");
        assert_eq!(allocator_label(Path::new("/opt/mempool")), "mempool");
        assert_eq!(allocator_label(Path::new("bench_")), "bench_");
    }

    #[test]
    fn key_ignores_seed() {
        let a = BenchmarkConfig {
            allocator_label: "A".into(),
            workload: "w".into(),
            threads: 4,
            ops_per_thread: 10,
            seed: 1,
        };
        let b = BenchmarkConfig { seed: 2, ..a.clone() };
        assert_eq!(a.key(), "A|w|4|10");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn completeness_requires_every_cell() {
        let m = ConfigMatrix::build_with(&run_config("A", 0), |_| true);
        let item = &m.items[0];
        let mut done: HashSet<String> = item.cells[..3].iter().map(|c| c.key()).collect();
        assert!(!item.is_complete(&done));
        done.insert(item.cells[3].key());
        assert!(item.is_complete(&done));
    }
}
