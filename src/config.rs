// ALLOCBENCH RUN CONFIGURATION
// VALIDATED INVOCATION PARAMETERS. BUILT ONCE FROM THE CLI, READ-ONLY AFTERWARDS.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_OUT: &str = "bench/results/bench.csv";
pub const DEFAULT_THREADS: &str = "1,2,4,8";
pub const DEFAULT_OPS: u64 = 200_000;
pub const DEFAULT_WORKLOADS: &str = "rl_small,rl_medium,fragmentation_mix,alignment64";
pub const DEFAULT_SEED: u64 = 42;

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub bins: Vec<PathBuf>,
    pub out: PathBuf,
    pub threads: Vec<u32>,
    pub ops_per_thread: u64,
    pub workloads: Vec<String>,
    pub seed: u64,
    pub resume: bool,
    // None = BULK MODE, Some = FINE-GRAINED MODE WITH PER-CELL DEADLINE
    pub timeout: Option<Duration>,
}

impl RunConfig {
    pub fn new(
        bins: &str,
        out: impl Into<PathBuf>,
        threads: &str,
        ops_per_thread: u64,
        workloads: &str,
        seed: u64,
        resume: bool,
        timeout_secs: u64,
    ) -> Result<Self> {
        if ops_per_thread == 0 {
            bail!("--ops must be greater than zero");
        }
        Ok(Self {
            bins: parse_list(bins).into_iter().map(PathBuf::from).collect(),
            out: out.into(),
            threads: parse_threads(threads)?,
            ops_per_thread,
            workloads: parse_list(workloads),
            seed,
            resume,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        })
    }

    // THE LIST AS HANDED TO A BULK-MODE CHILD AND RECORDED IN RUN METADATA
    pub fn threads_spec(&self) -> String {
        self.threads
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn workloads_spec(&self) -> String {
        self.workloads.join(",")
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.map(|t| t.as_secs()).unwrap_or(0)
    }
}

pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub fn parse_threads(value: &str) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for item in parse_list(value) {
        let n: u32 = item
            .parse()
            .with_context(|| format!("invalid thread count {:?}", item))?;
        if n == 0 {
            bail!("thread count must be positive, got 0");
        }
        out.push(n);
    }
    Ok(out)
}
