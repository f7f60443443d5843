// ALLOCBENCH ORCHESTRATOR
// STRICTLY SEQUENTIAL: ONE CHILD AT A TIME SO MEASUREMENTS NEVER COMPETE FOR CPU.
//
// MATRIX -> FILTER BY COMPLETION LEDGER -> SUPERVISE EACH ITEM -> ROWS INTO RESULT LEDGER
// (OR A PLACEHOLDER ON TIMEOUT) -> RUN METADATA.
//
// PER-ITEM FAILURES ARE LOGGED AND SKIPPED. ONLY AN EMPTY BINARY SET, AN OPERATOR
// INTERRUPT, OR A LEDGER WRITE FAILURE ENDS THE RUN EARLY.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::error::{BenchError, BenchResult};
use crate::ledger::{CompletionLedger, ResultLedger};
use crate::matrix::{ConfigMatrix, Mode, WorkItem};
use crate::meta::{self, RunMeta, RunStatus};
use crate::row::ResultRow;
use crate::supervisor::{self, ChildReport, Outcome};

// STDERR LINES RE-LOGGED WHEN A CHILD FAILS
const FAILURE_TAIL: usize = 10;

#[derive(Debug)]
pub struct RunStats {
    pub invocations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub skipped_complete: u64,
    pub missing: u64,
    pub rows: u64,
    pub placeholders: u64,
    pub duplicates_dropped: u64,
    pub malformed: u64,
    pub interrupted: bool,
    started: Instant,
}

impl RunStats {
    fn new() -> Self {
        Self {
            invocations: 0,
            succeeded: 0,
            failed: 0,
            timed_out: 0,
            skipped_complete: 0,
            missing: 0,
            rows: 0,
            placeholders: 0,
            duplicates_dropped: 0,
            malformed: 0,
            interrupted: false,
            started: Instant::now(),
        }
    }

    pub fn summary(&self) {
        let elapsed_s = self.started.elapsed().as_secs_f64();
        eprintln!("\n{}", "=".repeat(50));
        eprintln!("ALLOCBENCH SUMMARY{}", if self.interrupted { " (INTERRUPTED)" } else { "" });
        eprintln!("{}", "=".repeat(50));
        eprintln!("  INVOCATIONS:       {}", self.invocations);
        eprintln!("  SUCCEEDED:         {}", self.succeeded);
        eprintln!("  FAILED:            {}", self.failed);
        eprintln!("  TIMED OUT:         {}", self.timed_out);
        eprintln!("  ALREADY COMPLETE:  {}", self.skipped_complete);
        eprintln!("  MISSING BINARIES:  {}", self.missing);
        eprintln!("  ROWS WRITTEN:      {} ({} placeholders)", self.rows, self.placeholders);
        if self.duplicates_dropped > 0 {
            eprintln!("  DUPLICATES DROPPED: {}", self.duplicates_dropped);
        }
        if self.malformed > 0 {
            eprintln!("  MALFORMED ROWS:    {}", self.malformed);
        }
        eprintln!("  ELAPSED:           {:.1}s", elapsed_s);
    }
}

pub fn run(cfg: &RunConfig, shutdown: &AtomicBool) -> BenchResult<RunStats> {
    if cfg.bins.is_empty() {
        return Err(BenchError::EmptyInput);
    }

    let matrix = ConfigMatrix::build(cfg);
    if matrix.missing.len() == cfg.bins.len() {
        return Err(BenchError::EmptyInput);
    }

    let mut stats = RunStats::new();
    stats.missing = matrix.missing.len() as u64;

    let completed = if cfg.resume {
        CompletionLedger::load(&cfg.out)?
    } else {
        CompletionLedger::default()
    };
    if !completed.is_empty() {
        info!(keys = completed.len(), "resuming: configurations already in ledger will be skipped");
    }

    let mut ledger = ResultLedger::open(&cfg.out, cfg.resume)?;

    // BULK CHILDREN MAY SELF-FILTER AGAINST THE LEDGER THEY ARE APPENDING TO
    let resume_csv = match matrix.mode {
        Mode::Bulk if ledger.is_appending() => Some(cfg.out.as_path()),
        _ => None,
    };

    info!(
        mode = ?matrix.mode,
        items = matrix.items.len(),
        timeout_s = cfg.timeout_secs(),
        "starting matrix"
    );

    let mut fatal = None;
    for item in &matrix.items {
        if shutdown.load(Ordering::Relaxed) {
            stats.interrupted = true;
            break;
        }
        if item.is_complete(completed.keys()) {
            debug!(item = %item.describe(), "already complete -- skipping");
            stats.skipped_complete += 1;
            continue;
        }

        match run_item(cfg, item, resume_csv, &completed, &mut ledger, &mut stats, shutdown) {
            Ok(()) => {}
            Err(BenchError::Interrupted) => {
                warn!(item = %item.describe(), "interrupted -- child terminated");
                stats.interrupted = true;
                break;
            }
            Err(e) => {
                error!(item = %item.describe(), "{}", e);
                fatal = Some(e);
                break;
            }
        }
    }

    stats.rows = ledger.rows_written();
    let status = if stats.interrupted || fatal.is_some() {
        RunStatus::Interrupted
    } else {
        RunStatus::Complete
    };
    match meta::record(&cfg.out, &RunMeta::from_config(cfg, status)) {
        Ok(path) => info!(path = %path.display(), "run metadata written"),
        Err(e) => warn!("failed to write run metadata: {}", e),
    }
    stats.summary();

    if let Some(e) = fatal {
        return Err(e);
    }
    if stats.interrupted {
        return Err(BenchError::Interrupted);
    }
    info!(path = %ledger.path().display(), "wrote ledger");
    Ok(stats)
}

fn run_item(
    cfg: &RunConfig,
    item: &WorkItem,
    resume_csv: Option<&Path>,
    completed: &CompletionLedger,
    ledger: &mut ResultLedger,
    stats: &mut RunStats,
    shutdown: &AtomicBool,
) -> BenchResult<()> {
    let args = supervisor::child_args(item, resume_csv);
    let bin = item.binary.display().to_string();
    info!(
        bin = %bin,
        workloads = %item.workloads_arg,
        threads = %item.threads_arg,
        ops = item.ops_per_thread,
        "[bench] running"
    );
    stats.invocations += 1;

    let mut committed: HashSet<String> = HashSet::new();
    let mut duplicates = 0u64;
    let result = supervisor::supervise(&item.binary, &args, cfg.timeout, shutdown, |row| {
        let key = row.completion_key();
        if completed.contains(&key) {
            debug!(key = %key, "row already in ledger -- dropped");
            duplicates += 1;
            return Ok(());
        }
        ledger.append(&row)?;
        committed.insert(key);
        Ok(())
    });
    stats.duplicates_dropped += duplicates;

    let report: ChildReport = match result {
        Ok(r) => r,
        Err(e @ BenchError::Spawn { .. }) => {
            warn!(item = %item.describe(), "{} -- skipping", e);
            stats.failed += 1;
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    stats.malformed += report.malformed;

    info!(
        "[bench] finished {} in {:.2}s {} ({} rows)",
        bin,
        report.elapsed.as_secs_f64(),
        report.outcome.label(),
        report.rows
    );

    match report.outcome {
        Outcome::Success => stats.succeeded += 1,
        Outcome::Failed(code) => {
            stats.failed += 1;
            warn!(
                item = %item.describe(),
                "{} -- skipping configuration",
                BenchError::ChildFailed { bin: bin.clone(), code }
            );
            let skip = report.stderr_tail.len().saturating_sub(FAILURE_TAIL);
            for line in &report.stderr_tail[skip..] {
                warn!(bin = %bin, "  | {}", line);
            }
        }
        Outcome::TimedOut => {
            stats.timed_out += 1;
            warn!(
                item = %item.describe(),
                "{} -- recording placeholder",
                BenchError::ChildTimedOut { bin: bin.clone(), secs: cfg.timeout_secs() }
            );
            for cell in &item.cells {
                let key = cell.key();
                if committed.contains(&key) || completed.contains(&key) {
                    continue;
                }
                ledger.append(&ResultRow::timeout_placeholder(cell, cfg.timeout_secs()))?;
                stats.placeholders += 1;
            }
        }
    }
    Ok(())
}
