// ALLOCBENCH v1.2.0 -- ALLOCATOR BENCHMARK ORCHESTRATOR
// RUNS EACH BENCHMARK BINARY ACROSS THE REQUESTED MATRIX, ONE PROCESS AT A TIME
//
// EXIT CODES: 0 = DONE, 1 = NO BINARIES / BAD ARGUMENTS, 130 = INTERRUPTED

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use allocbench::config::{
    RunConfig, DEFAULT_OPS, DEFAULT_OUT, DEFAULT_SEED, DEFAULT_THREADS, DEFAULT_WORKLOADS,
};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "allocbench")]
#[command(about = "ALLOCBENCH -- RESUMABLE ALLOCATOR BENCHMARK MATRIX RUNNER")]
struct Cli {
    // COMMA-SEPARATED BENCHMARK BINARIES, ONE PER ALLOCATOR
    #[arg(long)]
    bins: String,

    // OUTPUT CSV LEDGER (bench_meta.txt IS WRITTEN NEXT TO IT)
    #[arg(long, default_value = DEFAULT_OUT)]
    out: String,

    // COMMA-SEPARATED THREAD COUNTS
    #[arg(long, default_value = DEFAULT_THREADS)]
    threads: String,

    // OPERATIONS PER THREAD
    #[arg(long, default_value_t = DEFAULT_OPS)]
    ops: u64,

    // COMMA-SEPARATED WORKLOAD NAMES
    #[arg(long, default_value = DEFAULT_WORKLOADS)]
    workloads: String,

    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    // APPEND TO AN EXISTING LEDGER, SKIPPING CONFIGURATIONS ALREADY IN IT
    #[arg(long)]
    resume: bool,

    // PER-CONFIGURATION TIMEOUT IN SECONDS (0 = DISABLED, ONE PROCESS PER BINARY)
    #[arg(long, default_value_t = 0)]
    timeout: u64,
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_tracing();

    // SIGINT AND SIGTERM BOTH LAND HERE. THE ACTIVE CHILD IS TORN DOWN BY THE SUPERVISOR.
    ctrlc::set_handler(move || {
        SHUTDOWN.store(true, Ordering::Relaxed);
    })?;

    let cfg = RunConfig::new(
        &cli.bins,
        &cli.out,
        &cli.threads,
        cli.ops,
        &cli.workloads,
        cli.seed,
        cli.resume,
        cli.timeout,
    )?;

    if let Err(e) = allocbench::run(&cfg, &SHUTDOWN) {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }

    Ok(())
}
