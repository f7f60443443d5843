// ALLOCBENCH -- RESUMABLE ALLOCATOR BENCHMARK ORCHESTRATOR
// DRIVES ONE EXTERNAL BENCHMARK BINARY PER ALLOCATOR ACROSS A WORKLOAD x THREADS MATRIX,
// STREAMS THEIR CSV ROWS INTO A CRASH-DURABLE LEDGER, AND RESUMES WITHOUT RE-RUNNING
// COMPLETED CONFIGURATIONS.

pub mod config;
pub mod error;
pub mod ledger;
pub mod matrix;
pub mod meta;
pub mod orchestrator;
pub mod row;
pub mod supervisor;

pub use config::RunConfig;
pub use error::{BenchError, BenchResult};
pub use orchestrator::{run, RunStats};
