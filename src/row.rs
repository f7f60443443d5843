// ALLOCBENCH RESULT ROW
// FIXED 15-FIELD LEDGER RECORD. VALIDATED ONCE ON THE WAY IN, WRITTEN VERBATIM ON THE WAY OUT.
//
// ROWS PARSED FROM A CHILD KEEP THEIR ORIGINAL TEXT SO THE LEDGER IS A PURE PASS-THROUGH
// (NO FLOAT RE-FORMATTING). ONLY TIMEOUT PLACEHOLDERS ARE RENDERED FROM THE TYPED FIELDS.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{BenchError, BenchResult};
use crate::matrix::{completion_key, BenchmarkConfig};

pub const FIELD_COUNT: usize = 15;
pub const DELIMITER: char = ',';

// FIRST COLUMN NAME. A CHILD LINE STARTING WITH THIS IS A HEADER, NOT DATA.
pub const HEADER_TOKEN: &str = "allocator";

pub const HEADER: [&str; FIELD_COUNT] = [
    "allocator",
    "workload",
    "threads",
    "ops_per_thread",
    "total_ops",
    "seconds",
    "throughput_ops_s",
    "alloc_p50_ns",
    "alloc_p99_ns",
    "free_p50_ns",
    "free_p99_ns",
    "avg_overhead_ratio",
    "peak_live_requested",
    "peak_live_usable",
    "alignment",
];

// ALIGNMENT REPORTED BY ALIGNMENT-SENSITIVE WORKLOADS THAT DON'T NAME ONE
pub const DEFAULT_ALIGNMENT: u64 = 64;

#[derive(Clone, Debug, PartialEq)]
pub struct ResultRow {
    pub allocator: String,
    pub workload: String,
    pub threads: u32,
    pub ops_per_thread: u64,
    pub total_ops: u64,
    pub seconds: f64,
    pub throughput_ops_s: f64,
    pub alloc_p50_ns: u64,
    pub alloc_p99_ns: u64,
    pub free_p50_ns: u64,
    pub free_p99_ns: u64,
    pub avg_overhead_ratio: f64,
    pub peak_live_requested: u64,
    pub peak_live_usable: u64,
    pub alignment: u64,
    source: Option<String>,
}

pub fn header_line() -> String {
    HEADER.join(",")
}

pub fn is_header(line: &str) -> bool {
    line.split(DELIMITER).next().map(str::trim) == Some(HEADER_TOKEN)
}

impl ResultRow {
    pub fn parse(line: &str) -> BenchResult<Self> {
        let line = line.trim();
        let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
        let malformed = || BenchError::MalformedRow {
            fields: fields.len(),
            line: line.to_string(),
        };

        if fields.len() != FIELD_COUNT || fields[0].is_empty() || fields[1].is_empty() {
            return Err(malformed());
        }

        fn num<T: std::str::FromStr>(s: &str) -> Option<T> {
            s.parse().ok()
        }

        let parsed = (|| {
            Some(ResultRow {
                allocator: fields[0].to_string(),
                workload: fields[1].to_string(),
                threads: num(fields[2])?,
                ops_per_thread: num(fields[3])?,
                total_ops: num(fields[4])?,
                seconds: num(fields[5])?,
                throughput_ops_s: num(fields[6])?,
                alloc_p50_ns: num(fields[7])?,
                alloc_p99_ns: num(fields[8])?,
                free_p50_ns: num(fields[9])?,
                free_p99_ns: num(fields[10])?,
                avg_overhead_ratio: num(fields[11])?,
                peak_live_requested: num(fields[12])?,
                peak_live_usable: num(fields[13])?,
                alignment: num(fields[14])?,
                source: Some(fields.join(",")),
            })
        })();

        parsed.ok_or_else(malformed)
    }

    // ZERO-THROUGHPUT STAND-IN FOR A CONFIGURATION THAT HIT ITS DEADLINE
    pub fn timeout_placeholder(cfg: &BenchmarkConfig, timeout_secs: u64) -> Self {
        ResultRow {
            allocator: cfg.allocator_label.clone(),
            workload: cfg.workload.clone(),
            threads: cfg.threads,
            ops_per_thread: cfg.ops_per_thread,
            total_ops: cfg.ops_per_thread.saturating_mul(cfg.threads as u64),
            seconds: timeout_secs as f64,
            throughput_ops_s: 0.0,
            alloc_p50_ns: 0,
            alloc_p99_ns: 0,
            free_p50_ns: 0,
            free_p99_ns: 0,
            avg_overhead_ratio: 0.0,
            peak_live_requested: 0,
            peak_live_usable: 0,
            alignment: workload_alignment(&cfg.workload),
            source: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.source.is_none()
    }

    pub fn completion_key(&self) -> String {
        completion_key(
            &self.allocator,
            &self.workload,
            self.threads,
            self.ops_per_thread,
        )
    }
}

impl fmt::Display for ResultRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(src) = &self.source {
            return f.write_str(src);
        }
        // seconds KEEPS ITS DECIMAL POINT (5 -> "5.0"), OTHER FLOATS PRINT SHORTEST
        write!(
            f,
            "{},{},{},{},{},{:?},{},{},{},{},{},{},{},{},{}",
            self.allocator,
            self.workload,
            self.threads,
            self.ops_per_thread,
            self.total_ops,
            self.seconds,
            self.throughput_ops_s,
            self.alloc_p50_ns,
            self.alloc_p99_ns,
            self.free_p50_ns,
            self.free_p99_ns,
            self.avg_overhead_ratio,
            self.peak_live_requested,
            self.peak_live_usable,
            self.alignment,
        )
    }
}

// alignment64 -> 64, align128 -> 128, alignment -> DEFAULT_ALIGNMENT, rl_small -> 0
pub fn workload_alignment(workload: &str) -> u64 {
    static ALIGN_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = ALIGN_RE.get_or_init(|| Regex::new(r"(?i)align(?:ment)?_?(\d+)?").ok());

    let caps = match re.as_ref().and_then(|re| re.captures(workload)) {
        Some(c) => c,
        None => return 0,
    };
    caps.get(1)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_ALIGNMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str =
        "mempool,rl_small,2,1000,2000,0.0123,162601.6,41,180,38,150,1.25,65536,81920,0";

    fn cfg(workload: &str, threads: u32) -> BenchmarkConfig {
        BenchmarkConfig {
            allocator_label: "A".into(),
            workload: workload.into(),
            threads,
            ops_per_thread: 1000,
            seed: 42,
        }
    }

    #[test]
    fn parse_well_formed_row() {
        let row = ResultRow::parse(GOOD).unwrap();
        assert_eq!(row.allocator, "mempool");
        assert_eq!(row.threads, 2);
        assert_eq!(row.ops_per_thread, 1000);
        assert_eq!(row.peak_live_usable, 81920);
        assert!(!row.is_placeholder());
        assert_eq!(row.completion_key(), "mempool|rl_small|2|1000");
    }

    #[test]
    fn parsed_row_written_verbatim() {
        let line = "jemalloc,rl_medium,1,10,10,1e-05,1e+06,1,2,3,4,1.5,10,20,0";
        let row = ResultRow::parse(line).unwrap();
        assert_eq!(row.to_string(), line);
    }

    #[test]
    fn wrong_field_count_rejected() {
        let short = "mempool,rl_small,2,1000,2000";
        match ResultRow::parse(short) {
            Err(BenchError::MalformedRow { fields, .. }) => assert_eq!(fields, 5),
            other => panic!("expected MalformedRow, got {:?}", other),
        }
        let long = format!("{},extra", GOOD);
        assert!(ResultRow::parse(&long).is_err());
    }

    #[test]
    fn empty_key_fields_rejected() {
        let no_alloc = ",rl_small,2,1000,2000,0.1,1,1,1,1,1,1,1,1,0";
        let no_workload = "mempool,,2,1000,2000,0.1,1,1,1,1,1,1,1,1,0";
        assert!(ResultRow::parse(no_alloc).is_err());
        assert!(ResultRow::parse(no_workload).is_err());
    }

    #[test]
    fn garbled_numbers_rejected() {
        let garbled = "mempool,rl_small,2,10#0,2000,0.1,1,1,1,1,1,1,1,1,0";
        assert!(ResultRow::parse(garbled).is_err());
    }

    #[test]
    fn header_detection() {
        assert!(is_header(&header_line()));
        assert!(!is_header(GOOD));
        assert_eq!(header_line().split(',').count(), FIELD_COUNT);
    }

    #[test]
    fn placeholder_shape() {
        let row = ResultRow::timeout_placeholder(&cfg("w1", 2), 5);
        assert!(row.is_placeholder());
        assert_eq!(row.to_string(), "A,w1,2,1000,2000,5.0,0,0,0,0,0,0,0,0,0");
        assert_eq!(row.to_string().split(',').count(), FIELD_COUNT);
    }

    #[test]
    fn placeholder_total_ops_saturates() {
        let big = BenchmarkConfig {
            ops_per_thread: u64::MAX / 2,
            ..cfg("w1", 4)
        };
        let row = ResultRow::timeout_placeholder(&big, 1);
        assert_eq!(row.total_ops, u64::MAX);
    }

    #[test]
    fn placeholder_alignment_follows_workload() {
        let row = ResultRow::timeout_placeholder(&cfg("alignment64", 1), 3);
        assert_eq!(row.alignment, 64);
        assert!(row.to_string().ends_with(",64"));
    }

    #[test]
    fn alignment_from_name() {
        assert_eq!(workload_alignment("alignment64"), 64);
        assert_eq!(workload_alignment("align_128"), 128);
        assert_eq!(workload_alignment("alignment"), DEFAULT_ALIGNMENT);
        assert_eq!(workload_alignment("rl_small"), 0);
        assert_eq!(workload_alignment("fragmentation_mix"), 0);
    }
}
