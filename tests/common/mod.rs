// FAKE BENCHMARK BINARIES FOR INTEGRATION TESTS
// /bin/sh SCRIPTS THAT HONOR THE CHILD ARGUMENT CONTRACT AND EMIT ONE CSV ROW PER
// (WORKLOAD, THREADS) CELL. KNOBS INJECT HANGS, GARBAGE, STDERR FLOODS AND FAILURES.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use allocbench::RunConfig;

pub struct FakeBench {
    dir: PathBuf,
    label: String,
    hang_on: Option<(String, u32)>,
    garbage: bool,
    stderr_flood: usize,
    exit_code: i32,
}

impl FakeBench {
    pub fn new(dir: &Path, label: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            label: label.to_string(),
            hang_on: None,
            garbage: false,
            stderr_flood: 0,
            exit_code: 0,
        }
    }

    // SLEEP FOR 30S INSTEAD OF EMITTING THIS CELL
    pub fn hang_on(mut self, workload: &str, threads: u32) -> Self {
        self.hang_on = Some((workload.to_string(), threads));
        self
    }

    pub fn garbage(mut self) -> Self {
        self.garbage = true;
        self
    }

    pub fn stderr_flood(mut self, lines: usize) -> Self {
        self.stderr_flood = lines;
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("bench_{}", self.label))
    }

    // ONE LINE PER INVOCATION (THE ARGUMENTS) IS APPENDED HERE
    pub fn invocation_log(&self) -> PathBuf {
        self.dir.join(format!("{}.invocations", self.label))
    }

    // TOUCHED RIGHT BEFORE A HANG STARTS
    pub fn hang_marker(&self) -> PathBuf {
        self.dir.join(format!("{}.hanging", self.label))
    }

    pub fn write(self) -> PathBuf {
        let mut s = String::from("#!/bin/sh\n");
        s.push_str(&format!("label={}\n", self.label));
        s.push_str(
            "for a in \"$@\"; do\n\
             \x20 case \"$a\" in\n\
             \x20   --threads=*) threads=\"${a#--threads=}\" ;;\n\
             \x20   --ops=*) ops=\"${a#--ops=}\" ;;\n\
             \x20   --workloads=*) workloads=\"${a#--workloads=}\" ;;\n\
             \x20 esac\n\
             done\n",
        );
        s.push_str(&format!("echo \"$*\" >> '{}'\n", self.invocation_log().display()));

        if self.stderr_flood > 0 {
            s.push_str(&format!(
                "i=0\nwhile [ $i -lt {} ]; do echo \"diag line $i padding padding padding\" >&2; i=$((i+1)); done\n",
                self.stderr_flood
            ));
        }
        if self.garbage {
            s.push_str("echo 'allocator,workload,threads'\n");
            s.push_str("echo ''\n");
            s.push_str("echo 'total garbage'\n");
            s.push_str("echo \"$label,w_trunc,1,$ops\"\n");
            s.push_str("echo \"$label,w_long,1,1,1,1,1,1,1,1,1,1,1,1,1,1\"\n");
            s.push_str("echo \"$label,w_nan,x,1,1,1,1,1,1,1,1,1,1,1,1\"\n");
        }

        s.push_str("IFS=,\nfor w in $workloads; do\n  for t in $threads; do\n");
        if let Some((w, t)) = &self.hang_on {
            s.push_str(&format!(
                "    if [ \"$w\" = '{}' ] && [ \"$t\" = '{}' ]; then touch '{}'; sleep 30; fi\n",
                w,
                t,
                self.hang_marker().display()
            ));
        }
        s.push_str("    echo \"[bench] start allocator=$label workload=$w threads=$t\" >&2\n");
        s.push_str("    echo \"$label,$w,$t,$ops,$((t*ops)),0.01,1000,41,180,38,150,1.25,100,200,0\"\n");
        s.push_str("  done\ndone\n");
        s.push_str(&format!("exit {}\n", self.exit_code));

        let path = self.path();
        fs::write(&path, s).expect("write fake bench");
        let mut perms = fs::metadata(&path).expect("stat fake bench").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod fake bench");
        path
    }
}

pub fn config(bins: &[PathBuf], out: &Path, resume: bool, timeout: u64) -> RunConfig {
    let bins: Vec<String> = bins.iter().map(|b| b.display().to_string()).collect();
    RunConfig::new(&bins.join(","), out, "1,2", 100, "w1,w2", 42, resume, timeout)
        .expect("valid run config")
}

pub fn ledger_lines(out: &Path) -> Vec<String> {
    fs::read_to_string(out)
        .expect("read ledger")
        .lines()
        .map(String::from)
        .collect()
}

// DATA ROWS ONLY (NO HEADER)
pub fn ledger_rows(out: &Path) -> Vec<Vec<String>> {
    ledger_lines(out)
        .into_iter()
        .skip(1)
        .map(|l| l.split(',').map(String::from).collect())
        .collect()
}

pub fn row_keys(out: &Path) -> Vec<String> {
    ledger_rows(out)
        .iter()
        .map(|r| r[..4].join("|"))
        .collect()
}

pub fn invocations(log: &Path) -> usize {
    fs::read_to_string(log).map(|s| s.lines().count()).unwrap_or(0)
}
