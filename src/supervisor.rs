// ALLOCBENCH PROCESS SUPERVISOR
// ONE CHILD, TWO PIPES, OPTIONAL DEADLINE.
//
// THREADS PER CHILD:
//   PRIMARY:     SPAWN, CONSUME RESULT LINES, COMMIT ROWS, WATCH DEADLINE + SHUTDOWN, WAIT.
//   RESULT PUMP: BLOCKING READS ON STDOUT, HANDS LINES TO PRIMARY OVER A CHANNEL.
//   DIAGNOSTICS: BLOCKING READS ON STDERR, FORWARDS EACH LINE TO THE LOG, KEEPS A TAIL.
//
// BOTH PIPES ARE ALWAYS BEING READ WHILE THE CHILD LIVES. A CHILD THAT FILLS ONE PIPE
// CAN NEVER STALL BEHIND THE OTHER.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{BenchError, BenchResult};
use crate::matrix::WorkItem;
use crate::row::{is_header, ResultRow};

// SIGTERM -> SIGKILL WINDOW. INDEPENDENT OF THE PER-CONFIGURATION TIMEOUT.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// DIAGNOSTIC LINES KEPT FOR THE POST-RUN SUMMARY
const STDERR_TAIL: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(Option<i32>),
    TimedOut,
}

impl Outcome {
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Success => "OK",
            Outcome::Failed(_) => "FAIL",
            Outcome::TimedOut => "TIMEOUT",
        }
    }
}

#[derive(Debug)]
pub struct ChildReport {
    pub outcome: Outcome,
    pub rows: u64,
    pub malformed: u64,
    pub elapsed: Duration,
    pub stderr_tail: Vec<String>,
}

// ---------------------------------------------------------------------------
// CHILD GUARD
// ---------------------------------------------------------------------------

// OWNS THE CHILD AND ITS PROCESS GROUP. A GUARD THAT GOES OUT OF SCOPE WITH A LIVE
// CHILD TAKES THE WHOLE GROUP DOWN WITH IT.
pub struct ChildGuard {
    child: Child,
    pgid: i32,
    status: Option<ExitStatus>,
}

impl ChildGuard {
    pub fn new(child: Child) -> Self {
        let pgid = child.id() as i32;
        Self {
            child,
            pgid,
            status: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    // TWO-PHASE KILL: SIGTERM THE GROUP, GIVE IT `grace`, SIGKILL THE GROUP, REAP.
    // USED BY BOTH THE TIMEOUT PATH AND THE INTERRUPT PATH.
    pub fn terminate(&mut self, grace: Duration) -> Option<ExitStatus> {
        if let Ok(Some(status)) = self.try_wait() {
            return Some(status);
        }

        self.signal_group(libc::SIGTERM);
        let deadline = Instant::now() + grace;
        loop {
            match self.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if Instant::now() >= deadline => break,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }

        warn!(pid = self.pgid, "child ignored SIGTERM for {:?} -- SIGKILL", grace);
        self.signal_group(libc::SIGKILL);
        self.status = self.child.wait().ok();
        self.status
    }

    // THE GROUP OUTLIVES ITS LEADER WHILE ANY MEMBER IS ALIVE. ESRCH ONCE IT IS EMPTY.
    pub fn signal_group(&self, sig: libc::c_int) {
        unsafe {
            libc::killpg(self.pgid, sig);
        }
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if self.status.is_none() {
            self.terminate(KILL_GRACE);
        }
    }
}

// ---------------------------------------------------------------------------
// ARGUMENT CONTRACT
// ---------------------------------------------------------------------------

pub fn child_args(item: &WorkItem, resume_csv: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        format!("--threads={}", item.threads_arg),
        format!("--ops={}", item.ops_per_thread),
        format!("--workloads={}", item.workloads_arg),
        format!("--seed={}", item.seed),
        "--no-header".to_string(),
    ];
    if let Some(path) = resume_csv {
        args.push(format!("--resume-csv={}", path.display()));
    }
    args
}

// ---------------------------------------------------------------------------
// STREAM READERS
// ---------------------------------------------------------------------------

// LOSSY UTF-8 SO ONE BAD BYTE CAN'T END THE STREAM EARLY
fn for_each_line(stream: impl Read, mut f: impl FnMut(String) -> bool) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf).trim_end().to_string();
        if !f(line) {
            break;
        }
    }
}

fn pump_results(stdout: impl Read + Send + 'static, tx: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || for_each_line(stdout, |line| tx.send(line).is_ok()))
}

fn drain_diagnostics(stderr: impl Read + Send + 'static, bin: String) -> JoinHandle<Vec<String>> {
    thread::spawn(move || {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        for_each_line(stderr, |line| {
            info!(target: "child", bin = %bin, "{}", line);
            if tail.len() == STDERR_TAIL {
                tail.pop_front();
            }
            tail.push_back(line);
            true
        });
        tail.into_iter().collect()
    })
}

fn readers_done(pump: &Option<JoinHandle<()>>, diag: &Option<JoinHandle<Vec<String>>>) -> bool {
    pump.as_ref().map_or(true, |h| h.is_finished()) && diag.as_ref().map_or(true, |h| h.is_finished())
}

fn wait_readers(
    pump: &Option<JoinHandle<()>>,
    diag: &Option<JoinHandle<Vec<String>>>,
    limit: Duration,
) -> bool {
    let deadline = Instant::now() + limit;
    while !readers_done(pump, diag) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL);
    }
    true
}

// CALLED ONCE THE LEADER IS REAPED. WHATEVER IS LEFT IN ITS GROUP (BACKGROUNDED
// GRANDCHILDREN, POSSIBLY HOLDING A PIPE) IS SWEPT SO THE JOIN BELOW IS BOUNDED.
fn join_readers(
    guard: &ChildGuard,
    pump: Option<JoinHandle<()>>,
    diag: Option<JoinHandle<Vec<String>>>,
) -> Vec<String> {
    guard.signal_group(libc::SIGTERM);
    if !wait_readers(&pump, &diag, KILL_GRACE) {
        warn!(pid = guard.id(), "child pipes still open after {:?} -- SIGKILL group", KILL_GRACE);
        guard.signal_group(libc::SIGKILL);
        if !wait_readers(&pump, &diag, KILL_GRACE) {
            // A WRITER ESCAPED THE GROUP (setsid). LEAVE THE READERS DETACHED.
            warn!(pid = guard.id(), "child pipes held outside its process group -- detaching readers");
            return Vec::new();
        }
    }

    if let Some(p) = pump {
        if p.join().is_err() {
            warn!(pid = guard.id(), "result reader thread panicked");
        }
    }
    match diag.map(JoinHandle::join) {
        Some(Ok(tail)) => tail,
        Some(Err(_)) => {
            warn!(pid = guard.id(), "diagnostics reader thread panicked -- stderr tail lost");
            Vec::new()
        }
        None => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// SUPERVISE
// ---------------------------------------------------------------------------

fn spawn(binary: &Path, args: &[String]) -> io::Result<Child> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(target_os = "linux")]
    unsafe {
        // CHILD DIES WITH THE ORCHESTRATOR EVEN IF WE ARE SIGKILLED
        cmd.pre_exec(|| {
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong);
            Ok(())
        });
    }
    cmd.spawn()
}

// RUN ONE CHILD TO EXIT OR DEADLINE. on_row IS CALLED FOR EVERY WELL-FORMED RESULT LINE
// AS SOON AS IT ARRIVES. RETURNS Err(Interrupted) IF shutdown IS RAISED MID-RUN; THE
// CHILD IS DEAD BY THEN.
pub fn supervise(
    binary: &Path,
    args: &[String],
    timeout: Option<Duration>,
    shutdown: &AtomicBool,
    mut on_row: impl FnMut(ResultRow) -> BenchResult<()>,
) -> BenchResult<ChildReport> {
    let bin = binary.display().to_string();
    let started = Instant::now();
    // A DEADLINE PAST THE END OF Instant IS NO DEADLINE
    let deadline = timeout.and_then(|t| started.checked_add(t));

    let mut child = spawn(binary, args).map_err(|source| BenchError::Spawn {
        bin: bin.clone(),
        source,
    })?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut guard = ChildGuard::new(child);
    debug!(bin = %bin, pid = guard.id(), ?args, "child spawned");

    let (tx, rx) = mpsc::channel();
    let pump = stdout.map(|s| pump_results(s, tx));
    let diag = stderr.map(|s| drain_diagnostics(s, bin.clone()));

    let mut rows = 0u64;
    let mut malformed = 0u64;
    let mut timed_out = false;
    // SET WHEN THE LEADER EXITS WHILE SOMETHING ELSE IN ITS GROUP STILL HOLDS STDOUT
    let mut orphaned_since: Option<Instant> = None;

    // RESULT CHANNEL UNTIL EOF OR DEADLINE
    loop {
        if shutdown.load(Ordering::Relaxed) {
            guard.terminate(KILL_GRACE);
            drop(rx);
            join_readers(&guard, pump, diag);
            return Err(BenchError::Interrupted);
        }
        let wait = match deadline {
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    timed_out = true;
                    break;
                }
                (d - now).min(POLL_INTERVAL)
            }
            None => POLL_INTERVAL,
        };

        let line = match rx.recv_timeout(wait) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                if orphaned_since.is_none() && guard.try_wait()?.is_some() {
                    orphaned_since = Some(Instant::now());
                }
                if orphaned_since.is_some_and(|t| t.elapsed() >= KILL_GRACE) {
                    warn!(bin = %bin, "child exited but its group still holds stdout -- SIGKILL group");
                    guard.signal_group(libc::SIGKILL);
                    orphaned_since = None;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let line = line.trim();
        if line.is_empty() || is_header(line) {
            continue;
        }
        match ResultRow::parse(line) {
            Ok(row) => {
                on_row(row)?;
                rows += 1;
            }
            Err(e) => {
                warn!(bin = %bin, "skipping {}", e);
                malformed += 1;
            }
        }
    }

    // EXIT STATUS, STILL UNDER THE SAME DEADLINE
    let mut status = None;
    while !timed_out {
        if shutdown.load(Ordering::Relaxed) {
            guard.terminate(KILL_GRACE);
            drop(rx);
            join_readers(&guard, pump, diag);
            return Err(BenchError::Interrupted);
        }
        if let Some(s) = guard.try_wait()? {
            status = Some(s);
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            timed_out = true;
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    if timed_out {
        // WHATEVER THE CHILD RETURNS NOW, THIS CONFIGURATION TIMED OUT
        guard.terminate(KILL_GRACE);
    }
    drop(rx);
    let stderr_tail = join_readers(&guard, pump, diag);

    let outcome = match status {
        _ if timed_out => Outcome::TimedOut,
        Some(s) if s.success() => Outcome::Success,
        Some(s) => Outcome::Failed(s.code()),
        None => Outcome::Failed(None),
    };

    Ok(ChildReport {
        outcome,
        rows,
        malformed,
        elapsed: started.elapsed(),
        stderr_tail,
    })
}
