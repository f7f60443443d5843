// ALLOCBENCH LEDGERS
//
// ResultLedger: THE ONLY WRITER OF THE OUTPUT CSV. EVERY ROW IS SYNCED TO DISK BEFORE
// append() RETURNS, SO A HARD KILL LOSES AT MOST THE ROW IN FLIGHT.
//
// CompletionLedger: THE SET OF CONFIGURATION KEYS ALREADY PRESENT IN AN EXISTING CSV.
// A KEY IS DONE IF ANY ROW CARRIES IT, INCLUDING A TIMEOUT PLACEHOLDER.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::BenchResult;
use crate::row::{header_line, is_header, ResultRow, DELIMITER};

const KEY_FIELDS: usize = 4;

pub struct ResultLedger {
    file: File,
    path: PathBuf,
    rows_written: u64,
    appending: bool,
}

impl ResultLedger {
    // resume && FILE HAS CONTENT -> APPEND WITHOUT HEADER. OTHERWISE TRUNCATE + HEADER.
    pub fn open(path: &Path, resume: bool) -> BenchResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let existing_len = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let appending = resume && existing_len > 0;

        let mut file = if appending {
            let mut f = OpenOptions::new().read(true).append(true).open(path)?;
            // TORN LAST LINE FROM A CRASH: TERMINATE IT SO NEW ROWS START CLEAN
            if !ends_with_newline(&mut f, existing_len)? {
                f.write_all(b"\n")?;
            }
            f
        } else {
            File::create(path)?
        };

        if !appending {
            writeln!(file, "{}", header_line())?;
        }
        file.sync_data()?;

        info!(
            path = %path.display(),
            mode = if appending { "append" } else { "truncate" },
            "ledger opened"
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            rows_written: 0,
            appending,
        })
    }

    pub fn append(&mut self, row: &ResultRow) -> BenchResult<()> {
        let line = format!("{}\n", row);
        self.file.write_all(line.as_bytes())?;
        self.file.sync_data()?;
        self.rows_written += 1;
        debug!(key = %row.completion_key(), placeholder = row.is_placeholder(), "row committed");
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn is_appending(&self) -> bool {
        self.appending
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn ends_with_newline(f: &mut File, len: u64) -> io::Result<bool> {
    if len == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    f.seek(SeekFrom::Start(len - 1))?;
    f.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

#[derive(Default, Debug)]
pub struct CompletionLedger {
    keys: HashSet<String>,
}

impl CompletionLedger {
    // MISSING FILE = NOTHING COMPLETED YET
    pub fn load(path: &Path) -> BenchResult<Self> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = HashSet::new();
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            if let Some(key) = key_from_line(&line) {
                keys.insert(key);
            }
        }

        debug!(path = %path.display(), keys = keys.len(), "completion ledger loaded");
        Ok(Self { keys })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }
}

fn key_from_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || is_header(line) {
        return None;
    }
    let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
    if fields.len() < KEY_FIELDS {
        return None;
    }
    Some(format!("{}|{}|{}|{}", fields[0], fields[1], fields[2], fields[3]))
}
