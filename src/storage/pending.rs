//! Durable queue of call records that could not be written to the database.
//!
//! Records are appended as JSON lines and fsynced before `enqueue` returns, so
//! a finalized call survives a database outage and a process restart. The
//! queue is drained at startup and on every sweep tick.
//!
//! Nothing read from the queue file is thrown away. Lines that do not parse
//! (a write torn by a crash) move to `<queue>.corrupt`, and records the
//! database refuses for good move to `<queue>.rejected`, both for manual
//! recovery.

use crate::error::AppResult;
use crate::storage::{CallRecord, PersistenceGateway};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};

/// Outcome of one [`PendingRecordQueue::drain`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub stored: usize,
    pub remaining: usize,
    /// Lines moved to the `.corrupt` or `.rejected` side files.
    pub quarantined: usize,
}

/// Parsed queue file.
#[derive(Default)]
struct QueueContents {
    records: Vec<CallRecord>,
    malformed: Vec<Vec<u8>>,
}

pub struct PendingRecordQueue {
    path: PathBuf,
    // Serializes enqueue and drain so a rewrite never drops a fresh append.
    lock: Mutex<()>,
}

impl PendingRecordQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where unparseable lines end up.
    pub fn corrupt_path(&self) -> PathBuf {
        self.side_path(".corrupt")
    }

    /// Where records the database refused for good end up.
    pub fn rejected_path(&self) -> PathBuf {
        self.side_path(".rejected")
    }

    pub fn enqueue(&self, record: &CallRecord) -> AppResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        // A torn last line must not swallow this record.
        if !ends_with_newline(&mut file)? {
            file.write_all(b"\n")?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line)?;
        file.sync_all()?;

        warn!(call_id = %record.call_id, "Call record queued for later persistence");
        Ok(())
    }

    /// Records currently waiting. Malformed lines are not counted.
    pub fn pending(&self) -> AppResult<Vec<CallRecord>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let contents = self.read_all()?;
        if !contents.malformed.is_empty() {
            warn!(
                "{} malformed lines in {}, moved aside on the next drain",
                contents.malformed.len(),
                self.path.display()
            );
        }
        Ok(contents.records)
    }

    pub fn len(&self) -> AppResult<usize> {
        Ok(self.pending()?.len())
    }

    pub fn is_empty(&self) -> AppResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Replay every queued record into `gateway`. Records that fail for a
    /// transient reason stay queued.
    pub fn drain(&self, gateway: &dyn PersistenceGateway) -> AppResult<DrainReport> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let contents = self.read_all()?;
        if contents.records.is_empty() && contents.malformed.is_empty() {
            return Ok(DrainReport::default());
        }

        let mut failed = Vec::new();
        let mut rejected = Vec::new();
        let mut stored = 0;
        for record in contents.records {
            match gateway.insert_call_record(&record) {
                Ok(()) => stored += 1,
                Err(e) if !e.is_retriable() => {
                    warn!(call_id = %record.call_id, "Pending record rejected: {}", e);
                    rejected.push(serde_json::to_vec(&record)?);
                }
                Err(e) => {
                    warn!(call_id = %record.call_id, "Pending record still not persisted: {}", e);
                    failed.push(record);
                }
            }
        }

        // Side files are written before the queue is rewritten.
        if !contents.malformed.is_empty() {
            warn!(
                "Moving {} malformed pending lines to {}",
                contents.malformed.len(),
                self.corrupt_path().display()
            );
            append_lines(&self.corrupt_path(), &contents.malformed)?;
        }
        append_lines(&self.rejected_path(), &rejected)?;
        let quarantined = contents.malformed.len() + rejected.len();

        self.rewrite(&failed)?;
        if stored > 0 {
            info!(
                "Persisted {} queued call records ({} remaining)",
                stored,
                failed.len()
            );
        }

        Ok(DrainReport {
            stored,
            remaining: failed.len(),
            quarantined,
        })
    }

    fn side_path(&self, suffix: &str) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(suffix);
        PathBuf::from(name)
    }

    fn read_all(&self) -> AppResult<QueueContents> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(QueueContents::default())
            }
            Err(e) => return Err(e.into()),
        };

        let mut contents = QueueContents::default();
        for line in bytes.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<CallRecord>(line) {
                Ok(record) => contents.records.push(record),
                Err(_) => contents.malformed.push(line.to_vec()),
            }
        }
        Ok(contents)
    }

    /// Replace the queue file with `records` via a temp file and rename.
    fn rewrite(&self, records: &[CallRecord]) -> AppResult<()> {
        if records.is_empty() {
            match fs::remove_file(&self.path) {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }

        let tmp_path = self.side_path(".tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            for record in records {
                writeln!(tmp, "{}", serde_json::to_string(record)?)?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn ends_with_newline(file: &mut File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

fn append_lines(path: &Path, lines: &[Vec<u8>]) -> AppResult<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    for line in lines {
        file.write_all(line)?;
        file.write_all(b"\n")?;
    }
    file.sync_all()?;
    Ok(())
}
