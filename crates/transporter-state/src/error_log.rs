//! Per-writer append-only error log.
//!
//! A message lands here when its sink commit failed. Any entry present is
//! a hard stop signal: the pipeline refuses to start while the log is
//! non-empty, and only an explicit operator truncation clears it.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use transporter_types::Message;

use crate::error::{LogError, LogResult};
use crate::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};

/// One failed commit, as recorded for operator inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Commit-log offset the message held when the batch failed.
    pub offset: u64,
    /// The message the sink rejected.
    pub message: Message,
    /// Adaptor-reported failure description.
    pub error: String,
    /// ISO-8601 UTC time the failure was recorded.
    pub recorded_at: String,
}

/// Append-only error log owned by exactly one writer.
pub struct ErrorLog {
    path: PathBuf,
    writer: FrameWriter<BufWriter<File>>,
    len: usize,
}

impl ErrorLog {
    /// Open (or create) the log at `path`, counting existing records.
    pub fn open(path: &Path) -> LogResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LogError::io(path, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| LogError::io(path, e))?;

        let len = scan_count(&mut file, path)?;
        file.seek(SeekFrom::End(0)).map_err(|e| LogError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: FrameWriter::new(BufWriter::new(file), DEFAULT_MAX_FRAME_BYTES),
            len,
        })
    }

    /// Append failure records and fsync before returning, so the stop
    /// signal survives a crash.
    pub fn append_all(&mut self, records: &[ErrorRecord]) -> LogResult<()> {
        for record in records {
            let payload = serde_json::to_vec(record)?;
            self.writer.write_frame(&payload)?;
        }
        let path = self.path.clone();
        let buf = self.writer.get_mut();
        std::io::Write::flush(buf).map_err(|e| LogError::io(&path, e))?;
        buf.get_ref()
            .sync_data()
            .map_err(|e| LogError::io(&path, e))?;
        self.len += records.len();
        Ok(())
    }

    /// Number of recorded failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no failures are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record for operator inspection. A missing file reads
    /// as empty.
    pub fn read_all(path: &Path) -> LogResult<Vec<ErrorRecord>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(LogError::io(path, e)),
        };
        let mut reader = FrameReader::new(BufReader::new(file), DEFAULT_MAX_FRAME_BYTES);
        let mut records = Vec::new();
        loop {
            match reader.read_next() {
                Ok(Some(payload)) => records.push(serde_json::from_slice(&payload)?),
                Ok(None) => break,
                Err(err) if err.is_tail_corruption() => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Ignoring torn tail of error log"
                    );
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(records)
    }

    /// Count records without materializing them. A missing file counts
    /// as zero.
    pub fn count(path: &Path) -> LogResult<usize> {
        Ok(Self::read_all(path)?.len())
    }

    /// Operator truncation: drop every record. The file stays in place,
    /// emptied, so a concurrent `open` keeps working.
    pub fn truncate(path: &Path) -> LogResult<usize> {
        let dropped = Self::count(path)?;
        if dropped > 0 {
            let file = OpenOptions::new()
                .write(true)
                .open(path)
                .map_err(|e| LogError::io(path, e))?;
            file.set_len(0).map_err(|e| LogError::io(path, e))?;
            file.sync_data().map_err(|e| LogError::io(path, e))?;
        }
        Ok(dropped)
    }
}

fn scan_count(file: &mut File, path: &Path) -> LogResult<usize> {
    file.seek(SeekFrom::Start(0)).map_err(|e| LogError::io(path, e))?;
    let mut reader = FrameReader::new(BufReader::new(&mut *file), DEFAULT_MAX_FRAME_BYTES);
    let mut count = 0usize;
    loop {
        match reader.read_next() {
            Ok(Some(_)) => count += 1,
            Ok(None) => break,
            Err(err) if err.is_tail_corruption() => {
                let good = reader.consumed();
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Discarding torn tail of error log"
                );
                drop(reader);
                file.set_len(good).map_err(|e| LogError::io(path, e))?;
                file.sync_data().map_err(|e| LogError::io(path, e))?;
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(count)
}
