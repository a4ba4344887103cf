//! Per-writer append-only commit log.
//!
//! Two record kinds share the framed file: an [`Entry`](CommitRecord::Entry)
//! appended when the writer accepts a message (uncommitted), and a
//! [`Mark`](CommitRecord::Mark) appended after a successful sink batch,
//! flipping every offset up to and including `upto` to committed. Because
//! a writer commits strictly in accept order, one marker covers a
//! contiguous range and a scan of the log always reproduces the committed
//! set, regardless of where a crash cut the file.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use transporter_types::{Message, State};

use crate::error::{LogError, LogResult};
use crate::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};

/// One accepted message with its durability bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Writer-local commit-log position.
    pub offset: u64,
    /// Reader-assigned emission sequence, used to pick the newest state
    /// per namespace when a batch commits.
    pub seq: u64,
    /// The accepted message.
    pub message: Message,
    /// Reader state reflecting the position after this message.
    pub state: State,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum CommitRecord {
    Entry(LogEntry),
    Mark { upto: u64 },
}

/// Outcome of scanning a commit log at startup.
#[derive(Debug)]
pub struct Recovery {
    /// Highest offset present in the log, entries and markers included.
    pub head: Option<u64>,
    /// Highest committed offset.
    pub durable: Option<u64>,
    /// Entries past the durable offset, in original append order. These
    /// are redelivered to the sink; it may already have received them.
    pub uncommitted: Vec<LogEntry>,
    /// Bytes of torn tail discarded by the scan.
    pub truncated_bytes: u64,
}

/// Append-only commit log owned by exactly one writer.
pub struct CommitLog {
    path: PathBuf,
    writer: FrameWriter<BufWriter<File>>,
    next_offset: u64,
    head: Option<u64>,
    durable: Option<u64>,
    file_bytes: u64,
}

impl CommitLog {
    /// Open (or create) the log at `path`, scanning existing records and
    /// truncating any torn tail in place.
    pub fn open(path: &Path) -> LogResult<(Self, Recovery)> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LogError::io(path, e))?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| LogError::io(path, e))?;

        let recovery = scan(&mut file, path)?;

        file.seek(SeekFrom::End(0)).map_err(|e| LogError::io(path, e))?;
        let file_bytes = file
            .metadata()
            .map_err(|e| LogError::io(path, e))?
            .len();

        let log = Self {
            path: path.to_path_buf(),
            writer: FrameWriter::new(BufWriter::new(file), DEFAULT_MAX_FRAME_BYTES),
            next_offset: recovery.head.map_or(0, |h| h + 1),
            head: recovery.head,
            durable: recovery.durable,
            file_bytes,
        };
        Ok((log, recovery))
    }

    /// Allocate the next offset for an incoming message.
    pub fn allocate_offset(&mut self) -> u64 {
        let offset = self.next_offset;
        self.next_offset += 1;
        offset
    }

    /// Append an uncommitted entry. Buffered; call [`CommitLog::sync`]
    /// before handing the covered messages to the sink.
    pub fn append(&mut self, entry: &LogEntry) -> LogResult<()> {
        let payload = serde_json::to_vec(&CommitRecord::Entry(entry.clone()))?;
        let written = self.writer.write_frame(&payload)?;
        self.file_bytes += written;
        self.head = Some(self.head.map_or(entry.offset, |h| h.max(entry.offset)));
        Ok(())
    }

    /// Flip every offset `<= upto` to committed. Flushes and fsyncs so
    /// the marker survives a crash.
    pub fn mark_committed(&mut self, upto: u64) -> LogResult<()> {
        if self.head.is_none_or(|h| upto > h) {
            return Err(LogError::MarkPastHead {
                upto,
                head: self.head,
            });
        }
        let payload = serde_json::to_vec(&CommitRecord::Mark { upto })?;
        let written = self.writer.write_frame(&payload)?;
        self.file_bytes += written;
        self.sync()?;
        self.durable = Some(self.durable.map_or(upto, |d| d.max(upto)));
        Ok(())
    }

    /// Flush buffered frames and fsync the file.
    pub fn sync(&mut self) -> LogResult<()> {
        let path = self.path.clone();
        let buf = self.writer.get_mut();
        std::io::Write::flush(buf).map_err(|e| LogError::io(&path, e))?;
        buf.get_ref()
            .sync_data()
            .map_err(|e| LogError::io(&path, e))?;
        Ok(())
    }

    /// Highest committed offset, if any.
    #[must_use]
    pub fn durable_offset(&self) -> Option<u64> {
        self.durable
    }

    /// Highest offset present in the log, if any.
    #[must_use]
    pub fn head_offset(&self) -> Option<u64> {
        self.head
    }

    /// Current on-disk size in bytes (including buffered frames).
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.file_bytes
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop committed entries when the file has grown past `max_bytes`.
    ///
    /// Rewrites the log to a sibling temp file holding one marker at the
    /// durable offset plus every uncommitted entry, fsyncs it, then
    /// renames it over the original. Returns `true` when a rewrite
    /// happened.
    pub fn compact(&mut self, max_bytes: u64) -> LogResult<bool> {
        if self.file_bytes <= max_bytes {
            return Ok(false);
        }
        self.sync()?;

        let mut file = File::open(&self.path).map_err(|e| LogError::io(&self.path, e))?;
        let recovery = scan(&mut file, &self.path)?;
        drop(file);

        let tmp_path = self.path.with_extension("compact");
        let tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| LogError::io(&tmp_path, e))?;
        let mut writer = FrameWriter::new(BufWriter::new(tmp), DEFAULT_MAX_FRAME_BYTES);

        if let Some(durable) = recovery.durable {
            let payload = serde_json::to_vec(&CommitRecord::Mark { upto: durable })?;
            writer.write_frame(&payload)?;
        }
        for entry in &recovery.uncommitted {
            let payload = serde_json::to_vec(&CommitRecord::Entry(entry.clone()))?;
            writer.write_frame(&payload)?;
        }

        let buf = writer.into_inner();
        let file = buf
            .into_inner()
            .map_err(|e| LogError::io(&tmp_path, e.into_error()))?;
        file.sync_data().map_err(|e| LogError::io(&tmp_path, e))?;
        drop(file);
        std::fs::rename(&tmp_path, &self.path).map_err(|e| LogError::io(&self.path, e))?;

        let mut reopened = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| LogError::io(&self.path, e))?;
        reopened
            .seek(SeekFrom::End(0))
            .map_err(|e| LogError::io(&self.path, e))?;
        self.file_bytes = reopened
            .metadata()
            .map_err(|e| LogError::io(&self.path, e))?
            .len();
        self.writer = FrameWriter::new(BufWriter::new(reopened), DEFAULT_MAX_FRAME_BYTES);

        tracing::info!(
            path = %self.path.display(),
            retained = recovery.uncommitted.len(),
            size_bytes = self.file_bytes,
            "Compacted commit log"
        );
        Ok(true)
    }
}

/// Read-only summary of a commit log for status reporting. Unlike
/// [`CommitLog::open`], a torn tail is reported but left in place, so
/// inspecting a live writer's log never mutates it. A missing file reads
/// as an empty log.
pub fn inspect(path: &Path) -> LogResult<Recovery> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Recovery {
                head: None,
                durable: None,
                uncommitted: Vec::new(),
                truncated_bytes: 0,
            })
        }
        Err(e) => return Err(LogError::io(path, e)),
    };

    let total = file.metadata().map_err(|e| LogError::io(path, e))?.len();
    let mut reader = FrameReader::new(BufReader::new(&mut file), DEFAULT_MAX_FRAME_BYTES);
    let mut entries: Vec<LogEntry> = Vec::new();
    let mut head: Option<u64> = None;
    let mut durable: Option<u64> = None;
    let mut truncated_bytes = 0u64;

    loop {
        match reader.read_next() {
            Ok(Some(payload)) => match serde_json::from_slice::<CommitRecord>(&payload)? {
                CommitRecord::Entry(entry) => {
                    head = Some(head.map_or(entry.offset, |h| h.max(entry.offset)));
                    entries.push(entry);
                }
                CommitRecord::Mark { upto } => {
                    head = Some(head.map_or(upto, |h| h.max(upto)));
                    durable = Some(durable.map_or(upto, |d| d.max(upto)));
                }
            },
            Ok(None) => break,
            Err(err) if err.is_tail_corruption() => {
                truncated_bytes = total - reader.consumed();
                break;
            }
            Err(err) => return Err(err),
        }
    }

    let uncommitted = entries
        .into_iter()
        .filter(|e| durable.is_none_or(|d| e.offset > d))
        .collect();
    Ok(Recovery {
        head,
        durable,
        uncommitted,
        truncated_bytes,
    })
}

/// Scan the log from the start, truncating a torn tail in place.
fn scan(file: &mut File, path: &Path) -> LogResult<Recovery> {
    file.seek(SeekFrom::Start(0)).map_err(|e| LogError::io(path, e))?;
    let total = file.metadata().map_err(|e| LogError::io(path, e))?.len();
    let mut reader = FrameReader::new(BufReader::new(&mut *file), DEFAULT_MAX_FRAME_BYTES);

    let mut entries: Vec<LogEntry> = Vec::new();
    let mut head: Option<u64> = None;
    let mut durable: Option<u64> = None;
    let mut truncated_bytes = 0u64;

    loop {
        match reader.read_next() {
            Ok(Some(payload)) => match serde_json::from_slice::<CommitRecord>(&payload) {
                Ok(CommitRecord::Entry(entry)) => {
                    head = Some(head.map_or(entry.offset, |h| h.max(entry.offset)));
                    entries.push(entry);
                }
                Ok(CommitRecord::Mark { upto }) => {
                    head = Some(head.map_or(upto, |h| h.max(upto)));
                    durable = Some(durable.map_or(upto, |d| d.max(upto)));
                }
                Err(e) => return Err(LogError::Codec(e)),
            },
            Ok(None) => break,
            Err(err) if err.is_tail_corruption() => {
                let good = reader.consumed();
                truncated_bytes = total - good;
                tracing::warn!(
                    path = %path.display(),
                    discarded_bytes = truncated_bytes,
                    error = %err,
                    "Discarding torn tail of commit log"
                );
                drop(reader);
                file.set_len(good).map_err(|e| LogError::io(path, e))?;
                file.sync_data().map_err(|e| LogError::io(path, e))?;
                break;
            }
            Err(err) => return Err(err),
        }
    }

    let uncommitted = entries
        .into_iter()
        .filter(|e| durable.is_none_or(|d| e.offset > d))
        .collect();

    Ok(Recovery {
        head,
        durable,
        uncommitted,
        truncated_bytes,
    })
}
