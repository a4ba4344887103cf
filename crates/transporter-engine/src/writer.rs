//! Writer runtime: the durability workhorse.
//!
//! Each writer runs two cooperating tasks sharing a bounded buffer. The
//! **accept path** (called from the edge's path task) appends every
//! incoming message to the commit log uncommitted, then pushes it into
//! the buffer, blocking when the buffer is full: that block is the
//! pipeline's backpressure. The **drain task** pulls batches bounded by
//! record count and time, fsyncs the log so entries are durable before
//! the sink can observe them, invokes the sink adaptor's bulk API, and
//! on success flips the range committed, advances the durable offset,
//! and persists the correlated reader states in one atomic store
//! commit.
//!
//! On bulk failure this writer records the failing subset when the
//! adaptor identifies one, otherwise the whole batch, in its error log,
//! then stops: no further commits happen in the run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use transporter_state::{CommitLog, ErrorLog, ErrorRecord, LogEntry, StateStore};
use transporter_types::{Message, Namespace, State, WriterId};

use crate::adaptor::{BulkOutcome, Sourced, WriterAdaptor};
use crate::error::PipelineError;

/// How often a blocked drain loop rechecks the abort token.
const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tuning knobs for a writer runtime.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Record-count bound for a sink batch.
    pub max_batch_records: usize,
    /// Time bound: a non-empty batch is dispatched at the latest this
    /// long after its first message arrived.
    pub max_batch_delay: Duration,
    /// Capacity of the bounded accept buffer.
    pub buffer_capacity: usize,
    /// Commit-log size past which committed entries are compacted away.
    pub commit_log_max_bytes: Option<u64>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_batch_records: 500,
            max_batch_delay: Duration::from_millis(1000),
            buffer_capacity: 1024,
            commit_log_max_bytes: None,
        }
    }
}

/// Counters reported when a writer stops.
#[derive(Debug, Clone, Default)]
pub struct WriterStats {
    pub committed: u64,
    pub failed: u64,
    pub batches: u64,
    pub durable_offset: Option<u64>,
}

/// Count of accepted-but-uncommitted messages, with a condvar so
/// `flush` can wait for it to reach zero.
#[derive(Default)]
struct PendingGauge {
    count: Mutex<u64>,
    drained: Condvar,
}

impl PendingGauge {
    fn add(&self, n: u64) {
        if let Ok(mut count) = self.count.lock() {
            *count += n;
        }
    }

    fn sub(&self, n: u64) {
        if let Ok(mut count) = self.count.lock() {
            *count = count.saturating_sub(n);
            if *count == 0 {
                self.drained.notify_all();
            }
        }
    }

    fn wait_zero(&self, deadline: Duration) -> bool {
        let until = Instant::now() + deadline;
        let Ok(mut count) = self.count.lock() else {
            return false;
        };
        while *count > 0 {
            let now = Instant::now();
            if now >= until {
                return false;
            }
            match self.drained.wait_timeout(count, until - now) {
                Ok((guard, _)) => count = guard,
                Err(_) => return false,
            }
        }
        true
    }
}

/// Shared writer core: the accept side of the runtime.
pub struct Writer {
    id: WriterId,
    log: Mutex<CommitLog>,
    accepting: AtomicBool,
    pending: PendingGauge,
    abort: CancellationToken,
}

impl Writer {
    /// Enqueue a message for eventual durable commit: append it to the
    /// commit log with a fresh offset, then buffer it. Blocks when the
    /// buffer is full (backpressure). Returns `Ok(false)` once the
    /// writer has stopped accepting.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Durability`] when the log append fails; the
    /// pipeline must abort without acknowledging further messages.
    pub fn accept(
        &self,
        sourced: Sourced,
        buffer: &SyncSender<LogEntry>,
    ) -> Result<bool, PipelineError> {
        if !self.accepting.load(Ordering::Acquire) || self.abort.is_cancelled() {
            return Ok(false);
        }
        let entry = {
            let mut log = self.lock_log()?;
            let offset = log.allocate_offset();
            let entry = LogEntry {
                offset,
                seq: sourced.seq,
                message: sourced.message,
                state: sourced.state,
            };
            log.append(&entry)?;
            entry
        };
        self.pending.add(1);
        if buffer.send(entry).is_err() {
            // Drain side already gone; the pipeline is coming down.
            self.pending.sub(1);
            return Ok(false);
        }
        Ok(true)
    }

    /// Stop taking new messages. Idempotent.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn id(&self) -> &WriterId {
        &self.id
    }

    fn lock_log(&self) -> Result<std::sync::MutexGuard<'_, CommitLog>, PipelineError> {
        self.log
            .lock()
            .map_err(|_| PipelineError::Durability(anyhow::anyhow!("commit log lock poisoned")))
    }
}

/// Handle owned by the supervisor: flush and shutdown.
pub struct WriterHandle {
    core: Arc<Writer>,
    drain: tokio::task::JoinHandle<Result<WriterStats, PipelineError>>,
}

impl WriterHandle {
    #[must_use]
    pub fn core(&self) -> &Arc<Writer> {
        &self.core
    }

    /// Synchronously wait until every accepted message has been driven
    /// to commit or error, or the deadline elapses. Returns `true` when
    /// the buffer drained in time.
    #[must_use]
    pub fn flush(&self, deadline: Duration) -> bool {
        self.core.pending.wait_zero(deadline)
    }

    /// Stop accepting, then either drain for up to `timeout` (graceful)
    /// or abort immediately. A graceful timeout that elapses is itself
    /// an abort: whatever is still buffered stays uncommitted in the
    /// commit log and is redelivered on the next start.
    pub async fn shutdown(
        mut self,
        graceful: bool,
        timeout: Duration,
    ) -> Result<WriterStats, PipelineError> {
        self.core.stop_accepting();
        if !graceful {
            self.core.abort.cancel();
        }
        let id = self.core.id.clone();
        match tokio::time::timeout(timeout, &mut self.drain).await {
            Ok(joined) => join_drain(joined, &id),
            Err(_) => {
                tracing::warn!(
                    writer = id.as_str(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Graceful shutdown window elapsed; aborting writer"
                );
                self.core.abort.cancel();
                match tokio::time::timeout(Duration::from_secs(5), &mut self.drain).await {
                    Ok(joined) => join_drain(joined, &id),
                    Err(_) => Err(PipelineError::Runtime(anyhow::anyhow!(
                        "writer '{id}' drain task did not stop after abort"
                    ))),
                }
            }
        }
    }
}

fn join_drain(
    joined: Result<Result<WriterStats, PipelineError>, tokio::task::JoinError>,
    id: &WriterId,
) -> Result<WriterStats, PipelineError> {
    joined.map_err(|e| {
        PipelineError::Runtime(anyhow::anyhow!("writer '{id}' drain task panicked: {e}"))
    })?
}

/// Everything the drain task needs, moved onto its blocking thread.
struct DrainParams {
    core: Arc<Writer>,
    buffer_rx: Receiver<LogEntry>,
    adaptor: Box<dyn WriterAdaptor>,
    error_log: ErrorLog,
    store: Arc<dyn StateStore>,
    recovered: Vec<LogEntry>,
    options: WriterOptions,
    fatal: CancellationToken,
}

/// Build the writer runtime: commit log recovery already done by the
/// caller, uncommitted entries passed in for redelivery. Returns the
/// accept sender for the edge's path task and the supervisor handle.
#[allow(clippy::too_many_arguments)]
pub fn spawn_writer(
    id: WriterId,
    adaptor: Box<dyn WriterAdaptor>,
    log: CommitLog,
    recovered: Vec<LogEntry>,
    error_log: ErrorLog,
    store: Arc<dyn StateStore>,
    options: WriterOptions,
    fatal: CancellationToken,
) -> (SyncSender<LogEntry>, WriterHandle) {
    let initial_durable = log.durable_offset();
    let core = Arc::new(Writer {
        id,
        log: Mutex::new(log),
        accepting: AtomicBool::new(true),
        pending: PendingGauge::default(),
        abort: CancellationToken::new(),
    });
    // Recovered entries count toward the flush gauge before the drain
    // starts, so an early flush cannot observe an empty writer.
    core.pending.add(recovered.len() as u64);

    let (buffer_tx, buffer_rx) = std::sync::mpsc::sync_channel(options.buffer_capacity.max(1));
    let params = DrainParams {
        core: core.clone(),
        buffer_rx,
        adaptor,
        error_log,
        store,
        recovered,
        options,
        fatal,
    };
    let mut stats = WriterStats {
        durable_offset: initial_durable,
        ..WriterStats::default()
    };
    let drain = tokio::task::spawn_blocking(move || run_drain(params, &mut stats).map(|()| stats));

    (buffer_tx, WriterHandle { core, drain })
}

fn run_drain(params: DrainParams, stats: &mut WriterStats) -> Result<(), PipelineError> {
    let DrainParams {
        core,
        buffer_rx,
        mut adaptor,
        mut error_log,
        store,
        recovered,
        options,
        fatal,
    } = params;

    let mut result = drain_loop(
        &core,
        &buffer_rx,
        adaptor.as_mut(),
        &mut error_log,
        store.as_ref(),
        recovered,
        &options,
        stats,
    );
    // Accepted entries that never reached a batch boundary still need
    // to survive for redelivery on the next start.
    if result.is_ok() {
        result = core.lock_log().and_then(|mut log| Ok(log.sync()?));
    }
    adaptor.close();
    if let Err(ref err) = result {
        tracing::error!(writer = core.id.as_str(), error = %err, "Writer stopped on error");
        // Bring the rest of the graph down: the reader must stop
        // feeding a pipeline that can no longer commit.
        fatal.cancel();
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn drain_loop(
    core: &Writer,
    buffer_rx: &Receiver<LogEntry>,
    adaptor: &mut dyn WriterAdaptor,
    error_log: &mut ErrorLog,
    store: &dyn StateStore,
    recovered: Vec<LogEntry>,
    options: &WriterOptions,
    stats: &mut WriterStats,
) -> Result<(), PipelineError> {
    let max_records = options.max_batch_records.max(1);

    if !recovered.is_empty() {
        tracing::info!(
            writer = core.id.as_str(),
            count = recovered.len(),
            "Redelivering uncommitted entries from commit log"
        );
        for chunk in recovered.chunks(max_records) {
            if core.abort.is_cancelled() {
                return Ok(());
            }
            process_batch(core, adaptor, error_log, store, chunk, options, stats)?;
        }
    }

    loop {
        // Wait for the first message of the next batch, polling so an
        // abort is noticed promptly.
        let first = loop {
            if core.abort.is_cancelled() {
                return Ok(());
            }
            match buffer_rx.recv_timeout(ABORT_POLL_INTERVAL) {
                Ok(entry) => break entry,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        };

        let mut batch = vec![first];
        let deadline = Instant::now() + options.max_batch_delay;
        let mut disconnected = false;
        while batch.len() < max_records {
            if core.abort.is_cancelled() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = (deadline - now).min(ABORT_POLL_INTERVAL);
            match buffer_rx.recv_timeout(wait) {
                Ok(entry) => batch.push(entry),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if core.abort.is_cancelled() {
            return Ok(());
        }
        process_batch(core, adaptor, error_log, store, &batch, options, stats)?;

        if disconnected {
            // Accept side closed; everything buffered has been drained.
            return Ok(());
        }
    }
}

fn process_batch(
    core: &Writer,
    adaptor: &mut dyn WriterAdaptor,
    error_log: &mut ErrorLog,
    store: &dyn StateStore,
    batch: &[LogEntry],
    options: &WriterOptions,
    stats: &mut WriterStats,
) -> Result<(), PipelineError> {
    let Some(last) = batch.last() else {
        return Ok(());
    };
    // Entries must be durable before the sink can observe them.
    core.lock_log()?.sync()?;

    let messages: Vec<Message> = batch.iter().map(|e| e.message.clone()).collect();
    match adaptor.bulk_write(&messages) {
        BulkOutcome::Ok => {
            core.lock_log()?.mark_committed(last.offset)?;
            let states = newest_states(batch);
            store.commit_group(&core.id, last.offset, &states)?;
            core.pending.sub(batch.len() as u64);
            stats.committed += batch.len() as u64;
            stats.batches += 1;
            stats.durable_offset = Some(last.offset);
            tracing::debug!(
                writer = core.id.as_str(),
                offset = last.offset,
                records = batch.len(),
                "Batch committed"
            );
            if let Some(max_bytes) = options.commit_log_max_bytes {
                core.lock_log()?.compact(max_bytes)?;
            }
            Ok(())
        }
        BulkOutcome::Partial { failed } => {
            let records: Vec<ErrorRecord> = failed
                .iter()
                .filter_map(|(index, description)| {
                    batch.get(*index).map(|entry| ErrorRecord {
                        offset: entry.offset,
                        message: entry.message.clone(),
                        error: description.clone(),
                        recorded_at: chrono::Utc::now().to_rfc3339(),
                    })
                })
                .collect();
            let description = format!(
                "{} of {} messages rejected by sink",
                records.len(),
                batch.len()
            );
            record_failure(core, error_log, records, description, stats)
        }
        BulkOutcome::Failed { description } => {
            let records: Vec<ErrorRecord> = batch
                .iter()
                .map(|entry| ErrorRecord {
                    offset: entry.offset,
                    message: entry.message.clone(),
                    error: description.clone(),
                    recorded_at: chrono::Utc::now().to_rfc3339(),
                })
                .collect();
            record_failure(core, error_log, records, description, stats)
        }
    }
}

fn record_failure(
    core: &Writer,
    error_log: &mut ErrorLog,
    records: Vec<ErrorRecord>,
    description: String,
    stats: &mut WriterStats,
) -> Result<(), PipelineError> {
    stats.failed += records.len() as u64;
    error_log.append_all(&records)?;
    tracing::error!(
        writer = core.id.as_str(),
        failed = records.len(),
        description,
        "Bulk write failed; error log written, stopping"
    );
    Err(PipelineError::Sink {
        writer: core.id.clone(),
        description,
    })
}

/// Newest state per namespace in the batch, by reader sequence.
fn newest_states(batch: &[LogEntry]) -> Vec<State> {
    let mut by_namespace: HashMap<Namespace, (u64, State)> = HashMap::new();
    for entry in batch {
        let candidate = (entry.seq, entry.state.clone());
        by_namespace
            .entry(entry.state.namespace.clone())
            .and_modify(|held| {
                if candidate.0 > held.0 {
                    *held = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
    by_namespace.into_values().map(|(_, state)| state).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;
    use transporter_state::SqliteStateStore;
    use transporter_types::{Op, SyncPhase, Value};

    struct RecordingSink {
        batches: Arc<Mutex<Vec<Vec<Message>>>>,
        /// Fail the batch containing the Nth written message (0-based).
        fail_at_message: Option<usize>,
        partial: bool,
        written: usize,
        closes: Arc<AtomicUsize>,
    }

    impl RecordingSink {
        fn new() -> (Self, Arc<Mutex<Vec<Vec<Message>>>>, Arc<AtomicUsize>) {
            let batches = Arc::new(Mutex::new(Vec::new()));
            let closes = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    batches: batches.clone(),
                    fail_at_message: None,
                    partial: false,
                    written: 0,
                    closes: closes.clone(),
                },
                batches,
                closes,
            )
        }
    }

    impl WriterAdaptor for RecordingSink {
        fn bulk_write(&mut self, batch: &[Message]) -> BulkOutcome {
            if let Some(limit) = self.fail_at_message {
                if self.written + batch.len() > limit {
                    if self.partial {
                        let failed = (limit.saturating_sub(self.written)..batch.len())
                            .map(|i| (i, "constraint violated".to_string()))
                            .collect();
                        return BulkOutcome::Partial { failed };
                    }
                    return BulkOutcome::Failed {
                        description: "sink unavailable".to_string(),
                    };
                }
            }
            self.written += batch.len();
            self.batches.lock().unwrap().push(batch.to_vec());
            BulkOutcome::Ok
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sourced(seq: u64, ns: &str) -> Sourced {
        let namespace = Namespace::new(ns);
        Sourced {
            seq,
            message: Message::new(Op::Insert, namespace.clone())
                .with_field("n", Value::Int(i64::try_from(seq).unwrap())),
            state: State {
                identifier: Some(format!("pos:{seq}")),
                timestamp: seq + 1,
                namespace,
                phase: SyncPhase::Copy,
            },
        }
    }

    struct Fixture {
        dir: TempDir,
        store: Arc<SqliteStateStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                store: Arc::new(SqliteStateStore::in_memory().unwrap()),
            }
        }

        fn spawn(
            &self,
            sink: RecordingSink,
            options: WriterOptions,
        ) -> (SyncSender<LogEntry>, WriterHandle) {
            let (log, recovery) =
                CommitLog::open(&self.dir.path().join("w1.commitlog")).unwrap();
            let error_log = ErrorLog::open(&self.dir.path().join("w1.errorlog")).unwrap();
            spawn_writer(
                WriterId::new("w1"),
                Box::new(sink),
                log,
                recovery.uncommitted,
                error_log,
                self.store.clone(),
                options,
                CancellationToken::new(),
            )
        }
    }

    fn small_batches() -> WriterOptions {
        WriterOptions {
            max_batch_records: 4,
            max_batch_delay: Duration::from_millis(50),
            buffer_capacity: 64,
            commit_log_max_bytes: None,
        }
    }

    #[tokio::test]
    async fn happy_path_commits_everything_in_order() {
        let fixture = Fixture::new();
        let (sink, batches, closes) = RecordingSink::new();
        let (tx, handle) = fixture.spawn(sink, small_batches());

        for seq in 0..10 {
            assert!(handle.core().accept(sourced(seq, "db.users"), &tx).unwrap());
        }
        assert!(handle.flush(Duration::from_secs(5)));
        drop(tx);
        let stats = handle.shutdown(true, Duration::from_secs(5)).await.unwrap();

        assert_eq!(stats.committed, 10);
        assert_eq!(stats.durable_offset, Some(9));
        assert_eq!(stats.failed, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // FIFO across batches.
        let seen: Vec<i64> = batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .map(|m| match m.data.get("n") {
                Some(Value::Int(n)) => *n,
                other => panic!("unexpected field {other:?}"),
            })
            .collect();
        assert_eq!(seen, (0..10).collect::<Vec<i64>>());

        // Store holds the offset and the newest state for the namespace.
        assert_eq!(
            fixture.store.get_offset(&WriterId::new("w1")).unwrap(),
            Some(9)
        );
        let state = fixture
            .store
            .get_state(&Namespace::new("db.users"))
            .unwrap()
            .unwrap();
        assert_eq!(state.timestamp, 10);
        assert_eq!(state.identifier, Some("pos:9".into()));

        // Commit log agrees after reopen.
        let (_, recovery) =
            CommitLog::open(&fixture.dir.path().join("w1.commitlog")).unwrap();
        assert_eq!(recovery.durable, Some(9));
        assert!(recovery.uncommitted.is_empty());
    }

    #[tokio::test]
    async fn bulk_failure_writes_error_log_and_stops() {
        let fixture = Fixture::new();
        let (mut sink, _, _) = RecordingSink::new();
        sink.fail_at_message = Some(6);
        let (tx, handle) = fixture.spawn(sink, small_batches());

        for seq in 0..8 {
            handle.core().accept(sourced(seq, "db.users"), &tx).unwrap();
        }
        drop(tx);
        let err = handle
            .shutdown(true, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Sink { .. }));

        // First batch (0..=3) committed; failing batch recorded whole.
        assert_eq!(
            fixture.store.get_offset(&WriterId::new("w1")).unwrap(),
            Some(3)
        );
        let errors = ErrorLog::read_all(&fixture.dir.path().join("w1.errorlog")).unwrap();
        assert_eq!(errors.len(), 4);
        assert_eq!(errors[0].offset, 4);
        assert_eq!(errors[0].error, "sink unavailable");
    }

    #[tokio::test]
    async fn partial_failure_records_only_failing_subset() {
        let fixture = Fixture::new();
        let (mut sink, _, _) = RecordingSink::new();
        sink.fail_at_message = Some(6);
        sink.partial = true;
        let (tx, handle) = fixture.spawn(sink, small_batches());

        for seq in 0..8 {
            handle.core().accept(sourced(seq, "db.users"), &tx).unwrap();
        }
        drop(tx);
        let err = handle
            .shutdown(true, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Sink { .. }));

        let errors = ErrorLog::read_all(&fixture.dir.path().join("w1.errorlog")).unwrap();
        // Batch 4..=7 failed at its 3rd message onward: offsets 6, 7.
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].offset, 6);
        assert_eq!(errors[1].offset, 7);
        assert_eq!(errors[0].error, "constraint violated");
    }

    #[tokio::test]
    async fn recovered_entries_are_redelivered_before_live_traffic() {
        let fixture = Fixture::new();
        let path = fixture.dir.path().join("w1.commitlog");

        // A previous run accepted 4 entries and committed none.
        {
            let (mut log, _) = CommitLog::open(&path).unwrap();
            for seq in 0..4u64 {
                let offset = log.allocate_offset();
                let s = sourced(seq, "db.users");
                log.append(&LogEntry {
                    offset,
                    seq,
                    message: s.message,
                    state: s.state,
                })
                .unwrap();
            }
            log.sync().unwrap();
        }

        let (sink, batches, _) = RecordingSink::new();
        let (tx, handle) = fixture.spawn(sink, small_batches());

        // One live message behind the recovered backlog.
        handle.core().accept(sourced(4, "db.users"), &tx).unwrap();
        assert!(handle.flush(Duration::from_secs(5)));
        drop(tx);
        let stats = handle.shutdown(true, Duration::from_secs(5)).await.unwrap();

        assert_eq!(stats.committed, 5);
        assert_eq!(stats.durable_offset, Some(4));
        let first_batch: Vec<i64> = batches.lock().unwrap()[0]
            .iter()
            .map(|m| match m.data.get("n") {
                Some(Value::Int(n)) => *n,
                other => panic!("unexpected field {other:?}"),
            })
            .collect();
        assert_eq!(first_batch, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn forced_abort_leaves_entries_uncommitted() {
        let fixture = Fixture::new();
        let (sink, _, _) = RecordingSink::new();
        // Batch delay far beyond the test so nothing commits on its own.
        let options = WriterOptions {
            max_batch_records: 100,
            max_batch_delay: Duration::from_secs(60),
            ..small_batches()
        };
        let (tx, handle) = fixture.spawn(sink, options);

        for seq in 0..3 {
            handle.core().accept(sourced(seq, "db.users"), &tx).unwrap();
        }
        // Abort with the sender still open, before the delay elapsed:
        // nothing reaches the sink.
        let stats = handle.shutdown(false, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats.committed, 0);
        drop(tx);

        let (_, recovery) =
            CommitLog::open(&fixture.dir.path().join("w1.commitlog")).unwrap();
        assert_eq!(recovery.uncommitted.len(), 3);
        assert_eq!(recovery.durable, None);
    }

    #[tokio::test]
    async fn accept_after_stop_returns_false() {
        let fixture = Fixture::new();
        let (sink, _, _) = RecordingSink::new();
        let (tx, handle) = fixture.spawn(sink, small_batches());

        handle.core().stop_accepting();
        handle.core().stop_accepting(); // idempotent
        assert!(!handle.core().accept(sourced(0, "db.users"), &tx).unwrap());

        drop(tx);
        let stats = handle.shutdown(true, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats.committed, 0);
    }

    #[tokio::test]
    async fn time_bound_dispatches_undersized_batch() {
        let fixture = Fixture::new();
        let (sink, batches, _) = RecordingSink::new();
        let options = WriterOptions {
            max_batch_records: 100,
            max_batch_delay: Duration::from_millis(20),
            ..small_batches()
        };
        let (tx, handle) = fixture.spawn(sink, options);

        handle.core().accept(sourced(0, "db.users"), &tx).unwrap();
        handle.core().accept(sourced(1, "db.users"), &tx).unwrap();
        assert!(handle.flush(Duration::from_secs(5)));
        assert_eq!(batches.lock().unwrap().len(), 1);

        drop(tx);
        let stats = handle.shutdown(true, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats.committed, 2);
    }

    #[test]
    fn newest_states_picks_highest_seq_per_namespace() {
        let mk = |seq: u64, ns: &str| {
            let s = sourced(seq, ns);
            LogEntry {
                offset: seq,
                seq,
                message: s.message,
                state: s.state,
            }
        };
        let batch = vec![mk(0, "db.a"), mk(1, "db.b"), mk(2, "db.a")];
        let states = newest_states(&batch);
        assert_eq!(states.len(), 2);
        let a = states
            .iter()
            .find(|s| s.namespace.as_str() == "db.a")
            .unwrap();
        assert_eq!(a.identifier, Some("pos:2".into()));
    }
}
