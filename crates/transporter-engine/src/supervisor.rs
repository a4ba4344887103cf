//! Pipeline supervisor: builds the graph, starts components in
//! dependency order, and coordinates shutdown.
//!
//! Start order is state store, then writers (commit-log recovery and
//! the error-log refusal check), then the per-writer path tasks
//! (filter → transform chain → writer accept), then the reader. On any
//! fatal signal (error-log entry written, transform error, durability
//! failure, cancellation) the fatal token stops the reader, the edges
//! drain through the paths, and every writer gets a graceful
//! `shutdown` in parallel. The run is recorded in the state store
//! either way.

use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use transporter_state::{CommitLog, ErrorLog, LogEntry, SqliteStateStore, StateStore};
use transporter_types::{RunStats, RunStatus, WriterId};

use crate::adaptor::{Sourced, WriterAdaptor};
use crate::config::types::PipelineConfig;
use crate::config::validator;
use crate::error::{keep_most_severe, PipelineError};
use crate::filter::NamespaceFilter;
use crate::reader::{run_reader, ReaderStats};
use crate::registry::{AdaptorRegistry, TransformRegistry};
use crate::transform::TransformStage;
use crate::writer::{spawn_writer, Writer, WriterHandle, WriterOptions};

/// Final accounting for one writer.
#[derive(Debug)]
pub struct WriterReport {
    pub id: WriterId,
    pub committed: u64,
    pub failed: u64,
    pub durable_offset: Option<u64>,
    pub error: Option<String>,
}

/// Structured result of a pipeline run.
#[derive(Debug)]
pub struct TerminationReport {
    pub pipeline: String,
    pub records_read: u64,
    pub records_filtered: u64,
    pub records_dropped: u64,
    pub writers: Vec<WriterReport>,
}

/// A writer with everything composed but nothing spawned yet.
struct WriterBuild {
    id: WriterId,
    adaptor: Box<dyn WriterAdaptor>,
    filter: NamespaceFilter,
    stages: Vec<TransformStage>,
}

/// Accounting from one path task.
#[derive(Debug, Default)]
struct PathStats {
    delivered: u64,
    filtered: u64,
    dropped: u64,
}

/// Run a pipeline to completion: snapshot sources run until exhausted,
/// CDC sources until cancelled. Cancelling `cancel` performs a clean
/// stop: the reader quits, buffered work commits, and the report is
/// returned as a success.
///
/// # Errors
///
/// [`PipelineError::Config`] before anything durable is touched;
/// otherwise the most severe fatal error observed during the run.
pub async fn run_pipeline(
    config: &PipelineConfig,
    adaptors: &AdaptorRegistry,
    transforms: &TransformRegistry,
    cancel: &CancellationToken,
) -> Result<TerminationReport, PipelineError> {
    // Configuration errors surface here, before any log or store file
    // is created.
    validator::validate_pipeline(config)?;
    let reader_adaptor = adaptors.build_reader(&config.reader.use_ref, &config.reader.config)?;
    let reader_filter = NamespaceFilter::compile(config.reader.namespace.as_deref())?;
    let mut builds = Vec::with_capacity(config.writers.len());
    for decl in &config.writers {
        let adaptor = adaptors.build_writer(&decl.use_ref, &decl.config)?;
        let filter = NamespaceFilter::compile(decl.namespace.as_deref())?;
        let stages = decl
            .transforms
            .iter()
            .map(|t| {
                Ok(TransformStage {
                    name: t.use_ref.clone(),
                    filter: NamespaceFilter::compile(t.namespace.as_deref())?,
                    transform: transforms.build(&t.use_ref, &t.config)?,
                })
            })
            .collect::<Result<Vec<_>, PipelineError>>()?;
        builds.push(WriterBuild {
            id: WriterId::new(decl.name.clone()),
            adaptor,
            filter,
            stages,
        });
    }

    tracing::info!(
        pipeline = config.pipeline,
        reader = config.reader.use_ref,
        writers = config.writers.len(),
        "Starting pipeline"
    );

    // Durability startup: store first, then per-writer logs. A
    // non-empty error log refuses the whole start.
    let store: Arc<dyn StateStore> = Arc::new(SqliteStateStore::open(&config.state_db_path())?);

    let mut recovered_logs = Vec::with_capacity(builds.len());
    for build in &builds {
        let error_log = ErrorLog::open(&config.error_log_path(build.id.as_str()))?;
        if !error_log.is_empty() {
            return Err(PipelineError::ErrorsPending {
                writer: build.id.clone(),
                count: error_log.len(),
            });
        }
        let (commit_log, recovery) = CommitLog::open(&config.commit_log_path(build.id.as_str()))?;
        if !recovery.uncommitted.is_empty() {
            tracing::info!(
                writer = build.id.as_str(),
                uncommitted = recovery.uncommitted.len(),
                durable_offset = recovery.durable,
                "Commit log recovery found undelivered entries"
            );
        }
        recovered_logs.push((commit_log, recovery.uncommitted, error_log));
    }

    let run_id = {
        let store = store.clone();
        let pipeline = config.pipeline.clone();
        tokio::task::spawn_blocking(move || store.start_run(&pipeline))
            .await
            .map_err(|e| {
                PipelineError::Runtime(anyhow::anyhow!("start_run task panicked: {e}"))
            })??
    };

    // Spawn order: writers and their paths first, reader last.
    let fatal = cancel.child_token();
    let options = writer_options(config);
    let mut edges: Vec<mpsc::Sender<Sourced>> = Vec::with_capacity(builds.len());
    let mut path_handles = Vec::with_capacity(builds.len());
    let mut writer_handles: Vec<(WriterId, WriterHandle)> = Vec::with_capacity(builds.len());

    for (build, (commit_log, recovered, error_log)) in builds.into_iter().zip(recovered_logs) {
        let (buffer_tx, handle) = spawn_writer(
            build.id.clone(),
            build.adaptor,
            commit_log,
            recovered,
            error_log,
            store.clone(),
            options.clone(),
            fatal.clone(),
        );

        let (edge_tx, edge_rx) = mpsc::channel(config.batching.buffer_capacity.max(1));
        edges.push(edge_tx);

        let core = handle.core().clone();
        let filter = build.filter;
        let stages = build.stages;
        let fatal_for_path = fatal.clone();
        path_handles.push(tokio::task::spawn_blocking(move || {
            run_path(&core, &buffer_tx, &filter, &stages, edge_rx, &fatal_for_path)
        }));
        writer_handles.push((build.id, handle));
    }

    let reader_handle = {
        let store = store.clone();
        let fatal = fatal.clone();
        tokio::task::spawn_blocking(move || {
            run_reader(reader_adaptor, &store, &reader_filter, &edges, &fatal)
        })
    };

    // Collection phase. The reader finishing (for any reason) closes
    // the edges; paths drain and drop their buffer senders; writer
    // drains flush what remains.
    let mut first_error: Option<PipelineError> = None;

    let reader_stats = match reader_handle.await {
        Ok(Ok(stats)) => stats,
        Ok(Err(err)) => {
            keep_most_severe(&mut first_error, err);
            ReaderStats::default()
        }
        Err(join_err) => {
            keep_most_severe(
                &mut first_error,
                PipelineError::Runtime(anyhow::anyhow!("reader task panicked: {join_err}")),
            );
            ReaderStats::default()
        }
    };

    let mut path_totals = PathStats::default();
    for handle in path_handles {
        match handle.await {
            Ok(Ok(stats)) => {
                path_totals.delivered += stats.delivered;
                path_totals.filtered += stats.filtered;
                path_totals.dropped += stats.dropped;
            }
            Ok(Err(err)) => keep_most_severe(&mut first_error, err),
            Err(join_err) => keep_most_severe(
                &mut first_error,
                PipelineError::Runtime(anyhow::anyhow!("path task panicked: {join_err}")),
            ),
        }
    }

    // Graceful writer shutdown in parallel, each with the configured
    // timeout. A writer that already failed reports its error here.
    let timeout = Duration::from_secs(config.shutdown_timeout_seconds);
    let mut shutdown_set: JoinSet<(WriterId, Result<crate::writer::WriterStats, PipelineError>)> =
        JoinSet::new();
    for (id, handle) in writer_handles {
        shutdown_set.spawn(async move {
            let result = handle.shutdown(true, timeout).await;
            (id, result)
        });
    }

    let mut writers = Vec::new();
    let mut records_committed = 0u64;
    while let Some(joined) = shutdown_set.join_next().await {
        match joined {
            Ok((id, Ok(stats))) => {
                records_committed += stats.committed;
                writers.push(WriterReport {
                    id,
                    committed: stats.committed,
                    failed: stats.failed,
                    durable_offset: stats.durable_offset,
                    error: None,
                });
            }
            Ok((id, Err(err))) => {
                let durable_offset = store.get_offset(&id).ok().flatten();
                writers.push(WriterReport {
                    id,
                    committed: 0,
                    failed: 0,
                    durable_offset,
                    error: Some(err.to_string()),
                });
                keep_most_severe(&mut first_error, err);
            }
            Err(join_err) => keep_most_severe(
                &mut first_error,
                PipelineError::Runtime(anyhow::anyhow!("writer shutdown panicked: {join_err}")),
            ),
        }
    }
    writers.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));

    // Record the run before deciding the overall outcome.
    let run_stats = RunStats {
        records_read: reader_stats.records_emitted,
        records_committed,
        records_dropped: path_totals.filtered + path_totals.dropped + reader_stats.records_filtered,
        error_message: first_error.as_ref().map(ToString::to_string),
    };
    let status = if first_error.is_some() {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };
    let complete = {
        let store = store.clone();
        tokio::task::spawn_blocking(move || store.complete_run(run_id, status, &run_stats))
            .await
            .map_err(|e| {
                PipelineError::Runtime(anyhow::anyhow!("complete_run task panicked: {e}"))
            })
    };
    match complete {
        Ok(Ok(())) => {}
        Ok(Err(err)) => keep_most_severe(&mut first_error, err.into()),
        Err(err) => keep_most_severe(&mut first_error, err),
    }

    if let Some(err) = first_error {
        tracing::error!(
            pipeline = config.pipeline,
            records_read = reader_stats.records_emitted,
            records_committed,
            error = %err,
            "Pipeline stopped on error"
        );
        return Err(err);
    }

    tracing::info!(
        pipeline = config.pipeline,
        records_read = reader_stats.records_emitted,
        records_committed,
        phase_flips = reader_stats.phase_flips,
        "Pipeline run completed"
    );
    Ok(TerminationReport {
        pipeline: config.pipeline.clone(),
        records_read: reader_stats.records_emitted,
        records_filtered: path_totals.filtered + reader_stats.records_filtered,
        records_dropped: path_totals.dropped,
        writers,
    })
}

/// One edge's path: filter, transform chain, writer accept. Runs on a
/// blocking thread until the edge closes or something fatal happens.
fn run_path(
    core: &Arc<Writer>,
    buffer_tx: &SyncSender<LogEntry>,
    filter: &NamespaceFilter,
    stages: &[TransformStage],
    mut edge_rx: mpsc::Receiver<Sourced>,
    fatal: &CancellationToken,
) -> Result<PathStats, PipelineError> {
    let mut stats = PathStats::default();
    while let Some(sourced) = edge_rx.blocking_recv() {
        if !filter.matches(&sourced.message.namespace) {
            stats.filtered += 1;
            continue;
        }
        let Sourced {
            seq,
            message,
            state,
        } = sourced;
        match TransformStage::apply_chain(stages, message) {
            Ok(Some(message)) => {
                match core.accept(
                    Sourced {
                        seq,
                        message,
                        state,
                    },
                    buffer_tx,
                ) {
                    Ok(true) => stats.delivered += 1,
                    // Writer stopped accepting; the pipeline is
                    // winding down.
                    Ok(false) => break,
                    Err(err) => {
                        fatal.cancel();
                        return Err(err);
                    }
                }
            }
            Ok(None) => stats.dropped += 1,
            Err(err) => {
                fatal.cancel();
                return Err(err);
            }
        }
    }
    Ok(stats)
}

fn writer_options(config: &PipelineConfig) -> WriterOptions {
    WriterOptions {
        max_batch_records: config.batching.max_batch_records,
        max_batch_delay: Duration::from_millis(config.batching.max_batch_delay_ms),
        buffer_capacity: config.batching.buffer_capacity,
        commit_log_max_bytes: config.commit_log_max_bytes,
    }
}

/// Operator command: drop every entry from every writer's error log,
/// returning `(writer, dropped)` pairs. Required before a restart when
/// any error log is non-empty.
///
/// # Errors
///
/// [`PipelineError::Durability`] when a log cannot be read or
/// truncated.
pub fn truncate_errors(
    config: &PipelineConfig,
) -> Result<Vec<(WriterId, usize)>, PipelineError> {
    let mut dropped = Vec::with_capacity(config.writers.len());
    for decl in &config.writers {
        let count = ErrorLog::truncate(&config.error_log_path(&decl.name))?;
        if count > 0 {
            tracing::info!(writer = decl.name, dropped = count, "Error log truncated");
        }
        dropped.push((WriterId::new(decl.name.clone()), count));
    }
    Ok(dropped)
}
