//! Operator status reporting.
//!
//! Assembles the `status` view of a pipeline from its durable files
//! without mutating anything: per-writer offsets and log heads, error
//! counts, and per-namespace states. Safe to run against a live
//! pipeline.

use transporter_state::{inspect_commit_log, ErrorLog, SqliteStateStore, StateStore};
use transporter_types::{State, WriterId};

use crate::config::types::PipelineConfig;
use crate::error::PipelineError;

/// Per-writer durability snapshot.
#[derive(Debug)]
pub struct WriterStatus {
    pub id: WriterId,
    /// Offset the state store considers durable.
    pub store_offset: Option<u64>,
    /// Highest committed offset in the commit log.
    pub log_durable: Option<u64>,
    /// Highest offset present in the commit log.
    pub log_head: Option<u64>,
    /// Entries awaiting redelivery on the next start.
    pub uncommitted: usize,
    /// Error-log entries blocking a restart.
    pub errors: usize,
}

/// Snapshot of a pipeline's durable state.
#[derive(Debug)]
pub struct StatusReport {
    pub pipeline: String,
    pub writers: Vec<WriterStatus>,
    pub states: Vec<State>,
}

impl StatusReport {
    /// Any error-log entry anywhere blocks the next start.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.writers.iter().any(|w| w.errors > 0)
    }
}

/// Assemble the status of a pipeline from its data directory.
///
/// # Errors
///
/// [`PipelineError::Durability`] when the store or a log cannot be
/// read.
pub fn pipeline_status(config: &PipelineConfig) -> Result<StatusReport, PipelineError> {
    let store = SqliteStateStore::open(&config.state_db_path())?;
    let states = store.all_states()?;

    let mut writers = Vec::with_capacity(config.writers.len());
    for decl in &config.writers {
        let id = WriterId::new(decl.name.clone());
        let summary = inspect_commit_log(&config.commit_log_path(&decl.name))?;
        writers.push(WriterStatus {
            store_offset: store.get_offset(&id)?,
            log_durable: summary.durable,
            log_head: summary.head,
            uncommitted: summary.uncommitted.len(),
            errors: ErrorLog::count(&config.error_log_path(&decl.name))?,
            id,
        });
    }

    Ok(StatusReport {
        pipeline: config.pipeline.clone(),
        writers,
        states,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;
    use transporter_state::{CommitLog, ErrorRecord, LogEntry};
    use transporter_types::{Message, Namespace, Op, SyncPhase};

    fn config_with_dir(dir: &std::path::Path) -> PipelineConfig {
        let yaml = format!(
            r"
pipeline: statuspipe
data_dir: {}
reader:
  use: memory
writers:
  - name: w1
    use: memory
",
            dir.display()
        );
        parse_pipeline_str(&yaml).unwrap()
    }

    #[test]
    fn fresh_pipeline_reports_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_with_dir(dir.path());
        let report = pipeline_status(&config).unwrap();
        assert_eq!(report.pipeline, "statuspipe");
        assert_eq!(report.writers.len(), 1);
        assert!(report.states.is_empty());
        assert!(!report.has_errors());
        assert_eq!(report.writers[0].log_head, None);
        assert_eq!(report.writers[0].uncommitted, 0);
    }

    #[test]
    fn reports_offsets_logs_and_states() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = config_with_dir(dir.path());
        let ns = Namespace::new("db.users");

        // Seed the durable files the way a run would leave them.
        let store = SqliteStateStore::open(&config.state_db_path()).unwrap();
        let state = State {
            identifier: Some("tok".into()),
            timestamp: 12,
            namespace: ns.clone(),
            phase: SyncPhase::Sync,
        };
        store
            .commit_group(&WriterId::new("w1"), 2, std::slice::from_ref(&state))
            .unwrap();

        let (mut log, _) = CommitLog::open(&config.commit_log_path("w1")).unwrap();
        for _ in 0..4u64 {
            let offset = log.allocate_offset();
            log.append(&LogEntry {
                offset,
                seq: offset,
                message: Message::new(Op::Insert, ns.clone()),
                state: state.clone(),
            })
            .unwrap();
        }
        log.mark_committed(2).unwrap();

        let mut error_log = ErrorLog::open(&config.error_log_path("w1")).unwrap();
        error_log
            .append_all(&[ErrorRecord {
                offset: 3,
                message: Message::new(Op::Insert, ns.clone()),
                error: "rejected".into(),
                recorded_at: "2026-02-21T12:00:00+00:00".into(),
            }])
            .unwrap();

        let report = pipeline_status(&config).unwrap();
        let w = &report.writers[0];
        assert_eq!(w.store_offset, Some(2));
        assert_eq!(w.log_durable, Some(2));
        assert_eq!(w.log_head, Some(3));
        assert_eq!(w.uncommitted, 1);
        assert_eq!(w.errors, 1);
        assert!(report.has_errors());

        assert_eq!(report.states.len(), 1);
        assert_eq!(report.states[0].phase, SyncPhase::Sync);
    }
}
