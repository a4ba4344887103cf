//! Reader runtime: resumes from persisted states and feeds the edges.
//!
//! Runs on a blocking thread. At startup it hands every persisted state
//! to the reader adaptor; namespaces without state begin a snapshot
//! from scratch. Each emitted record is stamped with a monotonic
//! sequence and timestamp, paired with the state reflecting the
//! position after it, and broadcast to every edge in order. A
//! namespace's copy→sync transition is persisted durably before any
//! further event is consumed, so a crash mid-transition never restarts
//! the snapshot.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use transporter_state::StateStore;
use transporter_types::SyncPhase;

use crate::adaptor::{ReaderAdaptor, ReaderEvent, Sourced};
use crate::error::PipelineError;
use crate::filter::NamespaceFilter;

/// Counters reported when the reader stops.
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    pub records_emitted: u64,
    pub records_filtered: u64,
    pub phase_flips: u64,
}

/// Drive the reader adaptor until the source ends, the pipeline is
/// cancelled, or an edge closes underneath us (a downstream failure is
/// bringing the pipeline down).
///
/// # Errors
///
/// [`PipelineError::Source`] when the adaptor fails,
/// [`PipelineError::Durability`] when a phase transition cannot be
/// persisted.
pub fn run_reader(
    mut adaptor: Box<dyn ReaderAdaptor>,
    store: &Arc<dyn StateStore>,
    filter: &NamespaceFilter,
    edges: &[mpsc::Sender<Sourced>],
    cancel: &CancellationToken,
) -> Result<ReaderStats, PipelineError> {
    let states = store.all_states()?;
    let mut clock = states.iter().map(|s| s.timestamp).max().unwrap_or(0);

    tracing::info!(
        resumed_namespaces = states.len(),
        "Starting reader from persisted states"
    );
    let mut stream = match adaptor.start(states) {
        Ok(stream) => stream,
        Err(e) => {
            adaptor.stop();
            return Err(PipelineError::Source(e));
        }
    };

    let mut stats = ReaderStats::default();
    let mut seq = 0u64;

    let result = loop {
        if cancel.is_cancelled() {
            tracing::info!("Reader cancelled; stopping");
            break Ok(());
        }
        match stream.next_event() {
            Ok(Some(ReaderEvent::Record {
                mut message,
                mut state_after,
            })) => {
                if !filter.matches(&message.namespace) {
                    stats.records_filtered += 1;
                    continue;
                }
                clock += 1;
                message.timestamp = clock;
                state_after.timestamp = clock;
                let sourced = Sourced {
                    seq,
                    message,
                    state: state_after,
                };
                seq += 1;
                stats.records_emitted += 1;

                let mut edge_closed = false;
                for edge in edges {
                    if edge.blocking_send(sourced.clone()).is_err() {
                        edge_closed = true;
                        break;
                    }
                }
                if edge_closed {
                    // A downstream failure is tearing the graph down.
                    tracing::info!("Edge closed under reader; stopping");
                    break Ok(());
                }
            }
            Ok(Some(ReaderEvent::PhaseFlip { mut state })) => {
                debug_assert_eq!(state.phase, SyncPhase::Sync);
                clock += 1;
                state.timestamp = clock;
                // The flip must be durable before CDC begins, or a
                // crash here would restart the snapshot.
                store.put_state(&state)?;
                stats.phase_flips += 1;
                tracing::info!(
                    namespace = state.namespace.as_str(),
                    identifier = state.identifier.as_deref(),
                    "Snapshot complete; namespace switched to sync"
                );
            }
            Ok(None) => {
                tracing::info!(
                    records = stats.records_emitted,
                    "Source exhausted; reader finishing"
                );
                break Ok(());
            }
            Err(e) => break Err(PipelineError::Source(e)),
        }
    };

    drop(stream);
    adaptor.stop();
    result.map(|()| stats)
}
