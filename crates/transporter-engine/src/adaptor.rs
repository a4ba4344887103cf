//! Reader and writer adaptor contracts.
//!
//! Adaptors are the pipeline's only view of external systems. They are
//! synchronous trait objects driven on blocking threads by the runtimes
//! in [`crate::reader`] and [`crate::writer`]; an adaptor that needs to
//! wait simply blocks its thread. Adaptors may retry internally, but
//! once an error crosses this boundary the pipeline stops.

use transporter_types::{Message, State};

/// One item yielded by a reader adaptor's event stream.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    /// A record, paired with the state reflecting the reader's position
    /// *after* this record. Timestamps on both are assigned later by
    /// the reader runtime.
    Record {
        message: Message,
        state_after: State,
    },
    /// A namespace finished its snapshot; `state.phase` is `Sync` and
    /// `state.identifier` is where CDC begins. The runtime persists
    /// this durably before consuming further events, so a crash here
    /// never restarts the snapshot.
    PhaseFlip { state: State },
}

/// Pull-style stream of reader events.
pub trait EventStream: Send {
    /// Next event, `Ok(None)` when the source is exhausted. Blocks at
    /// the source's delivery rate during CDC.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the pipeline (source failure).
    fn next_event(&mut self) -> anyhow::Result<Option<ReaderEvent>>;
}

/// A source of messages: snapshot phase, then change-data-capture.
pub trait ReaderAdaptor: Send {
    /// Begin reading, resuming from the given persisted states.
    /// Namespaces absent from `states` start a snapshot from scratch.
    ///
    /// # Errors
    ///
    /// Any error is fatal to the pipeline (source failure).
    fn start(&mut self, states: Vec<State>) -> anyhow::Result<Box<dyn EventStream>>;

    /// Stop reading. Idempotent; called once the pipeline winds down.
    fn stop(&mut self);
}

/// Result of handing a batch to a sink.
#[derive(Debug)]
pub enum BulkOutcome {
    /// Every message in the batch is durably in the sink.
    Ok,
    /// Some messages failed; `failed` pairs batch indices with
    /// descriptions. The rest of the batch is in the sink.
    Partial { failed: Vec<(usize, String)> },
    /// The batch as a whole failed.
    Failed { description: String },
}

/// A sink accepting messages in bulk.
pub trait WriterAdaptor: Send {
    /// Write a batch. The writer runtime calls this with batches in
    /// accept order; under at-least-once redelivery the sink may see a
    /// message more than once.
    fn bulk_write(&mut self, batch: &[Message]) -> BulkOutcome;

    /// Release sink resources. Idempotent.
    fn close(&mut self);
}

/// A message stamped by the reader runtime, as it travels the edges:
/// monotonic emission sequence plus the correlated reader state.
#[derive(Debug, Clone)]
pub struct Sourced {
    pub seq: u64,
    pub message: Message,
    pub state: State,
}
