//! State store trait definition.
//!
//! [`StateStore`] is the single shared mutable resource in a pipeline:
//! the durable map of writer offsets and per-namespace reader states,
//! plus run history. Model types live in [`transporter_types`].

use transporter_types::{Namespace, RunStats, RunStatus, State, WriterId};

use crate::error::StateResult;

/// Storage contract for pipeline offsets, reader states, and run history.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn StateStore>`. Per-key writes are atomic; `commit_group`
/// applies a writer offset and a set of reader states as one atomic
/// group, so a recovered pipeline never observes an offset newer than
/// the states persisted with it.
pub trait StateStore: Send + Sync {
    /// Read the durable offset for a writer.
    ///
    /// Returns `Ok(None)` when the writer has never committed.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn get_offset(&self, writer: &WriterId) -> StateResult<Option<u64>>;

    /// List every `(writer, offset)` pair, ordered by writer id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn all_offsets(&self) -> StateResult<Vec<(WriterId, u64)>>;

    /// Read the persisted state for a namespace.
    ///
    /// Returns `Ok(None)` when no state has been persisted yet.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn get_state(&self, namespace: &Namespace) -> StateResult<Option<State>>;

    /// List every persisted state, ordered by namespace.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn all_states(&self) -> StateResult<Vec<State>>;

    /// Upsert one state. The write applies only when `state.timestamp`
    /// is newer than what is stored; older states never overwrite newer
    /// ones. Returns `true` when the write was applied.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn put_state(&self, state: &State) -> StateResult<bool>;

    /// Atomically persist a writer's durable offset together with the
    /// reader states correlated with it. Each state carries the same
    /// newer-wins guard as [`StateStore::put_state`]; the offset only
    /// moves forward.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn commit_group(&self, writer: &WriterId, offset: u64, states: &[State]) -> StateResult<()>;

    /// Begin a new pipeline run, returning its unique ID.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn start_run(&self, pipeline: &str) -> StateResult<i64>;

    /// Finalize a run with status and aggregate stats.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::StateError) on storage failure.
    fn complete_run(&self, run_id: i64, status: RunStatus, stats: &RunStats) -> StateResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (usable as `dyn StateStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn StateStore) {}
    }
}
