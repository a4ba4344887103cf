//! Categorized pipeline error model.
//!
//! Every fatal condition is classified by where it crossed into the
//! core, because the class decides both the shutdown behavior and the
//! process exit code: configuration errors abort before any log is
//! touched (exit 2), everything else stops the pipeline through the
//! supervisor (exit 1).

use transporter_state::{LogError, StateError};
use transporter_types::WriterId;

/// Fatal pipeline error.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid configuration: bad regex, unknown adaptor or transform,
    /// malformed graph. Raised before any durable file is created.
    #[error("configuration error: {0}")]
    Config(String),

    /// The reader adaptor failed. Writers are shut down gracefully so
    /// in-flight batches still commit.
    #[error("source failure: {0}")]
    Source(#[source] anyhow::Error),

    /// A sink bulk write failed. The failing messages were recorded in
    /// the writer's error log; operator-recoverable.
    #[error("sink failure on writer '{writer}': {description}")]
    Sink {
        writer: WriterId,
        description: String,
    },

    /// A transform returned an error. Nothing reaches the error log:
    /// the message never made it to a writer.
    #[error("transform '{name}' failed: {source}")]
    Transform {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Log append, fsync, or state-store write failed. The pipeline
    /// aborts without acknowledging further messages.
    #[error("durability failure: {0}")]
    Durability(#[source] anyhow::Error),

    /// A previous run left entries in a writer's error log. The
    /// pipeline refuses to start until the operator truncates it.
    #[error("error log for writer '{writer}' holds {count} entries; inspect and run `truncate-errors` before restarting")]
    ErrorsPending { writer: WriterId, count: usize },

    /// Host-side failure outside the categories above (task panic,
    /// channel breakage).
    #[error("runtime error: {0}")]
    Runtime(#[source] anyhow::Error),
}

impl PipelineError {
    /// Process exit code mandated for this error class.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            _ => 1,
        }
    }

    /// Ranking used to pick the most significant error when several
    /// tasks fail during one shutdown.
    #[must_use]
    pub(crate) fn severity(&self) -> u8 {
        match self {
            Self::Durability(_) => 6,
            Self::ErrorsPending { .. } => 5,
            Self::Sink { .. } => 4,
            Self::Transform { .. } => 3,
            Self::Source(_) => 2,
            Self::Config(_) => 1,
            Self::Runtime(_) => 0,
        }
    }
}

impl From<LogError> for PipelineError {
    fn from(e: LogError) -> Self {
        Self::Durability(e.into())
    }
}

impl From<StateError> for PipelineError {
    fn from(e: StateError) -> Self {
        Self::Durability(e.into())
    }
}

/// Keep the highest-severity error when collecting task results.
pub(crate) fn keep_most_severe(
    slot: &mut Option<PipelineError>,
    candidate: PipelineError,
) {
    let replace = slot
        .as_ref()
        .is_none_or(|held| candidate.severity() > held.severity());
    if replace {
        *slot = Some(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_exits_2_everything_else_1() {
        assert_eq!(PipelineError::Config("bad regex".into()).exit_code(), 2);
        assert_eq!(
            PipelineError::Sink {
                writer: WriterId::new("w1"),
                description: "refused".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(
            PipelineError::Durability(anyhow::anyhow!("fsync failed")).exit_code(),
            1
        );
    }

    #[test]
    fn errors_pending_message_names_the_remedy() {
        let err = PipelineError::ErrorsPending {
            writer: WriterId::new("w1"),
            count: 3,
        };
        assert!(err.to_string().contains("3 entries"), "got: {err}");
        assert!(err.to_string().contains("truncate-errors"));
    }

    #[test]
    fn severity_prefers_durability_over_sink() {
        let mut slot = Some(PipelineError::Sink {
            writer: WriterId::new("w1"),
            description: "x".into(),
        });
        keep_most_severe(
            &mut slot,
            PipelineError::Durability(anyhow::anyhow!("fsync")),
        );
        assert!(matches!(slot, Some(PipelineError::Durability(_))));
    }

    #[test]
    fn lower_severity_does_not_replace() {
        let mut slot = Some(PipelineError::Sink {
            writer: WriterId::new("w1"),
            description: "x".into(),
        });
        keep_most_severe(&mut slot, PipelineError::Source(anyhow::anyhow!("eof")));
        assert!(matches!(slot, Some(PipelineError::Sink { .. })));
    }

    #[test]
    fn log_and_state_errors_map_to_durability() {
        let from_log: PipelineError = LogError::Truncated.into();
        assert!(matches!(from_log, PipelineError::Durability(_)));
        let from_state: PipelineError = StateError::LockPoisoned.into();
        assert!(matches!(from_state, PipelineError::Durability(_)));
    }
}
