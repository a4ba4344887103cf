//! Transform nodes: opaque user functions applied per edge.

use transporter_types::Message;

use crate::error::PipelineError;
use crate::filter::NamespaceFilter;

/// What a transform did with a message.
#[derive(Debug)]
pub enum TransformOutcome {
    /// Pass this (possibly rewritten) message downstream.
    Emit(Message),
    /// Remove the message from this edge. Other fan-out edges are
    /// unaffected: each sees its own copy.
    Drop,
    /// Fatal to the pipeline.
    Error(anyhow::Error),
}

/// Opaque user transformation.
///
/// Synchronous from the pipeline's perspective: a transform that needs
/// to wait holds up its edge. Messages are immutable; a rewrite emits a
/// new message. Implementations must be pure or self-synchronized; the
/// pipeline does not serialize access to transform-internal state.
pub trait Transform: Send {
    fn apply(&self, message: Message) -> TransformOutcome;
}

/// Plain functions are transforms.
impl<F> Transform for F
where
    F: Fn(Message) -> TransformOutcome + Send,
{
    fn apply(&self, message: Message) -> TransformOutcome {
        self(message)
    }
}

/// One stage in an edge's transform chain: a filter guarding an opaque
/// function. A message failing the filter skips the function and
/// continues down the chain unchanged.
pub struct TransformStage {
    pub name: String,
    pub filter: NamespaceFilter,
    pub transform: Box<dyn Transform>,
}

impl TransformStage {
    /// Run the chain over one message. `Ok(None)` means some stage
    /// dropped it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Transform`] when a stage reports an
    /// error; this is fatal to the pipeline.
    pub fn apply_chain(
        stages: &[TransformStage],
        mut message: Message,
    ) -> Result<Option<Message>, PipelineError> {
        for stage in stages {
            if !stage.filter.matches(&message.namespace) {
                continue;
            }
            match stage.transform.apply(message) {
                TransformOutcome::Emit(next) => message = next,
                TransformOutcome::Drop => return Ok(None),
                TransformOutcome::Error(source) => {
                    return Err(PipelineError::Transform {
                        name: stage.name.clone(),
                        source,
                    })
                }
            }
        }
        Ok(Some(message))
    }
}
