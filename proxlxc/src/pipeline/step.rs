//! Step trait for sequencer execution.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// What the sequencer should do after a step returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    Continue,
    /// Stop dispatching; run cleanups.
    Halt,
    HaltAll,
}

/// State threaded through a pipeline.
pub trait PipelineState: Send {
    /// Record that the run was cancelled from outside.
    fn set_cancelled(&mut self);
}

/// A unit of work with a mirror cleanup.
///
/// A failing step records its error in the state before returning
/// [`StepAction::Halt`]. The sequencer never invents errors.
#[async_trait]
pub trait Step<S: Send>: Send + Sync {
    async fn run(&self, state: &mut S, cancel: &CancellationToken) -> StepAction;

    /// Called once for every step whose `run` was started, in reverse order,
    /// whatever the outcome of the pipeline.
    async fn cleanup(&self, _state: &mut S) {}

    /// Human-readable step name for logging.
    fn name(&self) -> &str;
}

pub type BoxedStep<S> = Box<dyn Step<S>>;
