//! Step sequencer.
//!
//! Runs steps in order until one returns something other than
//! `Continue`, the token is cancelled, or a step panics. Every started step
//! is then cleaned up in reverse start order. A captured panic is re-raised
//! once cleanup has finished.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::metrics::{RunMetrics, StepMetrics};
use super::step::{BoxedStep, PipelineState, StepAction};

pub struct Sequencer<S> {
    steps: Vec<BoxedStep<S>>,
}

enum Outcome {
    Finished(StepAction),
    Interrupted,
    Panicked(Box<dyn std::any::Any + Send>),
}

impl<S: PipelineState> Sequencer<S> {
    pub fn new(steps: Vec<BoxedStep<S>>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, state: &mut S, cancel: &CancellationToken) -> RunMetrics {
        let total_start = Instant::now();
        let mut metrics = RunMetrics::default();
        let mut started = 0;
        let mut captured_panic = None;

        for step in &self.steps {
            if cancel.is_cancelled() {
                tracing::debug!(step = step.name(), "Cancelled before step");
                state.set_cancelled();
                break;
            }

            started += 1;
            let name = step.name().to_string();
            tracing::debug!(step = %name, "Step started");
            let step_start = Instant::now();

            // The step's future (and its borrow of `state`) is gone once this block ends.
            let outcome = {
                let run = AssertUnwindSafe(step.run(state, cancel)).catch_unwind();
                tokio::select! {
                    biased;
                    result = run => match result {
                        Ok(action) => Outcome::Finished(action),
                        Err(payload) => Outcome::Panicked(payload),
                    },
                    _ = cancel.cancelled() => Outcome::Interrupted,
                }
            };

            let action = match &outcome {
                Outcome::Finished(action) => Some(*action),
                _ => None,
            };
            metrics.steps.push(StepMetrics {
                name: name.clone(),
                duration_ms: step_start.elapsed().as_millis(),
                action,
            });

            match outcome {
                Outcome::Finished(StepAction::Continue) => {
                    tracing::debug!(step = %name, "Step completed");
                }
                // A single flat pipeline has nothing above it to halt, so
                // HaltAll stops it exactly like Halt.
                Outcome::Finished(action @ (StepAction::Halt | StepAction::HaltAll)) => {
                    if cancel.is_cancelled() {
                        state.set_cancelled();
                    }
                    tracing::debug!(step = %name, ?action, "Step halted the pipeline");
                    break;
                }
                Outcome::Interrupted => {
                    tracing::info!(step = %name, "Step interrupted by cancellation");
                    state.set_cancelled();
                    break;
                }
                Outcome::Panicked(payload) => {
                    tracing::error!(step = %name, "Step panicked, running cleanup");
                    captured_panic = Some(payload);
                    break;
                }
            }
        }

        let cleanup_start = Instant::now();
        for step in self.steps[..started].iter().rev() {
            tracing::debug!(step = step.name(), "Cleaning up step");
            let cleanup = AssertUnwindSafe(step.cleanup(state)).catch_unwind();
            if let Err(payload) = cleanup.await {
                tracing::error!(step = step.name(), "Step cleanup panicked");
                captured_panic.get_or_insert(payload);
            }
        }
        metrics.cleanup_duration_ms = cleanup_start.elapsed().as_millis();
        metrics.total_duration_ms = total_start.elapsed().as_millis();

        if let Some(payload) = captured_panic {
            std::panic::resume_unwind(payload);
        }
        metrics
    }
}
