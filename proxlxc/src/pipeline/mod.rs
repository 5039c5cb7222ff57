//! Sequential, interruptible step pipeline.
//!
//! ## Architecture
//!
//! ```text
//! Sequencer → Steps
//!
//! - Sequencer: runs steps in order, stops at the first non-Continue action,
//!              then cleans up every started step in reverse order
//! - Step: one unit of work plus its mirror cleanup, acting on shared state
//! ```
//!
//! Cancellation is observed at two levels: the sequencer races every step
//! against the token and drops the step's future when it fires, and steps
//! that loop (retries, polling) check the token themselves. Cleanup never
//! observes cancellation.
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{Sequencer, StepAction};
//! use tokio_util::sync::CancellationToken;
//!
//! let sequencer = Sequencer::new(vec![Box::new(StepA), Box::new(StepB)]);
//! let metrics = sequencer.run(&mut state, &CancellationToken::new()).await;
//! metrics.log_summary();
//! ```

mod metrics;
mod sequencer;
mod step;

pub use metrics::{RunMetrics, StepMetrics};
pub use sequencer::Sequencer;
pub use step::{BoxedStep, PipelineState, Step, StepAction};
