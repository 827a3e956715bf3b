//! Batch pipeline: manifest in, run summary out.
//!
//! - [`Orchestrator`] submits a manifest's jobs through the tracker and
//!   waits for them, aborting the rest on global timeout or interrupt
//! - [`ResultAggregator`] checks outputs, classifies failures, and
//!   optionally stashes logs
//! - [`FailureClassifier`] maps failure reasons and logs to a
//!   [`reading_core::FailureClass`]

mod aggregator;
mod classify;
mod error;
mod orchestrator;
mod status;

pub use aggregator::{ResultAggregator, log_key};
pub use classify::{ClassifierRule, FailureClassifier};
pub use error::PipelineError;
pub use orchestrator::{Orchestrator, PipelineConfig};
pub use status::{RunStatus, run_status};
