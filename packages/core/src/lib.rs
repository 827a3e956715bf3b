//! Core domain types for the reading batch system.
//!
//! This crate contains shared types used across all packages:
//! - JobDescriptor, ReaderName and InputRef for units of work
//! - JobState and JobRecord for the tracked lifecycle
//! - RunSummary for batch outcomes
//! - Manifest for turning inputs into descriptors
//! - Events for progress reporting

mod events;
mod job;
mod manifest;
mod policy;
mod record;
mod run;

pub use events::JobEvent;
pub use job::{InputRef, JobDescriptor, JobId, ReaderName, ResourceSpec, UnknownReader};
pub use manifest::{IdListSource, Manifest, ManifestError};
pub use policy::{RetryPolicy, TrackerConfig};
pub use record::{JobRecord, JobState, TransitionError};
pub use run::{
    FailureClass, FailureReport, MissingOutput, RunOutcome, RunSummary, StateCounts,
};
