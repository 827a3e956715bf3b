//! Actor system for tracking batch reading jobs.
//!
//! This crate provides the Ractor-based job tracker: one actor per run
//! that owns every job record, plus per-job lanes that drive remote calls.
//!
//! # Architecture
//!
//! - `TrackerActor` - Single writer of job records for one run
//! - submission lanes - Submit a job with retry and backoff
//! - poll lanes - Poll a submitted job until it is terminal
//!
//! # Usage
//!
//! ```ignore
//! use actors::start_tracker;
//!
//! let tracker = start_tracker(run_id, client, config, token).await?;
//! tracker.submit(descriptor).await?;
//! tracker.wait_settled().await?;
//! ```

mod handle;
mod lanes;
mod messages;
mod tracker;

pub use handle::{TrackerHandle, start_tracker};
pub use messages::{PollOutcome, Progress, TrackerError, TrackerMessage};
pub use tracker::{POLLING_EXHAUSTED, TrackerActor, TrackerArgs, TrackerState};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef};
