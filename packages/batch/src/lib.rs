//! Remote batch-compute backends.
//!
//! The tracker only talks to [`RemoteBatchClient`]. Two backends ship
//! with the crate:
//!
//! - [`LocalBatchClient`] runs registered [`Reader`]s as local tasks
//! - [`SimulatedBatchClient`] follows per-job scripts, for tests and dry runs

mod client;
mod local;
mod reader;
mod simulated;

pub use client::{BatchError, RemoteBatchClient, RemoteJobId, RemoteStatus, with_deadline};
pub use local::LocalBatchClient;
pub use reader::{
    CommandReader, FnReader, JobLog, Reader, ReaderContext, ReaderFuture, ReaderRegistry,
    ReaderResult,
};
pub use simulated::{SimStep, SimulatedBatchClient};
