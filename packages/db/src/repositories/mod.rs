//! Repository implementations for database operations.

mod job_state_repo;
mod run_repo;

pub use job_state_repo::JobStateRepository;
pub use run_repo::RunRepository;
