pub mod job_repo;
pub mod trace_repo;

pub use job_repo::JobRepo;
pub use trace_repo::TraceRepo;
