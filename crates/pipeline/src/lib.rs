//! Job orchestration: every mutation of a job goes through
//! [`JobOrchestrator`], whether it comes from a client, a worker callback,
//! a result envelope, or the stalled-job sweep.

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod recorder;

pub use dispatcher::{DispatchError, Dispatcher};
pub use error::JobError;
pub use orchestrator::JobOrchestrator;
pub use recorder::TraceRecorder;
