//! Domain types for the Brickyard generation pipeline.
//!
//! Everything in this crate is pure: the job record and its state
//! machine, execution trace events, the worker message envelope codec,
//! and the retry policy used when publishing. Storage, queueing, and HTTP
//! live in the sibling crates.

pub mod envelope;
pub mod error;
pub mod job;
pub mod job_events;
pub mod retry;
pub mod trace;
pub mod types;
