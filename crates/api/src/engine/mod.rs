//! Job execution engine.
//!
//! Holds the result consumer that drains worker `RESULT` envelopes from
//! the result queue and applies them to job records through the
//! orchestrator.

pub mod consumer;
