pub mod job;
pub mod trace;
