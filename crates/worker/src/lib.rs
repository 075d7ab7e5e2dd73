//! The deferq worker: a polling loop that leases due tasks from the shared
//! store, executes their side effects, and settles the results, plus the
//! sweeper that recovers tasks orphaned by crashed workers.
//!
//! Any number of worker processes may run against the same database; all
//! coordination happens through row-level locks taken during lease and sweep.

pub mod config;
pub mod executor;
pub mod sweeper;
pub mod worker;
