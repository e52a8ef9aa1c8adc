//! Queue services: the storage contract and its backends.

pub mod memory_queue;
pub mod pg_queue;
pub mod queue;
