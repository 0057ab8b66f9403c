//! Scheduler runner -- owns the queue, the slots and the retry machinery.
//!
//! Split into focused submodules:
//! - `core`: public `Scheduler` handle, builder and failed-task records
//! - `coordinator`: the actor that applies every state transition
//! - `execution`: spawning attempts and backoff timers
//! - `queue`: priority-ordered pending queue

mod coordinator;
mod core;
mod execution;
mod queue;

pub use self::core::{FailedTask, Scheduler, SchedulerBuilder};
