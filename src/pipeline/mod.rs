//! Declarative phase pipelines, readiness polling and deadline races

pub mod deadline;
pub mod phase;
pub mod runner;
pub mod wait;

pub use deadline::{DeadlineOutcome, race_deadline};
pub use phase::{ConcurrentPhase, Phase, PhaseFuture};
pub use runner::{Pipeline, PipelineReport, Watchdog};
pub use wait::{Attempt, Exhausted, PollPolicy, poll_until};
