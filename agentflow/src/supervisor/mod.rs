//! Child process supervision.
//!
//! One child process per leaf node attempt. Output is streamed line by line
//! to a [`LineSink`] as it arrives; timeouts and cancellation trigger a
//! graceful termination followed by a forced kill after the grace period.
//! Retries are the caller's concern.

mod command;
mod launcher;
mod process;

pub use command::CommandSpec;
pub use launcher::{LineSink, ProcessLauncher, ProcessOutcome, Termination};
pub use process::ProcessSupervisor;
