//! Process execution abstraction the rest of the crate depends on instead
//! of calling `tokio::process::Command` directly.

pub mod runner;

pub use runner::{CommandOutcome, ProcessRunner, RunStatus, TokioProcessRunner};
pub use runner::mock;
