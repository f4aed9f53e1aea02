//! Subprocess runners for the compiler and for compiled submissions.
//!
//! Both runners spawn with `kill_on_drop` and bound the run with a
//! wall-clock timeout; when the timeout elapses the wait future is dropped,
//! which terminates the child.
//!
//! This module does NOT:
//! - Pick working directories or stage files (stage executors do)
//! - Interpret program output (the test engine does)

pub mod compiler;
pub mod program;

pub use compiler::{CompileError, CompileOutput, CompilerRunner};
pub use program::{ProgramOutput, ProgramRunner, RunError};

/// Reason recorded when a subprocess outlives its time budget.
pub(crate) const TIMEOUT_REASON: &str = "timeout";
