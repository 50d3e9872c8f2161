//! dsh-kernel: job control and process orchestration for the dsh shell.
//!
//! This crate provides:
//!
//! - **Session**: the shell's own process group and, when interactive, its
//!   hold on the controlling terminal
//! - **Scheduler**: the job registry, pipeline spawner and status tracker
//! - **Terminal**: handing the terminal to a job and taking it back, with
//!   per-job terminal modes
//! - **Control**: foreground/background transitions built on the above
//! - **Signals**: the two places signal dispositions are changed
//!
//! Unix only. Everything runs on the shell's single thread; the only
//! blocking call is the wait for a foreground job.

#![deny(unsafe_code)]

pub mod control;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod signals;
pub mod terminal;
pub mod testing;

pub use control::JobControl;
pub use error::{JobError, JobResult};
pub use scheduler::{Forker, Job, JobRegistry, Process, SystemForker};
pub use session::{Session, SessionConfig};
pub use terminal::TerminalState;

pub use dsh_types::{JobId, JobInfo, JobStatus};
