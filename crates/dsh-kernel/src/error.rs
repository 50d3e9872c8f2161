//! Error taxonomy for the job-control core.
//!
//! Nothing below the job controller terminates the shell. Every variant here
//! is reported as one diagnostic line and the prompt loop resumes, except
//! [`JobError::Session`], which means the shell could not set itself up.

use std::path::PathBuf;

use dsh_types::JobId;
use nix::errno::Errno;
use thiserror::Error;

/// Result type for job-control operations.
pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Error)]
pub enum JobError {
    /// fork(2) or pipe(2) failed; already-forked stages were killed and reaped.
    #[error("{op}: {source}")]
    Spawn {
        op: &'static str,
        #[source]
        source: Errno,
    },

    /// A redirect file could not be opened; nothing was forked.
    #[error("{}: {source}", .path.display())]
    Redirect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("job has no processes")]
    EmptyJob,

    /// waitpid(2) failed with something other than ECHILD.
    #[error("waitpid: {0}")]
    Wait(Errno),

    #[error("terminal: {0}")]
    Terminal(Errno),

    #[error("kill: {0}")]
    Signal(Errno),

    /// Session setup failed; the shell cannot do job control at all.
    #[error("couldn't put the shell in its own process group: {0}")]
    Session(Errno),

    #[error("{0}: no such job")]
    NoSuchJob(JobId),

    #[error("{0}: job has not been started")]
    NotStarted(JobId),
}

impl JobError {
    pub(crate) fn spawn(op: &'static str, source: Errno) -> Self {
        JobError::Spawn { op, source }
    }
}
