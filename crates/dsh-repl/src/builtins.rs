//! Commands the shell runs itself instead of forking.
//!
//! - `jobs`: list jobs, reporting finished ones a final time
//! - `fg [%N]` / `bg [%N]`: continue a job in the foreground / background
//! - `wait [%N]`: block until a job (or every job) stops or completes
//! - `cd [DIR]`: change directory, `$HOME` by default
//! - `exit [CODE]` / `quit`: leave the shell

use std::path::PathBuf;

use dsh_kernel::{Job, JobId};

/// A recognised built-in with its arguments resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Builtin {
    Jobs,
    Fg(Option<JobId>),
    Bg(Option<JobId>),
    Wait(Option<JobId>),
    Cd(Option<PathBuf>),
    Exit(Option<i32>),
}

/// Why a built-in invocation was rejected before running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("{0}: {1}: no such job")]
    BadJob(&'static str, String),

    #[error("{0}: {1}: numeric argument required")]
    BadNumber(&'static str, String),

    #[error("{0}: too many arguments")]
    TooManyArguments(&'static str),

    #[error("{0}: built-ins cannot be piped or redirected")]
    NotAPipeline(&'static str),
}

impl Builtin {
    /// Recognise `job` as a built-in invocation.
    ///
    /// Returns `None` for anything that should be forked.
    pub fn from_job(job: &Job) -> Option<Result<Self, UsageError>> {
        let first = job.processes().first()?;
        let name = builtin_name(first.program()?)?;
        let redirected = job.stdin.is_some() || job.stdout.is_some() || job.stderr.is_some();
        if job.processes().len() > 1 || redirected {
            return Some(Err(UsageError::NotAPipeline(name)));
        }
        Some(Self::parse(name, &first.argv[1..]))
    }

    fn parse(name: &'static str, args: &[String]) -> Result<Self, UsageError> {
        if args.len() > 1 {
            return Err(UsageError::TooManyArguments(name));
        }
        let arg = args.first();
        let job_id = || {
            arg.map(|a| {
                a.parse::<JobId>()
                    .map_err(|_| UsageError::BadJob(name, a.clone()))
            })
            .transpose()
        };
        Ok(match name {
            "jobs" => Builtin::Jobs,
            "fg" => Builtin::Fg(job_id()?),
            "bg" => Builtin::Bg(job_id()?),
            "wait" => Builtin::Wait(job_id()?),
            "cd" => Builtin::Cd(arg.map(PathBuf::from)),
            _ => Builtin::Exit(
                arg.map(|a| {
                    a.parse::<i32>()
                        .map_err(|_| UsageError::BadNumber(name, a.clone()))
                })
                .transpose()?,
            ),
        })
    }
}

fn builtin_name(program: &str) -> Option<&'static str> {
    ["jobs", "fg", "bg", "wait", "cd", "exit", "quit"]
        .into_iter()
        .find(|name| *name == program)
}
