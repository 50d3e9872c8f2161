//! Jobs and the processes that make up their pipelines.

use std::ffi::CString;
use std::path::{Path, PathBuf};

use dsh_types::JobStatus;
use nix::sys::termios::Termios;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::error::{JobError, JobResult};

/// One pipeline stage.
#[derive(Debug, Clone)]
pub struct Process {
    /// Set by the spawner once forked.
    pub pid: Option<Pid>,
    /// Program name followed by its arguments.
    pub argv: Vec<String>,
    pub completed: bool,
    pub stopped: bool,
    /// Last status change reported by waitpid.
    pub status: Option<WaitStatus>,
}

impl Process {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pid: None,
            argv: argv.into_iter().map(Into::into).collect(),
            completed: false,
            stopped: false,
            status: None,
        }
    }

    /// Program name (first argument), if any.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Argument vector as C strings, ready for execvp.
    pub(crate) fn c_argv(&self) -> JobResult<Vec<CString>> {
        if self.argv.is_empty() {
            return Err(JobError::InvalidArgument("empty command".to_string()));
        }
        self.argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes())
                    .map_err(|_| JobError::InvalidArgument(format!("{arg:?} contains a NUL byte")))
            })
            .collect()
    }

    /// Signal that killed this process, if it died from one.
    pub fn termination_signal(&self) -> Option<nix::sys::signal::Signal> {
        match self.status {
            Some(WaitStatus::Signaled(_, sig, _)) => Some(sig),
            _ => None,
        }
    }
}

/// A pipeline of processes managed as one unit and mapped to one process group.
///
/// The parser hands these over fully built; the spawner assigns the process
/// group, the status tracker flips per-process flags, and the controller
/// moves the job between foreground and background.
#[derive(Debug, Clone)]
pub struct Job {
    /// Process group shared by every stage, unset until the first fork.
    pub pgid: Option<Pid>,
    /// Never empty.
    processes: Vec<Process>,
    /// Input redirect for the first stage.
    pub stdin: Option<PathBuf>,
    /// Output redirect for the last stage.
    pub stdout: Option<PathBuf>,
    /// Error redirect shared by every stage.
    pub stderr: Option<PathBuf>,
    pub background: bool,
    /// Whether the user has been told about the job's current stop.
    pub notified: bool,
    /// Terminal modes captured the last time this job gave the terminal back.
    pub tmodes: Option<Termios>,
    /// Command text as typed, for display.
    pub command: String,
}

impl Job {
    /// Build a job from its pipeline stages.
    ///
    /// Fails with [`JobError::EmptyJob`] when `processes` is empty, so a
    /// half-built job never reaches the registry.
    pub fn new(command: impl Into<String>, processes: Vec<Process>) -> JobResult<Self> {
        if processes.is_empty() {
            return Err(JobError::EmptyJob);
        }
        Ok(Self {
            pgid: None,
            processes,
            stdin: None,
            stdout: None,
            stderr: None,
            background: false,
            notified: false,
            tmodes: None,
            command: command.into(),
        })
    }

    /// Single-stage job running `argv`; the command text is the joined words.
    pub fn simple<I, S>(argv: I) -> JobResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let process = Process::new(argv);
        let command = process.argv.join(" ");
        Self::new(command, vec![process])
    }

    pub fn with_input(mut self, path: impl AsRef<Path>) -> Self {
        self.stdin = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_output(mut self, path: impl AsRef<Path>) -> Self {
        self.stdout = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_stderr(mut self, path: impl AsRef<Path>) -> Self {
        self.stderr = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn in_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub(crate) fn processes_mut(&mut self) -> &mut [Process] {
        &mut self.processes
    }

    /// True once the spawner has forked at least one stage.
    pub fn is_started(&self) -> bool {
        self.pgid.is_some()
    }

    /// All processes have completed.
    pub fn is_completed(&self) -> bool {
        self.processes.iter().all(|p| p.completed)
    }

    /// All processes have stopped or completed.
    pub fn is_stopped(&self) -> bool {
        self.processes.iter().all(|p| p.completed || p.stopped)
    }

    pub fn status(&self) -> JobStatus {
        if self.is_completed() {
            JobStatus::Completed
        } else if self.is_stopped() {
            JobStatus::Stopped
        } else {
            JobStatus::Running
        }
    }

    /// Shell exit status derived from the last stage.
    ///
    /// `None` until that stage has exited or been killed.
    pub fn exit_code(&self) -> Option<i32> {
        match self.processes.last()?.status? {
            WaitStatus::Exited(_, code) => Some(code),
            WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
            _ => None,
        }
    }

    /// Signal behind the most recent stop of any stage still stopped.
    pub fn stop_signal(&self) -> Option<nix::sys::signal::Signal> {
        self.processes.iter().rev().find_map(|p| match p.status {
            Some(WaitStatus::Stopped(_, sig)) if p.stopped && !p.completed => Some(sig),
            _ => None,
        })
    }

    /// Clear stop flags ahead of a continue signal.
    pub(crate) fn mark_running(&mut self) {
        for process in &mut self.processes {
            process.stopped = false;
        }
        self.notified = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use rstest::rstest;

    fn pipeline(n: usize) -> Job {
        let stages = (0..n)
            .map(|i| Process::new(vec!["stage".to_string(), i.to_string()]))
            .collect();
        Job::new("test", stages).unwrap()
    }

    fn set(job: &mut Job, flags: &[(bool, bool)]) {
        for (p, &(completed, stopped)) in job.processes_mut().iter_mut().zip(flags) {
            p.completed = completed;
            p.stopped = stopped;
        }
    }

    #[test]
    fn empty_job_is_rejected() {
        assert!(matches!(Job::new("nothing", vec![]), Err(JobError::EmptyJob)));
    }

    #[test]
    fn fresh_job_is_running_and_unstarted() {
        let job = pipeline(2);
        assert!(!job.is_started());
        assert!(!job.is_completed());
        assert!(!job.is_stopped());
        assert_eq!(job.status(), JobStatus::Running);
        assert_eq!(job.exit_code(), None);
    }

    #[rstest]
    #[case(&[(true, false), (true, false), (true, false)], JobStatus::Completed)]
    #[case(&[(true, false), (false, true), (false, true)], JobStatus::Stopped)]
    #[case(&[(false, true), (false, true), (false, true)], JobStatus::Stopped)]
    #[case(&[(true, false), (false, false), (false, true)], JobStatus::Running)]
    #[case(&[(false, false), (false, false), (false, false)], JobStatus::Running)]
    fn status_follows_process_flags(#[case] flags: &[(bool, bool)], #[case] expected: JobStatus) {
        let mut job = pipeline(3);
        set(&mut job, flags);
        assert_eq!(job.status(), expected);
        assert_eq!(job.is_completed(), flags.iter().all(|f| f.0));
        assert_eq!(job.is_stopped(), flags.iter().all(|f| f.0 || f.1));
    }

    #[test]
    fn exit_code_comes_from_last_stage() {
        let mut job = pipeline(2);
        let pid = Pid::from_raw(100);
        job.processes_mut()[0].status = Some(WaitStatus::Exited(pid, 3));
        job.processes_mut()[1].status = Some(WaitStatus::Exited(pid, 0));
        assert_eq!(job.exit_code(), Some(0));

        job.processes_mut()[1].status = Some(WaitStatus::Signaled(pid, Signal::SIGTERM, false));
        assert_eq!(job.exit_code(), Some(128 + 15));
        assert_eq!(job.processes()[1].termination_signal(), Some(Signal::SIGTERM));
    }

    #[test]
    fn stop_signal_ignores_finished_stages() {
        let mut job = pipeline(2);
        let pid = Pid::from_raw(100);
        assert_eq!(job.stop_signal(), None);

        job.processes_mut()[0].status = Some(WaitStatus::Stopped(pid, Signal::SIGTSTP));
        job.processes_mut()[0].stopped = true;
        job.processes_mut()[1].status = Some(WaitStatus::Exited(pid, 0));
        job.processes_mut()[1].completed = true;
        assert_eq!(job.stop_signal(), Some(Signal::SIGTSTP));
    }

    #[test]
    fn mark_running_clears_stops_and_notification() {
        let mut job = pipeline(2);
        set(&mut job, &[(false, true), (false, true)]);
        job.notified = true;
        job.mark_running();
        assert_eq!(job.status(), JobStatus::Running);
        assert!(!job.notified);
    }

    #[test]
    fn nul_bytes_are_invalid_arguments() {
        let process = Process::new(["echo", "a\0b"]);
        assert!(matches!(process.c_argv(), Err(JobError::InvalidArgument(_))));
        assert!(matches!(
            Process::new(Vec::<String>::new()).c_argv(),
            Err(JobError::InvalidArgument(_))
        ));
    }

    #[test]
    fn simple_job_joins_words() {
        let job = Job::simple(["sleep", "10"]).unwrap().in_background(true).with_output("/tmp/out");
        assert_eq!(job.command, "sleep 10");
        assert!(job.background);
        assert_eq!(job.stdout.as_deref(), Some(Path::new("/tmp/out")));
    }
}
