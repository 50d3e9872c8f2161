//! Child status tracking.
//!
//! waitpid reports status changes for *any* child, not per job, so every
//! reap is filed by searching all registered jobs for the pid. A reap that
//! belongs to some other job while we wait on "ours" is recorded on that job
//! and the wait carries on.

use dsh_types::JobId;
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;

use super::registry::JobRegistry;
use crate::error::{JobError, JobResult};

/// waitpid's "any child" selector.
fn any_child() -> Pid {
    Pid::from_raw(-1)
}

/// Record one status change on the process it belongs to.
///
/// Returns false when no registered job owns the pid; that can happen with
/// leftover or foreign children and is not an error.
pub fn mark_process_status(jobs: &mut JobRegistry, status: WaitStatus) -> bool {
    let Some(pid) = status.pid() else {
        return false;
    };
    let Some((id, process)) = jobs.find_process_mut(pid) else {
        tracing::warn!("No child process {}.", pid);
        return false;
    };

    process.status = Some(status);
    match status {
        WaitStatus::Stopped(_, sig) => {
            tracing::debug!(job = %id, %pid, ?sig, "stopped");
            process.stopped = true;
        }
        WaitStatus::Continued(_) => {
            tracing::debug!(job = %id, %pid, "continued");
            process.stopped = false;
        }
        WaitStatus::Signaled(_, sig, _) => {
            process.completed = true;
            eprintln!("{}: Terminated by signal {}.", pid, sig);
        }
        _ => {
            tracing::debug!(job = %id, %pid, ?status, "completed");
            process.completed = true;
        }
    }
    true
}

/// Block until job `id` has stopped or completed.
///
/// Each iteration reaps one status change from any child. ECHILD ends the
/// wait quietly; any other waitpid failure is returned to the caller.
pub fn wait_for_job(jobs: &mut JobRegistry, id: JobId) -> JobResult<()> {
    loop {
        match jobs.get(id) {
            Some(job) if !job.is_stopped() && !job.is_completed() => {}
            _ => return Ok(()),
        }

        match waitpid(any_child(), Some(WaitPidFlag::WUNTRACED)) {
            Ok(status) => {
                mark_process_status(jobs, status);
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                tracing::debug!(job = %id, "no more children");
                return Ok(());
            }
            Err(e) => return Err(JobError::Wait(e)),
        }
    }
}

/// Reap every pending status change without blocking.
///
/// Used before listing or notifying, so background jobs are brought up to
/// date lazily. Also picks up continues caused by signals from outside.
pub fn update_status(jobs: &mut JobRegistry) {
    let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(any_child(), Some(flags)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                mark_process_status(jobs, status);
            }
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                tracing::warn!("waitpid: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Job;
    use dsh_types::JobStatus;
    use nix::sys::signal::Signal;

    fn started_pipeline(jobs: &mut JobRegistry, pids: &[i32]) -> JobId {
        let stages = pids
            .iter()
            .map(|_| crate::scheduler::Process::new(["cat"]))
            .collect();
        let mut job = Job::new("cat | cat", stages).unwrap();
        job.pgid = Some(Pid::from_raw(pids[0]));
        for (p, pid) in job.processes_mut().iter_mut().zip(pids) {
            p.pid = Some(Pid::from_raw(*pid));
        }
        jobs.register(job)
    }

    #[test]
    fn stop_marks_process_stopped() {
        let mut jobs = JobRegistry::new();
        let id = started_pipeline(&mut jobs, &[900_001, 900_002]);

        assert!(mark_process_status(
            &mut jobs,
            WaitStatus::Stopped(Pid::from_raw(900_001), Signal::SIGTSTP)
        ));
        assert_eq!(jobs.get(id).unwrap().status(), JobStatus::Running);

        assert!(mark_process_status(
            &mut jobs,
            WaitStatus::Stopped(Pid::from_raw(900_002), Signal::SIGTSTP)
        ));
        let job = jobs.get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Stopped);
        assert!(!job.is_completed());
    }

    #[test]
    fn exit_and_signal_mark_completed() {
        let mut jobs = JobRegistry::new();
        let id = started_pipeline(&mut jobs, &[900_011, 900_012]);

        mark_process_status(&mut jobs, WaitStatus::Exited(Pid::from_raw(900_011), 0));
        mark_process_status(
            &mut jobs,
            WaitStatus::Signaled(Pid::from_raw(900_012), Signal::SIGPIPE, false),
        );

        let job = jobs.get(id).unwrap();
        assert!(job.is_completed());
        assert_eq!(job.processes()[1].termination_signal(), Some(Signal::SIGPIPE));
        assert_eq!(job.exit_code(), Some(128 + Signal::SIGPIPE as i32));
    }

    #[test]
    fn continue_clears_stop() {
        let mut jobs = JobRegistry::new();
        let id = started_pipeline(&mut jobs, &[900_021]);
        let pid = Pid::from_raw(900_021);

        mark_process_status(&mut jobs, WaitStatus::Stopped(pid, Signal::SIGSTOP));
        assert_eq!(jobs.get(id).unwrap().status(), JobStatus::Stopped);
        mark_process_status(&mut jobs, WaitStatus::Continued(pid));
        assert_eq!(jobs.get(id).unwrap().status(), JobStatus::Running);
    }

    #[test]
    fn unknown_pid_is_filed_nowhere() {
        let mut jobs = JobRegistry::new();
        let id = started_pipeline(&mut jobs, &[900_031]);
        assert!(!mark_process_status(&mut jobs, WaitStatus::Exited(Pid::from_raw(900_099), 0)));
        assert_eq!(jobs.get(id).unwrap().status(), JobStatus::Running);
        assert!(!mark_process_status(&mut jobs, WaitStatus::StillAlive));
    }

    #[test]
    fn reap_for_other_job_is_recorded_there() {
        let mut jobs = JobRegistry::new();
        let ours = started_pipeline(&mut jobs, &[900_041]);
        let theirs = started_pipeline(&mut jobs, &[900_042]);

        mark_process_status(&mut jobs, WaitStatus::Exited(Pid::from_raw(900_042), 1));
        assert!(jobs.get(theirs).unwrap().is_completed());
        assert!(!jobs.get(ours).unwrap().is_completed());
    }

    #[test]
    fn wait_returns_at_once_for_settled_jobs() {
        let mut jobs = JobRegistry::new();
        let id = started_pipeline(&mut jobs, &[900_051]);
        mark_process_status(&mut jobs, WaitStatus::Exited(Pid::from_raw(900_051), 0));
        assert!(wait_for_job(&mut jobs, id).is_ok());
        assert!(wait_for_job(&mut jobs, JobId(999)).is_ok());
    }
}
