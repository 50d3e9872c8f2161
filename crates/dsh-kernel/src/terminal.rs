//! Terminal control for job control.
//!
//! Handles the foreground-group handshake with the controlling terminal:
//! waiting to be foregrounded at startup, handing the terminal to a job,
//! taking it back, and saving/restoring terminal modes per job so a program
//! that left the terminal in raw mode gets raw mode back when continued.
//!
//! All of this is Unix-only; dsh does not build elsewhere.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::termios::{self, SetArg, Termios};
use nix::unistd::{self, Pid};

use dsh_types::JobId;

use crate::error::{JobError, JobResult};
use crate::scheduler::{JobRegistry, status};
use crate::session::Session;
use crate::signals;

/// The shell's hold on its controlling terminal.
///
/// Created once at startup by [`TerminalState::acquire`] (interactive) or
/// [`TerminalState::attach`] (scripts run from a terminal). Holds a
/// close-on-exec duplicate of the terminal descriptor, so no child ever
/// inherits it past exec.
#[derive(Debug)]
pub struct TerminalState {
    fd: OwnedFd,
    /// The shell's own process group ID.
    shell_pgid: Pid,
    /// Modes the shell restores whenever it takes the terminal back.
    shell_modes: Termios,
}

impl TerminalState {
    /// Claim the terminal for an interactive shell.
    ///
    /// - Waits (by stopping itself with SIGTTIN) until the launching shell
    ///   puts us in the foreground
    /// - Ignores the job-control signals, SIGTTOU first
    /// - Puts the shell in its own process group
    /// - Takes the terminal foreground and snapshots its modes
    pub fn acquire(tty: BorrowedFd<'_>) -> JobResult<Self> {
        let fd = tty
            .try_clone_to_owned()
            .map_err(|e| JobError::Terminal(Errno::from_raw(e.raw_os_error().unwrap_or(0))))?;

        loop {
            let pgrp = unistd::getpgrp();
            match unistd::tcgetpgrp(&fd) {
                Ok(fg) if fg == pgrp => break,
                Ok(_) => {
                    tracing::debug!(%pgrp, "not in the foreground; stopping until we are");
                    signal::killpg(pgrp, Signal::SIGTTIN).map_err(JobError::Signal)?;
                }
                Err(e) => return Err(JobError::Terminal(e)),
            }
        }

        signals::ignore_job_control().map_err(JobError::Session)?;

        // Put the shell in its own process group. This fails with EPERM if
        // we are already a session leader (e.g. spawned via setsid), in
        // which case we already lead our own group.
        let shell_pgid = unistd::getpid();
        match unistd::setpgid(shell_pgid, shell_pgid) {
            Ok(()) | Err(Errno::EPERM) => {}
            Err(e) => return Err(JobError::Session(e)),
        }

        unistd::tcsetpgrp(&fd, shell_pgid).map_err(JobError::Terminal)?;
        let shell_modes = termios::tcgetattr(&fd).map_err(JobError::Terminal)?;

        Ok(Self {
            fd,
            shell_pgid,
            shell_modes,
        })
    }

    /// Share the terminal with a non-interactive shell.
    ///
    /// Returns `None` unless `tty` is a terminal whose foreground group is
    /// already the shell's own: a script run from a prompt. The shell stays
    /// in its group and keeps its signal dispositions, except that SIGTTOU
    /// is ignored so it can take the terminal back from a job.
    pub fn attach(tty: BorrowedFd<'_>) -> JobResult<Option<Self>> {
        let shell_pgid = unistd::getpgrp();
        if unistd::tcgetpgrp(tty).ok() != Some(shell_pgid) {
            return Ok(None);
        }

        let fd = tty
            .try_clone_to_owned()
            .map_err(|e| JobError::Terminal(Errno::from_raw(e.raw_os_error().unwrap_or(0))))?;
        signals::ignore_terminal_output().map_err(JobError::Session)?;
        let shell_modes = termios::tcgetattr(&fd).map_err(JobError::Terminal)?;

        Ok(Some(Self {
            fd,
            shell_pgid,
            shell_modes,
        }))
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    /// Give the terminal foreground to a process group.
    pub fn give_terminal_to(&self, pgid: Pid) -> JobResult<()> {
        unistd::tcsetpgrp(&self.fd, pgid).map_err(JobError::Terminal)
    }

    /// Put a job's saved modes back on the terminal before continuing it.
    pub fn restore_modes(&self, modes: &Termios) -> JobResult<()> {
        termios::tcsetattr(&self.fd, SetArg::TCSADRAIN, modes).map_err(JobError::Terminal)
    }

    /// Take the terminal foreground back for the shell.
    ///
    /// Returns whatever modes the departing job left behind, then puts the
    /// shell's own modes back. Failures are logged, not returned: the shell
    /// has to carry on regardless.
    pub fn reclaim_terminal(&self) -> Option<Termios> {
        if let Err(e) = unistd::tcsetpgrp(&self.fd, self.shell_pgid) {
            tracing::warn!("failed to reclaim terminal: {}", e);
        }
        let job_modes = match termios::tcgetattr(&self.fd) {
            Ok(modes) => Some(modes),
            Err(e) => {
                tracing::warn!("failed to read job terminal modes: {}", e);
                None
            }
        };
        if let Err(e) = termios::tcsetattr(&self.fd, SetArg::TCSADRAIN, &self.shell_modes) {
            tracing::warn!("failed to restore shell terminal modes: {}", e);
        }
        job_modes
    }
}

/// Run job `id` in the foreground until it stops or completes.
///
/// Hands the terminal to the job's group; with `resume`, restores the modes
/// the job last left the terminal in and sends SIGCONT. Blocks in the status
/// tracker, then takes the terminal back, saving the job's modes onto the
/// job and restoring the shell's. The terminal is back with the shell on
/// every return path.
pub fn to_foreground(
    session: &Session,
    jobs: &mut JobRegistry,
    id: JobId,
    resume: bool,
) -> JobResult<()> {
    let job = jobs.get_mut(id).ok_or(JobError::NoSuchJob(id))?;
    let pgid = job.pgid.ok_or(JobError::NotStarted(id))?;
    job.background = false;

    let tty = session.terminal();
    if let Some(tty) = tty {
        if let Err(e) = tty.give_terminal_to(pgid) {
            tracing::warn!(%pgid, "failed to give terminal: {}", e);
        }
    }

    let waited = if resume {
        if let (Some(tty), Some(modes)) = (tty, job.tmodes.as_ref()) {
            if let Err(e) = tty.restore_modes(modes) {
                tracing::warn!("failed to restore job terminal modes: {}", e);
            }
        }
        match signal::killpg(pgid, Signal::SIGCONT) {
            Ok(()) => {
                job.mark_running();
                status::wait_for_job(jobs, id)
            }
            Err(e) => Err(JobError::Signal(e)),
        }
    } else {
        status::wait_for_job(jobs, id)
    };

    if let Some(tty) = tty {
        let modes = tty.reclaim_terminal();
        if let Some(job) = jobs.get_mut(id) {
            if modes.is_some() {
                job.tmodes = modes;
            }
        }
    }
    waited
}

/// Let job `id` run in the background, continuing it if `resume`.
///
/// Never blocks and never touches the terminal.
pub fn to_background(jobs: &mut JobRegistry, id: JobId, resume: bool) -> JobResult<()> {
    let job = jobs.get_mut(id).ok_or(JobError::NoSuchJob(id))?;
    let pgid = job.pgid.ok_or(JobError::NotStarted(id))?;
    job.background = true;
    if resume {
        signal::killpg(pgid, Signal::SIGCONT).map_err(JobError::Signal)?;
        job.mark_running();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_ignores_non_terminals() {
        let (read, _write) = unistd::pipe().unwrap();
        assert!(TerminalState::attach(read.as_fd()).unwrap().is_none());
    }
}
