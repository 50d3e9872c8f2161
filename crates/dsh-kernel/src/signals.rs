//! Signal dispositions for the shell and its children.
//!
//! The shell changes its own dispositions once at startup: an interactive
//! session runs [`ignore_job_control`], a script sharing the terminal runs
//! [`ignore_terminal_output`]. Every forked stage runs [`restore_defaults`]
//! before it replaces its image. Ignored dispositions
//! survive exec, so a child that skipped the reset would be immune to Ctrl-C
//! and Ctrl-Z.
//!
//! `sigaction` requires unsafe per POSIX. Only `SIG_IGN` and `SIG_DFL` are
//! ever installed; no handler code runs.

#![allow(unsafe_code)]

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Signals the interactive shell ignores and its children must not inherit.
///
/// `SIGCHLD` must keep its default action: if ignored, the kernel reaps
/// children on its own and every waitpid returns ECHILD.
pub const JOB_CONTROL_SIGNALS: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
];

fn set_disposition(sig: Signal, handler: SigHandler) -> nix::Result<()> {
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_IGN and SIG_DFL are well-defined dispositions.
    // No custom handler code is executed.
    unsafe {
        signal::sigaction(sig, &action)?;
    }
    Ok(())
}

/// Ignore the interactive and job-control signals in the shell itself.
///
/// `SIGTTOU` goes first: it must be ignored before the shell calls
/// `tcsetpgrp` from what may still be a background group.
pub fn ignore_job_control() -> nix::Result<()> {
    set_disposition(Signal::SIGTTOU, SigHandler::SigIgn)?;
    for sig in JOB_CONTROL_SIGNALS {
        set_disposition(sig, SigHandler::SigIgn)?;
    }
    Ok(())
}

/// Ignore SIGTTOU alone, so a script sharing the terminal can take it back
/// from a job with `tcsetpgrp`.
pub fn ignore_terminal_output() -> nix::Result<()> {
    set_disposition(Signal::SIGTTOU, SigHandler::SigIgn)
}

/// Put every job-control signal back to its default action.
///
/// Called in a freshly forked child, after it has joined its process group
/// and (for foreground jobs) claimed the terminal.
pub fn restore_defaults() -> nix::Result<()> {
    for sig in JOB_CONTROL_SIGNALS {
        set_disposition(sig, SigHandler::SigDfl)?;
    }
    Ok(())
}
