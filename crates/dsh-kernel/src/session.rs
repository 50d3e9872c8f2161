//! Shell session state.
//!
//! One [`Session`] per shell process, built at startup from a
//! [`SessionConfig`] and passed to every job-control operation. It records
//! the shell's own process group and, when it has one, the hold on the
//! controlling terminal.

use std::io::IsTerminal;
use std::os::fd::{AsFd, BorrowedFd};

use nix::unistd::{self, Pid};

use crate::error::JobResult;
use crate::terminal::TerminalState;

/// How the session should run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Claim the terminal and do full job control.
    ///
    /// When false the shell leaves its job-control signal dispositions
    /// alone; jobs still get their own process groups.
    pub interactive: bool,

    /// For non-interactive sessions: if stdin is a terminal with the
    /// shell's group in the foreground, hand it to foreground jobs and take
    /// it back afterwards. Without this a job reading the terminal from its
    /// own group would be stopped by SIGTTIN.
    pub share_terminal: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::detect()
    }
}

impl SessionConfig {
    /// Interactive if stdin is a terminal.
    pub fn detect() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal(),
            share_terminal: true,
        }
    }

    /// Non-interactive and never touching the terminal: tests, embedding.
    pub fn batch() -> Self {
        Self {
            interactive: false,
            share_terminal: false,
        }
    }

    /// Non-interactive, sharing the terminal if there is one: `-c`.
    pub fn command() -> Self {
        Self {
            interactive: false,
            share_terminal: true,
        }
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_share_terminal(mut self, share: bool) -> Self {
        self.share_terminal = share;
        self
    }
}

/// Process-wide shell state.
#[derive(Debug)]
pub struct Session {
    shell_pgid: Pid,
    interactive: bool,
    terminal: Option<TerminalState>,
}

impl Session {
    /// Set up the session.
    ///
    /// Interactive sessions wait to be foregrounded, then claim the
    /// terminal (see [`TerminalState::acquire`]). Non-interactive ones
    /// attach to it when asked to share and already in the foreground (see
    /// [`TerminalState::attach`]). An error here means the shell cannot do
    /// job control at all.
    pub fn start(config: &SessionConfig) -> JobResult<Self> {
        let stdin = std::io::stdin();
        if config.interactive {
            let terminal = TerminalState::acquire(stdin.as_fd())?;
            tracing::debug!(pgid = %terminal.shell_pgid(), "interactive session");
            return Ok(Self {
                shell_pgid: terminal.shell_pgid(),
                interactive: true,
                terminal: Some(terminal),
            });
        }

        let terminal = if config.share_terminal {
            TerminalState::attach(stdin.as_fd())?
        } else {
            None
        };
        if terminal.is_some() {
            tracing::debug!("sharing the terminal with foreground jobs");
        }
        Ok(Self {
            shell_pgid: unistd::getpgrp(),
            interactive: false,
            terminal,
        })
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn shell_pgid(&self) -> Pid {
        self.shell_pgid
    }

    pub fn terminal(&self) -> Option<&TerminalState> {
        self.terminal.as_ref()
    }

    /// Controlling-terminal descriptor, if the session holds one.
    pub fn terminal_fd(&self) -> Option<BorrowedFd<'_>> {
        self.terminal.as_ref().map(TerminalState::fd)
    }
}
