//! Fault injection for process creation.
//!
//! Plug a [`FailingForker`] into [`JobControl::with_forker`] to make the
//! N-th fork of a pipeline fail, leaving the earlier stages running so the
//! spawner's cleanup path has something to clean up.
//!
//! [`JobControl::with_forker`]: crate::JobControl::with_forker

use nix::errno::Errno;
use nix::unistd::ForkResult;

use crate::scheduler::{Forker, SystemForker};

/// Forks for real `remaining` times, then fails every call with `EAGAIN`.
#[derive(Debug, Clone)]
pub struct FailingForker {
    remaining: usize,
    inner: SystemForker,
}

impl FailingForker {
    pub fn after(successes: usize) -> Self {
        Self {
            remaining: successes,
            inner: SystemForker,
        }
    }
}

impl Forker for FailingForker {
    fn fork(&mut self) -> nix::Result<ForkResult> {
        if self.remaining == 0 {
            tracing::debug!("injected fork failure");
            return Err(Errno::EAGAIN);
        }
        self.remaining -= 1;
        self.inner.fork()
    }
}
