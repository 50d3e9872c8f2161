//! Pipeline spawning.
//!
//! One OS process per stage. For stage *i* the spawner creates the pipe to
//! stage *i+1* (if any), forks, and in the child joins the job's process
//! group, claims the terminal for foreground jobs, resets signal
//! dispositions, wires stdin/stdout/stderr and execs. The parent records the
//! pid, repeats the group join on the child's behalf and closes every pipe
//! end it does not need before forking the next stage.
//!
//! ```text
//!  redirect/tty ──▶ stage 0 ──pipe──▶ stage 1 ──pipe──▶ stage 2 ──▶ redirect/tty
//!                  (leader)
//!  └──────────────────── one process group (pgid = leader pid) ────────────────┘
//! ```
//!
//! Every descriptor is an owned value: dropping it in the parent is the
//! close. Pipes are created close-on-exec, so a stray copy in a child
//! disappears at exec even if the explicit close were skipped.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::waitpid;
use nix::unistd::{self, ForkResult, Pid};

use super::job::Job;
use crate::error::{JobError, JobResult};
use crate::session::Session;
use crate::signals;

/// Source of new processes.
///
/// The production implementation is [`SystemForker`]; tests swap in one
/// that fails on demand to exercise spawn-failure cleanup.
pub trait Forker {
    /// Fork the calling process.
    ///
    /// Implementations must only ever return `Ok(ForkResult::Child)` in a
    /// genuinely new process.
    fn fork(&mut self) -> nix::Result<ForkResult>;
}

/// Forks with fork(2).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemForker;

impl Forker for SystemForker {
    fn fork(&mut self) -> nix::Result<ForkResult> {
        // SAFETY: the child branch of `spawn_job` only adjusts its process
        // group, terminal, signal dispositions and descriptors before it
        // either execs or calls _exit. It never returns into shell code.
        unsafe { unistd::fork() }
    }
}

/// Descriptors one stage will see as fds 0, 1 and 2. `None` inherits the
/// shell's own.
struct StageIo {
    input: Option<OwnedFd>,
    output: Option<OwnedFd>,
}

/// Fork and exec every stage of `job`.
///
/// On return the job's process group is assigned and every stage is
/// running (or already gone). The shell holds no pipe descriptors created
/// here. If a fork or pipe fails, stages forked so far are killed and
/// reaped, the job's pids and group are cleared, and the error is returned.
pub fn spawn_job(
    session: &Session,
    forker: &mut dyn Forker,
    job: &mut Job,
    foreground: bool,
) -> JobResult<()> {
    let programs = job
        .processes()
        .iter()
        .map(|p| p.c_argv())
        .collect::<JobResult<Vec<_>>>()?;

    let stdin = job.stdin.as_deref().map(open_input).transpose()?;
    let stdout = job.stdout.as_deref().map(open_output).transpose()?;
    let stderr = job.stderr.as_deref().map(open_output).transpose()?;

    flush_stdout();
    let result = fork_stages(
        session,
        forker,
        job,
        foreground,
        &programs,
        stdin,
        stdout,
        stderr.as_ref(),
    );
    if let Err(e) = &result {
        tracing::debug!("spawn of {:?} failed: {}", job.command, e);
        abort_spawn(job);
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn fork_stages(
    session: &Session,
    forker: &mut dyn Forker,
    job: &mut Job,
    foreground: bool,
    programs: &[Vec<CString>],
    stdin: Option<File>,
    mut stdout: Option<File>,
    stderr: Option<&File>,
) -> JobResult<()> {
    let last = programs.len() - 1;
    let mut next_input: Option<OwnedFd> = stdin.map(OwnedFd::from);

    for (i, argv) in programs.iter().enumerate() {
        let input = next_input.take();
        let (output, following) = if i < last {
            let (read, write) =
                unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| JobError::spawn("pipe", e))?;
            (Some(write), Some(read))
        } else {
            (stdout.take().map(OwnedFd::from), None)
        };
        let io = StageIo { input, output };

        match forker.fork() {
            Ok(ForkResult::Child) => {
                drop(following);
                exec_stage(session, job.pgid, foreground, io, stderr, argv)
            }
            Ok(ForkResult::Parent { child }) => {
                job.processes_mut()[i].pid = Some(child);
                let pgid = *job.pgid.get_or_insert(child);
                // The child makes the same call; whichever lands first wins.
                // EACCES means the child already exec'd, after joining.
                if let Err(e) = unistd::setpgid(child, pgid) {
                    tracing::debug!(%child, %pgid, "parent setpgid: {}", e);
                }
                tracing::debug!(stage = i, %child, %pgid, "forked");
            }
            Err(e) => return Err(JobError::spawn("fork", e)),
        }

        // Parent's copies of this stage's ends close here.
        drop(io);
        next_input = following;
    }
    Ok(())
}

/// Child side of one stage. Never returns.
fn exec_stage(
    session: &Session,
    pgid: Option<Pid>,
    foreground: bool,
    io: StageIo,
    stderr: Option<&File>,
    argv: &[CString],
) -> ! {
    let pgid = pgid.unwrap_or_else(unistd::getpid);

    // Group first: the kernel refuses a foreground change to a group the
    // caller has not joined.
    if unistd::setpgid(Pid::from_raw(0), pgid).is_ok() && foreground {
        if let Some(tty) = session.terminal_fd() {
            let _ = unistd::tcsetpgrp(tty, pgid);
        }
    }

    if let Err(e) = signals::restore_defaults() {
        child_fail(argv, "sigaction", e);
    }

    if let Some(fd) = &io.input {
        redirect(fd.as_raw_fd(), libc::STDIN_FILENO, argv);
    }
    if let Some(fd) = &io.output {
        redirect(fd.as_raw_fd(), libc::STDOUT_FILENO, argv);
    }
    if let Some(file) = stderr {
        redirect(file.as_raw_fd(), libc::STDERR_FILENO, argv);
    }
    drop(io);

    match unistd::execvp(&argv[0], argv) {
        Ok(never) => match never {},
        Err(e) => child_fail(argv, "exec", e),
    }
}

fn redirect(from: RawFd, to: RawFd, argv: &[CString]) {
    if from == to {
        return;
    }
    if let Err(e) = unistd::dup2(from, to) {
        child_fail(argv, "dup2", e);
    }
}

/// Report a failure inside a forked child and exit without unwinding.
///
/// Writes straight to fd 2 in pieces, without allocating: another thread
/// may have held the allocator or stderr lock at fork time.
fn child_fail(argv: &[CString], op: &str, err: Errno) -> ! {
    let not_found = op == "exec" && err == Errno::ENOENT;
    let (op, detail) = match (op, not_found) {
        (_, true) => ("", "command not found"),
        ("exec", false) => ("", err.desc()),
        (op, false) => (op, err.desc()),
    };

    // SAFETY: fd 2 stays open for the life of this process.
    let stderr = unsafe { BorrowedFd::borrow_raw(libc::STDERR_FILENO) };
    let mut parts: [&[u8]; 6] = [
        b"dsh: ",
        argv[0].as_bytes(),
        b": ",
        op.as_bytes(),
        b"",
        detail.as_bytes(),
    ];
    if !op.is_empty() {
        parts[4] = b": ";
    }
    for part in parts {
        let _ = unistd::write(stderr, part);
    }
    let _ = unistd::write(stderr, b"\n");

    // SAFETY: _exit skips atexit handlers and stdio flushing, both of which
    // belong to the parent's copy of this address space.
    unsafe { libc::_exit(if not_found { 127 } else { 126 }) }
}

/// Kill and reap every stage already forked for a failed spawn.
fn abort_spawn(job: &mut Job) {
    for process in job.processes_mut() {
        let Some(pid) = process.pid.take() else {
            continue;
        };
        if let Err(e) = signal::kill(pid, Signal::SIGKILL) {
            tracing::warn!(%pid, "kill during spawn abort: {}", e);
        }
        while let Err(Errno::EINTR) = waitpid(pid, None) {}
        process.completed = true;
    }
    job.pgid = None;
}

fn open_input(path: &Path) -> JobResult<File> {
    File::open(path).map_err(|source| JobError::Redirect {
        path: path.to_path_buf(),
        source,
    })
}

fn open_output(path: &Path) -> JobResult<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o666)
        .open(path)
        .map_err(|source| JobError::Redirect {
            path: path.to_path_buf(),
            source,
        })
}

/// Push out anything the shell printed before its children start writing
/// to the same terminal.
fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
