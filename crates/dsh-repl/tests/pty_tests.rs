//! Drive `dsh` on a pseudo-terminal it controls, as its own session leader,
//! and watch who holds the terminal and in which modes.

#![cfg(target_os = "linux")]

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::{FcntlArg, FdFlag, fcntl};
use nix::libc;
use nix::pty::openpty;
use nix::sys::termios::{self, LocalFlags};
use nix::unistd::{self, Pid};
use tempfile::TempDir;

const PROMPT: &str = "dsh$ ";
const TIMEOUT: Duration = Duration::from_secs(10);

struct PtyShell {
    child: Child,
    master: File,
    output: Arc<Mutex<Vec<u8>>>,
    seen: usize,
    _home: TempDir,
}

impl PtyShell {
    fn spawn(args: &[&str]) -> Self {
        let pty = openpty(None, None).expect("openpty");
        for fd in [&pty.master, &pty.slave] {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).expect("cloexec");
        }
        let home = tempfile::tempdir().expect("tempdir");

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_dsh"));
        cmd.args(args)
            // Plain line reading: no escape sequences, no raw mode at the prompt
            .env("TERM", "dumb")
            .env("HOME", home.path())
            .env("XDG_DATA_HOME", home.path())
            .env_remove("DSH_PROMPT")
            .env_remove("RUST_LOG")
            .stdin(slave_stdio(&pty.slave))
            .stdout(slave_stdio(&pty.slave))
            .stderr(slave_stdio(&pty.slave));
        // SAFETY: setsid and ioctl are async-signal-safe.
        unsafe {
            cmd.pre_exec(|| {
                unistd::setsid()?;
                if libc::ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY, 0) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        let child = cmd.spawn().expect("spawn dsh");
        // Only the shell and its jobs keep the slave open, so reads end once
        // they are all gone.
        drop(cmd);
        drop(pty.slave);

        let master = File::from(pty.master);
        let output = Arc::new(Mutex::new(Vec::new()));
        let mut reader = master.try_clone().expect("dup master");
        let sink = Arc::clone(&output);
        thread::spawn(move || {
            let mut buf = [0u8; 1024];
            while let Ok(n) = reader.read(&mut buf) {
                if n == 0 {
                    break;
                }
                sink.lock().unwrap().extend_from_slice(&buf[..n]);
            }
        });

        Self {
            child,
            master,
            output,
            seen: 0,
            _home: home,
        }
    }

    fn pid(&self) -> Pid {
        Pid::from_raw(self.child.id() as i32)
    }

    fn send(&mut self, input: &str) {
        self.master.write_all(input.as_bytes()).expect("write to pty");
    }

    /// Wait for `needle` past everything already matched; returns the text
    /// up to and including it.
    fn expect(&mut self, needle: &str) -> String {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            {
                let output = self.output.lock().unwrap();
                let fresh = &output[self.seen..];
                if let Some(at) = fresh
                    .windows(needle.len())
                    .position(|w| w == needle.as_bytes())
                {
                    let end = at + needle.len();
                    let text = String::from_utf8_lossy(&fresh[..end]).into_owned();
                    self.seen += end;
                    return text;
                }
                if Instant::now() > deadline {
                    panic!(
                        "no {needle:?} within {TIMEOUT:?}; output:\n{}",
                        String::from_utf8_lossy(&output)
                    );
                }
            }
            thread::sleep(Duration::from_millis(20));
        }
    }

    fn foreground_group(&self) -> Pid {
        unistd::tcgetpgrp(&self.master).expect("tcgetpgrp")
    }

    fn local_flags(&self) -> LocalFlags {
        termios::tcgetattr(&self.master).expect("tcgetattr").local_flags
    }

    fn wait(&mut self) -> ExitStatus {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some(status) = self.child.try_wait().expect("try_wait") {
                return status;
            }
            assert!(Instant::now() < deadline, "dsh did not exit");
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for PtyShell {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn slave_stdio(slave: &OwnedFd) -> Stdio {
    Stdio::from(slave.try_clone().expect("dup slave"))
}

// ============================================================================
// dsh -c
// ============================================================================

#[test]
fn command_job_reads_the_terminal() {
    let mut shell = PtyShell::spawn(&["-c", "sh -c 'read x; echo got:$x'"]);
    shell.send("hello\n");
    shell.expect("got:hello");
    assert_eq!(shell.wait().code(), Some(0));
}

#[test]
fn command_job_stdin_sees_end_of_input() {
    let mut shell = PtyShell::spawn(&["-c", "sh -c 'cat; echo status:$?'"]);
    shell.send("line\n\x04");
    shell.expect("status:0");
    assert!(shell.wait().success());
}

// ============================================================================
// Interactive
// ============================================================================

#[test]
fn terminal_returns_to_the_shell_after_every_job() {
    let mut shell = PtyShell::spawn(&[]);
    shell.expect(PROMPT);
    let shell_pgid = shell.pid();
    assert_eq!(shell.foreground_group(), shell_pgid);

    shell.send("sh -c 'exit 3'\n");
    shell.expect(PROMPT);
    assert_eq!(shell.foreground_group(), shell_pgid);

    shell.send("sh -c 'kill -STOP $$'\n");
    shell.expect("Stopped");
    shell.expect(PROMPT);
    assert_eq!(shell.foreground_group(), shell_pgid);

    shell.send("fg\n");
    shell.expect(PROMPT);
    assert_eq!(shell.foreground_group(), shell_pgid);

    shell.send("exit\n");
    assert!(shell.wait().success());
}

#[test]
fn stopped_job_gets_its_modes_back_on_fg() {
    let mut shell = PtyShell::spawn(&[]);
    shell.expect(PROMPT);
    assert!(shell.local_flags().contains(LocalFlags::ICANON));

    shell.send("sh -c 'stty raw -echo; kill -STOP $$; stty -a'\n");
    shell.expect("Stopped");
    shell.expect(PROMPT);
    let between = shell.local_flags();
    assert!(between.contains(LocalFlags::ICANON), "{between:?}");
    assert!(between.contains(LocalFlags::ECHO), "{between:?}");

    shell.send("fg\n");
    let listing = shell.expect(PROMPT);
    assert!(
        listing.split_whitespace().any(|word| word == "-icanon"),
        "{listing}"
    );
    assert!(shell.local_flags().contains(LocalFlags::ICANON));
    assert_eq!(shell.foreground_group(), shell.pid());

    shell.send("exit\n");
    assert!(shell.wait().success());
}
