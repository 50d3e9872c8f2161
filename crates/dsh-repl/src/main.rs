//! dsh CLI entry point.
//!
//! Usage:
//!   dsh                        # Interactive shell (line-by-line if stdin is not a tty)
//!   dsh -c <command>           # Run one command line and exit with its status

use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> ExitCode {
    // Initialize tracing (respects RUST_LOG env var). Stderr keeps stdout
    // clean for the jobs' own output.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => exit_code(code),
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<i32> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        None => dsh_repl::run(&dsh_repl::ReplConfig::from_env()),

        Some("--help" | "-h") => {
            print_help();
            Ok(0)
        }

        Some("--version" | "-V") => {
            println!(
                "dsh {} ({} {})",
                env!("CARGO_PKG_VERSION"),
                env!("DSH_GIT_HASH"),
                env!("DSH_BUILD_DATE")
            );
            Ok(0)
        }

        Some("-c") => {
            let cmd = args.get(2).context("-c requires a command argument")?;
            dsh_repl::run_command(cmd)
        }

        Some(unknown) => {
            eprintln!("Unknown option: {unknown}");
            eprintln!("Run 'dsh --help' for usage.");
            Ok(2)
        }
    }
}

/// Shell statuses outside 0..=255 wrap the way the kernel would.
fn exit_code(status: i32) -> ExitCode {
    ExitCode::from((status & 0xff) as u8)
}

fn print_help() {
    println!(
        r#"dsh v{}: a job-control shell

Usage:
  dsh                    Interactive shell
  dsh -c <command>       Run a command line and exit

Options:
  -c <command>           Run command string and exit with its status
  -h, --help             Show this help
  -V, --version          Show version

Command lines:
  a | b | c              Pipeline (one process group per job)
  cmd < in > out 2> err  Redirect stdin, stdout, stderr
  cmd &                  Run in background
  a ; b                  Run in sequence
  # ...                  Comment

Built-ins:
  jobs                   List jobs
  fg [%N]                Continue a job in the foreground
  bg [%N]                Continue a job in the background
  wait [%N]              Wait for a job (or all jobs)
  cd [DIR]               Change directory
  exit [CODE], quit      Leave the shell

Environment:
  DSH_PROMPT             Prompt string (default "dsh$ ")
  RUST_LOG               Diagnostic logging, e.g. RUST_LOG=dsh_kernel=debug
"#,
        env!("CARGO_PKG_VERSION")
    );
}
