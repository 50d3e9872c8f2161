//! dsh REPL: the interactive front end of the dsh shell.
//!
//! Reads command lines (through rustyline when interactive, plain lines
//! otherwise), parses them into jobs, runs built-ins in-process and hands
//! everything else to the job controller. Before each prompt it reports
//! jobs that stopped or finished in the background.

pub mod builtins;
pub mod parser;

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rustyline::Editor;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;

use dsh_kernel::{Job, JobControl, JobError, SessionConfig};
use dsh_types::{JobId, JobInfo, JobStatus};

use crate::builtins::Builtin;

/// Default prompt, overridable through `DSH_PROMPT`.
pub const DEFAULT_PROMPT: &str = "dsh$ ";

/// Status of a line the parser rejected, or a built-in used wrongly.
const USAGE_STATUS: i32 = 2;

/// What the read loop should do after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Leave the shell with this status.
    Exit(i32),
}

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    pub session: SessionConfig,
    pub prompt: String,
    /// Where history is loaded from and saved to; `None` disables it.
    pub history: Option<PathBuf>,
}

impl ReplConfig {
    /// Interactive if stdin is a terminal; prompt and history from the
    /// environment.
    pub fn from_env() -> Self {
        Self {
            session: SessionConfig::detect(),
            prompt: std::env::var("DSH_PROMPT").unwrap_or_else(|_| DEFAULT_PROMPT.to_string()),
            history: directories::BaseDirs::new()
                .map(|b| b.data_dir().join("dsh").join("history.txt")),
        }
    }

    /// Non-interactive, no history, terminal left alone: for tests.
    pub fn batch() -> Self {
        Self {
            session: SessionConfig::batch(),
            prompt: DEFAULT_PROMPT.to_string(),
            history: None,
        }
    }

    /// Like [`ReplConfig::batch`], but foreground jobs get the terminal if
    /// the shell was started in the foreground of one: for `-c`.
    pub fn command() -> Self {
        Self {
            session: SessionConfig::command(),
            ..Self::batch()
        }
    }
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Shell state between lines.
#[derive(Debug)]
pub struct Repl {
    control: JobControl,
    last_status: i32,
}

impl Repl {
    pub fn new(config: &ReplConfig) -> Result<Self> {
        let control = JobControl::new(&config.session).context("failed to start job control")?;
        Ok(Self::with_control(control))
    }

    pub fn with_control(control: JobControl) -> Self {
        Self {
            control,
            last_status: 0,
        }
    }

    /// Status of the last foreground job or built-in, `$?` style.
    pub fn last_status(&self) -> i32 {
        self.last_status
    }

    pub fn control(&self) -> &JobControl {
        &self.control
    }

    /// Parse and run one line.
    pub fn process_line(&mut self, line: &str) -> Flow {
        let jobs = match parser::parse_line(line) {
            Ok(jobs) => jobs,
            Err(e) => {
                eprintln!("dsh: {e}");
                self.last_status = USAGE_STATUS;
                return Flow::Continue;
            }
        };

        for job in jobs {
            match Builtin::from_job(&job) {
                Some(Ok(builtin)) => {
                    if let Flow::Exit(code) = self.run_builtin(builtin) {
                        return Flow::Exit(code);
                    }
                }
                Some(Err(e)) => {
                    eprintln!("dsh: {e}");
                    self.last_status = USAGE_STATUS;
                }
                None => self.run_job(job),
            }
        }
        Flow::Continue
    }

    /// Stops and background completions since the last call, one line each.
    pub fn notifications(&mut self) -> Vec<String> {
        self.control.notifications().iter().map(format_notification).collect()
    }

    fn run_job(&mut self, job: Job) {
        let background = job.background;
        match self.control.launch(job) {
            Ok(id) if background => {
                let pgid = self.control.job(id).and_then(|job| job.pgid);
                if let Some(pgid) = pgid {
                    eprintln!("[{id}] {pgid}");
                }
                self.last_status = 0;
            }
            Ok(id) => self.settle_foreground(id),
            Err(e) => self.report(e),
        }
    }

    /// Record the outcome of a job that just left the foreground.
    fn settle_foreground(&mut self, id: JobId) {
        let Some(job) = self.control.job(id) else {
            return;
        };
        if job.is_completed() {
            self.last_status = job.exit_code().unwrap_or(0);
        } else if job.is_stopped() {
            eprintln!("\n[{id}]+  Stopped  {}", job.command);
            self.last_status = 128 + job.stop_signal().map_or(0, |sig| sig as i32);
            self.control.mark_notified(id);
        }
    }

    fn report(&mut self, err: JobError) {
        eprintln!("dsh: {err}");
        self.last_status = 1;
    }

    fn run_builtin(&mut self, builtin: Builtin) -> Flow {
        tracing::debug!(?builtin, "built-in");
        match builtin {
            Builtin::Jobs => {
                for info in self.control.list() {
                    println!("{info}");
                }
                self.last_status = 0;
            }
            Builtin::Fg(id) => {
                let Some(id) = self.current_job("fg", id) else {
                    return Flow::Continue;
                };
                if let Some(job) = self.control.job(id) {
                    eprintln!("{}", job.command);
                }
                match self.control.foreground(id) {
                    Ok(()) => self.settle_foreground(id),
                    Err(e) => self.report(e),
                }
            }
            Builtin::Bg(id) => {
                let Some(id) = self.current_job("bg", id) else {
                    return Flow::Continue;
                };
                match self.control.background(id) {
                    Ok(()) => {
                        if let Some(job) = self.control.job(id) {
                            eprintln!("[{id}]+ {} &", job.command);
                        }
                        self.last_status = 0;
                    }
                    Err(e) => self.report(e),
                }
            }
            Builtin::Wait(Some(id)) => match self.control.wait(id) {
                Ok(()) => self.settle_foreground(id),
                Err(e) => self.report(e),
            },
            Builtin::Wait(None) => {
                let running: Vec<JobId> = self
                    .control
                    .jobs()
                    .iter()
                    .filter(|(_, job)| job.is_started() && !job.is_stopped())
                    .map(|(id, _)| id)
                    .collect();
                self.last_status = 0;
                for id in running {
                    if let Err(e) = self.control.wait(id) {
                        self.report(e);
                    }
                }
            }
            Builtin::Cd(dir) => self.change_dir(dir),
            Builtin::Exit(code) => return Flow::Exit(code.unwrap_or(self.last_status)),
        }
        Flow::Continue
    }

    /// The job `fg`/`bg` act on: the one named, else the most recently
    /// stopped, else the most recent.
    fn current_job(&mut self, name: &str, requested: Option<JobId>) -> Option<JobId> {
        let jobs = self.control.jobs();
        let id = requested.or_else(|| jobs.last_stopped()).or_else(|| jobs.last_active());
        match id {
            Some(id) if jobs.get(id).is_some() => Some(id),
            Some(id) => {
                eprintln!("dsh: {name}: %{id}: no such job");
                self.last_status = 1;
                None
            }
            None => {
                eprintln!("dsh: {name}: no current job");
                self.last_status = 1;
                None
            }
        }
    }

    fn change_dir(&mut self, dir: Option<PathBuf>) {
        let home = || directories::BaseDirs::new().map(|b| b.home_dir().to_path_buf());
        let Some(dir) = dir.or_else(home) else {
            eprintln!("dsh: cd: HOME not set");
            self.last_status = 1;
            return;
        };
        match std::env::set_current_dir(&dir) {
            Ok(()) => self.last_status = 0,
            Err(e) => {
                eprintln!("dsh: cd: {}: {e}", dir.display());
                self.last_status = 1;
            }
        }
    }
}

/// One notification line, e.g. `[2]+  Stopped  vim` or `[1]   Done  make`.
pub fn format_notification(info: &JobInfo) -> String {
    match info.status {
        JobStatus::Stopped => format!("[{}]+  Stopped  {}", info.id, info.command),
        JobStatus::Completed => format!("[{}]   Done     {}", info.id, info.command),
        JobStatus::Running => format!("[{}]   Running  {}", info.id, info.command),
    }
}

/// Run lines until end of input or `exit`, returning the shell's exit status.
///
/// Uses rustyline with history for interactive sessions; otherwise reads
/// stdin line by line with no prompt.
pub fn run(config: &ReplConfig) -> Result<i32> {
    let mut repl = Repl::new(config)?;
    if config.session.interactive {
        run_interactive(&mut repl, config)
    } else {
        run_batch(&mut repl, std::io::stdin().lock())
    }
}

/// Run one command line non-interactively, as for `dsh -c`.
pub fn run_command(line: &str) -> Result<i32> {
    let mut repl = Repl::new(&ReplConfig::command())?;
    Ok(match repl.process_line(line) {
        Flow::Exit(code) => code,
        Flow::Continue => repl.last_status(),
    })
}

/// Run every line from `input` without prompting.
pub fn run_batch(repl: &mut Repl, input: impl BufRead) -> Result<i32> {
    for line in input.lines() {
        let line = line.context("failed to read input")?;
        for note in repl.notifications() {
            eprintln!("{note}");
        }
        if let Flow::Exit(code) = repl.process_line(&line) {
            return Ok(code);
        }
    }
    Ok(repl.last_status())
}

fn run_interactive(repl: &mut Repl, config: &ReplConfig) -> Result<i32> {
    let mut rl: Editor<(), DefaultHistory> = Editor::new().context("failed to create editor")?;
    load_history(&mut rl, &config.history);

    let status = loop {
        for note in repl.notifications() {
            eprintln!("{note}");
        }

        match rl.readline(&config.prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    if let Err(e) = rl.add_history_entry(line.as_str()) {
                        tracing::warn!("failed to add history entry: {}", e);
                    }
                }
                if let Flow::Exit(code) = repl.process_line(&line) {
                    break code;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("exit");
                break repl.last_status();
            }
            Err(err) => {
                eprintln!("dsh: {err}");
                break 1;
            }
        }
    };

    save_history(&mut rl, &config.history);
    Ok(status)
}

fn load_history(rl: &mut Editor<(), DefaultHistory>, path: &Option<PathBuf>) {
    let Some(path) = path else {
        return;
    };
    if let Err(e) = rl.load_history(path) {
        // Missing on first run
        let not_found = matches!(
            &e,
            ReadlineError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound
        );
        if !not_found {
            tracing::warn!("failed to load history: {}", e);
        }
    }
}

fn save_history(rl: &mut Editor<(), DefaultHistory>, path: &Option<PathBuf>) {
    let Some(path) = path else {
        return;
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("failed to create history directory: {}", e);
        }
    }
    if let Err(e) = rl.save_history(path) {
        tracing::warn!("failed to save history: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(id: u64, status: JobStatus, command: &str) -> JobInfo {
        JobInfo {
            id: JobId(id),
            status,
            command: command.to_string(),
            pgid: Some(4242),
        }
    }

    #[test]
    fn notification_lines() {
        insta::assert_snapshot!(
            format_notification(&info(2, JobStatus::Stopped, "vim notes.txt")),
            @"[2]+  Stopped  vim notes.txt"
        );
        insta::assert_snapshot!(
            format_notification(&info(1, JobStatus::Completed, "make -j8")),
            @"[1]   Done     make -j8"
        );
    }

    #[test]
    fn batch_config_has_no_history() {
        let config = ReplConfig::batch();
        assert!(!config.session.interactive);
        assert!(config.history.is_none());
        assert_eq!(config.prompt, DEFAULT_PROMPT);
        assert!(!config.session.share_terminal);
    }

    #[test]
    fn command_config_shares_the_terminal() {
        let config = ReplConfig::command();
        assert!(!config.session.interactive);
        assert!(config.session.share_terminal);
        assert!(config.history.is_none());
    }

    #[test]
    fn rejected_line_sets_usage_status() {
        let mut repl = Repl::new(&ReplConfig::batch()).unwrap();
        assert_eq!(repl.process_line("| nothing"), Flow::Continue);
        assert_eq!(repl.last_status(), USAGE_STATUS);
    }

    #[test]
    fn exit_uses_given_or_last_status() {
        let mut repl = Repl::new(&ReplConfig::batch()).unwrap();
        assert_eq!(repl.process_line("exit 7"), Flow::Exit(7));
        assert_eq!(repl.process_line("fg %3"), Flow::Continue);
        assert_eq!(repl.last_status(), 1);
        assert_eq!(repl.process_line("quit"), Flow::Exit(1));
    }

    #[test]
    fn blank_and_comment_lines_do_nothing() {
        let mut repl = Repl::new(&ReplConfig::batch()).unwrap();
        assert_eq!(repl.process_line("   # just a comment"), Flow::Continue);
        assert_eq!(repl.last_status(), 0);
        assert!(repl.control().jobs().is_empty());
    }
}
