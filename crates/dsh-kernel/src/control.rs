//! Job controller: the surface the REPL and built-ins drive.
//!
//! Owns the session, the registry and the process source, and composes the
//! spawner, status tracker and terminal arbiter into foreground/background
//! transitions.

use std::fmt;

use dsh_types::{JobId, JobInfo};

use crate::error::{JobError, JobResult};
use crate::scheduler::{Forker, Job, JobRegistry, SystemForker, job_info, pipeline, status};
use crate::session::{Session, SessionConfig};
use crate::terminal;

pub struct JobControl {
    session: Session,
    jobs: JobRegistry,
    forker: Box<dyn Forker>,
}

impl fmt::Debug for JobControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobControl")
            .field("session", &self.session)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl JobControl {
    /// Start a session and an empty registry.
    pub fn new(config: &SessionConfig) -> JobResult<Self> {
        Ok(Self::with_session(Session::start(config)?))
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session,
            jobs: JobRegistry::new(),
            forker: Box::new(SystemForker),
        }
    }

    /// Replace the process source.
    pub fn with_forker(mut self, forker: impl Forker + 'static) -> Self {
        self.forker = Box::new(forker);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub fn jobs_mut(&mut self) -> &mut JobRegistry {
        &mut self.jobs
    }

    pub fn job(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Register `job` and start it.
    ///
    /// A foreground job is waited on until it stops or completes, and the
    /// terminal is back with the shell when this returns. A background job
    /// returns at once. If spawning fails the job is unregistered again, so
    /// no partial entry is left behind.
    pub fn spawn(&mut self, job: Job, foreground: bool) -> JobResult<JobId> {
        let id = self.jobs.register(job.in_background(!foreground));
        self.start(id, foreground)?;
        Ok(id)
    }

    /// Spawn `job` honouring its own background flag.
    pub fn launch(&mut self, job: Job) -> JobResult<JobId> {
        let foreground = !job.background;
        self.spawn(job, foreground)
    }

    /// Run job `id` in the foreground: start it if it has never run,
    /// otherwise continue it with its saved terminal modes.
    pub fn foreground(&mut self, id: JobId) -> JobResult<()> {
        if self.is_started(id)? {
            tracing::debug!(job = %id, "continuing in foreground");
            terminal::to_foreground(&self.session, &mut self.jobs, id, true)
        } else {
            self.start(id, true)
        }
    }

    /// Let job `id` run in the background: start it if it has never run,
    /// otherwise continue it.
    pub fn background(&mut self, id: JobId) -> JobResult<()> {
        if self.is_started(id)? {
            tracing::debug!(job = %id, "continuing in background");
            terminal::to_background(&mut self.jobs, id, true)
        } else {
            self.start(id, false)
        }
    }

    /// Block until job `id` stops or completes, without touching the
    /// terminal.
    pub fn wait(&mut self, id: JobId) -> JobResult<()> {
        if !self.is_started(id)? {
            return Err(JobError::NotStarted(id));
        }
        status::wait_for_job(&mut self.jobs, id)
    }

    /// Mark job `id`'s current stop as reported to the user.
    pub fn mark_notified(&mut self, id: JobId) {
        if let Some(job) = self.jobs.get_mut(id) {
            job.notified = true;
        }
    }

    /// Remove every completed job, returning their final listing rows.
    pub fn reap_completed(&mut self) -> Vec<JobInfo> {
        self.jobs
            .drain_where(Job::is_completed)
            .into_iter()
            .map(|(id, job)| {
                tracing::debug!(job = %id, code = ?job.exit_code(), "reaped");
                job_info(id, &job)
            })
            .collect()
    }

    /// Listing of every job after polling for status changes.
    ///
    /// Completed jobs appear once, as `Completed`, and are removed after the
    /// scan.
    pub fn list(&mut self) -> Vec<JobInfo> {
        status::update_status(&mut self.jobs);
        let rows = self.jobs.list();
        self.reap_completed();
        rows
    }

    /// Status changes the user has not been told about yet.
    ///
    /// Polls without blocking, then reports each stop once and each
    /// completed background job once. Completed jobs are removed, including
    /// foreground ones the caller already knows about.
    pub fn notifications(&mut self) -> Vec<JobInfo> {
        status::update_status(&mut self.jobs);

        let mut rows = Vec::new();
        for (id, job) in self.jobs.iter_mut() {
            if job.is_completed() {
                if job.background {
                    rows.push(job_info(id, job));
                }
            } else if job.is_started() && job.is_stopped() && !job.notified {
                job.notified = true;
                rows.push(job_info(id, job));
            }
        }
        self.reap_completed();
        rows
    }

    fn is_started(&self, id: JobId) -> JobResult<bool> {
        self.jobs
            .get(id)
            .map(Job::is_started)
            .ok_or(JobError::NoSuchJob(id))
    }

    fn start(&mut self, id: JobId, foreground: bool) -> JobResult<()> {
        let job = self.jobs.get_mut(id).ok_or(JobError::NoSuchJob(id))?;
        job.background = !foreground;

        if let Err(e) = pipeline::spawn_job(&self.session, self.forker.as_mut(), job, foreground) {
            self.jobs.remove(id);
            if foreground {
                // A forked child may already have taken the terminal.
                if let Some(tty) = self.session.terminal() {
                    tty.reclaim_terminal();
                }
            }
            return Err(e);
        }

        if foreground {
            terminal::to_foreground(&self.session, &mut self.jobs, id, false)
        } else {
            tracing::debug!(job = %id, "running in background");
            Ok(())
        }
    }
}
