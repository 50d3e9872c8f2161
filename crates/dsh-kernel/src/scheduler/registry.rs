//! The set of live jobs.
//!
//! Provides the `JobRegistry` for tracking jobs from the moment the parser
//! hands them over until they are reaped.

use std::collections::BTreeMap;

use dsh_types::{JobId, JobInfo, JobStatus};
use nix::unistd::Pid;

use super::job::{Job, Process};

/// Registry of live jobs, keyed by job number.
///
/// Numbers come from a counter that only moves forward, so a number stays
/// attached to its job for the job's whole life and is never handed out
/// twice. Iteration is in number order.
#[derive(Debug)]
pub struct JobRegistry {
    /// Counter for generating job numbers.
    next_id: u64,
    jobs: BTreeMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            jobs: BTreeMap::new(),
        }
    }

    /// Take ownership of a parsed job and assign it a number.
    pub fn register(&mut self, job: Job) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.jobs.insert(id, job);
        id
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn get_mut(&mut self, id: JobId) -> Option<&mut Job> {
        self.jobs.get_mut(&id)
    }

    /// Find the job owning a process group.
    pub fn find_by_pgid(&self, pgid: Pid) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|(_, job)| job.pgid == Some(pgid))
            .map(|(id, _)| *id)
    }

    /// Find the process record for `pid`, in whichever job owns it.
    pub fn find_process_mut(&mut self, pid: Pid) -> Option<(JobId, &mut Process)> {
        self.jobs.iter_mut().find_map(|(id, job)| {
            job.processes_mut()
                .iter_mut()
                .find(|p| p.pid == Some(pid))
                .map(|p| (*id, p))
        })
    }

    /// Unlink a job. Its argument vectors, paths and command text are
    /// released when the returned value is dropped.
    pub fn remove(&mut self, id: JobId) -> Option<Job> {
        self.jobs.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobId, &Job)> {
        self.jobs.iter().map(|(id, job)| (*id, job))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (JobId, &mut Job)> {
        self.jobs.iter_mut().map(|(id, job)| (*id, job))
    }

    /// Remove every job matching `remove`, returning them in number order.
    ///
    /// Matches are collected first and unlinked after the scan.
    pub fn drain_where<F>(&mut self, mut remove: F) -> Vec<(JobId, Job)>
    where
        F: FnMut(&Job) -> bool,
    {
        let doomed: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|(_, job)| remove(*job))
            .map(|(id, _)| *id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.jobs.remove(&id).map(|job| (id, job)))
            .collect()
    }

    /// Listing rows for every job, in number order.
    pub fn list(&self) -> Vec<JobInfo> {
        self.jobs.iter().map(|(id, job)| job_info(*id, job)).collect()
    }

    /// Most recently registered job that is stopped.
    pub fn last_stopped(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .rev()
            .find(|(_, job)| job.is_started() && job.status() == JobStatus::Stopped)
            .map(|(id, _)| *id)
    }

    /// Most recently registered job that has not completed.
    pub fn last_active(&self) -> Option<JobId> {
        self.jobs
            .iter()
            .rev()
            .find(|(_, job)| !job.is_completed())
            .map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Listing row for `job`, registered or not.
pub(crate) fn job_info(id: JobId, job: &Job) -> JobInfo {
    JobInfo {
        id,
        status: job.status(),
        command: job.command.clone(),
        pgid: job.pgid.map(Pid::as_raw),
    }
}
