//! Scheduler module for dsh: jobs, pipelines and child status.
//!
//! This module provides:
//! - **Data model**: [`Job`] and [`Process`], a pipeline mapped to one
//!   process group.
//! - **Registry**: the live jobs, numbered from a counter that never reuses.
//! - **Pipeline spawning**: fork/exec of every stage with pipe wiring and
//!   process-group placement.
//! - **Status tracking**: reaping child status changes and filing them on
//!   the right process.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        JobRegistry                           │
//! │  jobs: BTreeMap<JobId, Job>                                  │
//! │  - register(Job) → JobId                                     │
//! │  - find_by_pgid / find_process_mut / remove / list           │
//! └──────────────────────────────────────────────────────────────┘
//!          │ &mut Job                          ▲ WaitStatus
//!          ▼                                   │
//! ┌──────────────────────────┐   ┌───────────────────────────────┐
//! │ pipeline::spawn_job      │   │ status::wait_for_job          │
//! │  pipe → fork → setpgid   │   │  waitpid(-1, WUNTRACED)       │
//! │  → (tcsetpgrp) → exec    │   │  → mark_process_status        │
//! └──────────────────────────┘   └───────────────────────────────┘
//! ```

mod job;
pub mod pipeline;
mod registry;
pub mod status;

pub use job::{Job, Process};
pub use pipeline::{Forker, SystemForker};
pub use registry::JobRegistry;
pub(crate) use registry::job_info;
