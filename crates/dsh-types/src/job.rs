//! Job identification and status types.

/// Stable job number, assigned from a registry-wide counter.
///
/// Numbers are never reused while the shell runs, so a number printed by
/// `jobs` keeps naming the same job until that job is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = std::num::ParseIntError;

    /// Accepts `3` as well as the job-spec form `%3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('%').unwrap_or(s).parse().map(JobId)
    }
}

/// Status of a job as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// At least one process is neither stopped nor completed.
    Running,
    /// Every process that has not completed is stopped (e.g. Ctrl-Z / SIGTSTP).
    Stopped,
    /// Every process has completed.
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Stopped => write!(f, "Stopped"),
            JobStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Information about a job for listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    /// Job number.
    pub id: JobId,
    /// Current status.
    pub status: JobStatus,
    /// Command text as typed.
    pub command: String,
    /// OS process group, once the first stage has been forked.
    pub pgid: Option<i32>,
}

impl std::fmt::Display for JobInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]  {:<10} {}", self.id, self.status.to_string(), self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1", 1)]
    #[case("%2", 2)]
    #[case("%42", 42)]
    fn job_id_parses_plain_and_percent_forms(#[case] input: &str, #[case] expected: u64) {
        assert_eq!(input.parse::<JobId>().unwrap(), JobId(expected));
    }

    #[rstest]
    #[case("")]
    #[case("%")]
    #[case("abc")]
    #[case("-1")]
    fn job_id_rejects_garbage(#[case] input: &str) {
        assert!(input.parse::<JobId>().is_err());
    }

    #[test]
    fn info_display_pads_status() {
        let info = JobInfo {
            id: JobId(3),
            status: JobStatus::Stopped,
            command: "vim notes.txt".to_string(),
            pgid: Some(4242),
        };
        assert_eq!(info.to_string(), "[3]  Stopped    vim notes.txt");
    }
}
