//! Core status and error types shared across the runtime

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod error;

pub use error::{RuntimeError, StageError};

/// Lifecycle status of an analysis job.
///
/// Transitions are strictly monotonic: queued → parsing → embedding →
/// analyzing → done, with `failed` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Parsing,
    Embedding,
    Analyzing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Parsing => "parsing",
            JobStatus::Embedding => "embedding",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        }
    }

    /// Statuses that block a duplicate job from being created for the same
    /// (repo, commit). Terminal failures are deliberately excluded so a
    /// failed job never blocks re-analysis.
    pub const ACTIVE: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Parsing,
        JobStatus::Embedding,
        JobStatus::Analyzing,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "parsing" => Ok(JobStatus::Parsing),
            "embedding" => Ok(JobStatus::Embedding),
            "analyzing" => Ok(JobStatus::Analyzing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The pipeline stage a worker owns. Stage names double as the `status`
/// value a retried job is parked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parsing,
    Embedding,
    Analyzing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parsing => "parsing",
            Stage::Embedding => "embedding",
            Stage::Analyzing => "analyzing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips_through_strings() {
        for status in [
            JobStatus::Queued,
            JobStatus::Parsing,
            JobStatus::Embedding,
            JobStatus::Analyzing,
            JobStatus::Done,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn terminal_statuses_are_not_active() {
        assert!(!JobStatus::ACTIVE.contains(&JobStatus::Failed));
        assert!(!JobStatus::ACTIVE.contains(&JobStatus::Done));
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Done.is_terminal());
        assert!(!JobStatus::Parsing.is_terminal());
    }

    #[test]
    fn stage_names_match_their_parked_status() {
        assert_eq!(
            Stage::Parsing.as_str().parse::<JobStatus>().unwrap(),
            JobStatus::Parsing
        );
        assert_eq!(
            Stage::Embedding.as_str().parse::<JobStatus>().unwrap(),
            JobStatus::Embedding
        );
        assert_eq!(
            Stage::Analyzing.as_str().parse::<JobStatus>().unwrap(),
            JobStatus::Analyzing
        );
    }
}
