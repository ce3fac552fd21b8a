//! Job payload and job state machine.
//!
//! Mirrors §3 ("DATA MODEL") and §3 ("Job state machine") of the spec:
//! `Queued -> Allocated -> (Completed | Failed | Cancelled)`. The
//! worker only ever writes the terminal transitions plus progress
//! updates; allocation itself is the job DB's job.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ProtocolError;

/// Opaque job identifier. Transparent over `i64` because SQLite (our
/// concrete job-db backend) stores ids as `INTEGER PRIMARY KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<JobId> for i64 {
    fn from(value: JobId) -> Self {
        value.0
    }
}

impl FromStr for JobId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(JobId)
            .map_err(|_| ProtocolError::InvalidJobId(s.to_string()))
    }
}

/// Job state machine. The worker only ever writes the terminal states
/// plus re-reads `Queued`/`Allocated` while polling `get_job_state`
/// for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Queued,
    Allocated,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Queued => "QUEUED",
            JobState::Allocated => "ALLOCATED",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobState::Queued),
            "ALLOCATED" => Ok(JobState::Allocated),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "CANCELLED" => Ok(JobState::Cancelled),
            other => Err(ProtocolError::InvalidJobState(other.to_string())),
        }
    }
}

/// A unit of work claimed from the job DB. `args` holds the handler's
/// arguments exactly as stored — string/number/bool/array/object — so
/// that the staging pass (file_prep) can walk it uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub module: String,
    #[serde(default)]
    pub modulepath: Option<PathBuf>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub priority: i64,
    pub args: serde_json::Map<String, serde_json::Value>,
    /// `__post__` in the distilled spec. Kept as raw JSON values (not
    /// `Vec<PostDirective>`) so a single malformed entry can be
    /// warned-and-skipped by the post-processor instead of failing
    /// deserialization of the whole job (§4.7).
    #[serde(default)]
    pub post: Option<Vec<serde_json::Value>>,
    /// `__ll__` in the distilled spec.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Job {
    /// The worker injects a debug default if the job didn't specify one
    /// (§4.4.3 step 1, "Log-level injection").
    pub fn log_level_or_default(&self) -> &str {
        self.log_level.as_deref().unwrap_or("DEBUG")
    }
}
