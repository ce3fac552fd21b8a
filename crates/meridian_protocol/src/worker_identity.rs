//! Worker identity (§3): `"{type}-{nodename}_{index}"`, stable for the
//! process's lifetime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    Normal,
    Admin,
}

impl WorkerType {
    /// Max jobs per allocation for this worker type (§4.4.1 step 2):
    /// 5 for admin, 1 for normal.
    pub fn max_jobs(self) -> usize {
        match self {
            WorkerType::Normal => 1,
            WorkerType::Admin => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerType::Normal => "normal",
            WorkerType::Admin => "admin",
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WorkerType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(WorkerType::Normal),
            "admin" => Ok(WorkerType::Admin),
            other => Err(ProtocolError::InvalidWorkerType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub worker_type: WorkerType,
    pub nodename: String,
    pub index: usize,
}

impl WorkerIdentity {
    pub fn new(worker_type: WorkerType, nodename: impl Into<String>, index: usize) -> Self {
        Self {
            worker_type,
            nodename: nodename.into(),
            index,
        }
    }

    /// `"{type}-{nodename}_{index}"` (§3).
    pub fn wid(&self) -> String {
        format!("{}-{}_{}", self.worker_type, self.nodename, self.index)
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_wid_as_spec() {
        let id = WorkerIdentity::new(WorkerType::Admin, "host01", 3);
        assert_eq!(id.wid(), "admin-host01_3");
    }

    #[test]
    fn max_jobs_matches_spec() {
        assert_eq!(WorkerType::Normal.max_jobs(), 1);
        assert_eq!(WorkerType::Admin.max_jobs(), 5);
    }
}
