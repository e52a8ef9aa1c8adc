//! build: One request to produce documentation output from a source ref.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::builds;

/// Build lifecycle: `pending → running → success | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown build status: {other}")),
        }
    }
}

/// The only statuses a builder may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Success,
    Failed,
}

impl From<TerminalStatus> for BuildStatus {
    fn from(status: TerminalStatus) -> Self {
        match status {
            TerminalStatus::Success => Self::Success,
            TerminalStatus::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = builds)]
pub struct Build {
    pub id: i64,
    pub project_id: i64,
    #[serde(rename = "ref")]
    pub source_ref: String,
    pub tag: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Build {
    pub fn status(&self) -> Option<BuildStatus> {
        self.status.parse().ok()
    }

    pub fn is_running(&self) -> bool {
        self.status() == Some(BuildStatus::Running)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = builds)]
pub struct NewBuild {
    pub project_id: i64,
    pub source_ref: String,
    pub tag: String,
    pub status: String,
}

impl NewBuild {
    /// Every build enters the queue as `pending`.
    pub fn pending(project_id: i64, source_ref: String, tag: String) -> Self {
        Self {
            project_id,
            source_ref,
            tag,
            status: BuildStatus::Pending.as_str().to_string(),
        }
    }
}
