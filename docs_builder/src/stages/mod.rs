//! Pipeline stages, in the order a job runs them.

pub mod execute;
pub mod fetch;
pub mod publish;
pub mod validate;

use std::fmt;

use thiserror::Error;

use crate::sandbox::SandboxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Execute,
    Validate,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Execute => "execute",
            Self::Validate => "validate",
            Self::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fold `raw` into one path segment of `[A-Za-z0-9._-]`, so a ref such as
/// `feature/docs` can name a directory or a container.
pub fn path_segment(raw: &str) -> String {
    let segment: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    if segment.chars().all(|c| c == '.') {
        // "", "." and ".." would escape or collapse the key prefix.
        return segment.replace('.', "-") + "-";
    }
    segment
}

/// A stage failure, prefixed with the stage that raised it.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("workspace: {0}")]
    Workspace(#[source] std::io::Error),
    #[error("fetch: {0}")]
    Fetch(#[from] fetch::FetchError),
    #[error("execute: {0}")]
    Execute(#[from] SandboxError),
    #[error("validate: {0}")]
    Validate(#[from] validate::ValidateError),
    #[error("publish: {0}")]
    Publish(#[from] publish::PublishError),
}
