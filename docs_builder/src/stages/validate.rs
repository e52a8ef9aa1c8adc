//! Validate: the build must have produced something to publish.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("read output dir: {0}")]
    Io(#[from] std::io::Error),
    #[error("no artifacts produced: output directory is empty")]
    Empty,
}

pub async fn run(output_dir: &Path) -> Result<(), ValidateError> {
    let mut entries = tokio::fs::read_dir(output_dir).await?;
    match entries.next_entry().await? {
        Some(_) => Ok(()),
        None => Err(ValidateError::Empty),
    }
}
