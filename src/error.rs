use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExplainError {
    #[error("Parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("Resource not found: {}", .0.display())]
    ResourceNotFound(PathBuf),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Record error: {0}")]
    Record(String),

    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    #[error("Sample source is empty, nothing to render")]
    EmptySource,

    #[error("Tensor data error: {0}")]
    Tensor(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<burn::record::RecorderError> for ExplainError {
    fn from(err: burn::record::RecorderError) -> Self {
        ExplainError::Record(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ExplainError>;

/// Fails with [`ExplainError::ResourceNotFound`] when `path` does not exist.
pub(crate) fn ensure_exists(path: &std::path::Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ExplainError::ResourceNotFound(path.to_path_buf()))
    }
}
