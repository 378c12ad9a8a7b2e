use std::path::PathBuf;

/// Errors that halt a single map request.
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    #[error("invalid coordinates: {0}")]
    Validation(String),
    #[error("failed to load dataset {path:?}: {reason}")]
    DatasetLoad { path: PathBuf, reason: String },
    #[error("field '{field}' not found in dataset; available columns: {}", .available.join(", "))]
    MissingField { field: String, available: Vec<String> },
    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),
    #[error("unknown administrative level '{0}'")]
    UnknownLevel(String),
    #[error("no area named '{name}' in field '{field}'")]
    UnknownArea { field: String, name: String },
    #[error("no usable font: {0}")]
    Font(String),
    #[error("rendering failed: {0}")]
    Render(String),
}

pub type MapResult<T> = Result<T, MapError>;

impl MapError {
    pub fn dataset(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        MapError::DatasetLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
