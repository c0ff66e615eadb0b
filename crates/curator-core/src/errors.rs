//! Error types for the context curation engine.

/// Top-level error enum for the curator core library.
#[derive(Debug, thiserror::Error)]
pub enum CuratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Context index {0} is archived")]
    Archived(String),

    #[error("Scan cancelled before the snapshot was committed")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "python")]
impl From<CuratorError> for pyo3::PyErr {
    fn from(err: CuratorError) -> pyo3::PyErr {
        use pyo3::exceptions::{PyIOError, PyLookupError, PyRuntimeError, PyValueError};
        match &err {
            CuratorError::NotFound(_) => PyLookupError::new_err(err.to_string()),
            CuratorError::Parse(_) | CuratorError::InvalidInput(_) | CuratorError::Json(_) => {
                PyValueError::new_err(err.to_string())
            }
            CuratorError::Io(_) => PyIOError::new_err(err.to_string()),
            CuratorError::Index(_)
            | CuratorError::Archived(_)
            | CuratorError::Cancelled
            | CuratorError::Sqlite(_) => PyRuntimeError::new_err(err.to_string()),
        }
    }
}

pub type CuratorResult<T> = Result<T, CuratorError>;
