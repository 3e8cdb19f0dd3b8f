use crate::storage::StorageError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classified failure of one import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("storage access failed: {0}")]
    StorageAccess(#[from] StorageError),
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("load failed: {0}")]
    Load(String),
    #[error("import timed out after {0:?}")]
    Timeout(Duration),
}

impl ImportError {
    /// Stable name reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::Configuration(_) => "ConfigurationError",
            ImportError::Connection(_) => "ConnectionError",
            ImportError::StorageAccess(_) => "StorageAccessError",
            ImportError::TableNotFound(_) => "TableNotFoundError",
            ImportError::Parse(_) => "ParseError",
            ImportError::Load(_) => "LoadError",
            ImportError::Timeout(_) => "TimeoutError",
        }
    }
}

/// Pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    /// Request accepted, entry checks not yet passed.
    Pending,
    Connecting,
    Validating,
    Streaming,
    Completed,
    Aborted,
}

impl fmt::Display for ImportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ImportState::Pending => "pending",
            ImportState::Connecting => "connecting",
            ImportState::Validating => "validating",
            ImportState::Streaming => "streaming",
            ImportState::Completed => "completed",
            ImportState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// An aborted import: the error, the state it aborted in, and how many rows
/// were durably written before the failure.
///
/// `rows_committed` is zero for transactional imports, which roll back.
#[derive(Debug, Error)]
#[error("{error} (while {state})")]
pub struct ImportFailure {
    pub error: ImportError,
    pub state: ImportState,
    pub rows_committed: u64,
}

impl ImportFailure {
    pub fn new(error: ImportError, state: ImportState) -> Self {
        Self {
            error,
            state,
            rows_committed: 0,
        }
    }
}
