use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata error: {0}")]
    Json(#[from] serde_json::Error),
    /// Caller passed arguments that can never be valid.
    #[error("precondition violated: {0}")]
    Precondition(String),
    /// Operation on a cursor, transaction or manager that was already closed.
    #[error("closed: {0}")]
    Closed(&'static str),
    /// Stored entries contradict each other (e.g. floor at or after ceiling).
    #[error("corrupt state: {0}")]
    CorruptState(String),
    #[error("corrupt data: {0}")]
    Corrupt(&'static str),
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("branch not found: {0}")]
    BranchNotFound(String),
    #[error("branch already exists: {0}")]
    BranchExists(String),
    #[error("index not found: {0}")]
    IndexNotFound(String),
}

impl Error {
    pub(crate) fn precondition(msg: impl Into<String>) -> Self {
        Error::Precondition(msg.into())
    }

    /// True for errors raised because an argument was invalid.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::Precondition(_))
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed(_))
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Error::CorruptState(_) | Error::Corrupt(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
