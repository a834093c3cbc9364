use std::fmt;

/// Kind of entity a lookup failed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Base,
    Table,
    Column,
    Row,
    View,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Base => "base",
            EntityKind::Table => "table",
            EntityKind::Column => "column",
            EntityKind::Row => "row",
            EntityKind::View => "view",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Transient transport failure; the caller may retry
    #[error("network error: {0}")]
    Network(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    /// Rejected locally, never sent to the data service
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// An optimistic mutation failed to settle and was rolled back
    #[error("{operation} failed: {cause}")]
    Conflict {
        operation: &'static str,
        #[source]
        cause: Box<Error>,
    },

    #[error("local store: {0}")]
    Store(String),

    #[error("config: {0}")]
    Config(String),

    #[error("import: {0}")]
    Import(String),
}

impl Error {
    pub fn not_found(kind: EntityKind, id: impl fmt::Display) -> Self {
        Error::NotFound { kind, id: id.to_string() }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Error::Validation { field, message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Conflict { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Store(e.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Import(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
