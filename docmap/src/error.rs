use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Per-path validation failures, ordered by dotted path.
pub type ErrorReport = BTreeMap<String, FieldError>;

/// Which side of an inclusive range was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    Min,
    Max,
}

/// The kind of a single field-level failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    RequiredFieldMissing,
    TypeCoercionFailed,
    BoundViolation { bound: Bound, limit: f64 },
    PatternMismatch,
    InvalidChoice,
    UnresolvedReference,
    UnsavedReferenceUsedAsKey,
    ContainerTypeMismatch,
    ContainerLengthExceeded { limit: usize },
    Validator,
}

/// A structured field error: what went wrong and a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    #[serde(flatten)]
    pub kind: ErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        FieldError {
            kind,
            message: message.into(),
        }
    }

    pub fn required() -> Self {
        Self::new(ErrorKind::RequiredFieldMissing, "Required Field")
    }

    pub fn coercion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeCoercionFailed, message)
    }

    pub fn min(limit: f64) -> Self {
        Self::new(
            ErrorKind::BoundViolation {
                bound: Bound::Min,
                limit,
            },
            format!("must be greater than {limit}"),
        )
    }

    pub fn max(limit: f64) -> Self {
        Self::new(
            ErrorKind::BoundViolation {
                bound: Bound::Max,
                limit,
            },
            format!("must be less than {limit}"),
        )
    }

    /// Validator hooks use this to reject a value with their own message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validator, message)
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FieldError {}

#[derive(Error, Debug)]
pub enum DocMapError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{path}: {source}")]
    Field {
        path: String,
        #[source]
        source: FieldError,
    },

    #[error("Validation failed: {}", format_report(.0))]
    AggregateValidationFailed(ErrorReport),

    #[error("Unknown document type: {0}")]
    UnknownType(String),

    #[error("Unknown field '{field}' on {owner}")]
    UnknownField { owner: String, field: String },

    #[error("Unresolved reference: {0}")]
    UnresolvedReference(String),

    #[error("Unsaved reference: {0}")]
    UnsavedReferenceUsedAsKey(String),

    #[error("Document has not been saved: {0}")]
    NotPersisted(String),

    #[error("Document was removed: {collection}/{id}")]
    EntityRemoved { collection: String, id: String },

    #[error("Storage error: {0}")]
    StorageOperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl DocMapError {
    pub fn field(path: impl Into<String>, source: FieldError) -> Self {
        DocMapError::Field {
            path: path.into(),
            source,
        }
    }

    /// The field error behind a direct assignment failure, if that is what this is.
    pub fn field_error(&self) -> Option<&FieldError> {
        match self {
            DocMapError::Field { source, .. } => Some(source),
            _ => None,
        }
    }

    /// The per-path report carried by an aggregate validation failure.
    pub fn report(&self) -> Option<&ErrorReport> {
        match self {
            DocMapError::AggregateValidationFailed(report) => Some(report),
            _ => None,
        }
    }
}

fn format_report(report: &ErrorReport) -> String {
    report
        .iter()
        .map(|(path, err)| format!("{path}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, DocMapError>;
