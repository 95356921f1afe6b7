//! Domain-specific error types for ibr-shape.
//!
//! Uses `thiserror` for ergonomic error definitions that integrate
//! with the broader `anyhow` error handling strategy.

use thiserror::Error;

/// Errors raised while parsing positional packet records.
///
/// Any of these aborts the ingestion run: once a record violates the
/// positional schema the rest of the file cannot be trusted either.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{origin}:{line}: missing field {index} ({name})")]
    MissingField {
        origin: String,
        line: usize,
        index: usize,
        name: &'static str,
    },

    #[error("{origin}:{line}: field {index} ({name}) is not valid: {value:?}")]
    InvalidField {
        origin: String,
        line: usize,
        index: usize,
        name: &'static str,
        value: String,
    },

    #[error("{origin}: failed to read input: {source}")]
    Io {
        origin: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while reading a summary table.
#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("summary table is empty (no header)")]
    MissingHeader,

    #[error("unsupported summary layout: expected 12 or 13 columns, got {0}")]
    UnsupportedLayout(usize),

    #[error("line {line}: {reason}")]
    Row { line: usize, reason: String },

    #[error("unknown summary column: {0}")]
    UnknownColumn(String),

    #[error("failed to read summary table: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract violations on a single streaming feature.
#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("feature '{descriptor}' read before its first update")]
    Uninitialized { descriptor: &'static str },

    #[error("feature '{descriptor}' has no history to evict")]
    EmptyHistory { descriptor: &'static str },

    #[error("feature '{descriptor}' history has {actual} states but {expected} time points were given")]
    LengthMismatch {
        descriptor: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Errors that can occur while building distance matrices or clustering.
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Insufficient data for {context} (need at least {required}, got {actual})")]
    InsufficientData {
        context: &'static str,
        required: usize,
        actual: usize,
    },

    #[error("Invalid clustering parameters: {0}")]
    InvalidParameters(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Numerical computation failed: {0}")]
    Numeric(String),

    #[error(transparent)]
    Feature(#[from] FeatureError),
}

/// Result type alias using anyhow for application-level error handling.
pub type Result<T> = anyhow::Result<T>;
