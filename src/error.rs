//! Error types for report execution

use thiserror::Error;

/// Failures that abort a single section (never a whole report).
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("row fetch failed: {0}")]
    Fetch(String),
    #[error("row store error: {0}")]
    Store(#[from] surrealdb::Error),
    #[error("section execution was cancelled")]
    Cancelled,
    #[error("section timed out after {seconds}s")]
    Timeout { seconds: u64 },
    #[error("unsupported section type '{kind}': {reason}")]
    UnsupportedSection { kind: String, reason: String },
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("invalid date '{value}'")]
    InvalidDate { value: String },
    #[error("section task failed: {0}")]
    Task(String),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Returns the identifier unchanged when it is safe to place in query text.
pub fn checked_identifier(name: &str) -> ReportResult<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(name)
    } else {
        Err(ReportError::InvalidIdentifier(name.to_string()))
    }
}
