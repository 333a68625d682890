//! Error taxonomy for the statistics engine (spec §7).
//!
//! Validation errors are reported synchronously to the submitter and carry
//! enough detail to act on; duplicate-insert, transient, schema, and bug
//! class errors are handled internally by the task queue worker (see
//! [`crate::task_queue`]) and mostly surface only through logs, matching the
//! original's distinction between "loud" write failures and best-effort
//! background degradation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// Invalid statistic_id, invalid source, naive timestamp, misaligned
    /// timestamp, or unconvertible units. Nothing is written.
    #[error("validation error: {0}")]
    Validation(String),

    /// A unique-constraint violation on (metadata_id, start_ts) or
    /// statistic_id was caught by the session-scoped filter. The write is
    /// idempotent in intent, so this is not retried.
    #[error("duplicate insert: {0}")]
    Duplicate(String),

    /// A transient database error (lock contention, busy, I/O) that the
    /// retry wrapper may retry.
    #[error("transient database error: {0}")]
    Transient(#[source] rusqlite::Error),

    /// Schema validation found a dialect/precision mismatch that could not
    /// be corrected automatically. The engine remains functional but
    /// degraded for the affected table/column.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// An unexpected internal error (bug-class). The session is not
    /// committed; the caller should log with a traceback and move on.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for RecorderError {
    fn from(err: rusqlite::Error) -> Self {
        if is_unique_violation(&err) {
            RecorderError::Duplicate(err.to_string())
        } else if is_transient(&err) {
            RecorderError::Transient(err)
        } else {
            RecorderError::Internal(err.to_string())
        }
    }
}

/// Recognize SQLite's unique-violation signature (spec §7b). PostgreSQL
/// SQLSTATE 23505 and MySQL error 1062 are the equivalent signatures for
/// those dialects; this crate targets SQLite only (see DESIGN.md), but the
/// classification point is kept dialect-shaped so a future backend only
/// needs to extend this function.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(msg)) => {
            msg.contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Recognize SQLite errors worth retrying: lock contention and busy-file
/// conditions. Constraint violations and malformed SQL are not transient.
pub fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::OperationInterrupted
            )
    )
}

pub type Result<T> = std::result::Result<T, RecorderError>;
