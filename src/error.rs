//! Error types for docflow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input: empty, negative, or whitespace-only.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced entity is absent. Includes "no such transition".
    #[error("not found: {0}")]
    NotFound(String),

    #[error("group {child} cannot be added under {parent}: the hierarchy would contain a cycle")]
    Cycle {
        parent: crate::model::GroupId,
        child: crate::model::GroupId,
    },

    /// The action is not valid for the document's current state.
    #[error("action {action} is not applicable to document {document} in its current state")]
    RejectedAction {
        document: crate::model::DocumentId,
        action: crate::model::DocActionId,
    },

    /// Authorization denied. Deliberately carries no detail.
    #[error("access denied")]
    Unauthorized,

    /// The document moved on since it was read; retry from the start.
    #[error("document {document} was modified concurrently")]
    ConcurrentModification {
        document: crate::model::DocumentId,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// SQLite primary result codes that signal lock contention.
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

impl Error {
    /// Translate a failed write into the domain taxonomy.
    ///
    /// Unique-constraint violations become [`Error::Conflict`] and foreign-key
    /// violations [`Error::NotFound`]; anything else stays a storage error.
    pub(crate) fn on_write(err: sqlx::Error, what: impl std::fmt::Display) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if db.is_unique_violation() {
                return Error::Conflict(format!("{what} already exists"));
            }
            if db.is_foreign_key_violation() {
                return Error::NotFound(format!("{what} references an unknown entity"));
            }
        }
        Error::Storage(err)
    }

    /// Whether the caller may retry the whole operation from the start.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConcurrentModification { .. } => true,
            Error::Storage(sqlx::Error::PoolTimedOut) => true,
            Error::Storage(sqlx::Error::Database(db)) => db.code().is_some_and(|code| {
                // Extended codes carry the primary code in the low byte.
                code.parse::<i32>()
                    .map(|c| {
                        let primary = (c & 0xff).to_string();
                        primary == SQLITE_BUSY || primary == SQLITE_LOCKED
                    })
                    .unwrap_or(false)
            }),
            _ => false,
        }
    }

    /// Whether this is a normal "not allowed" outcome rather than a fault.
    pub fn is_denial(&self) -> bool {
        matches!(self, Error::RejectedAction { .. } | Error::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DocActionId, DocumentId};

    #[test]
    fn unauthorized_message_leaks_nothing() {
        assert_eq!(Error::Unauthorized.to_string(), "access denied");
    }

    #[test]
    fn denials_and_retries_are_classified() {
        let rejected = Error::RejectedAction {
            document: DocumentId(42),
            action: DocActionId(7),
        };
        assert!(rejected.is_denial());
        assert!(!rejected.is_retryable());

        let raced = Error::ConcurrentModification {
            document: DocumentId(42),
        };
        assert!(raced.is_retryable());
        assert!(!raced.is_denial());

        assert!(Error::Storage(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!Error::Validation("x".into()).is_retryable());
    }
}
