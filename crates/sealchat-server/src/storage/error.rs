//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Identity or session not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Identity or session already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Session version conflict
    ///
    /// Another writer committed a successor state since this one was loaded.
    /// Committing anyway would fork the ratchet, so the write is refused and
    /// the caller has to reload and redo the operation.
    #[error("version conflict: expected {expected}, got {got}")]
    Conflict {
        /// Version currently stored
        expected: u64,
        /// Version the writer loaded
        got: u64,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Returns true if reloading and retrying may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Io(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_transient() {
        assert!(StoreError::Conflict { expected: 2, got: 1 }.is_transient());
        assert!(StoreError::Io("disk full".to_string()).is_transient());
    }

    #[test]
    fn lookup_errors_are_permanent() {
        assert!(!StoreError::NotFound("alice".to_string()).is_transient());
        assert!(!StoreError::AlreadyExists("alice".to_string()).is_transient());
        assert!(!StoreError::Serialization("bad cbor".to_string()).is_transient());
    }
}
