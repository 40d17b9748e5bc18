//! Repository Errors
//!
//! Error types for credit persistence.

use crate::domain::{DomainError, FaultKind};

/// Errors that can occur in the credit store
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint on the credit number rejected the insert
    #[error("Credit number already stored: {credit_number}")]
    DuplicateCreditNumber { credit_number: String },

    /// The database rejected a value the domain accepted (SQLSTATE class 22)
    #[error("Value rejected by the store: {0}")]
    InvalidData(String),

    /// The operation was cancelled before it finished
    #[error("Repository operation cancelled")]
    Cancelled,

    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row no longer satisfies the value object rules
    #[error("Corrupt credit row: {0}")]
    CorruptRow(#[from] DomainError),
}

impl RepositoryError {
    pub fn kind(&self) -> FaultKind {
        match self {
            RepositoryError::Database(_)
            | RepositoryError::Cancelled
            | RepositoryError::Unavailable(_) => FaultKind::Transient,
            RepositoryError::DuplicateCreditNumber { .. } => FaultKind::Duplicate,
            RepositoryError::InvalidData(_) => FaultKind::Validation,
            RepositoryError::CorruptRow(_) => FaultKind::Fatal,
        }
    }

    /// Check if this error is the unique-constraint backstop firing
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RepositoryError::DuplicateCreditNumber { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            RepositoryError::InvalidData("numeric field overflow".into()).kind(),
            FaultKind::Validation
        );
        assert_eq!(
            RepositoryError::Database(sqlx::Error::PoolTimedOut).kind(),
            FaultKind::Transient
        );
        assert_eq!(RepositoryError::Cancelled.kind(), FaultKind::Transient);

        let duplicate = RepositoryError::DuplicateCreditNumber {
            credit_number: "123456".into(),
        };
        assert_eq!(duplicate.kind(), FaultKind::Duplicate);
        assert!(duplicate.is_duplicate());
        assert!(!RepositoryError::Cancelled.is_duplicate());
    }
}
