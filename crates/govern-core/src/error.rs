//! Governance error types

use thiserror::Error;

/// Result alias used across the engine
pub type Result<T> = std::result::Result<T, GovernanceError>;

/// Governance error type
#[derive(Debug, Error)]
pub enum GovernanceError {
    /// A referenced row (milestone instance, planning, entry, ...) is absent or soft-deleted
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// The operation is not allowed in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Copying a dependent table failed structurally
    #[error("remap of {table} failed: {source}")]
    RemapFailure {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl GovernanceError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        GovernanceError::NotFound { entity, id }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        GovernanceError::InvalidState(message.into())
    }

    /// Wrap a storage error raised while copying `table`
    pub(crate) fn remap(table: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| GovernanceError::RemapFailure { table, source }
    }

    /// True for errors that leave the store untouched because the request was rejected
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            GovernanceError::NotFound { .. } | GovernanceError::InvalidState(_)
        )
    }
}
