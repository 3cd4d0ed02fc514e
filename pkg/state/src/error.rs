use thiserror::Error;

/// Error taxonomy of the object store. Callers branch on it: conflicts
/// are retried locally, not-found is often benign, everything else is
/// surfaced for re-queue.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object '{0}' not found")]
    NotFound(String),

    #[error("object '{0}' already exists")]
    AlreadyExists(String),

    #[error("conflict writing '{name}': submitted version {submitted}, stored version {stored}")]
    Conflict {
        name: String,
        submitted: u64,
        stored: u64,
    },

    #[error("store i/o failed: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
