use thiserror::Error;

/// Failures surfaced by the ledger, registry and reporting operations.
#[derive(Debug, Error)]
pub enum CaisseError {
    /// Rejected input. Raised before the store is touched.
    #[error("{0}")]
    Validation(String),

    #[error("No {entity} found with id '{id}'")]
    NotFound { entity: &'static str, id: String },

    #[error("Store failure: {0}")]
    Store(#[from] rusqlite::Error),
}

impl CaisseError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

pub type CaisseResult<T> = Result<T, CaisseError>;
