use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Signature mismatch or unresolvable account. Deliberately one
    /// variant with one message: the provider must not learn which check
    /// failed.
    #[error("webhook rejected")]
    Rejected,

    #[error(transparent)]
    Store(#[from] courant_store::StoreError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
