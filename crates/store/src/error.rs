use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A row holds a value the schema does not allow (e.g. an unknown
    /// status tag written by a newer version).
    #[error("corrupt {column} value: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("{what} not found")]
    NotFound { what: &'static str },
}

pub type Result<T> = std::result::Result<T, StoreError>;
