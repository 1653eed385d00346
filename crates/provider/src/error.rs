use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected the call and returned its error envelope.
    #[error("provider rejected request ({}): {message}", code.as_deref().unwrap_or("no code"))]
    Api {
        code: Option<String>,
        message: String,
    },

    #[error("provider transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered 2xx but the body was not the expected shape.
    #[error("unexpected provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// The provider error code, when the failure carries one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
