use thiserror::Error;

/// Message shown for every decryption failure, whatever the cause.
pub const DECRYPTION_FAILED_MESSAGE: &str = "wrong password or corrupt data";

#[derive(Debug, Error)]
pub enum QrError {
    #[error("{0}")]
    InvalidInput(String),

    /// Bad password, malformed token and non-UTF-8 plaintext all collapse here.
    #[error("wrong password or corrupt data")]
    Decryption,

    #[error("rendering failed: {0}")]
    Rendering(String),

    #[error("encryption failed: {0}")]
    Cipher(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl QrError {
    pub fn invalid(message: impl Into<String>) -> Self {
        QrError::InvalidInput(message.into())
    }

    pub fn rendering(message: impl ToString) -> Self {
        QrError::Rendering(message.to_string())
    }

    pub fn cipher(message: impl ToString) -> Self {
        QrError::Cipher(message.to_string())
    }
}

pub type QrResult<T> = Result<T, QrError>;
