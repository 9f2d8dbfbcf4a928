use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::error::{QrError, DECRYPTION_FAILED_MESSAGE};

const INTERNAL_MESSAGE: &str = "Failed to generate QR code";
const CIPHER_MESSAGE: &str = "Failed to encrypt payload";

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

impl From<QrError> for ApiError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::InvalidInput(reason) => {
                warn!("Rejected request: {}", reason);
                ApiError::bad_request(reason)
            }
            QrError::Decryption => ApiError::bad_request(DECRYPTION_FAILED_MESSAGE),
            QrError::Rendering(cause) => {
                error!("QR rendering failed: {}", cause);
                ApiError::internal(INTERNAL_MESSAGE)
            }
            QrError::Cipher(cause) => {
                error!("Payload encryption failed: {}", cause);
                ApiError::internal(CIPHER_MESSAGE)
            }
            QrError::Io(e) => {
                error!("I/O error while handling request: {}", e);
                ApiError::internal(INTERNAL_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_keeps_reason() {
        let err: ApiError = QrError::invalid("Payment email required").into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Payment email required");
    }

    #[test]
    fn rendering_failure_hides_cause() {
        let err: ApiError = QrError::rendering("png encoder exploded").into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("exploded"));
    }

    #[test]
    fn cipher_failure_is_reported_as_encryption() {
        let err: ApiError = QrError::cipher("key derivation: salt too short").into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, CIPHER_MESSAGE);
    }

    #[test]
    fn decryption_is_generic() {
        let err: ApiError = QrError::Decryption.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, DECRYPTION_FAILED_MESSAGE);
    }
}
