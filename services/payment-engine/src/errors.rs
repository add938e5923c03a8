use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use security::VaultError;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No landlord is routed for short code {0}")]
    UnknownShortCode(String),

    #[error("Receipt {0} has already been recorded")]
    DuplicateReceipt(String),

    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("Gateway returned HTTP {status}: {body}")]
    Gateway { status: u16, body: String },

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Credential integrity error: {0}")]
    Integrity(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Payment {0} is already assigned")]
    AlreadyAssigned(i64),

    #[error("Short code {0} is registered to another landlord")]
    ShortCodeTaken(String),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<VaultError> for PaymentError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::Integrity(msg) => PaymentError::Integrity(msg),
            other => PaymentError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for PaymentError {
    fn from(err: validator::ValidationErrors) -> Self {
        PaymentError::Validation(err.to_string())
    }
}

impl ResponseError for PaymentError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = match self {
            // Driver messages can leak schema details
            PaymentError::Persistence(_) => "Database error".to_string(),
            other => other.to_string(),
        };

        HttpResponse::build(status_code).json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": error_message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::UnknownShortCode(_) => StatusCode::NOT_FOUND,
            PaymentError::DuplicateReceipt(_) => StatusCode::CONFLICT,
            PaymentError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PaymentError::Gateway { .. } => StatusCode::BAD_GATEWAY,
            PaymentError::GatewayUnavailable(_) => StatusCode::GATEWAY_TIMEOUT,
            PaymentError::Integrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::AlreadyAssigned(_) => StatusCode::CONFLICT,
            PaymentError::ShortCodeTaken(_) => StatusCode::CONFLICT,
            PaymentError::Unauthorized => StatusCode::UNAUTHORIZED,
            PaymentError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl PaymentError {
    pub fn error_type(&self) -> &str {
        match self {
            PaymentError::Validation(_) => "validation_error",
            PaymentError::UnknownShortCode(_) => "routing_error",
            PaymentError::DuplicateReceipt(_) => "duplicate_error",
            PaymentError::Persistence(_) => "persistence_error",
            PaymentError::Gateway { .. } => "gateway_error",
            PaymentError::GatewayUnavailable(_) => "gateway_unavailable",
            PaymentError::Integrity(_) => "integrity_error",
            PaymentError::NotFound(_) => "not_found",
            PaymentError::AlreadyAssigned(_) => "already_assigned",
            PaymentError::ShortCodeTaken(_) => "short_code_taken",
            PaymentError::Unauthorized => "unauthorized",
            PaymentError::Timeout(_) => "timeout",
            PaymentError::Internal(_) => "internal_error",
        }
    }

    /// Transport-level failures that a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentError::GatewayUnavailable(_) | PaymentError::Timeout(_)
        )
    }
}
