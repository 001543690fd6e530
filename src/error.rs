use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the HTTP surface
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Refund settlement is disabled: no custodial signer configured")]
    SettlementDisabled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while talking to the ledger or settling a refund.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Ledger entry not found: {0}")]
    NotFound(String),

    #[error("Could not resolve {target} after {attempts} attempt(s): {reason}")]
    PermanentResolution {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Unexpected ledger response: {0}")]
    InvalidResponse(String),

    #[error("Recent blockhash expired before the transaction landed")]
    AnchorExpired,

    #[error("Submission rejected: {message}")]
    SubmissionRejected { message: String, logs: Vec<String> },

    #[error("Transaction {signature} not confirmed in time; outcome unknown")]
    ConfirmationTimeout { signature: String },

    #[error("Insufficient custodial balance: required {required} lamports, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("Invalid refund: {0}")]
    InvalidRefund(String),

    #[error("Transaction {0} is already refunded")]
    AlreadyRefunded(String),

    #[error("A refund for {0} is already in progress")]
    DuplicateRefund(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Operation cancelled")]
    Cancelled,
}

/// Serializable discriminant of [`LedgerError`], surfaced in refund results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    TransientNetwork,
    NotFound,
    PermanentResolution,
    InvalidAccount,
    InvalidResponse,
    AnchorExpired,
    SubmissionRejected,
    ConfirmationTimeout,
    InsufficientFunds,
    InvalidRefund,
    AlreadyRefunded,
    DuplicateRefund,
    Signer,
    Cancelled,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::PermanentResolution { .. } => ErrorKind::PermanentResolution,
            LedgerError::InvalidAccount(_) => ErrorKind::InvalidAccount,
            LedgerError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            LedgerError::AnchorExpired => ErrorKind::AnchorExpired,
            LedgerError::SubmissionRejected { .. } => ErrorKind::SubmissionRejected,
            LedgerError::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InvalidRefund(_) => ErrorKind::InvalidRefund,
            LedgerError::AlreadyRefunded(_) => ErrorKind::AlreadyRefunded,
            LedgerError::DuplicateRefund(_) => ErrorKind::DuplicateRefund,
            LedgerError::Signer(_) => ErrorKind::Signer,
            LedgerError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the sync engine may try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::TransientNetwork(_) | LedgerError::NotFound(_)
        )
    }

    pub fn logs(&self) -> &[String] {
        match self {
            LedgerError::SubmissionRejected { logs, .. } => logs,
            _ => &[],
        }
    }
}

impl ErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::TransientNetwork => "TRANSIENT_NETWORK",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::PermanentResolution => "PERMANENT_RESOLUTION",
            ErrorKind::InvalidAccount => "INVALID_ACCOUNT",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::AnchorExpired => "ANCHOR_EXPIRED",
            ErrorKind::SubmissionRejected => "SUBMISSION_REJECTED",
            ErrorKind::ConfirmationTimeout => "CONFIRMATION_TIMEOUT",
            ErrorKind::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ErrorKind::InvalidRefund => "INVALID_REFUND",
            ErrorKind::AlreadyRefunded => "ALREADY_REFUNDED",
            ErrorKind::DuplicateRefund => "DUPLICATE_REFUND",
            ErrorKind::Signer => "SIGNER",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// HTTP status used when this kind reaches the API boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::TransientNetwork | ErrorKind::PermanentResolution => StatusCode::BAD_GATEWAY,
            ErrorKind::InvalidResponse => StatusCode::BAD_GATEWAY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidAccount | ErrorKind::InvalidRefund => StatusCode::BAD_REQUEST,
            ErrorKind::AnchorExpired
            | ErrorKind::SubmissionRejected
            | ErrorKind::InsufficientFunds => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ConfirmationTimeout => StatusCode::ACCEPTED,
            ErrorKind::AlreadyRefunded | ErrorKind::DuplicateRefund => StatusCode::CONFLICT,
            ErrorKind::Signer => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Ledger(err) => {
                let kind = err.kind();
                let details = match &err {
                    LedgerError::SubmissionRejected { logs, .. } => {
                        Some(serde_json::json!({ "logs": logs }))
                    }
                    LedgerError::ConfirmationTimeout { signature } => {
                        Some(serde_json::json!({ "signature": signature }))
                    }
                    LedgerError::InsufficientFunds { required, available } => Some(
                        serde_json::json!({ "required": required, "available": available }),
                    ),
                    _ => None,
                };
                (kind.status_code(), kind.as_code(), err.to_string(), details)
            }
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
                None,
            ),
            AppError::InvalidInput(msg) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                msg,
                None,
            ),
            AppError::SettlementDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SETTLEMENT_DISABLED",
                "Refunds are disabled: no custodial signer configured".to_string(),
                None,
            ),
            AppError::Config(_) | AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(error: config::ConfigError) -> Self {
        AppError::Config(error.to_string())
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for ledger and settlement operations
pub type LedgerResult<T> = Result<T, LedgerError>;
