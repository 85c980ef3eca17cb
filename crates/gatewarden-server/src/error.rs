use axum::http::StatusCode;

use gatewarden_core::retrieve::RetrieveError;
use gatewarden_storage::StorageError;

use crate::ledger::LedgerError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("policy engine unavailable")]
    PolicyUnavailable,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::PolicyUnavailable | ApiError::StoreUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 503s are safe to retry; nothing else is.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ApiError::PolicyUnavailable | ApiError::StoreUnavailable(_)
        )
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(msg) => ApiError::StoreUnavailable(msg),
            StorageError::Conflict(msg) | StorageError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<RetrieveError> for ApiError {
    fn from(err: RetrieveError) -> Self {
        match err {
            RetrieveError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            RetrieveError::Store(msg) => ApiError::StoreUnavailable(msg),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Storage(StorageError::Unavailable(msg)) => ApiError::StoreUnavailable(msg),
            LedgerError::Storage(other) => ApiError::Internal(other.to_string()),
        }
    }
}
