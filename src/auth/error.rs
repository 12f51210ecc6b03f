//! Error taxonomy for authentication, two-factor and delegation flows.
//!
//! Every variant is terminal for the request that produced it; nothing here is
//! retried automatically. `TokenExpired` and `InvalidToken` stay distinct for
//! diagnostics but both surface as `401 Unauthorized`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("platform users must use delegated access to enter a tenant")]
    PlatformUserDirectLoginBlocked,
    #[error("invalid tenant")]
    InvalidTenant,
    #[error("invalid two-factor code")]
    InvalidTwoFactorCode,
    #[error("backup code already used")]
    BackupCodeAlreadyUsed,
    #[error("two-factor session expired")]
    TwoFactorSessionExpired,
    #[error("two-factor session not found")]
    SessionNotFound,
    #[error("too many verification attempts")]
    TooManyAttempts,
    #[error("unsupported two-factor method: {0}")]
    UnsupportedMethod(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),
    #[error("delegated session expired")]
    DelegationSessionExpired,
    #[error("tenant context mismatch")]
    TenantContextMismatch,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    /// Stable machine-readable code returned to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::PlatformUserDirectLoginBlocked => "platform_user_direct_login_blocked",
            Self::InvalidTenant => "invalid_tenant",
            Self::InvalidTwoFactorCode => "invalid_two_factor_code",
            Self::BackupCodeAlreadyUsed => "backup_code_already_used",
            Self::TwoFactorSessionExpired => "two_factor_session_expired",
            Self::SessionNotFound => "session_not_found",
            Self::TooManyAttempts => "too_many_attempts",
            Self::UnsupportedMethod(_) => "unsupported_method",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            // Expired and invalid tokens share the wire code on purpose; the
            // variant itself is kept for logs.
            Self::TokenExpired | Self::InvalidToken(_) => "unauthorized",
            Self::DelegationSessionExpired => "session_expired",
            Self::TenantContextMismatch => "tenant_context_mismatch",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::PlatformUserDirectLoginBlocked
            | Self::InvalidTwoFactorCode
            | Self::BackupCodeAlreadyUsed
            | Self::TwoFactorSessionExpired
            | Self::SessionNotFound
            | Self::TokenExpired
            | Self::InvalidToken(_)
            | Self::DelegationSessionExpired => StatusCode::UNAUTHORIZED,
            Self::InvalidTenant | Self::UnsupportedMethod(_) | Self::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden(_) | Self::TenantContextMismatch => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to the caller.
    fn public_message(&self) -> String {
        match self {
            Self::TokenExpired | Self::InvalidToken(_) => "unauthorized".to_string(),
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.code(),
            "message": self.public_message(),
        }));
        (status, body).into_response()
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
