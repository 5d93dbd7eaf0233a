use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Domain error for the authentication core.
///
/// Every variant carries a stable machine-readable code and maps to one HTTP
/// status. Internal detail stays in operator logs; the HTTP body only ever
/// contains the sanitized message.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Authorization code is required")]
    MissingCode,

    /// The provider refused the token exchange. Authorization codes are
    /// single-use, so this is terminal for the flow and never retried.
    #[error("Failed to exchange authorization code")]
    ProviderExchangeFailed { status: u16, body: String },

    #[error("Failed to fetch user profile from provider")]
    IdentityFetchFailed(String),

    /// A uniqueness violation that account linking could not resolve.
    #[error("{0}")]
    ReconciliationConflict(String),

    #[error("Account is deactivated")]
    AccountInactive,

    /// Deliberately identical for unknown email and wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid or expired reset token")]
    ResetTokenInvalid,

    #[error("{0}")]
    Validation(String),

    /// Timeout or connection failure talking to the provider; the caller may
    /// restart the whole flow with a fresh authorization code.
    #[error("Temporary failure contacting the identity provider")]
    Transient(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::MissingCode => StatusCode::BAD_REQUEST,
            AuthError::ProviderExchangeFailed { .. } => StatusCode::BAD_REQUEST,
            AuthError::IdentityFetchFailed(_) => StatusCode::BAD_GATEWAY,
            AuthError::ReconciliationConflict(_) => StatusCode::CONFLICT,
            AuthError::AccountInactive => StatusCode::FORBIDDEN,
            AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::ResetTokenInvalid => StatusCode::BAD_REQUEST,
            AuthError::Validation(_) => StatusCode::BAD_REQUEST,
            AuthError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCode => "MISSING_CODE",
            AuthError::ProviderExchangeFailed { .. } => "PROVIDER_EXCHANGE_FAILED",
            AuthError::IdentityFetchFailed(_) => "IDENTITY_FETCH_FAILED",
            AuthError::ReconciliationConflict(_) => "RECONCILIATION_CONFLICT",
            AuthError::AccountInactive => "ACCOUNT_INACTIVE",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::ResetTokenInvalid => "RESET_TOKEN_INVALID",
            AuthError::Validation(_) => "VALIDATION_ERROR",
            AuthError::Transient(_) => "TRANSIENT_INFRASTRUCTURE_ERROR",
            AuthError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            AuthError::ProviderExchangeFailed { status, body } => {
                error!(provider_status = status, provider_body = %body, "token exchange rejected");
            }
            AuthError::IdentityFetchFailed(detail) => {
                error!(detail = %detail, "userinfo fetch failed");
            }
            AuthError::Transient(detail) => {
                error!(detail = %detail, "transient provider failure");
            }
            AuthError::Internal(e) => {
                error!(error = %e, "internal error");
            }
            _ => {}
        }

        let body = json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // PostgreSQL unique constraint violation
            if db_err.code().as_deref() == Some("23505") {
                return AuthError::ReconciliationConflict(
                    "Account already exists for that identity".to_string(),
                );
            }
        }
        AuthError::Internal(err.into())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AuthError::Transient(err.to_string())
        } else {
            AuthError::Internal(err.into())
        }
    }
}
