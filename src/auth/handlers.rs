use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            AuthResponse, FederatedAuthRequest, ForgotPasswordRequest, LoginRequest,
            MessageResponse, PublicUser, RegisterRequest, ResetPasswordRequest,
        },
        flow, reconcile,
        services::{is_valid_email, AuthUser, JwtKeys},
    },
    error::AuthError,
    state::AppState,
};

const MIN_PASSWORD_LEN: usize = 8;

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/google", post(federated_google))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    payload.email = payload.email.trim().to_lowercase();

    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }

    let user = reconcile::register_local(state.store.as_ref(), &payload.email, &payload.password)
        .await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_session(user.id)?;

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(Json(AuthResponse {
        success: true,
        token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let user =
        reconcile::authenticate_local(state.store.as_ref(), &payload.email, &payload.password)
            .await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys.sign_session(user.id)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(AuthResponse {
        success: true,
        token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn federated_google(
    State(state): State<AppState>,
    Json(payload): Json<FederatedAuthRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let (user, token) = flow::run_federated(&state, payload.code.as_deref()).await?;

    Ok(Json(AuthResponse {
        success: true,
        token,
        user: PublicUser::from(&user),
    }))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    match reconcile::request_password_reset(state.store.as_ref(), &payload.email).await? {
        Some((user, token)) => {
            if let Err(e) = state.notifier.send_reset(&user.email, &token).await {
                // Delivery problems stay internal; the response shape below
                // must not reveal whether the account exists.
                error!(error = %e, user_id = %user.id, "reset notification failed");
            }
        }
        None => {
            info!("reset requested for unknown email");
        }
    }

    Ok(Json(MessageResponse {
        success: true,
        message: "If that email exists, a reset link has been sent".to_string(),
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    if payload.password.len() < MIN_PASSWORD_LEN {
        warn!("password too short");
        return Err(AuthError::Validation("Password too short".into()));
    }

    reconcile::complete_password_reset(state.store.as_ref(), &payload.token, &payload.password)
        .await?;

    Ok(Json(MessageResponse {
        success: true,
        message: "Password has been reset".to_string(),
    }))
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PublicUser>, AuthError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    if !user.is_active {
        return Err(AuthError::AccountInactive);
    }
    Ok(Json(PublicUser::from(&user)))
}


#[cfg(test)]
mod local_tests {
    use super::*;
    use crate::state::AppState;

    #[tokio::test]
    async fn register_then_login_roundtrip() {
        let state = AppState::fake();

        let registered = register(
            State(state.clone()),
            Json(RegisterRequest {
                email: " User@Example.COM ".to_string(),
                password: "hunter2hunter2".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(registered.user.email, "user@example.com");

        let logged_in = login(
            State(state),
            Json(LoginRequest {
                email: "user@example.com".to_string(),
                password: "hunter2hunter2".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);
        assert!(logged_in.success);
    }

    #[tokio::test]
    async fn register_rejects_bad_input() {
        let state = AppState::fake();

        let err = register(
            State(state.clone()),
            Json(RegisterRequest {
                email: "not-an-email".to_string(),
                password: "hunter2hunter2".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));

        let err = register(
            State(state),
            Json(RegisterRequest {
                email: "a@x.com".to_string(),
                password: "short".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn forgot_password_always_reports_success() {
        let state = AppState::fake();

        register(
            State(state.clone()),
            Json(RegisterRequest {
                email: "a@x.com".to_string(),
                password: "hunter2hunter2".to_string(),
            }),
        )
        .await
        .unwrap();

        let known = forgot_password(
            State(state.clone()),
            Json(ForgotPasswordRequest {
                email: "a@x.com".to_string(),
            }),
        )
        .await
        .unwrap();
        let unknown = forgot_password(
            State(state),
            Json(ForgotPasswordRequest {
                email: "nobody@x.com".to_string(),
            }),
        )
        .await
        .unwrap();

        assert!(known.success && unknown.success);
        assert_eq!(known.message, unknown.message);
    }
}
