//! Drives the federated sign-in sequence: code exchange, identity fetch,
//! reconciliation, session issuance.
//!
//! No step is retried: the authorization code and the provider access token
//! are both single-use or time-boxed, so a mid-flow failure is terminal and
//! the caller restarts with a fresh code.

use axum::extract::FromRef;
use tracing::info;

use crate::auth::reconcile;
use crate::auth::services::JwtKeys;
use crate::error::AuthError;
use crate::state::AppState;
use crate::store::User;

pub async fn run_federated(state: &AppState, code: Option<&str>) -> Result<(User, String), AuthError> {
    let code = match code {
        Some(c) if !c.trim().is_empty() => c,
        _ => return Err(AuthError::MissingCode),
    };

    let provider_token = state.provider.exchange_code(code).await?;
    let identity = state.provider.fetch_identity(&provider_token).await?;
    let user = reconcile::reconcile_federated(state.store.as_ref(), &identity).await?;

    let keys = JwtKeys::from_ref(state);
    let session = keys.sign_session(user.id)?;

    info!(user_id = %user.id, provider = %identity.provider, "federated sign-in completed");
    Ok((user, session))
}
