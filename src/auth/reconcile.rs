//! Maps an incoming identity, federated or local, to exactly one user record.
//!
//! Federated lookup order: provider pair, then email (account linking), then
//! create. Automatic email-linking is gated on the provider having verified
//! the email, otherwise a federated sign-in could capture an existing local
//! account through an unverified address claim.

use rand::{distributions::Alphanumeric, Rng};
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::auth::password;
use crate::error::AuthError;
use crate::oauth::FederatedIdentity;
use crate::store::{NewUser, User, UserStore};

const RESET_TOKEN_LEN: usize = 48;
const RESET_TOKEN_TTL: Duration = Duration::hours(1);

/// Argon2 is CPU-bound; keep it off the request-serving threads.
async fn hash_blocking(plain: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || password::hash_password(&plain))
        .await
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("hash task failed: {e}")))?
        .map_err(AuthError::Internal)
}

async fn verify_blocking(plain: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || password::verify_password(&plain, &hash))
        .await
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("verify task failed: {e}")))
}

/// Resolve a federated identity to a local user.
pub async fn reconcile_federated(
    store: &dyn UserStore,
    identity: &FederatedIdentity,
) -> Result<User, AuthError> {
    let email = identity.email.trim().to_lowercase();

    // Returning user: the provider pair already maps to an account.
    if let Some(user) = store
        .find_by_identity(&identity.provider, &identity.provider_user_id)
        .await?
    {
        if !user.is_active {
            warn!(user_id = %user.id, "federated login for inactive account");
            return Err(AuthError::AccountInactive);
        }
        let user = store
            .update_profile(
                user.id,
                identity.display_name.as_deref(),
                identity.avatar_url.as_deref(),
            )
            .await?;
        store.record_login(user.id).await?;
        return Ok(user);
    }

    // Same human, different sign-in method: link instead of duplicating.
    if let Some(user) = store.find_by_email(&email).await? {
        if !user.is_active {
            warn!(user_id = %user.id, "federated login for inactive account");
            return Err(AuthError::AccountInactive);
        }
        if !identity.email_verified {
            warn!(user_id = %user.id, provider = %identity.provider,
                "refusing to link unverified provider email to existing account");
            return Err(AuthError::ReconciliationConflict(
                "An account with this email already exists".to_string(),
            ));
        }
        if user.provider.is_some() {
            // The account already carries a different pair (the pair lookup
            // above missed); re-linking would orphan the original identity.
            warn!(user_id = %user.id, provider = %identity.provider,
                "refusing to replace an existing federated identity");
            return Err(AuthError::ReconciliationConflict(
                "An account with this email already exists".to_string(),
            ));
        }
        let user = store
            .link_identity(user.id, &identity.provider, &identity.provider_user_id)
            .await?;
        let user = store
            .update_profile(
                user.id,
                identity.display_name.as_deref(),
                identity.avatar_url.as_deref(),
            )
            .await?;
        store.record_login(user.id).await?;
        info!(user_id = %user.id, provider = %identity.provider, "federated identity linked");
        return Ok(user);
    }

    // First sign-in: create a federation-only account, no password.
    let user = store
        .create(NewUser {
            email,
            password_hash: None,
            provider: Some(identity.provider.clone()),
            provider_user_id: Some(identity.provider_user_id.clone()),
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
        })
        .await?;
    store.record_login(user.id).await?;
    info!(user_id = %user.id, provider = %identity.provider, "federated user created");
    Ok(user)
}

/// Create a local password account. Email must already be validated and
/// lowercased by the caller.
pub async fn register_local(
    store: &dyn UserStore,
    email: &str,
    plain_password: &str,
) -> Result<User, AuthError> {
    if store.find_by_email(email).await?.is_some() {
        return Err(AuthError::ReconciliationConflict(
            "Email already registered".to_string(),
        ));
    }
    let hash = hash_blocking(plain_password.to_string()).await?;
    let user = store
        .create(NewUser {
            email: email.to_string(),
            password_hash: Some(hash),
            provider: None,
            provider_user_id: None,
            display_name: None,
            avatar_url: None,
        })
        .await?;
    info!(user_id = %user.id, "local user registered");
    Ok(user)
}

/// Authenticate with email and password.
///
/// Unknown email and wrong password are indistinguishable to the caller:
/// both are [`AuthError::InvalidCredentials`].
pub async fn authenticate_local(
    store: &dyn UserStore,
    email: &str,
    plain_password: &str,
) -> Result<User, AuthError> {
    let email = email.trim().to_lowercase();
    let Some(user) = store.find_by_email(&email).await? else {
        return Err(AuthError::InvalidCredentials);
    };
    let Some(hash) = user.password_hash.clone() else {
        // Federation-only account; no password to check.
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_blocking(plain_password.to_string(), hash).await? {
        return Err(AuthError::InvalidCredentials);
    }
    if !user.is_active {
        warn!(user_id = %user.id, "login for inactive account");
        return Err(AuthError::AccountInactive);
    }
    store.record_login(user.id).await?;
    Ok(user)
}

fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Issue a single-use, time-bounded reset token.
///
/// Returns `None` for an unknown email; the HTTP layer reports the same
/// success shape either way so callers cannot probe which emails exist.
pub async fn request_password_reset(
    store: &dyn UserStore,
    email: &str,
) -> Result<Option<(User, String)>, AuthError> {
    let email = email.trim().to_lowercase();
    let Some(user) = store.find_by_email(&email).await? else {
        return Ok(None);
    };
    let token = generate_reset_token();
    let expires_at = OffsetDateTime::now_utc() + RESET_TOKEN_TTL;
    store.set_reset_token(user.id, &token, expires_at).await?;
    info!(user_id = %user.id, "reset token stored");
    Ok(Some((user, token)))
}

/// Consume a reset token and set the new password.
pub async fn complete_password_reset(
    store: &dyn UserStore,
    token: &str,
    new_password: &str,
) -> Result<(), AuthError> {
    let Some(user) = store.find_by_reset_token(token).await? else {
        return Err(AuthError::ResetTokenInvalid);
    };
    match user.reset_token_expires_at {
        Some(expiry) if expiry > OffsetDateTime::now_utc() => {}
        _ => return Err(AuthError::ResetTokenInvalid),
    }
    let hash = hash_blocking(new_password.to_string()).await?;
    store.complete_password_reset(user.id, &hash).await?;
    info!(user_id = %user.id, "password reset completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn identity(pid: &str, email: &str) -> FederatedIdentity {
        FederatedIdentity {
            provider: "google".to_string(),
            provider_user_id: pid.to_string(),
            email: email.to_string(),
            email_verified: true,
            display_name: Some("Ada".to_string()),
            avatar_url: Some("https://pic/ada.png".to_string()),
        }
    }

    #[tokio::test]
    async fn first_federated_login_creates_passwordless_user() {
        let store = MemStore::new();
        let user = reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");
        assert!(user.password_hash.is_none());
        assert_eq!(user.provider.as_deref(), Some("google"));
        assert_eq!(user.provider_user_id.as_deref(), Some("g-42"));
        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert!(stored.last_login_at.is_some());
    }

    #[tokio::test]
    async fn reconciling_same_identity_twice_is_idempotent() {
        let store = MemStore::new();
        let first = reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();
        let second = reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        // the email still resolves to the one account
        let by_email = store.find_by_email("a@x.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, first.id);
    }

    #[tokio::test]
    async fn federated_login_links_to_existing_password_account() {
        let store = MemStore::new();
        let local = register_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap();

        let linked = reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();
        assert_eq!(linked.id, local.id);
        assert_eq!(linked.provider_user_id.as_deref(), Some("g-42"));

        // both methods work afterwards
        let via_password = authenticate_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap();
        assert_eq!(via_password.id, local.id);
        let via_provider = reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();
        assert_eq!(via_provider.id, local.id);
    }

    #[tokio::test]
    async fn unverified_provider_email_does_not_link() {
        let store = MemStore::new();
        register_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap();

        let mut ident = identity("g-42", "a@x.com");
        ident.email_verified = false;
        let err = reconcile_federated(&store, &ident).await.unwrap_err();
        assert!(matches!(err, AuthError::ReconciliationConflict(_)));
    }

    #[tokio::test]
    async fn email_match_with_different_provider_pair_does_not_relink() {
        let store = MemStore::new();
        let original = reconcile_federated(&store, &identity("g-1", "a@x.com"))
            .await
            .unwrap();

        // same verified email, different provider subject
        let err = reconcile_federated(&store, &identity("g-2", "a@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ReconciliationConflict(_)));

        // the original identity still resolves to the same account
        let again = reconcile_federated(&store, &identity("g-1", "a@x.com"))
            .await
            .unwrap();
        assert_eq!(again.id, original.id);
    }

    #[tokio::test]
    async fn federated_profile_is_refreshed_on_login() {
        let store = MemStore::new();
        reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();

        let mut ident = identity("g-42", "a@x.com");
        ident.display_name = Some("Ada L.".to_string());
        ident.avatar_url = Some("https://pic/new.png".to_string());
        let user = reconcile_federated(&store, &ident).await.unwrap();
        assert_eq!(user.display_name.as_deref(), Some("Ada L."));
        assert_eq!(user.avatar_url.as_deref(), Some("https://pic/new.png"));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_are_indistinguishable() {
        let store = MemStore::new();
        register_local(&store, "known@x.com", "hunter2hunter2")
            .await
            .unwrap();

        let unknown = authenticate_local(&store, "nobody@x.com", "whatever")
            .await
            .unwrap_err();
        let wrong = authenticate_local(&store, "known@x.com", "wrong-password")
            .await
            .unwrap_err();

        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.code(), wrong.code());
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.status(), wrong.status());
    }

    #[tokio::test]
    async fn federation_only_account_fails_password_login() {
        let store = MemStore::new();
        reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();
        let err = authenticate_local(&store, "a@x.com", "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn inactive_account_fails_federated_login() {
        let store = MemStore::new();
        let user = reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap();
        store.set_active(user.id, false).await.unwrap();

        let err = reconcile_federated(&store, &identity("g-42", "a@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountInactive));
    }

    #[tokio::test]
    async fn inactive_account_fails_password_login() {
        let store = MemStore::new();
        let user = register_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap();
        store.set_active(user.id, false).await.unwrap();

        let err = authenticate_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountInactive));
    }

    #[tokio::test]
    async fn reset_token_is_single_use() {
        let store = MemStore::new();
        register_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap();

        let (_, token) = request_password_reset(&store, "a@x.com")
            .await
            .unwrap()
            .expect("known email yields a token");

        complete_password_reset(&store, &token, "new-password-1")
            .await
            .unwrap();
        let err = complete_password_reset(&store, &token, "new-password-2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResetTokenInvalid));

        // the first reset took effect
        authenticate_local(&store, "a@x.com", "new-password-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_reset_token_is_rejected() {
        let store = MemStore::new();
        let user = register_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap();
        store
            .set_reset_token(
                user.id,
                "stale-token",
                OffsetDateTime::now_utc() - Duration::minutes(5),
            )
            .await
            .unwrap();

        let err = complete_password_reset(&store, "stale-token", "new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResetTokenInvalid));
    }

    #[tokio::test]
    async fn unknown_email_reset_request_yields_nothing() {
        let store = MemStore::new();
        let out = request_password_reset(&store, "nobody@x.com").await.unwrap();
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let store = MemStore::new();
        register_local(&store, "a@x.com", "hunter2hunter2")
            .await
            .unwrap();
        let err = register_local(&store, "a@x.com", "another-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ReconciliationConflict(_)));
    }
}
