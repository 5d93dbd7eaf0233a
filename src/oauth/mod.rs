use axum::async_trait;
use serde::Deserialize;

use crate::error::AuthError;

pub mod google;

pub use google::GoogleProvider;

/// Access credentials returned by the provider's token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Canonical identity shape for a user at an external provider.
///
/// `provider_user_id` and `email` are mandatory; a response missing either is
/// rejected rather than mapped to a partial identity.
#[derive(Debug, Clone)]
pub struct FederatedIdentity {
    pub provider: String,
    pub provider_user_id: String,
    pub email: String,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// External identity provider boundary: code exchange plus identity fetch.
///
/// Neither call is retried. The authorization code is single-use by provider
/// contract, so a rejected exchange is terminal for the flow.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, AuthError>;

    async fn fetch_identity(&self, token: &ProviderToken)
        -> Result<FederatedIdentity, AuthError>;
}
