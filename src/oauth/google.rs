use std::time::Duration;

use axum::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::error::AuthError;
use crate::oauth::{FederatedIdentity, IdentityProvider, ProviderToken};

const PROVIDER_NAME: &str = "google";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Google OAuth2 client: authorization-code exchange against the token
/// endpoint and a bearer GET against the OpenID userinfo endpoint.
pub struct GoogleProvider {
    client: reqwest::Client,
    config: OAuthConfig,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    sub: Option<String>,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleProvider {
    pub fn new(config: OAuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }
}

/// A non-2xx status means the provider rejected the code; the code is burned
/// either way, so the rejection surfaces as-is, no retry. A 2xx body that
/// does not parse is the provider breaking its own contract, which is our
/// bug to investigate, not the caller's code to re-enter.
fn parse_token_response(status: StatusCode, body: &[u8]) -> Result<ProviderToken, AuthError> {
    if !status.is_success() {
        return Err(AuthError::ProviderExchangeFailed {
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        });
    }
    serde_json::from_slice(body)
        .map_err(|e| AuthError::Internal(anyhow::anyhow!("malformed token response: {e}")))
}

fn parse_userinfo_response(
    status: StatusCode,
    body: &[u8],
) -> Result<FederatedIdentity, AuthError> {
    if !status.is_success() {
        return Err(AuthError::IdentityFetchFailed(format!(
            "userinfo returned status {status}"
        )));
    }
    let info: UserInfoResponse = serde_json::from_slice(body)
        .map_err(|e| AuthError::IdentityFetchFailed(format!("userinfo body: {e}")))?;

    let (Some(sub), Some(email)) = (info.sub, info.email) else {
        warn!("userinfo response missing sub or email");
        return Err(AuthError::IdentityFetchFailed(
            "userinfo response missing sub or email".to_string(),
        ));
    };

    Ok(FederatedIdentity {
        provider: PROVIDER_NAME.to_string(),
        provider_user_id: sub,
        email,
        email_verified: info.email_verified,
        display_name: info.name,
        avatar_url: info.picture,
    })
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderToken, AuthError> {
        // Client credentials go in the form body and nowhere else; nothing
        // from this request is logged.
        let resp = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        let token = parse_token_response(status, &body)?;
        debug!("authorization code exchanged");
        Ok(token)
    }

    async fn fetch_identity(
        &self,
        token: &ProviderToken,
    ) -> Result<FederatedIdentity, AuthError> {
        let resp = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        parse_userinfo_response(status, &body)
    }
}
