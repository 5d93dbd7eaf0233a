use crate::config::{AppConfig, StoreBackend};
use crate::error::AuthError;
use crate::notify::{LogNotifier, ResetNotifier};
use crate::oauth::{FederatedIdentity, GoogleProvider, IdentityProvider, ProviderToken};
use crate::store::{MemStore, PgStore, UserStore};
use axum::async_trait;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub provider: Arc<dyn IdentityProvider>,
    pub notifier: Arc<dyn ResetNotifier>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        // Backend is fixed here for the life of the process; a failed
        // connection is a startup error, never a silent fallback.
        let store: Arc<dyn UserStore> = match config.store_backend {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("DATABASE_URL missing"))?;
                Arc::new(PgStore::connect(url).await?)
            }
            StoreBackend::Memory => {
                tracing::warn!("running with the in-memory user store; data will not persist");
                Arc::new(MemStore::new())
            }
        };

        let provider = Arc::new(GoogleProvider::new(config.oauth.clone())?);

        Ok(Self {
            store,
            provider,
            notifier: Arc::new(LogNotifier),
            config,
        })
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        provider: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn ResetNotifier>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            store,
            provider,
            notifier,
            config,
        }
    }

    pub fn fake() -> Self {
        use crate::config::{JwtConfig, OAuthConfig};

        struct RefusingProvider;

        #[async_trait]
        impl IdentityProvider for RefusingProvider {
            fn name(&self) -> &str {
                "google"
            }
            async fn exchange_code(&self, _code: &str) -> Result<ProviderToken, AuthError> {
                Err(AuthError::ProviderExchangeFailed {
                    status: 400,
                    body: "invalid_grant".to_string(),
                })
            }
            async fn fetch_identity(
                &self,
                _token: &ProviderToken,
            ) -> Result<FederatedIdentity, AuthError> {
                Err(AuthError::IdentityFetchFailed("no identity".to_string()))
            }
        }

        let config = Arc::new(AppConfig {
            store_backend: StoreBackend::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            oauth: OAuthConfig {
                client_id: "fake".into(),
                client_secret: "fake".into(),
                redirect_uri: "http://localhost:8080/auth/google/callback".into(),
                token_url: "http://localhost:1/token".into(),
                userinfo_url: "http://localhost:1/userinfo".into(),
            },
            app_origin: "http://localhost:3000".into(),
        });

        Self {
            store: Arc::new(MemStore::new()),
            provider: Arc::new(RefusingProvider),
            notifier: Arc::new(LogNotifier),
            config,
        }
    }
}
