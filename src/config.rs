use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Settings for the federated identity provider (Google OAuth2).
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub token_url: String,
    pub userinfo_url: String,
}

/// Which user store implementation to run against. Chosen once at process
/// start; never switched at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub oauth: OAuthConfig,
    /// Exact origin of the frontend that opens the sign-in popup; the relay
    /// page posts the flow result only to this origin.
    pub app_origin: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let store_backend = match std::env::var("STORE_BACKEND").as_deref() {
            Ok("memory") => StoreBackend::Memory,
            _ => StoreBackend::Postgres,
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required when STORE_BACKEND=postgres");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "mindwell".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "mindwell-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24),
        };

        let oauth = OAuthConfig {
            client_id: std::env::var("GOOGLE_CLIENT_ID")?,
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET")?,
            redirect_uri: std::env::var("GOOGLE_REDIRECT_URI")?,
            token_url: std::env::var("GOOGLE_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".into()),
            userinfo_url: std::env::var("GOOGLE_USERINFO_URL")
                .unwrap_or_else(|_| "https://openidconnect.googleapis.com/v1/userinfo".into()),
        };

        let app_origin =
            std::env::var("APP_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".into());

        Ok(Self {
            store_backend,
            database_url,
            jwt,
            oauth,
            app_origin,
        })
    }
}
