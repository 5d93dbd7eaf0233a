use axum::async_trait;
use tracing::info;

/// Delivery boundary for password-reset tokens. Actual email sending lives
/// outside this service; the core only hands the token across this trait.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset(&self, email: &str, token: &str) -> anyhow::Result<()>;
}

/// Default notifier: records that a token was issued. The token itself is a
/// credential and is never logged.
pub struct LogNotifier;

#[async_trait]
impl ResetNotifier for LogNotifier {
    async fn send_reset(&self, email: &str, _token: &str) -> anyhow::Result<()> {
        info!(email = %email, "password reset token issued");
        Ok(())
    }
}
