use axum::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;

pub mod memory;
pub mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

/// User record in the database.
///
/// A user always has at least one authentication method: a password hash, a
/// federated identity pair, or both.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub provider: Option<String>,
    pub provider_user_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub is_active: bool,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

/// Fields for inserting a user. Email must already be lowercased.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: Option<String>,
    pub provider: Option<String>,
    pub provider_user_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Persistence boundary for user records.
///
/// Uniqueness of `email` and of `(provider, provider_user_id)` is enforced by
/// each implementation at write time; violations surface as
/// [`AuthError::ReconciliationConflict`], never as a silent overwrite.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<User>, AuthError>;

    async fn create(&self, new: NewUser) -> Result<User, AuthError>;

    /// Attach a federated identity to an existing account.
    async fn link_identity(
        &self,
        id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<User, AuthError>;

    /// Refresh mutable profile fields from the provider. `None` leaves the
    /// stored value untouched.
    async fn update_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User, AuthError>;

    async fn record_login(&self, id: Uuid) -> Result<(), AuthError>;

    /// Deactivate or reactivate an account. Users are never hard-deleted.
    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AuthError>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AuthError>;

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, AuthError>;

    /// Store the new hash and clear the reset token in one write, so a
    /// consumed token can never authorize a second reset.
    async fn complete_password_reset(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), AuthError>;
}
