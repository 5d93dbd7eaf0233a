use axum::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::{NewUser, User, UserStore};

const USER_COLUMNS: &str = "id, email, password_hash, provider, provider_user_id, \
     display_name, avatar_url, reset_token, reset_token_expires_at, \
     is_active, last_login_at, created_at";

/// Postgres-backed user store. Uniqueness of `email` and of
/// `(provider, provider_user_id)` is enforced by unique indexes; violations
/// come back as 23505 and map to a conflict error.
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&db).await?;

        Ok(Self { db })
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE provider = $1 AND provider_user_id = $2"
        ))
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> Result<User, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, password_hash, provider, provider_user_id, \
                                display_name, avatar_url) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.provider)
        .bind(&new.provider_user_id)
        .bind(&new.display_name)
        .bind(&new.avatar_url)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn link_identity(
        &self,
        id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<User, AuthError> {
        // Only links accounts with no identity yet (or the same pair again);
        // an account already bound to a different pair stays bound.
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET provider = $2, provider_user_id = $3 \
             WHERE id = $1 \
               AND (provider IS NULL \
                    OR (provider = $2 AND provider_user_id = $3)) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(provider)
        .bind(provider_user_id)
        .fetch_optional(&self.db)
        .await?;
        user.ok_or_else(|| {
            AuthError::ReconciliationConflict(
                "Account is already linked to another identity".to_string(),
            )
        })
    }

    async fn update_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users \
             SET display_name = COALESCE($2, display_name), \
                 avatar_url = COALESCE($3, avatar_url) \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(display_name)
        .bind(avatar_url)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn record_login(&self, id: Uuid) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET last_login_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AuthError> {
        sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE users SET reset_token = $2, reset_token_expires_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE reset_token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        // One statement, so the hash update and token clear are atomic.
        sqlx::query(
            "UPDATE users \
             SET password_hash = $2, reset_token = NULL, reset_token_expires_at = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
