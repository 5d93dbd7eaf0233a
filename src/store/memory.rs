use std::collections::HashMap;
use std::sync::Mutex;

use axum::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AuthError;
use crate::store::{NewUser, User, UserStore};

/// In-memory user store for local development and tests.
///
/// All methods take the single mutex, so uniqueness checks and the writes
/// they guard are serialized the same way the Postgres unique indexes
/// serialize concurrent inserts.
#[derive(Default)]
pub struct MemStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> AuthError {
    AuthError::Internal(anyhow::anyhow!("user store mutex poisoned"))
}

#[async_trait]
impl UserStore for MemStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let users = self.users.lock().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let users = self.users.lock().map_err(|_| poisoned())?;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<User>, AuthError> {
        let users = self.users.lock().map_err(|_| poisoned())?;
        Ok(users
            .values()
            .find(|u| {
                u.provider.as_deref() == Some(provider)
                    && u.provider_user_id.as_deref() == Some(provider_user_id)
            })
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<User, AuthError> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;

        if users.values().any(|u| u.email == new.email) {
            return Err(AuthError::ReconciliationConflict(
                "Account already exists for that identity".to_string(),
            ));
        }
        if let (Some(provider), Some(pid)) = (&new.provider, &new.provider_user_id) {
            if users.values().any(|u| {
                u.provider.as_deref() == Some(provider.as_str())
                    && u.provider_user_id.as_deref() == Some(pid.as_str())
            }) {
                return Err(AuthError::ReconciliationConflict(
                    "Account already exists for that identity".to_string(),
                ));
            }
        }

        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            password_hash: new.password_hash,
            provider: new.provider,
            provider_user_id: new.provider_user_id,
            display_name: new.display_name,
            avatar_url: new.avatar_url,
            reset_token: None,
            reset_token_expires_at: None,
            is_active: true,
            last_login_at: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn link_identity(
        &self,
        id: Uuid,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<User, AuthError> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;

        if users.values().any(|u| {
            u.id != id
                && u.provider.as_deref() == Some(provider)
                && u.provider_user_id.as_deref() == Some(provider_user_id)
        }) {
            return Err(AuthError::ReconciliationConflict(
                "Account already exists for that identity".to_string(),
            ));
        }

        let user = users
            .get_mut(&id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user {id} not found")))?;

        // Linking never replaces an identity the account already carries.
        if let (Some(p), Some(pid)) = (&user.provider, &user.provider_user_id) {
            if p != provider || pid != provider_user_id {
                return Err(AuthError::ReconciliationConflict(
                    "Account is already linked to another identity".to_string(),
                ));
            }
        }

        user.provider = Some(provider.to_string());
        user.provider_user_id = Some(provider_user_id.to_string());
        Ok(user.clone())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<User, AuthError> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user {id} not found")))?;
        if let Some(name) = display_name {
            user.display_name = Some(name.to_string());
        }
        if let Some(url) = avatar_url {
            user.avatar_url = Some(url.to_string());
        }
        Ok(user.clone())
    }

    async fn record_login(&self, id: Uuid) -> Result<(), AuthError> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;
        if let Some(user) = users.get_mut(&id) {
            user.last_login_at = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), AuthError> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user {id} not found")))?;
        user.is_active = active;
        Ok(())
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user {id} not found")))?;
        user.reset_token = Some(token.to_string());
        user.reset_token_expires_at = Some(expires_at);
        Ok(())
    }

    async fn find_by_reset_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        let users = self.users.lock().map_err(|_| poisoned())?;
        Ok(users
            .values()
            .find(|u| u.reset_token.as_deref() == Some(token))
            .cloned())
    }

    async fn complete_password_reset(
        &self,
        id: Uuid,
        password_hash: &str,
    ) -> Result<(), AuthError> {
        let mut users = self.users.lock().map_err(|_| poisoned())?;
        let user = users
            .get_mut(&id)
            .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("user {id} not found")))?;
        user.password_hash = Some(password_hash.to_string());
        user.reset_token = None;
        user.reset_token_expires_at = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: Some("$argon2id$fake".to_string()),
            provider: None,
            provider_user_id: None,
            display_name: None,
            avatar_url: None,
        }
    }

    fn federated_user(email: &str, pid: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            password_hash: None,
            provider: Some("google".to_string()),
            provider_user_id: Some(pid.to_string()),
            display_name: Some("Someone".to_string()),
            avatar_url: None,
        }
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let store = MemStore::new();
        store.create(local_user("a@x.com")).await.unwrap();
        let err = store.create(local_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::ReconciliationConflict(_)));
    }

    #[tokio::test]
    async fn duplicate_identity_is_a_conflict() {
        let store = MemStore::new();
        store.create(federated_user("a@x.com", "g-1")).await.unwrap();
        let err = store
            .create(federated_user("b@x.com", "g-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ReconciliationConflict(_)));
    }

    #[tokio::test]
    async fn link_identity_refuses_taken_pair() {
        let store = MemStore::new();
        store.create(federated_user("a@x.com", "g-1")).await.unwrap();
        let other = store.create(local_user("b@x.com")).await.unwrap();
        let err = store
            .link_identity(other.id, "google", "g-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ReconciliationConflict(_)));
    }

    #[tokio::test]
    async fn link_identity_refuses_to_replace_existing_pair() {
        let store = MemStore::new();
        let user = store.create(federated_user("a@x.com", "g-1")).await.unwrap();
        let err = store
            .link_identity(user.id, "google", "g-2")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ReconciliationConflict(_)));

        // the original identity is untouched and still resolves
        let found = store.find_by_identity("google", "g-1").await.unwrap();
        assert_eq!(found.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn link_identity_is_idempotent_for_the_same_pair() {
        let store = MemStore::new();
        let user = store.create(federated_user("a@x.com", "g-1")).await.unwrap();
        let linked = store.link_identity(user.id, "google", "g-1").await.unwrap();
        assert_eq!(linked.id, user.id);
    }

    #[tokio::test]
    async fn reset_completion_clears_token() {
        let store = MemStore::new();
        let user = store.create(local_user("a@x.com")).await.unwrap();
        let expiry = OffsetDateTime::now_utc() + time::Duration::hours(1);
        store.set_reset_token(user.id, "tok", expiry).await.unwrap();

        assert!(store.find_by_reset_token("tok").await.unwrap().is_some());
        store
            .complete_password_reset(user.id, "$argon2id$new")
            .await
            .unwrap();
        assert!(store.find_by_reset_token("tok").await.unwrap().is_none());

        let reloaded = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.password_hash.as_deref(), Some("$argon2id$new"));
        assert!(reloaded.reset_token_expires_at.is_none());
    }

    #[tokio::test]
    async fn update_profile_keeps_unset_fields() {
        let store = MemStore::new();
        let user = store.create(federated_user("a@x.com", "g-1")).await.unwrap();
        let updated = store
            .update_profile(user.id, None, Some("https://pic/1.png"))
            .await
            .unwrap();
        assert_eq!(updated.display_name.as_deref(), Some("Someone"));
        assert_eq!(updated.avatar_url.as_deref(), Some("https://pic/1.png"));
    }
}
