use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::model::{NewUser, PublicUser, User};
use super::repo::{StoreError, UserRepository};

/// In-process stand-in for Postgres, enforcing the same unique constraints.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.users.read().await.len()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| {
                username.is_some_and(|n| u.username == n) || email.is_some_and(|e| u.email == e)
            })
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_public_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        Ok(self.users.read().await.get(&id).map(PublicUser::from))
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == new_user.username) {
            return Err(StoreError::Duplicate("username"));
        }
        if users.values().any(|u| u.email == new_user.email) {
            return Err(StoreError::Duplicate("email"));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new_user.username,
            email: new_user.email,
            full_name: new_user.full_name,
            avatar: new_user.avatar,
            cover_image: new_user.cover_image,
            watch_history: Vec::new(),
            password_hash: new_user.password_hash,
            refresh_token: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> Result<Option<PublicUser>, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.id != id && u.email == email) {
            return Err(StoreError::Duplicate("email"));
        }
        Ok(users.get_mut(&id).map(|u| {
            u.full_name = full_name.to_string();
            u.email = email.to_string();
            u.updated_at = OffsetDateTime::now_utc();
            PublicUser::from(&*u)
        }))
    }

    async fn set_refresh_token(&self, id: Uuid, token: &str) -> Result<(), StoreError> {
        if let Some(u) = self.users.write().await.get_mut(&id) {
            u.refresh_token = Some(token.to_string());
        }
        Ok(())
    }

    async fn clear_refresh_token(&self, id: Uuid) -> Result<(), StoreError> {
        if let Some(u) = self.users.write().await.get_mut(&id) {
            u.refresh_token = None;
        }
        Ok(())
    }

    async fn get_refresh_token(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .get(&id)
            .and_then(|u| u.refresh_token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            full_name: "Test User".into(),
            password_hash: "hash".into(),
            avatar: "https://media.test/a.png".into(),
            cover_image: None,
        }
    }

    #[tokio::test]
    async fn refresh_slot_overwrites_and_clears() {
        let repo = InMemoryUserRepository::new();
        let user = repo.create(new_user("bob", "b@x.com")).await.unwrap();

        assert_eq!(repo.get_refresh_token(user.id).await.unwrap(), None);
        repo.set_refresh_token(user.id, "first").await.unwrap();
        repo.set_refresh_token(user.id, "second").await.unwrap();
        assert_eq!(
            repo.get_refresh_token(user.id).await.unwrap().as_deref(),
            Some("second")
        );

        repo.clear_refresh_token(user.id).await.unwrap();
        assert_eq!(repo.get_refresh_token(user.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lookup_matches_either_field() {
        let repo = InMemoryUserRepository::new();
        let user = repo.create(new_user("carol", "c@x.com")).await.unwrap();

        let by_name = repo
            .find_by_username_or_email(Some("carol"), None)
            .await
            .unwrap();
        let by_email = repo
            .find_by_username_or_email(Some("nobody"), Some("c@x.com"))
            .await
            .unwrap();
        assert_eq!(by_name.map(|u| u.id), Some(user.id));
        assert_eq!(by_email.map(|u| u.id), Some(user.id));
        assert!(repo
            .find_by_username_or_email(None, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn duplicate_username_or_email_is_rejected() {
        let repo = InMemoryUserRepository::new();
        repo.create(new_user("dave", "d@x.com")).await.unwrap();

        let err = repo.create(new_user("dave", "other@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate("username")));
        let err = repo.create(new_user("other", "d@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate("email")));
        assert_eq!(repo.count().await, 1);
    }
}
