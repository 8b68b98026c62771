use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::model::{NewUser, PublicUser, User};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries the offending field.
    #[error("{0} already taken")]
    Duplicate(&'static str),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence for user records, including the single refresh-token slot.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Matches on username OR email; a `None` argument never matches.
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    /// Same lookup projected without password hash and refresh token.
    async fn find_public_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError>;

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> Result<Option<PublicUser>, StoreError>;

    /// Unconditional overwrite; the previous token stops being valid.
    async fn set_refresh_token(&self, id: Uuid, token: &str) -> Result<(), StoreError>;

    async fn clear_refresh_token(&self, id: Uuid) -> Result<(), StoreError>;

    async fn get_refresh_token(&self, id: Uuid) -> Result<Option<String>, StoreError>;
}
