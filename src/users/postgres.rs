use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::model::{NewUser, PublicUser, User};
use super::repo::{StoreError, UserRepository};

const USER_COLUMNS: &str = "id, username, email, full_name, avatar, cover_image, watch_history, \
     password_hash, refresh_token, created_at, updated_at";

const PUBLIC_COLUMNS: &str =
    "id, username, email, full_name, avatar, cover_image, watch_history, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserRepository {
    db: PgPool,
}

impl PgUserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Unique violations become `Duplicate`, everything else is a backend failure.
fn map_write_error(e: sqlx::Error, op: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let field = match db.constraint() {
                Some("users_username_key") => "username",
                Some("users_email_key") => "email",
                _ => "user",
            };
            return StoreError::Duplicate(field);
        }
    }
    StoreError::Backend(anyhow::Error::new(e).context(op))
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn find_by_username_or_email(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let sql = format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE ($1::text IS NOT NULL AND username = $1)
               OR ($2::text IS NOT NULL AND email = $2)
            LIMIT 1
            "#
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by username or email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn find_public_by_id(&self, id: Uuid) -> Result<Option<PublicUser>, StoreError> {
        let sql = format!("SELECT {PUBLIC_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, PublicUser>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find public user by id")?;
        Ok(user)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, username, email, full_name, password_hash, avatar, cover_image)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_user.username)
            .bind(&new_user.email)
            .bind(&new_user.full_name)
            .bind(&new_user.password_hash)
            .bind(&new_user.avatar)
            .bind(&new_user.cover_image)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_write_error(e, "insert user"))
    }

    async fn update_account(
        &self,
        id: Uuid,
        full_name: &str,
        email: &str,
    ) -> Result<Option<PublicUser>, StoreError> {
        let sql = format!(
            r#"
            UPDATE users
               SET full_name = $2, email = $3, updated_at = now()
             WHERE id = $1
            RETURNING {PUBLIC_COLUMNS}
            "#
        );
        sqlx::query_as::<_, PublicUser>(&sql)
            .bind(id)
            .bind(full_name)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_write_error(e, "update account details"))
    }

    async fn set_refresh_token(&self, id: Uuid, token: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await
            .context("set refresh token")?;
        Ok(())
    }

    async fn clear_refresh_token(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET refresh_token = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("clear refresh token")?;
        Ok(())
    }

    async fn get_refresh_token(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let token: Option<Option<String>> =
            sqlx::query_scalar("SELECT refresh_token FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.db)
                .await
                .context("get refresh token")?;
        Ok(token.flatten())
    }
}
