//! The user / upload metadata store.
//!
//! Every operation is independently atomic against SQLite; there are no
//! cross-request transactions. Upload ownership lists are rows in
//! `user_uploads`, so removing one entry is a single conditional `DELETE`
//! instead of a read-modify-write of the whole list.

use crate::models::user::{DEFAULT_USER_TYPE, UploadRecord, UserRecord};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user `{0}` not found")]
    UserNotFound(String),
    #[error("`{upload_id}` is not in the upload list of `{username}`")]
    UploadNotListed { username: String, upload_id: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type UserStoreResult<T> = Result<T, UserStoreError>;

/// Which list of a user record an upload id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relation {
    Owner,
    Reader,
}

impl Relation {
    fn as_str(self) -> &'static str {
        match self {
            Relation::Owner => "owner",
            Relation::Reader => "reader",
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create or overwrite a user. Last write wins; both upload lists reset.
    async fn put_user(&self, username: &str, user_type: &str) -> UserStoreResult<()>;

    /// The full record, or `None` when the username is unknown.
    async fn get_user(&self, username: &str) -> UserStoreResult<Option<UserRecord>>;

    /// Register a finished upload batch: create its record and append it to
    /// the owner's `uploads`. An unknown owner is created as a plain user.
    async fn record_upload(
        &self,
        username: &str,
        upload_id: &str,
        description: &str,
    ) -> UserStoreResult<()>;

    /// Remove one entry from the user's `uploads`.
    async fn remove_upload(&self, username: &str, upload_id: &str) -> UserStoreResult<()>;

    /// Append an upload to the user's `accessUploads`. Granting twice is a no-op.
    async fn grant_access(&self, username: &str, upload_id: &str) -> UserStoreResult<()>;

    async fn get_upload(&self, upload_id: &str) -> UserStoreResult<Option<UploadRecord>>;

    /// Upsert the free-text description of an upload.
    async fn set_description(&self, upload_id: &str, description: &str) -> UserStoreResult<()>;

    /// Cheap connectivity probe for readiness checks.
    async fn ping(&self) -> UserStoreResult<()>;
}

#[derive(Clone)]
pub struct SqliteUserStore {
    pub db: Arc<SqlitePool>,
}

impl SqliteUserStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    async fn upload_list(&self, username: &str, relation: Relation) -> UserStoreResult<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT upload_id FROM user_uploads WHERE username = ? AND relation = ? ORDER BY id ASC",
        )
        .bind(username)
        .bind(relation.as_str())
        .fetch_all(&*self.db)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn put_user(&self, username: &str, user_type: &str) -> UserStoreResult<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO users (username, user_type, created_at) VALUES (?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET user_type = excluded.user_type",
        )
        .bind(username)
        .bind(user_type)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM user_uploads WHERE username = ?")
            .bind(username)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, username: &str) -> UserStoreResult<Option<UserRecord>> {
        let user_type: Option<String> =
            sqlx::query_scalar("SELECT user_type FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&*self.db)
                .await?;
        let Some(user_type) = user_type else {
            return Ok(None);
        };

        Ok(Some(UserRecord {
            username: username.to_string(),
            user_type,
            uploads: self.upload_list(username, Relation::Owner).await?,
            access_uploads: self.upload_list(username, Relation::Reader).await?,
        }))
    }

    async fn record_upload(
        &self,
        username: &str,
        upload_id: &str,
        description: &str,
    ) -> UserStoreResult<()> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT OR IGNORE INTO users (username, user_type, created_at) VALUES (?, ?, ?)",
        )
        .bind(username)
        .bind(DEFAULT_USER_TYPE)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO uploads (upload_id, description, created_at) VALUES (?, ?, ?)
             ON CONFLICT(upload_id) DO UPDATE SET description = excluded.description",
        )
        .bind(upload_id)
        .bind(description)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO user_uploads (username, upload_id, relation) VALUES (?, ?, ?)",
        )
        .bind(username)
        .bind(upload_id)
        .bind(Relation::Owner.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_upload(&self, username: &str, upload_id: &str) -> UserStoreResult<()> {
        let result = sqlx::query(
            "DELETE FROM user_uploads WHERE username = ? AND upload_id = ? AND relation = ?",
        )
        .bind(username)
        .bind(upload_id)
        .bind(Relation::Owner.as_str())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserStoreError::UploadNotListed {
                username: username.to_string(),
                upload_id: upload_id.to_string(),
            });
        }
        Ok(())
    }

    async fn grant_access(&self, username: &str, upload_id: &str) -> UserStoreResult<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO user_uploads (username, upload_id, relation)
             SELECT username, ?, ? FROM users WHERE username = ?",
        )
        .bind(upload_id)
        .bind(Relation::Reader.as_str())
        .bind(username)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 && self.get_user(username).await?.is_none() {
            return Err(UserStoreError::UserNotFound(username.to_string()));
        }
        Ok(())
    }

    async fn get_upload(&self, upload_id: &str) -> UserStoreResult<Option<UploadRecord>> {
        let description: Option<String> =
            sqlx::query_scalar("SELECT description FROM uploads WHERE upload_id = ?")
                .bind(upload_id)
                .fetch_optional(&*self.db)
                .await?;
        Ok(description.map(|description| UploadRecord {
            upload_id: upload_id.to_string(),
            description,
        }))
    }

    async fn set_description(&self, upload_id: &str, description: &str) -> UserStoreResult<()> {
        sqlx::query(
            "INSERT INTO uploads (upload_id, description, created_at) VALUES (?, ?, ?)
             ON CONFLICT(upload_id) DO UPDATE SET description = excluded.description",
        )
        .bind(upload_id)
        .bind(description)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> UserStoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
