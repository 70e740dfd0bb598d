//! User directory.
//!
//! Accounts are owned outside the workflow core. The engine only asks a
//! [`UserDirectory`] whether a user id is known and active. [`Users`] is the
//! directory backed by `users_master`; registering a user there also creates
//! the user's singleton group in the same transaction.

use std::future::Future;
use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::groups;
use crate::model::{GroupId, NewUser, User, UserId};

/// Existence checks for user ids.
///
/// Lookups receive the connection of the engine's current unit of work, so a
/// directory stored alongside the workflow tables reads the same snapshot.
/// Directories kept elsewhere can ignore it.
pub trait UserDirectory: Send + Sync {
    /// Whether `user` exists and may act.
    fn contains(
        &self,
        conn: &mut SqliteConnection,
        user: UserId,
    ) -> impl Future<Output = Result<bool>> + Send;
}

#[derive(Clone)]
pub struct Users {
    db: Arc<Db>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    first_name: String,
    last_name: String,
    email: String,
    active: bool,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            active: row.active,
        }
    }
}

impl Users {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Register a user together with their singleton group.
    pub async fn register(&self, tx: Option<&mut Tx>, new: NewUser) -> Result<(UserId, GroupId)> {
        let email = new.email.trim();
        if email.is_empty() {
            return Err(Error::Validation("user email cannot be empty".into()));
        }

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let res = sqlx::query(
            "INSERT INTO users_master (first_name, last_name, email, active) VALUES (?1, ?2, ?3, 1)",
        )
        .bind(new.first_name.trim())
        .bind(new.last_name.trim())
        .bind(email)
        .execute(uow.conn())
        .await
        .map_err(|e| Error::on_write(e, format!("user '{email}'")))?;
        let user = UserId(res.last_insert_rowid());

        let group = groups::new_singleton_on(uow.conn(), user).await?;
        uow.finish().await?;

        tracing::info!(%user, %group, "user registered");
        Ok((user, group))
    }

    pub async fn get(&self, id: UserId) -> Result<User> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, first_name, last_name, email, active FROM users_master WHERE id = ?1",
        )
        .bind(id.0)
        .fetch_optional(self.db.pool())
        .await?;

        row.map(User::from)
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }

    /// Activate or deactivate a user. Inactive users cannot apply actions.
    pub async fn set_active(&self, tx: Option<&mut Tx>, id: UserId, active: bool) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let affected = sqlx::query("UPDATE users_master SET active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(id.0)
            .execute(uow.conn())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("user {id}")));
        }
        uow.finish().await
    }
}

impl UserDirectory for Users {
    async fn contains(&self, conn: &mut SqliteConnection, user: UserId) -> Result<bool> {
        let active: Option<bool> =
            sqlx::query_scalar("SELECT active FROM users_master WHERE id = ?1")
                .bind(user.0)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(active.unwrap_or(false))
    }
}
