//! Vocabulary registries: document types, document actions, roles, and
//! (scoped by document type) document states.
//!
//! These are controlled dictionaries. They carry no transition semantics;
//! the transition table and the engine give the names meaning.

pub(crate) mod docstate;

pub use docstate::DocStates;

use std::marker::PhantomData;
use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::model::{DocAction, DocActionId, DocType, DocTypeId, Role, RoleId};

/// A globally scoped vocabulary entity stored as `(id, name)`.
pub trait Term: Sized + Send + 'static {
    type Id: Copy + Send + Sync + From<i64> + Into<i64> + std::fmt::Display;

    /// Backing table. Must be a trusted constant; it is spliced into SQL.
    const TABLE: &'static str;
    /// Human-readable kind used in error messages.
    const KIND: &'static str;

    fn from_parts(id: Self::Id, name: String) -> Self;
}

impl Term for DocType {
    type Id = DocTypeId;
    const TABLE: &'static str = "wf_doctypes_master";
    const KIND: &'static str = "document type";

    fn from_parts(id: DocTypeId, name: String) -> Self {
        DocType { id, name }
    }
}

impl Term for DocAction {
    type Id = DocActionId;
    const TABLE: &'static str = "wf_docactions_master";
    const KIND: &'static str = "document action";

    fn from_parts(id: DocActionId, name: String) -> Self {
        DocAction { id, name }
    }
}

impl Term for Role {
    type Id = RoleId;
    const TABLE: &'static str = "wf_roles_master";
    const KIND: &'static str = "role";

    fn from_parts(id: RoleId, name: String) -> Self {
        Role { id, name }
    }
}

pub type DocTypes = Vocabulary<DocType>;
pub type DocActions = Vocabulary<DocAction>;
pub type Roles = Vocabulary<Role>;

/// Resource-like access to one vocabulary table.
pub struct Vocabulary<T: Term> {
    db: Arc<Db>,
    _term: PhantomData<fn() -> T>,
}

impl<T: Term> Clone for Vocabulary<T> {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            _term: PhantomData,
        }
    }
}

impl<T: Term> Vocabulary<T> {
    pub fn new(db: Arc<Db>) -> Self {
        Self {
            db,
            _term: PhantomData,
        }
    }

    /// Register a new name and answer its identifier.
    pub async fn create(&self, tx: Option<&mut Tx>, name: &str) -> Result<T::Id> {
        let name = clean_name(T::KIND, name)?;

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let id = insert_on::<T>(uow.conn(), name).await?;
        uow.finish().await?;

        tracing::debug!(kind = T::KIND, %id, name, "vocabulary entry created");
        Ok(id)
    }

    /// Retrieve the entry with the given identifier.
    pub async fn get(&self, id: T::Id) -> Result<T> {
        let raw: i64 = id.into();
        if raw <= 0 {
            return Err(Error::NotFound(format!("{} {id}", T::KIND)));
        }

        let sql = format!("SELECT id, name FROM {} WHERE id = ?1", T::TABLE);
        let row: Option<(i64, String)> = sqlx::query_as(&sql)
            .bind(raw)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(|(id, name)| T::from_parts(id.into(), name))
            .ok_or_else(|| Error::NotFound(format!("{} {id}", T::KIND)))
    }

    /// A page of entries in identifier order. A `limit` of 0 means no limit.
    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<T>> {
        let limit = page_limit(offset, limit)?;

        let sql = format!(
            "SELECT id, name FROM {} ORDER BY id LIMIT ?1 OFFSET ?2",
            T::TABLE
        );
        let rows: Vec<(i64, String)> = sqlx::query_as(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name)| T::from_parts(id.into(), name))
            .collect())
    }

    /// Rename an entry in place. Its identifier does not change.
    pub async fn rename(&self, tx: Option<&mut Tx>, id: T::Id, name: &str) -> Result<()> {
        let name = clean_name(T::KIND, name)?;

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let sql = format!("UPDATE {} SET name = ?1 WHERE id = ?2", T::TABLE);
        let raw: i64 = id.into();
        let affected = sqlx::query(&sql)
            .bind(name)
            .bind(raw)
            .execute(uow.conn())
            .await
            .map_err(|e| Error::on_write(e, format!("{} '{name}'", T::KIND)))?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("{} {id}", T::KIND)));
        }
        uow.finish().await
    }

    /// Answer the identifier registered under `name`.
    pub async fn exists(&self, name: &str) -> Result<T::Id> {
        let name = clean_name(T::KIND, name)?;
        let mut conn = self.db.pool().acquire().await?;
        find_on::<T>(&mut conn, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} '{name}'", T::KIND)))
    }

    /// Answer the identifier for `name`, registering it first if needed.
    pub async fn ensure(&self, tx: Option<&mut Tx>, name: &str) -> Result<T::Id> {
        let name = clean_name(T::KIND, name)?;

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let id = ensure_on::<T>(uow.conn(), name).await?;
        uow.finish().await?;
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Inner functions: accept a connection so they run inside any unit of work.
// ---------------------------------------------------------------------------

pub(crate) async fn insert_on<T: Term>(conn: &mut SqliteConnection, name: &str) -> Result<T::Id> {
    let sql = format!("INSERT INTO {} (name) VALUES (?1)", T::TABLE);
    let res = sqlx::query(&sql)
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::on_write(e, format!("{} '{name}'", T::KIND)))?;
    Ok(res.last_insert_rowid().into())
}

pub(crate) async fn find_on<T: Term>(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<T::Id>> {
    let sql = format!("SELECT id FROM {} WHERE name = ?1", T::TABLE);
    let id: Option<i64> = sqlx::query_scalar(&sql)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(id.map(Into::into))
}

pub(crate) async fn ensure_on<T: Term>(conn: &mut SqliteConnection, name: &str) -> Result<T::Id> {
    match find_on::<T>(conn, name).await? {
        Some(id) => Ok(id),
        None => insert_on::<T>(conn, name).await,
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Trim a vocabulary name, rejecting empty results.
pub(crate) fn clean_name<'a>(kind: &str, name: &'a str) -> Result<&'a str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation(format!("{kind} name cannot be empty")));
    }
    Ok(name)
}

/// Validate paging input and map `limit == 0` to "everything".
pub(crate) fn page_limit(offset: i64, limit: i64) -> Result<i64> {
    if offset < 0 || limit < 0 {
        return Err(Error::Validation(
            "offset and limit must be non-negative integers".into(),
        ));
    }
    Ok(if limit == 0 { i64::MAX } else { limit })
}
