//! Document states. Each state belongs to exactly one document type and its
//! name is unique within that type only.

use std::sync::Arc;

use sqlx::SqliteConnection;

use super::{clean_name, page_limit};
use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::model::{DocState, DocStateId, DocTypeId};

const KIND: &str = "document state";

#[derive(Clone)]
pub struct DocStates {
    db: Arc<Db>,
}

#[derive(sqlx::FromRow)]
struct DocStateRow {
    id: i64,
    doctype_id: i64,
    name: String,
}

impl From<DocStateRow> for DocState {
    fn from(row: DocStateRow) -> Self {
        DocState {
            id: DocStateId(row.id),
            doctype_id: DocTypeId(row.doctype_id),
            name: row.name,
        }
    }
}

impl DocStates {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Register a new state under `doctype`.
    pub async fn create(
        &self,
        tx: Option<&mut Tx>,
        doctype: DocTypeId,
        name: &str,
    ) -> Result<DocStateId> {
        let name = clean_name(KIND, name)?;

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let id = insert_on(uow.conn(), doctype, name).await?;
        uow.finish().await?;

        tracing::debug!(%doctype, %id, name, "document state created");
        Ok(id)
    }

    pub async fn get(&self, id: DocStateId) -> Result<DocState> {
        let mut conn = self.db.pool().acquire().await?;
        get_on(&mut conn, id).await
    }

    /// A page of states across all document types, in identifier order.
    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<DocState>> {
        let limit = page_limit(offset, limit)?;

        let rows: Vec<DocStateRow> = sqlx::query_as(
            "SELECT id, doctype_id, name FROM wf_docstates_master ORDER BY id LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(DocState::from).collect())
    }

    /// All states of one document type, in identifier order.
    pub async fn list_for(&self, doctype: DocTypeId) -> Result<Vec<DocState>> {
        let rows: Vec<DocStateRow> = sqlx::query_as(
            "SELECT id, doctype_id, name FROM wf_docstates_master WHERE doctype_id = ?1 ORDER BY id",
        )
        .bind(doctype.0)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(DocState::from).collect())
    }

    pub async fn rename(&self, tx: Option<&mut Tx>, id: DocStateId, name: &str) -> Result<()> {
        let name = clean_name(KIND, name)?;

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let affected = sqlx::query("UPDATE wf_docstates_master SET name = ?1 WHERE id = ?2")
            .bind(name)
            .bind(id.0)
            .execute(uow.conn())
            .await
            .map_err(|e| Error::on_write(e, format!("{KIND} '{name}'")))?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("{KIND} {id}")));
        }
        uow.finish().await
    }

    /// Answer the identifier of the state `name` within `doctype`.
    pub async fn exists(&self, doctype: DocTypeId, name: &str) -> Result<DocStateId> {
        let name = clean_name(KIND, name)?;
        let mut conn = self.db.pool().acquire().await?;
        find_on(&mut conn, doctype, name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{KIND} '{name}' of document type {doctype}")))
    }
}

// ---------------------------------------------------------------------------
// Inner functions
// ---------------------------------------------------------------------------

pub(crate) async fn insert_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    name: &str,
) -> Result<DocStateId> {
    let res = sqlx::query("INSERT INTO wf_docstates_master (doctype_id, name) VALUES (?1, ?2)")
        .bind(doctype.0)
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::on_write(e, format!("{KIND} '{name}' of document type {doctype}")))?;
    Ok(DocStateId(res.last_insert_rowid()))
}

pub(crate) async fn get_on(conn: &mut SqliteConnection, id: DocStateId) -> Result<DocState> {
    if id.0 <= 0 {
        return Err(Error::NotFound(format!("{KIND} {id}")));
    }

    let row: Option<DocStateRow> =
        sqlx::query_as("SELECT id, doctype_id, name FROM wf_docstates_master WHERE id = ?1")
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?;

    row.map(DocState::from)
        .ok_or_else(|| Error::NotFound(format!("{KIND} {id}")))
}

pub(crate) async fn find_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    name: &str,
) -> Result<Option<DocStateId>> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM wf_docstates_master WHERE doctype_id = ?1 AND name = ?2",
    )
    .bind(doctype.0)
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id.map(DocStateId))
}

pub(crate) async fn ensure_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    name: &str,
) -> Result<DocStateId> {
    match find_on(conn, doctype, name).await? {
        Some(id) => Ok(id),
        None => insert_on(conn, doctype, name).await,
    }
}

/// Fail with a validation error unless `state` belongs to `doctype`.
pub(crate) async fn require_member_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    state: DocStateId,
) -> Result<()> {
    let owner = get_on(conn, state).await?.doctype_id;
    if owner != doctype {
        return Err(Error::Validation(format!(
            "{KIND} {state} belongs to document type {owner}, not {doctype}"
        )));
    }
    Ok(())
}
