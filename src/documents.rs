//! Document instances and their audit log.
//!
//! A document is created in its type's initial state. After that only the
//! engine moves it, through [`advance_on`], which pairs the conditioned state
//! update with its audit row.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::model::{
    AuditEntry, AuditId, DocActionId, DocStateId, DocTypeId, Document, DocumentId, UserId,
};
use crate::transitions;

#[derive(Clone)]
pub struct Documents {
    db: Arc<Db>,
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: i64,
    doctype_id: i64,
    state_id: i64,
    title: String,
    version: i64,
    created_by: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: DocumentId(row.id),
            doctype_id: DocTypeId(row.doctype_id),
            state_id: DocStateId(row.state_id),
            title: row.title,
            version: row.version,
            created_by: UserId(row.created_by),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: i64,
    document_id: i64,
    action_id: i64,
    actor_user_id: i64,
    from_state_id: i64,
    to_state_id: i64,
    created_at: DateTime<Utc>,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        AuditEntry {
            id: AuditId(row.id),
            document_id: DocumentId(row.document_id),
            action_id: DocActionId(row.action_id),
            actor: UserId(row.actor_user_id),
            from_state_id: DocStateId(row.from_state_id),
            to_state_id: DocStateId(row.to_state_id),
            timestamp: row.created_at,
        }
    }
}

impl Documents {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Create a document of `doctype` in that type's initial state.
    pub async fn create(
        &self,
        tx: Option<&mut Tx>,
        doctype: DocTypeId,
        title: &str,
        author: UserId,
    ) -> Result<DocumentId> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Validation("document title cannot be empty".into()));
        }

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let initial = transitions::initial_on(uow.conn(), doctype).await?;
        let now = Utc::now();
        let res = sqlx::query(
            "INSERT INTO wf_documents (doctype_id, state_id, title, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        )
        .bind(doctype.0)
        .bind(initial.0)
        .bind(title)
        .bind(author.0)
        .bind(now)
        .execute(uow.conn())
        .await
        .map_err(|e| Error::on_write(e, format!("document '{title}'")))?;
        uow.finish().await?;

        let id = DocumentId(res.last_insert_rowid());
        tracing::info!(document = %id, %doctype, state = %initial, "document created");
        Ok(id)
    }

    pub async fn get(&self, id: DocumentId) -> Result<Document> {
        let mut conn = self.db.pool().acquire().await?;
        get_on(&mut conn, id).await
    }

    /// Documents of `doctype` currently in `state`, in creation order.
    pub async fn in_state(&self, doctype: DocTypeId, state: DocStateId) -> Result<Vec<Document>> {
        let rows: Vec<DocumentRow> = sqlx::query_as(
            "SELECT id, doctype_id, state_id, title, version, created_by, created_at, updated_at
             FROM wf_documents WHERE doctype_id = ?1 AND state_id = ?2 ORDER BY id",
        )
        .bind(doctype.0)
        .bind(state.0)
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.into_iter().map(Document::from).collect())
    }

    /// The audit log of `id`, oldest first.
    pub async fn history(&self, id: DocumentId) -> Result<Vec<AuditEntry>> {
        let mut conn = self.db.pool().acquire().await?;
        get_on(&mut conn, id).await?;

        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, document_id, action_id, actor_user_id, from_state_id, to_state_id, created_at
             FROM wf_document_audit WHERE document_id = ?1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Inner functions
// ---------------------------------------------------------------------------

pub(crate) async fn get_on(conn: &mut SqliteConnection, id: DocumentId) -> Result<Document> {
    let row: Option<DocumentRow> = sqlx::query_as(
        "SELECT id, doctype_id, state_id, title, version, created_by, created_at, updated_at
         FROM wf_documents WHERE id = ?1",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Document::from)
        .ok_or_else(|| Error::NotFound(format!("document {id}")))
}

/// A state change the engine has already authorized.
pub(crate) struct Advance {
    pub document: DocumentId,
    pub action: DocActionId,
    pub actor: UserId,
    pub from: DocStateId,
    pub to: DocStateId,
    /// The document version the engine read `from` at.
    pub version: i64,
}

/// Move a document from `from` to `to` and append the audit row.
///
/// The update only matches while the document is still in `from` at the
/// version that was read, so a transition that keeps the state still races
/// correctly. A miss fails with [`Error::ConcurrentModification`] and writes
/// nothing.
pub(crate) async fn advance_on(conn: &mut SqliteConnection, step: &Advance) -> Result<AuditEntry> {
    let now = Utc::now();

    let updated = sqlx::query(
        "UPDATE wf_documents SET state_id = ?1, version = version + 1, updated_at = ?2
         WHERE id = ?3 AND state_id = ?4 AND version = ?5",
    )
    .bind(step.to.0)
    .bind(now)
    .bind(step.document.0)
    .bind(step.from.0)
    .bind(step.version)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(Error::ConcurrentModification {
            document: step.document,
        });
    }

    let res = sqlx::query(
        "INSERT INTO wf_document_audit (document_id, action_id, actor_user_id, from_state_id, to_state_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(step.document.0)
    .bind(step.action.0)
    .bind(step.actor.0)
    .bind(step.from.0)
    .bind(step.to.0)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    Ok(AuditEntry {
        id: AuditId(res.last_insert_rowid()),
        document_id: step.document,
        action_id: step.action,
        actor: step.actor,
        from_state_id: step.from,
        to_state_id: step.to,
        timestamp: now,
    })
}
