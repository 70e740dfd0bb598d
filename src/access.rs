//! Access contexts: role grants scoped to one document and one group.

use std::collections::BTreeSet;
use std::sync::Arc;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::model::{AccessContext, AccessContextId, DocumentId, GroupId, RoleId};

#[derive(Clone)]
pub struct AccessContexts {
    db: Arc<Db>,
}

#[derive(sqlx::FromRow)]
struct AccessContextRow {
    id: i64,
    document_id: i64,
    group_id: i64,
    role_id: i64,
}

impl From<AccessContextRow> for AccessContext {
    fn from(row: AccessContextRow) -> Self {
        AccessContext {
            id: AccessContextId(row.id),
            document_id: DocumentId(row.document_id),
            group_id: GroupId(row.group_id),
            role_id: RoleId(row.role_id),
        }
    }
}

impl AccessContexts {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Grant `role` to `group` on `document`. Granting twice is a no-op.
    pub async fn grant(
        &self,
        tx: Option<&mut Tx>,
        document: DocumentId,
        group: GroupId,
        role: RoleId,
    ) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        grant_on(uow.conn(), document, group, role).await?;
        uow.finish().await?;

        tracing::debug!(%document, %group, %role, "role granted");
        Ok(())
    }

    /// Withdraw a grant. Revoking an absent grant is a no-op.
    pub async fn revoke(
        &self,
        tx: Option<&mut Tx>,
        document: DocumentId,
        group: GroupId,
        role: RoleId,
    ) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let removed = sqlx::query(
            "DELETE FROM wf_access_contexts WHERE document_id = ?1 AND group_id = ?2 AND role_id = ?3",
        )
        .bind(document.0)
        .bind(group.0)
        .bind(role.0)
        .execute(uow.conn())
        .await?
        .rows_affected();
        uow.finish().await?;

        if removed > 0 {
            tracing::debug!(%document, %group, %role, "role revoked");
        }
        Ok(())
    }

    /// Union of the roles held on `document` by any group in `groups`.
    pub async fn roles_for(
        &self,
        document: DocumentId,
        groups: &BTreeSet<GroupId>,
    ) -> Result<BTreeSet<RoleId>> {
        let mut conn = self.db.pool().acquire().await?;
        roles_for_on(&mut conn, document, groups).await
    }

    /// Every grant on `document`, in grant order.
    pub async fn grants(&self, document: DocumentId) -> Result<Vec<AccessContext>> {
        let rows: Vec<AccessContextRow> = sqlx::query_as(
            "SELECT id, document_id, group_id, role_id FROM wf_access_contexts
             WHERE document_id = ?1 ORDER BY id",
        )
        .bind(document.0)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(AccessContext::from).collect())
    }
}

// ---------------------------------------------------------------------------
// Inner functions
// ---------------------------------------------------------------------------

pub(crate) async fn grant_on(
    conn: &mut SqliteConnection,
    document: DocumentId,
    group: GroupId,
    role: RoleId,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO wf_access_contexts (document_id, group_id, role_id) VALUES (?1, ?2, ?3)
         ON CONFLICT (document_id, group_id, role_id) DO NOTHING",
    )
    .bind(document.0)
    .bind(group.0)
    .bind(role.0)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::on_write(
            e,
            format!("grant of role {role} to group {group} on document {document}"),
        )
    })?;
    Ok(())
}

pub(crate) async fn roles_for_on(
    conn: &mut SqliteConnection,
    document: DocumentId,
    groups: &BTreeSet<GroupId>,
) -> Result<BTreeSet<RoleId>> {
    if groups.is_empty() {
        return Ok(BTreeSet::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT DISTINCT role_id FROM wf_access_contexts WHERE document_id = ",
    );
    query.push_bind(document.0);
    query.push(" AND group_id IN (");
    let mut ids = query.separated(", ");
    for group in groups {
        ids.push_bind(group.0);
    }
    ids.push_unseparated(")");

    let roles: Vec<i64> = query.build_query_scalar().fetch_all(&mut *conn).await?;
    Ok(roles.into_iter().map(RoleId).collect())
}
