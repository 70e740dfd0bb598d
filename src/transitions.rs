//! The transition table.
//!
//! Per document type, `(from state, action)` maps to at most one
//! `(to state, required role)`. The table also records each document type's
//! initial state. A state with no outgoing rows is terminal.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::model::{DocActionId, DocStateId, DocTypeId, RoleId, Transition};
use crate::registry::docstate;

#[derive(Clone)]
pub struct TransitionTable {
    db: Arc<Db>,
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    doctype_id: i64,
    from_state_id: i64,
    action_id: i64,
    to_state_id: i64,
    required_role_id: i64,
}

impl From<TransitionRow> for Transition {
    fn from(row: TransitionRow) -> Self {
        Transition {
            doctype_id: DocTypeId(row.doctype_id),
            from_state_id: DocStateId(row.from_state_id),
            action_id: DocActionId(row.action_id),
            to_state_id: DocStateId(row.to_state_id),
            required_role_id: RoleId(row.required_role_id),
        }
    }
}

impl TransitionTable {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Define `(doctype, from, action) -> to`, invocable by holders of
    /// `required_role`.
    ///
    /// Redefining an identical transition is a no-op; any other definition
    /// for the same trigger is a [`Error::Conflict`].
    pub async fn define(
        &self,
        tx: Option<&mut Tx>,
        doctype: DocTypeId,
        from: DocStateId,
        action: DocActionId,
        to: DocStateId,
        required_role: RoleId,
    ) -> Result<()> {
        let transition = Transition {
            doctype_id: doctype,
            from_state_id: from,
            action_id: action,
            to_state_id: to,
            required_role_id: required_role,
        };

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        define_on(uow.conn(), &transition).await?;
        uow.finish().await
    }

    /// Remove the transition for `(doctype, from, action)` if defined.
    pub async fn undefine(
        &self,
        tx: Option<&mut Tx>,
        doctype: DocTypeId,
        from: DocStateId,
        action: DocActionId,
    ) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        sqlx::query(
            "DELETE FROM wf_transitions WHERE doctype_id = ?1 AND from_state_id = ?2 AND action_id = ?3",
        )
        .bind(doctype.0)
        .bind(from.0)
        .bind(action.0)
        .execute(uow.conn())
        .await?;
        uow.finish().await
    }

    /// Answer `(to state, required role)` for the trigger.
    ///
    /// [`Error::NotFound`] here is an ordinary outcome: the action simply
    /// does not apply in that state.
    pub async fn resolve(
        &self,
        doctype: DocTypeId,
        from: DocStateId,
        action: DocActionId,
    ) -> Result<(DocStateId, RoleId)> {
        let mut conn = self.db.pool().acquire().await?;
        let t = resolve_on(&mut conn, doctype, from, action).await?;
        Ok((t.to_state_id, t.required_role_id))
    }

    /// Every transition leaving `from`, ordered by action.
    pub async fn outgoing(&self, doctype: DocTypeId, from: DocStateId) -> Result<Vec<Transition>> {
        let mut conn = self.db.pool().acquire().await?;
        outgoing_on(&mut conn, doctype, from).await
    }

    /// Whether no transition leaves `state`.
    pub async fn is_terminal(&self, doctype: DocTypeId, state: DocStateId) -> Result<bool> {
        Ok(self.outgoing(doctype, state).await?.is_empty())
    }

    /// Designate the state new documents of `doctype` start in.
    pub async fn set_initial(
        &self,
        tx: Option<&mut Tx>,
        doctype: DocTypeId,
        state: DocStateId,
    ) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        set_initial_on(uow.conn(), doctype, state).await?;
        uow.finish().await
    }

    pub async fn initial(&self, doctype: DocTypeId) -> Result<DocStateId> {
        let mut conn = self.db.pool().acquire().await?;
        initial_on(&mut conn, doctype).await
    }
}

fn no_such_transition(doctype: DocTypeId, from: DocStateId, action: DocActionId) -> Error {
    Error::NotFound(format!(
        "no such transition: document type {doctype}, state {from}, action {action}"
    ))
}

// ---------------------------------------------------------------------------
// Inner functions
// ---------------------------------------------------------------------------

pub(crate) async fn define_on(conn: &mut SqliteConnection, t: &Transition) -> Result<()> {
    docstate::require_member_on(conn, t.doctype_id, t.from_state_id).await?;
    docstate::require_member_on(conn, t.doctype_id, t.to_state_id).await?;

    if let Some(existing) = find_on(conn, t.doctype_id, t.from_state_id, t.action_id).await? {
        // Only an exact match is a no-op. A changed role conflicts like a
        // changed target.
        if existing == *t {
            return Ok(());
        }
        return Err(Error::Conflict(format!(
            "document type {} already maps state {} on action {} to state {} (role {})",
            t.doctype_id,
            t.from_state_id,
            t.action_id,
            existing.to_state_id,
            existing.required_role_id
        )));
    }

    sqlx::query(
        "INSERT INTO wf_transitions (doctype_id, from_state_id, action_id, to_state_id, required_role_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(t.doctype_id.0)
    .bind(t.from_state_id.0)
    .bind(t.action_id.0)
    .bind(t.to_state_id.0)
    .bind(t.required_role_id.0)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::on_write(
            e,
            format!(
                "transition from state {} on action {}",
                t.from_state_id, t.action_id
            ),
        )
    })?;

    tracing::debug!(
        doctype = %t.doctype_id,
        from = %t.from_state_id,
        action = %t.action_id,
        to = %t.to_state_id,
        role = %t.required_role_id,
        "transition defined"
    );
    Ok(())
}

pub(crate) async fn find_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    from: DocStateId,
    action: DocActionId,
) -> Result<Option<Transition>> {
    let row: Option<TransitionRow> = sqlx::query_as(
        "SELECT doctype_id, from_state_id, action_id, to_state_id, required_role_id
         FROM wf_transitions
         WHERE doctype_id = ?1 AND from_state_id = ?2 AND action_id = ?3",
    )
    .bind(doctype.0)
    .bind(from.0)
    .bind(action.0)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row.map(Transition::from))
}

pub(crate) async fn resolve_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    from: DocStateId,
    action: DocActionId,
) -> Result<Transition> {
    find_on(conn, doctype, from, action)
        .await?
        .ok_or_else(|| no_such_transition(doctype, from, action))
}

pub(crate) async fn outgoing_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    from: DocStateId,
) -> Result<Vec<Transition>> {
    let rows: Vec<TransitionRow> = sqlx::query_as(
        "SELECT doctype_id, from_state_id, action_id, to_state_id, required_role_id
         FROM wf_transitions
         WHERE doctype_id = ?1 AND from_state_id = ?2
         ORDER BY action_id",
    )
    .bind(doctype.0)
    .bind(from.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(Transition::from).collect())
}

pub(crate) async fn set_initial_on(
    conn: &mut SqliteConnection,
    doctype: DocTypeId,
    state: DocStateId,
) -> Result<()> {
    docstate::require_member_on(conn, doctype, state).await?;

    sqlx::query(
        "INSERT INTO wf_initial_states (doctype_id, state_id) VALUES (?1, ?2)
         ON CONFLICT (doctype_id) DO UPDATE SET state_id = excluded.state_id",
    )
    .bind(doctype.0)
    .bind(state.0)
    .execute(&mut *conn)
    .await
    .map_err(|e| Error::on_write(e, format!("initial state of document type {doctype}")))?;
    Ok(())
}

pub(crate) async fn initial_on(conn: &mut SqliteConnection, doctype: DocTypeId) -> Result<DocStateId> {
    let state: Option<i64> =
        sqlx::query_scalar("SELECT state_id FROM wf_initial_states WHERE doctype_id = ?1")
            .bind(doctype.0)
            .fetch_optional(&mut *conn)
            .await?;
    state
        .map(DocStateId)
        .ok_or_else(|| Error::NotFound(format!("initial state of document type {doctype}")))
}
