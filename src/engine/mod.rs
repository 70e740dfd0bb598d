//! The workflow engine. The only writer of document state.
//!
//! [`Engine::apply`] reads the document, resolves the transition, authorizes
//! the user and moves the document inside one transaction. The move is
//! conditioned on the document still being at the version that was read; if
//! another writer got there first it fails with
//! [`Error::ConcurrentModification`] and the caller starts over.
//!
//! [`Engine::prepare`] and [`Engine::commit`] expose the two halves for
//! callers that confirm with a user in between. `commit` authorizes again
//! against its own transaction before writing.

mod authz;

pub use authz::Authorizer;

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use sqlx::SqliteConnection;
use tracing::Instrument;

use crate::db::{Db, Tx, UnitOfWork};
use crate::documents::{self, Advance};
use crate::error::{Error, Result};
use crate::model::{
    AuditEntry, DocActionId, DocStateId, DocTypeId, DocumentId, RoleId, Transition, UserId,
};
use crate::telemetry::{flow, metrics};
use crate::transitions;
use crate::users::{UserDirectory, Users};
use crate::{access, groups};

/// A transition that passed every check and awaits [`Engine::commit`].
///
/// Only the engine can build one. It is consumed by `commit`.
#[derive(Debug)]
pub struct Prepared {
    document: DocumentId,
    doctype: DocTypeId,
    action: DocActionId,
    actor: UserId,
    from: DocStateId,
    to: DocStateId,
    version: i64,
    required_role: RoleId,
}

impl Prepared {
    pub fn document(&self) -> DocumentId {
        self.document
    }

    pub fn action(&self) -> DocActionId {
        self.action
    }

    /// The state the document was read in.
    pub fn from(&self) -> DocStateId {
        self.from
    }

    /// The state the document moves to.
    pub fn to(&self) -> DocStateId {
        self.to
    }

    /// The document version the checks ran against.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn required_role(&self) -> RoleId {
        self.required_role
    }
}

/// A committed transition.
#[derive(Debug, Clone)]
pub struct Applied {
    pub new_state: DocStateId,
    pub audit: AuditEntry,
}

pub struct Engine<U = Users> {
    db: Arc<Db>,
    users: U,
}

impl<U: UserDirectory> Engine<U> {
    pub fn new(db: Arc<Db>, users: U) -> Self {
        Self { db, users }
    }

    /// Apply `action` to `document` on behalf of `user`.
    ///
    /// Checks and write share one transaction: the caller's `tx` when given,
    /// in which case the caller decides when to commit, or a fresh one.
    pub async fn apply(
        &self,
        tx: Option<&mut Tx>,
        document: DocumentId,
        user: UserId,
        action: DocActionId,
    ) -> Result<Applied> {
        let span = flow::start_apply_span(document, user, action);
        let started = Instant::now();

        let result = async {
            let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
            let prepared = self.prepare_on(uow.conn(), document, user, action).await?;
            let audit = advance_on(uow.conn(), &prepared).await?;
            uow.finish().await?;
            Ok(applied(prepared, audit))
        }
        .instrument(span.clone())
        .await;

        flow::record_outcome(&span, &result);
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "flow.apply")],
        );
        result
    }

    /// [`Engine::apply`], restarted from the top while the failure is
    /// retryable, up to `max_attempts` tries in total.
    pub async fn apply_with_retry(
        &self,
        document: DocumentId,
        user: UserId,
        action: DocActionId,
        max_attempts: u32,
    ) -> Result<Applied> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.apply(None, document, user, action).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(%document, attempt, error = %e, "retrying apply");
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                result => return result,
            }
        }
    }

    /// Check everything `apply` checks, without writing.
    pub async fn prepare(
        &self,
        document: DocumentId,
        user: UserId,
        action: DocActionId,
    ) -> Result<Prepared> {
        let mut conn = self.db.pool().acquire().await?;
        self.prepare_on(&mut conn, document, user, action).await
    }

    /// Move the document and append its audit row.
    ///
    /// The user and their role are checked again inside the write
    /// transaction, so a grant or membership revoked after `prepare` still
    /// denies the transition.
    pub async fn commit(&self, tx: Option<&mut Tx>, prepared: Prepared) -> Result<Applied> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;

        if !self.users.contains(uow.conn(), prepared.actor).await? {
            metrics::transitions_denied().add(1, &[KeyValue::new("reason", "unknown_user")]);
            return Err(Error::NotFound(format!("user {}", prepared.actor)));
        }
        self.authorize_on(
            uow.conn(),
            prepared.document,
            prepared.actor,
            prepared.required_role,
        )
        .await?;

        let audit = advance_on(uow.conn(), &prepared).await?;
        uow.finish().await?;
        Ok(applied(prepared, audit))
    }

    /// Whether `user` could apply `action` to `document` right now.
    pub async fn can_apply(
        &self,
        document: DocumentId,
        user: UserId,
        action: DocActionId,
    ) -> Result<bool> {
        match self.prepare(document, user, action).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_denial() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Transitions out of the document's current state that `user` holds
    /// the role for.
    pub async fn available_actions(
        &self,
        document: DocumentId,
        user: UserId,
    ) -> Result<Vec<Transition>> {
        let mut conn = self.db.pool().acquire().await?;

        let doc = documents::get_on(&mut conn, document).await?;
        if !self.users.contains(&mut conn, user).await? {
            return Ok(Vec::new());
        }

        let outgoing = transitions::outgoing_on(&mut conn, doc.doctype_id, doc.state_id).await?;
        if outgoing.is_empty() {
            return Ok(outgoing);
        }

        let closure = groups::closure_on(&mut conn, user).await?;
        let roles = access::roles_for_on(&mut conn, document, &closure).await?;
        Ok(outgoing
            .into_iter()
            .filter(|t| roles.contains(&t.required_role_id))
            .collect())
    }

    async fn prepare_on(
        &self,
        conn: &mut SqliteConnection,
        document: DocumentId,
        user: UserId,
        action: DocActionId,
    ) -> Result<Prepared> {
        // 1. Where is the document now?
        let doc = documents::get_on(conn, document).await?;
        if !self.users.contains(conn, user).await? {
            metrics::transitions_denied().add(1, &[KeyValue::new("reason", "unknown_user")]);
            return Err(Error::NotFound(format!("user {user}")));
        }

        // 2. Does the action lead anywhere from here?
        let transition = match transitions::resolve_on(conn, doc.doctype_id, doc.state_id, action)
            .await
        {
            Ok(t) => t,
            Err(Error::NotFound(_)) => {
                metrics::transitions_denied().add(1, &[KeyValue::new("reason", "no_transition")]);
                return Err(Error::RejectedAction { document, action });
            }
            Err(e) => return Err(e),
        };

        // 3 + 4. Does the user's group closure hold the role on this document?
        self.authorize_on(conn, document, user, transition.required_role_id).await?;

        Ok(Prepared {
            document,
            doctype: doc.doctype_id,
            action,
            actor: user,
            from: doc.state_id,
            to: transition.to_state_id,
            version: doc.version,
            required_role: transition.required_role_id,
        })
    }

    async fn authorize_on(
        &self,
        conn: &mut SqliteConnection,
        document: DocumentId,
        user: UserId,
        required: RoleId,
    ) -> Result<()> {
        let result = authz::authorize_on(conn, document, user, required).await;
        if let Err(Error::Unauthorized) = result {
            metrics::transitions_denied().add(1, &[KeyValue::new("reason", "unauthorized")]);
        }
        result
    }
}

async fn advance_on(conn: &mut SqliteConnection, prepared: &Prepared) -> Result<AuditEntry> {
    let step = Advance {
        document: prepared.document,
        action: prepared.action,
        actor: prepared.actor,
        from: prepared.from,
        to: prepared.to,
        version: prepared.version,
    };

    let result = documents::advance_on(conn, &step).await;
    if let Err(Error::ConcurrentModification { .. }) = result {
        tracing::info!(
            document = %prepared.document,
            version = prepared.version,
            "document changed underneath apply"
        );
        metrics::concurrent_modifications().add(1, &[]);
    }
    result
}

fn applied(prepared: Prepared, audit: AuditEntry) -> Applied {
    flow::record_state_transition(&tracing::Span::current(), prepared.from.0, prepared.to.0);
    tracing::info!(
        document = %prepared.document,
        action = %prepared.action,
        user = %prepared.actor,
        from = %prepared.from,
        to = %prepared.to,
        "transition applied"
    );
    metrics::transitions_applied()
        .add(1, &[KeyValue::new("doctype", prepared.doctype.0.to_string())]);

    Applied {
        new_state: prepared.to,
        audit,
    }
}
