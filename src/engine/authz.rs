//! Authorization resolution.
//!
//! A user may invoke a transition on a document when some group in the
//! user's closure holds the transition's required role in that document's
//! access context. Roles are matched exactly; there is no role hierarchy.

use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::access;
use crate::db::Db;
use crate::error::{Error, Result};
use crate::groups;
use crate::model::{DocumentId, RoleId, UserId};

#[derive(Clone)]
pub struct Authorizer {
    db: Arc<Db>,
}

impl Authorizer {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Succeed if `user` holds `role` on `document`, else
    /// [`Error::Unauthorized`].
    pub async fn authorize(&self, document: DocumentId, user: UserId, role: RoleId) -> Result<()> {
        let mut conn = self.db.pool().acquire().await?;
        authorize_on(&mut conn, document, user, role).await
    }

    pub async fn holds(&self, document: DocumentId, user: UserId, role: RoleId) -> Result<bool> {
        match self.authorize(document, user, role).await {
            Ok(()) => Ok(true),
            Err(Error::Unauthorized) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

pub(crate) async fn authorize_on(
    conn: &mut SqliteConnection,
    document: DocumentId,
    user: UserId,
    required: RoleId,
) -> Result<()> {
    let closure = groups::closure_on(conn, user).await?;
    let roles = access::roles_for_on(conn, document, &closure).await?;

    if roles.contains(&required) {
        return Ok(());
    }

    // Details stay in the log; the caller only learns "denied".
    tracing::debug!(
        %document,
        %user,
        groups = closure.len(),
        "authorization denied"
    );
    Err(Error::Unauthorized)
}
