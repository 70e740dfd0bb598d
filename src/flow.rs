//! One handle over every workflow component.
//!
//! `Flow` wires the registries, the group model, access contexts, the
//! transition table and the engine to a single database. Components are
//! cheap to clone and share the same pool.

use std::sync::Arc;

use crate::access::AccessContexts;
use crate::blueprint::{Blueprint, InstalledBlueprint};
use crate::db::{Db, Tx};
use crate::documents::Documents;
use crate::engine::{Authorizer, Engine};
use crate::error::Result;
use crate::groups::Groups;
use crate::registry::{DocActions, DocStates, DocTypes, Roles};
use crate::transitions::TransitionTable;
use crate::users::Users;

pub struct Flow {
    db: Arc<Db>,
    pub doctypes: DocTypes,
    pub docstates: DocStates,
    pub actions: DocActions,
    pub roles: Roles,
    pub users: Users,
    pub groups: Groups,
    pub access: AccessContexts,
    pub transitions: TransitionTable,
    pub documents: Documents,
    pub authorizer: Authorizer,
    pub engine: Engine<Users>,
}

impl Flow {
    pub fn new(db: Arc<Db>) -> Self {
        let users = Users::new(Arc::clone(&db));
        Self {
            doctypes: DocTypes::new(Arc::clone(&db)),
            docstates: DocStates::new(Arc::clone(&db)),
            actions: DocActions::new(Arc::clone(&db)),
            roles: Roles::new(Arc::clone(&db)),
            groups: Groups::new(Arc::clone(&db)),
            access: AccessContexts::new(Arc::clone(&db)),
            transitions: TransitionTable::new(Arc::clone(&db)),
            documents: Documents::new(Arc::clone(&db)),
            authorizer: Authorizer::new(Arc::clone(&db)),
            engine: Engine::new(Arc::clone(&db), users.clone()),
            users,
            db,
        }
    }

    /// A flow over a fresh, migrated in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Ok(Self::new(Arc::new(Db::in_memory().await?)))
    }

    pub fn db(&self) -> &Arc<Db> {
        &self.db
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.db.begin().await
    }

    pub async fn install(
        &self,
        tx: Option<&mut Tx>,
        blueprint: &Blueprint,
    ) -> Result<InstalledBlueprint> {
        blueprint.install(&self.db, tx).await
    }
}
