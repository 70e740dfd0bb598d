//! Workflow blueprints.
//!
//! A blueprint describes one document type in TOML: its states, the initial
//! state, and the transition table. Installing a blueprint registers every
//! name it mentions and defines every transition in a single transaction.
//! Installing the same blueprint twice changes nothing.
//!
//! ```toml
//! [doctype]
//! name = "STORAGE_REQ"
//! states = ["INITIAL", "PENDING_APPROVAL", "APPROVED"]
//! initial = "INITIAL"
//!
//! [[transition]]
//! from = "INITIAL"
//! action = "NEW"
//! to = "PENDING_APPROVAL"
//! role = "RA"
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::Deserialize;

use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::model::{
    DocAction, DocActionId, DocStateId, DocType, DocTypeId, Role, RoleId, Transition,
};
use crate::registry::{self, docstate};
use crate::transitions;

#[derive(Debug, Clone, Deserialize)]
pub struct Blueprint {
    pub doctype: DocTypeSpec,
    #[serde(default, rename = "transition")]
    pub transitions: Vec<TransitionSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocTypeSpec {
    pub name: String,
    pub states: Vec<String>,
    pub initial: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionSpec {
    pub from: String,
    pub action: String,
    pub to: String,
    pub role: String,
}

/// Identifiers assigned to a blueprint's names once installed.
#[derive(Debug, Clone)]
pub struct InstalledBlueprint {
    pub doctype: DocTypeId,
    pub states: BTreeMap<String, DocStateId>,
    pub actions: BTreeMap<String, DocActionId>,
    pub roles: BTreeMap<String, RoleId>,
}

impl InstalledBlueprint {
    pub fn state(&self, name: &str) -> Result<DocStateId> {
        lookup(&self.states, "state", name)
    }

    pub fn action(&self, name: &str) -> Result<DocActionId> {
        lookup(&self.actions, "action", name)
    }

    pub fn role(&self, name: &str) -> Result<RoleId> {
        lookup(&self.roles, "role", name)
    }
}

fn lookup<T: Copy>(map: &BTreeMap<String, T>, kind: &str, name: &str) -> Result<T> {
    map.get(name.trim())
        .copied()
        .ok_or_else(|| Error::NotFound(format!("{kind} '{name}' in blueprint")))
}

impl Blueprint {
    /// Parse and validate a blueprint.
    pub fn from_toml(content: &str) -> Result<Self> {
        let blueprint: Blueprint =
            toml::from_str(content).map_err(|e| Error::Config(format!("bad blueprint: {e}")))?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    /// Load every `.toml` file in `dir`, sorted by file name.
    pub fn load_from_dir(dir: &Path) -> Result<Vec<Self>> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read blueprint dir {}: {e}", dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut blueprints = Vec::with_capacity(paths.len());
        for path in paths {
            let content = std::fs::read_to_string(&path)?;
            let blueprint = Self::from_toml(&content).map_err(|e| match e {
                Error::Config(msg) | Error::Validation(msg) => {
                    Error::Config(format!("{}: {msg}", path.display()))
                }
                other => other,
            })?;
            blueprints.push(blueprint);
        }
        Ok(blueprints)
    }

    fn validate(&self) -> Result<()> {
        let name = self.doctype.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("blueprint document type name cannot be empty".into()));
        }

        let mut states = BTreeSet::new();
        for state in &self.doctype.states {
            let state = state.trim();
            if state.is_empty() {
                return Err(Error::Validation(format!("{name}: state name cannot be empty")));
            }
            if !states.insert(state) {
                return Err(Error::Validation(format!("{name}: state '{state}' listed twice")));
            }
        }

        let known = |state: &str| -> Result<()> {
            if states.contains(state.trim()) {
                Ok(())
            } else {
                Err(Error::Validation(format!("{name}: unknown state '{state}'")))
            }
        };

        known(&self.doctype.initial)?;

        let mut triggers = BTreeSet::new();
        for t in &self.transitions {
            known(&t.from)?;
            known(&t.to)?;
            if t.action.trim().is_empty() || t.role.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "{name}: transition from '{}' needs an action and a role",
                    t.from
                )));
            }
            if !triggers.insert((t.from.trim(), t.action.trim())) {
                return Err(Error::Validation(format!(
                    "{name}: action '{}' defined twice from state '{}'",
                    t.action, t.from
                )));
            }
        }
        Ok(())
    }

    /// Register the blueprint's vocabulary and transitions.
    pub async fn install(&self, db: &Db, tx: Option<&mut Tx>) -> Result<InstalledBlueprint> {
        self.validate()?;

        let mut uow = UnitOfWork::join_or_begin(db, tx).await?;
        let conn = uow.conn();

        let name = registry::clean_name("document type", &self.doctype.name)?;
        let doctype = registry::ensure_on::<DocType>(conn, name).await?;

        let mut states = BTreeMap::new();
        for name in &self.doctype.states {
            let name = name.trim();
            let id = docstate::ensure_on(conn, doctype, name).await?;
            states.insert(name.to_string(), id);
        }

        let mut installed = InstalledBlueprint {
            doctype,
            states,
            actions: BTreeMap::new(),
            roles: BTreeMap::new(),
        };

        for t in &self.transitions {
            let action = t.action.trim();
            let role = t.role.trim();
            if !installed.actions.contains_key(action) {
                let id = registry::ensure_on::<DocAction>(conn, action).await?;
                installed.actions.insert(action.to_string(), id);
            }
            if !installed.roles.contains_key(role) {
                let id = registry::ensure_on::<Role>(conn, role).await?;
                installed.roles.insert(role.to_string(), id);
            }

            let transition = Transition {
                doctype_id: doctype,
                from_state_id: installed.state(&t.from)?,
                action_id: installed.action(action)?,
                to_state_id: installed.state(&t.to)?,
                required_role_id: installed.role(role)?,
            };
            transitions::define_on(conn, &transition).await?;
        }

        transitions::set_initial_on(conn, doctype, installed.state(&self.doctype.initial)?).await?;
        uow.finish().await?;

        tracing::info!(
            doctype = %self.doctype.name,
            states = installed.states.len(),
            transitions = self.transitions.len(),
            "blueprint installed"
        );
        Ok(installed)
    }
}
