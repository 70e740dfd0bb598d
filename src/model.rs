//! Core data model.
//!
//! Everything is addressed by integer identity. Vocabulary entities are
//! plain (id, name) pairs; the workflow itself lives in the relations
//! between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> i64 {
                id.0
            }
        }
    };
}

id_type!(
    /// Identifies a class of document.
    DocTypeId
);
id_type!(
    /// Identifies a state within one document type.
    DocStateId
);
id_type!(
    /// Identifies an action name.
    DocActionId
);
id_type!(RoleId);
id_type!(UserId);
id_type!(GroupId);
id_type!(DocumentId);
id_type!(AccessContextId);
id_type!(AuditId);

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocType {
    pub id: DocTypeId,
    pub name: String,
}

/// A named node in one document type's state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocState {
    pub id: DocStateId,
    pub doctype_id: DocTypeId,
    pub name: String,
}

/// A trigger name shared across document types (e.g. APPROVE).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocAction {
    pub id: DocActionId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Users & groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub active: bool,
}

/// Fields needed to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl NewUser {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    /// Exactly one fixed member, created with its user.
    Singleton,
    /// Any number of users and child groups.
    Named,
}

impl GroupKind {
    /// Storage code in `wf_groups_master.group_type`.
    pub fn code(self) -> &'static str {
        match self {
            GroupKind::Singleton => "S",
            GroupKind::Named => "G",
        }
    }
}

impl std::str::FromStr for GroupKind {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S" => Ok(GroupKind::Singleton),
            "G" => Ok(GroupKind::Named),
            _ => Err(crate::error::Error::Other(format!("unknown group type: {s}"))),
        }
    }
}

impl std::fmt::Display for GroupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GroupKind::Singleton => "singleton",
            GroupKind::Named => "named",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub kind: GroupKind,
    /// The owning user, for singleton groups only.
    pub owner: Option<UserId>,
}

// ---------------------------------------------------------------------------
// Access & transitions
// ---------------------------------------------------------------------------

/// A role granted to one group on one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    pub id: AccessContextId,
    pub document_id: DocumentId,
    pub group_id: GroupId,
    pub role_id: RoleId,
}

/// A deterministic edge `(doctype, from, action) -> to`, gated by a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub doctype_id: DocTypeId,
    pub from_state_id: DocStateId,
    pub action_id: DocActionId,
    pub to_state_id: DocStateId,
    pub required_role_id: RoleId,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub doctype_id: DocTypeId,
    pub state_id: DocStateId,
    pub title: String,
    /// Bumped by every applied transition, including ones that keep the state.
    pub version: i64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of a document's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub document_id: DocumentId,
    pub action_id: DocActionId,
    pub actor: UserId,
    pub from_state_id: DocStateId,
    pub to_state_id: DocStateId,
    pub timestamp: DateTime<Utc>,
}
