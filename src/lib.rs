//! # docflow
//!
//! SQLite-backed document workflow engine.
//!
//! Documents move between the states of their type through named actions.
//! Each transition requires a role, and roles are granted per document to
//! groups. A user acts with every role held by any group they reach through
//! the group hierarchy. Every committed transition leaves an audit row.

pub mod access;
pub mod blueprint;
pub mod config;
pub mod db;
pub mod documents;
pub mod engine;
pub mod error;
pub mod flow;
pub mod groups;
pub mod model;
pub mod registry;
pub mod telemetry;
pub mod transitions;
pub mod users;

pub use error::{Error, Result};
pub use flow::Flow;
