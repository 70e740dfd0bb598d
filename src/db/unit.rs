//! Unit of work: one interface over caller-supplied and self-managed
//! transactions.
//!
//! Components open a unit with [`UnitOfWork::join_or_begin`], run every
//! statement against [`UnitOfWork::conn`], and end with
//! [`UnitOfWork::finish`]. A joined unit leaves commit and rollback to the
//! caller; an owned unit commits on `finish` and rolls back when dropped
//! early (e.g. on `?`).

use sqlx::SqliteConnection;

use super::{Db, Tx};
use crate::error::Result;

pub struct UnitOfWork<'t> {
    inner: Inner<'t>,
}

enum Inner<'t> {
    Owned(Tx),
    Joined(&'t mut Tx),
}

impl<'t> UnitOfWork<'t> {
    /// Join `tx` if the caller supplied one, otherwise begin a fresh one.
    pub async fn join_or_begin(db: &Db, tx: Option<&'t mut Tx>) -> Result<Self> {
        let inner = match tx {
            Some(tx) => Inner::Joined(tx),
            None => Inner::Owned(db.begin().await?),
        };
        Ok(Self { inner })
    }

    /// The connection every statement of this unit must run on.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        match &mut self.inner {
            Inner::Owned(tx) => &mut **tx,
            Inner::Joined(tx) => &mut ***tx,
        }
    }

    pub fn is_joined(&self) -> bool {
        matches!(self.inner, Inner::Joined(_))
    }

    /// Commit an owned unit; a joined unit is left to its caller.
    pub async fn finish(self) -> Result<()> {
        if let Inner::Owned(tx) = self.inner {
            tx.commit().await?;
        }
        Ok(())
    }
}
