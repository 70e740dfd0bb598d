//! Groups and the group hierarchy.
//!
//! Every user owns exactly one singleton group, which lets the access model
//! treat individuals and teams uniformly as grantees. Named groups hold users
//! directly and other groups as children; an edge `parent -> child` means
//! "parent contains child", so members of the child act with the parent's
//! grants. The containment graph is kept acyclic.
//!
//! Traversals are breadth-first over integer ids with a visited set. They
//! never recurse, and they tolerate a cycle even though insertion forbids
//! one.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use sqlx::SqliteConnection;

use crate::db::{Db, Tx, UnitOfWork};
use crate::error::{Error, Result};
use crate::model::{Group, GroupId, GroupKind, UserId};
use crate::registry::{clean_name, page_limit};

#[derive(Clone)]
pub struct Groups {
    db: Arc<Db>,
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: i64,
    name: String,
    group_type: String,
    owner_user_id: Option<i64>,
}

impl GroupRow {
    fn try_into_group(self) -> Result<Group> {
        Ok(Group {
            id: GroupId(self.id),
            name: self.name,
            kind: self.group_type.parse()?,
            owner: self.owner_user_id.map(UserId),
        })
    }
}

impl Groups {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    /// Create the singleton group of `user`.
    ///
    /// Fails with [`Error::Conflict`] if the user already owns one.
    pub async fn new_singleton(&self, tx: Option<&mut Tx>, user: UserId) -> Result<GroupId> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let id = new_singleton_on(uow.conn(), user).await?;
        uow.finish().await?;
        Ok(id)
    }

    /// Create a named group. Singleton groups come only from
    /// [`Groups::new_singleton`].
    pub async fn create(&self, tx: Option<&mut Tx>, name: &str, kind: GroupKind) -> Result<GroupId> {
        let name = clean_name("group", name)?;
        if kind == GroupKind::Singleton {
            return Err(Error::Validation(
                "singleton groups are created per user, not by name".into(),
            ));
        }

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let res = sqlx::query("INSERT INTO wf_groups_master (name, group_type) VALUES (?1, ?2)")
            .bind(name)
            .bind(GroupKind::Named.code())
            .execute(uow.conn())
            .await
            .map_err(|e| Error::on_write(e, format!("group '{name}'")))?;
        uow.finish().await?;

        let id = GroupId(res.last_insert_rowid());
        tracing::debug!(%id, name, "group created");
        Ok(id)
    }

    pub async fn get(&self, id: GroupId) -> Result<Group> {
        let mut conn = self.db.pool().acquire().await?;
        get_on(&mut conn, id).await
    }

    pub async fn list(&self, offset: i64, limit: i64) -> Result<Vec<Group>> {
        let limit = page_limit(offset, limit)?;

        let rows: Vec<GroupRow> = sqlx::query_as(
            "SELECT id, name, group_type, owner_user_id FROM wf_groups_master
             ORDER BY id LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(GroupRow::try_into_group).collect()
    }

    pub async fn rename(&self, tx: Option<&mut Tx>, id: GroupId, name: &str) -> Result<()> {
        let name = clean_name("group", name)?;

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        let affected = sqlx::query("UPDATE wf_groups_master SET name = ?1 WHERE id = ?2")
            .bind(name)
            .bind(id.0)
            .execute(uow.conn())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(Error::NotFound(format!("group {id}")));
        }
        uow.finish().await
    }

    /// The singleton group owned by `user`.
    pub async fn singleton_of(&self, user: UserId) -> Result<GroupId> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM wf_groups_master WHERE owner_user_id = ?1")
                .bind(user.0)
                .fetch_optional(self.db.pool())
                .await?;
        id.map(GroupId)
            .ok_or_else(|| Error::NotFound(format!("singleton group of user {user}")))
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Add `user` to a named group. Adding an existing member is a no-op.
    pub async fn add_user(&self, tx: Option<&mut Tx>, group: GroupId, user: UserId) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        require_named_on(uow.conn(), group, "membership of a singleton group is fixed").await?;

        sqlx::query(
            "INSERT INTO wf_group_users (group_id, user_id) VALUES (?1, ?2) ON CONFLICT DO NOTHING",
        )
        .bind(group.0)
        .bind(user.0)
        .execute(uow.conn())
        .await
        .map_err(|e| Error::on_write(e, format!("membership of user {user} in group {group}")))?;
        uow.finish().await?;

        tracing::debug!(%group, %user, "user added to group");
        Ok(())
    }

    /// Remove `user` from a named group. Removing a non-member is a no-op.
    pub async fn remove_user(
        &self,
        tx: Option<&mut Tx>,
        group: GroupId,
        user: UserId,
    ) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        require_named_on(uow.conn(), group, "membership of a singleton group is fixed").await?;

        sqlx::query("DELETE FROM wf_group_users WHERE group_id = ?1 AND user_id = ?2")
            .bind(group.0)
            .bind(user.0)
            .execute(uow.conn())
            .await?;
        uow.finish().await
    }

    /// Direct members of a group. For a singleton group, its owner.
    pub async fn users(&self, group: GroupId) -> Result<Vec<UserId>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT owner_user_id FROM wf_groups_master WHERE id = ?1 AND owner_user_id IS NOT NULL
             UNION
             SELECT user_id FROM wf_group_users WHERE group_id = ?1
             ORDER BY 1",
        )
        .bind(group.0)
        .fetch_all(self.db.pool())
        .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    // -----------------------------------------------------------------------
    // Hierarchy
    // -----------------------------------------------------------------------

    /// Make `child` a member of `parent`.
    ///
    /// Fails with [`Error::Cycle`] if `parent` is already reachable from
    /// `child`; no edge is left behind on failure. Re-adding an existing edge
    /// is a no-op.
    pub async fn add_child(&self, tx: Option<&mut Tx>, parent: GroupId, child: GroupId) -> Result<()> {
        if parent == child {
            return Err(Error::Cycle { parent, child });
        }

        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        require_named_on(uow.conn(), parent, "a singleton group cannot contain other groups")
            .await?;
        get_on(uow.conn(), child).await?;

        // Write first: the insert takes the database write lock, so the
        // reachability check below sees every edge committed before ours and
        // no concurrent edge can slip in until we finish.
        let inserted = sqlx::query(
            "INSERT INTO wf_group_hierarchy (parent_group_id, child_group_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )
        .bind(parent.0)
        .bind(child.0)
        .execute(uow.conn())
        .await
        .map_err(|e| Error::on_write(e, format!("hierarchy edge {parent} -> {child}")))?
        .rows_affected();

        if inserted == 0 {
            // The edge already existed, so it cannot introduce a new cycle.
            return uow.finish().await;
        }

        if reaches_on(uow.conn(), child, parent).await? {
            // A joined transaction stays with the caller, so undo explicitly.
            sqlx::query(
                "DELETE FROM wf_group_hierarchy WHERE parent_group_id = ?1 AND child_group_id = ?2",
            )
            .bind(parent.0)
            .bind(child.0)
            .execute(uow.conn())
            .await?;
            tracing::warn!(%parent, %child, "rejected hierarchy edge: cycle");
            return Err(Error::Cycle { parent, child });
        }

        uow.finish().await?;
        tracing::debug!(%parent, %child, "hierarchy edge added");
        Ok(())
    }

    /// Remove the edge `parent -> child` if present.
    pub async fn remove_child(
        &self,
        tx: Option<&mut Tx>,
        parent: GroupId,
        child: GroupId,
    ) -> Result<()> {
        let mut uow = UnitOfWork::join_or_begin(&self.db, tx).await?;
        sqlx::query(
            "DELETE FROM wf_group_hierarchy WHERE parent_group_id = ?1 AND child_group_id = ?2",
        )
        .bind(parent.0)
        .bind(child.0)
        .execute(uow.conn())
        .await?;
        uow.finish().await
    }

    /// Groups directly contained in `group`.
    pub async fn children(&self, group: GroupId) -> Result<Vec<GroupId>> {
        let mut conn = self.db.pool().acquire().await?;
        children_on(&mut conn, group).await
    }

    /// Groups that directly contain `group`.
    pub async fn parents(&self, group: GroupId) -> Result<Vec<GroupId>> {
        let mut conn = self.db.pool().acquire().await?;
        parents_on(&mut conn, group).await
    }

    /// Every group `user` effectively belongs to.
    pub async fn closure(&self, user: UserId) -> Result<BTreeSet<GroupId>> {
        let mut conn = self.db.pool().acquire().await?;
        closure_on(&mut conn, user).await
    }
}

// ---------------------------------------------------------------------------
// Inner functions
// ---------------------------------------------------------------------------

pub(crate) async fn new_singleton_on(conn: &mut SqliteConnection, user: UserId) -> Result<GroupId> {
    let res = sqlx::query(
        "INSERT INTO wf_groups_master (name, group_type, owner_user_id) VALUES (?1, ?2, ?3)",
    )
    .bind(format!("user:{user}"))
    .bind(GroupKind::Singleton.code())
    .bind(user.0)
    .execute(&mut *conn)
    .await
    .map_err(|e| Error::on_write(e, format!("singleton group of user {user}")))?;

    let id = GroupId(res.last_insert_rowid());
    tracing::debug!(%id, %user, "singleton group created");
    Ok(id)
}

pub(crate) async fn get_on(conn: &mut SqliteConnection, id: GroupId) -> Result<Group> {
    let row: Option<GroupRow> = sqlx::query_as(
        "SELECT id, name, group_type, owner_user_id FROM wf_groups_master WHERE id = ?1",
    )
    .bind(id.0)
    .fetch_optional(&mut *conn)
    .await?;

    row.ok_or_else(|| Error::NotFound(format!("group {id}")))?
        .try_into_group()
}

async fn require_named_on(conn: &mut SqliteConnection, id: GroupId, why: &str) -> Result<()> {
    match get_on(conn, id).await?.kind {
        GroupKind::Named => Ok(()),
        GroupKind::Singleton => Err(Error::Validation(format!("group {id}: {why}"))),
    }
}

async fn children_on(conn: &mut SqliteConnection, group: GroupId) -> Result<Vec<GroupId>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT child_group_id FROM wf_group_hierarchy WHERE parent_group_id = ?1 ORDER BY 1",
    )
    .bind(group.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(GroupId).collect())
}

async fn parents_on(conn: &mut SqliteConnection, group: GroupId) -> Result<Vec<GroupId>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT parent_group_id FROM wf_group_hierarchy WHERE child_group_id = ?1 ORDER BY 1",
    )
    .bind(group.0)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().map(GroupId).collect())
}

/// Whether `target` is reachable from `from` by following parent -> child
/// edges, i.e. whether `from` (transitively) contains `target`.
async fn reaches_on(conn: &mut SqliteConnection, from: GroupId, target: GroupId) -> Result<bool> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([from]);

    while let Some(current) = queue.pop_front() {
        if current == target {
            return Ok(true);
        }
        if !visited.insert(current) {
            continue;
        }
        queue.extend(children_on(conn, current).await?);
    }

    Ok(false)
}

/// The user's singleton, their direct named groups, and every ancestor of
/// those.
pub(crate) async fn closure_on(
    conn: &mut SqliteConnection,
    user: UserId,
) -> Result<BTreeSet<GroupId>> {
    let direct: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM wf_groups_master WHERE owner_user_id = ?1
         UNION
         SELECT group_id FROM wf_group_users WHERE user_id = ?1",
    )
    .bind(user.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut visited = BTreeSet::new();
    let mut queue: VecDeque<GroupId> = direct.into_iter().map(GroupId).collect();

    while let Some(current) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        for parent in parents_on(conn, current).await? {
            if !visited.contains(&parent) {
                queue.push_back(parent);
            }
        }
    }

    Ok(visited)
}
