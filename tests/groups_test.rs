//! Integration tests for users, groups, and the group hierarchy.

use std::collections::BTreeSet;

use docflow::model::{GroupId, GroupKind, NewUser, UserId};
use docflow::{Error, Flow};

async fn flow() -> Flow {
    Flow::in_memory().await.expect("failed to open in-memory flow")
}

async fn user(flow: &Flow, email: &str) -> (UserId, GroupId) {
    flow.users
        .register(None, NewUser::new("Test", "User", email))
        .await
        .unwrap()
}

async fn named(flow: &Flow, name: &str) -> GroupId {
    flow.groups.create(None, name, GroupKind::Named).await.unwrap()
}

// ---------------------------------------------------------------------------
// Groups and membership
// ---------------------------------------------------------------------------

#[tokio::test]
async fn registering_a_user_creates_their_singleton() {
    let flow = flow().await;
    let (u, singleton) = user(&flow, "a@example.com").await;

    let group = flow.groups.get(singleton).await.unwrap();
    assert_eq!(group.kind, GroupKind::Singleton);
    assert_eq!(group.owner, Some(u));
    assert_eq!(flow.groups.singleton_of(u).await.unwrap(), singleton);
    assert_eq!(flow.groups.users(singleton).await.unwrap(), vec![u]);

    let stored = flow.users.get(u).await.unwrap();
    assert_eq!(stored.email, "a@example.com");
    assert!(stored.active);
}

#[tokio::test]
async fn second_singleton_for_a_user_conflicts() {
    let flow = flow().await;
    let (u, _) = user(&flow, "a@example.com").await;

    let err = flow.groups.new_singleton(None, u).await.unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
}

#[tokio::test]
async fn duplicate_email_conflicts_and_leaves_no_group_behind() {
    let flow = flow().await;
    user(&flow, "a@example.com").await;
    let groups_before = flow.groups.list(0, 0).await.unwrap().len();

    let err = flow
        .users
        .register(None, NewUser::new("Other", "Person", "a@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {err:?}");
    assert_eq!(flow.groups.list(0, 0).await.unwrap().len(), groups_before);
}

#[tokio::test]
async fn singleton_kind_cannot_be_created_by_name() {
    let flow = flow().await;

    let err = flow
        .groups
        .create(None, "Solo", GroupKind::Singleton)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");

    let err = flow.groups.create(None, "  ", GroupKind::Named).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn singleton_membership_is_fixed() {
    let flow = flow().await;
    let (_, singleton) = user(&flow, "a@example.com").await;
    let (other, _) = user(&flow, "b@example.com").await;

    let err = flow.groups.add_user(None, singleton, other).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    let err = flow.groups.remove_user(None, singleton, other).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn membership_is_idempotent() {
    let flow = flow().await;
    let (u1, _) = user(&flow, "a@example.com").await;
    let (u2, _) = user(&flow, "b@example.com").await;
    let ras = named(&flow, "RAs").await;

    flow.groups.add_user(None, ras, u1).await.unwrap();
    flow.groups.add_user(None, ras, u1).await.unwrap();
    flow.groups.add_user(None, ras, u2).await.unwrap();
    assert_eq!(flow.groups.users(ras).await.unwrap(), vec![u1, u2]);

    flow.groups.remove_user(None, ras, u1).await.unwrap();
    flow.groups.remove_user(None, ras, u1).await.unwrap();
    assert_eq!(flow.groups.users(ras).await.unwrap(), vec![u2]);
}

#[tokio::test]
async fn adding_unknown_user_is_not_found() {
    let flow = flow().await;
    let ras = named(&flow, "RAs").await;

    let err = flow.groups.add_user(None, ras, UserId(99)).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn rename_keeps_group_identity() {
    let flow = flow().await;
    let ras = named(&flow, "RAs").await;

    flow.groups.rename(None, ras, "Research Associates").await.unwrap();
    let group = flow.groups.get(ras).await.unwrap();
    assert_eq!(group.id, ras);
    assert_eq!(group.name, "Research Associates");
    assert_eq!(group.kind, GroupKind::Named);

    let err = flow.groups.rename(None, GroupId(99), "Nobody").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)), "got {err:?}");
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_child_is_idempotent() {
    let flow = flow().await;
    let lab = named(&flow, "Lab").await;
    let ras = named(&flow, "RAs").await;

    flow.groups.add_child(None, lab, ras).await.unwrap();
    flow.groups.add_child(None, lab, ras).await.unwrap();

    assert_eq!(flow.groups.children(lab).await.unwrap(), vec![ras]);
    assert_eq!(flow.groups.parents(ras).await.unwrap(), vec![lab]);
}

#[tokio::test]
async fn self_loop_is_a_cycle() {
    let flow = flow().await;
    let lab = named(&flow, "Lab").await;

    let err = flow.groups.add_child(None, lab, lab).await.unwrap_err();
    assert!(matches!(err, Error::Cycle { .. }), "got {err:?}");
}

#[tokio::test]
async fn cycle_is_rejected_and_leaves_no_edge() {
    let flow = flow().await;
    let a = named(&flow, "A").await;
    let b = named(&flow, "B").await;
    let c = named(&flow, "C").await;

    flow.groups.add_child(None, a, b).await.unwrap();
    flow.groups.add_child(None, b, c).await.unwrap();

    let err = flow.groups.add_child(None, c, a).await.unwrap_err();
    assert!(
        matches!(err, Error::Cycle { parent, child } if parent == c && child == a),
        "got {err:?}"
    );
    assert!(flow.groups.children(c).await.unwrap().is_empty());
    assert_eq!(flow.groups.parents(a).await.unwrap(), Vec::<GroupId>::new());
}

#[tokio::test]
async fn cycle_inside_caller_transaction_leaves_no_edge() {
    let flow = flow().await;
    let a = named(&flow, "A").await;
    let b = named(&flow, "B").await;

    let mut tx = flow.begin().await.unwrap();
    flow.groups.add_child(Some(&mut tx), a, b).await.unwrap();
    let err = flow.groups.add_child(Some(&mut tx), b, a).await.unwrap_err();
    assert!(matches!(err, Error::Cycle { .. }), "got {err:?}");
    tx.commit().await.unwrap();

    assert_eq!(flow.groups.children(a).await.unwrap(), vec![b]);
    assert!(flow.groups.children(b).await.unwrap().is_empty());
}

#[tokio::test]
async fn singleton_can_be_a_child_but_not_a_parent() {
    let flow = flow().await;
    let (_, singleton) = user(&flow, "a@example.com").await;
    let ras = named(&flow, "RAs").await;

    flow.groups.add_child(None, ras, singleton).await.unwrap();
    let err = flow.groups.add_child(None, singleton, ras).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
}

#[tokio::test]
async fn closure_walks_up_the_hierarchy() {
    let flow = flow().await;
    let (u, singleton) = user(&flow, "a@example.com").await;
    let (_, unrelated_singleton) = user(&flow, "b@example.com").await;

    let dept = named(&flow, "Department").await;
    let lab = named(&flow, "Lab").await;
    let ras = named(&flow, "RAs").await;
    let pis = named(&flow, "PIs").await;
    let other = named(&flow, "Other").await;

    flow.groups.add_user(None, ras, u).await.unwrap();
    flow.groups.add_child(None, lab, ras).await.unwrap();
    flow.groups.add_child(None, dept, lab).await.unwrap();
    // A diamond: Department also contains RAs directly.
    flow.groups.add_child(None, dept, ras).await.unwrap();
    // Children of the user's groups are not part of the closure.
    flow.groups.add_child(None, ras, pis).await.unwrap();

    let closure = flow.groups.closure(u).await.unwrap();
    assert_eq!(closure, BTreeSet::from([singleton, ras, lab, dept]));
    assert!(!closure.contains(&pis));
    assert!(!closure.contains(&other));
    assert!(!closure.contains(&unrelated_singleton));
}

#[tokio::test]
async fn closure_includes_groups_containing_the_singleton() {
    let flow = flow().await;
    let (u, singleton) = user(&flow, "a@example.com").await;
    let pis = named(&flow, "PIs").await;

    flow.groups.add_child(None, pis, singleton).await.unwrap();
    assert_eq!(
        flow.groups.closure(u).await.unwrap(),
        BTreeSet::from([singleton, pis])
    );

    flow.groups.remove_child(None, pis, singleton).await.unwrap();
    assert_eq!(flow.groups.closure(u).await.unwrap(), BTreeSet::from([singleton]));
}
