//! Integration tests for blueprint loading and installation.

mod common;

use std::path::Path;

use common::STORAGE_REQ;
use docflow::blueprint::Blueprint;
use docflow::{Error, Flow};

#[test]
fn shipped_blueprints_load() {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("blueprints");
    let blueprints = Blueprint::load_from_dir(&dir).unwrap();
    assert!(blueprints.iter().any(|b| b.doctype.name == "STORAGE_REQ"));
}

#[test]
fn load_from_dir_skips_other_files_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("b.toml"), STORAGE_REQ).unwrap();
    std::fs::write(
        dir.path().join("a.toml"),
        r#"
        [doctype]
        name = "LEAVE_REQ"
        states = ["DRAFT", "DONE"]
        initial = "DRAFT"
        "#,
    )
    .unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a blueprint").unwrap();

    let blueprints = Blueprint::load_from_dir(dir.path()).unwrap();
    let names: Vec<_> = blueprints.iter().map(|b| b.doctype.name.as_str()).collect();
    assert_eq!(names, ["LEAVE_REQ", "STORAGE_REQ"]);
}

#[test]
fn bad_blueprint_names_its_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("broken.toml"), "[doctype]\nname = 3").unwrap();

    let err = Blueprint::load_from_dir(dir.path()).unwrap_err();
    match err {
        Error::Config(msg) => assert!(msg.contains("broken.toml"), "{msg}"),
        other => panic!("expected Config error, got {other:?}"),
    }
}

#[test]
fn missing_dir_is_a_config_error() {
    let err = Blueprint::load_from_dir(Path::new("/definitely/not/here")).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn install_registers_vocabulary_and_transitions() {
    let flow = Flow::in_memory().await.unwrap();
    let blueprint = Blueprint::from_toml(STORAGE_REQ).unwrap();

    let bp = flow.install(None, &blueprint).await.unwrap();

    assert_eq!(flow.doctypes.exists("STORAGE_REQ").await.unwrap(), bp.doctype);
    assert_eq!(bp.states.len(), 5);
    assert_eq!(flow.docstates.list_for(bp.doctype).await.unwrap().len(), 5);
    assert_eq!(
        flow.transitions.initial(bp.doctype).await.unwrap(),
        bp.state("INITIAL").unwrap()
    );
    assert_eq!(
        flow.transitions
            .resolve(
                bp.doctype,
                bp.state("PENDING_APPROVAL").unwrap(),
                bp.action("APPROVE").unwrap()
            )
            .await
            .unwrap(),
        (
            bp.state("APPROVED").unwrap(),
            bp.role("PRINCIPAL_INVESTIGATOR").unwrap()
        )
    );
    assert!(
        flow.transitions
            .is_terminal(bp.doctype, bp.state("APPROVED").unwrap())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn install_is_idempotent() {
    let flow = Flow::in_memory().await.unwrap();
    let blueprint = Blueprint::from_toml(STORAGE_REQ).unwrap();

    let first = flow.install(None, &blueprint).await.unwrap();
    let second = flow.install(None, &blueprint).await.unwrap();

    assert_eq!(first.doctype, second.doctype);
    assert_eq!(first.states, second.states);
    assert_eq!(first.actions, second.actions);
    assert_eq!(first.roles, second.roles);
    assert_eq!(flow.actions.list(0, 0).await.unwrap().len(), 5);
}

#[tokio::test]
async fn conflicting_install_rolls_back_entirely() {
    let flow = Flow::in_memory().await.unwrap();
    flow.install(None, &Blueprint::from_toml(STORAGE_REQ).unwrap())
        .await
        .unwrap();

    // ARCHIVE and ADMIN are registered before the conflicting NEW
    // transition is reached; the failed install must take them back out.
    let changed = r#"
        [doctype]
        name = "STORAGE_REQ"
        states = ["INITIAL", "PENDING_APPROVAL", "APPROVED", "REJECTED", "DISCARDED"]
        initial = "INITIAL"

        [[transition]]
        from = "APPROVED"
        action = "ARCHIVE"
        to = "DISCARDED"
        role = "ADMIN"

        [[transition]]
        from = "INITIAL"
        action = "NEW"
        to = "APPROVED"
        role = "RESEARCH_ANALYST"
    "#;
    let err = flow
        .install(None, &Blueprint::from_toml(changed).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)), "got {err:?}");

    assert!(flow.actions.exists("ARCHIVE").await.is_err());
    assert!(flow.roles.exists("ADMIN").await.is_err());
}
