//! Shared fixture: the storage-request workflow with a small lab.
//!
//! - `analyst` is in RAs.
//! - `lead` is in RAs and PIs.
//! - `approver` is in PIs only.
//! - `outsider` is in no group at all.
//!
//! On `doc`, RAs hold RESEARCH_ANALYST and PIs hold PRINCIPAL_INVESTIGATOR.

#![allow(dead_code)]

use docflow::Flow;
use docflow::blueprint::{Blueprint, InstalledBlueprint};
use docflow::model::{DocActionId, DocStateId, DocumentId, GroupId, GroupKind, NewUser, UserId};

pub const STORAGE_REQ: &str = include_str!("../../blueprints/storage_req.toml");

pub struct Lab {
    pub flow: Flow,
    pub bp: InstalledBlueprint,
    pub analyst: UserId,
    pub lead: UserId,
    pub approver: UserId,
    pub outsider: UserId,
    pub ras: GroupId,
    pub pis: GroupId,
    pub doc: DocumentId,
}

impl Lab {
    pub fn action(&self, name: &str) -> DocActionId {
        self.bp.action(name).unwrap()
    }

    pub fn state(&self, name: &str) -> DocStateId {
        self.bp.state(name).unwrap()
    }

    pub async fn state_of(&self, doc: DocumentId) -> DocStateId {
        self.flow.documents.get(doc).await.unwrap().state_id
    }

    pub async fn version_of(&self, doc: DocumentId) -> i64 {
        self.flow.documents.get(doc).await.unwrap().version
    }

    /// Add `INITIAL --COMMENT--> INITIAL` for RESEARCH_ANALYST.
    pub async fn define_comment(&self) -> DocActionId {
        let comment = self.flow.actions.create(None, "COMMENT").await.unwrap();
        let initial = self.state("INITIAL");
        self.flow
            .transitions
            .define(
                None,
                self.bp.doctype,
                initial,
                comment,
                initial,
                self.bp.role("RESEARCH_ANALYST").unwrap(),
            )
            .await
            .unwrap();
        comment
    }

    /// A fresh document with the standard grants.
    pub async fn new_document(&self, title: &str) -> DocumentId {
        let doc = self
            .flow
            .documents
            .create(None, self.bp.doctype, title, self.analyst)
            .await
            .unwrap();
        self.flow
            .access
            .grant(None, doc, self.ras, self.bp.role("RESEARCH_ANALYST").unwrap())
            .await
            .unwrap();
        self.flow
            .access
            .grant(None, doc, self.pis, self.bp.role("PRINCIPAL_INVESTIGATOR").unwrap())
            .await
            .unwrap();
        doc
    }
}

pub async fn register(flow: &Flow, first: &str, email: &str) -> UserId {
    let (user, _) = flow
        .users
        .register(None, NewUser::new(first, "Tester", email))
        .await
        .unwrap();
    user
}

pub async fn install_storage_req(flow: &Flow) -> InstalledBlueprint {
    let blueprint = Blueprint::from_toml(STORAGE_REQ).unwrap();
    flow.install(None, &blueprint).await.unwrap()
}

pub async fn lab_on(flow: Flow) -> Lab {
    let bp = install_storage_req(&flow).await;

    let analyst = register(&flow, "Ada", "ada@example.com").await;
    let lead = register(&flow, "Lin", "lin@example.com").await;
    let approver = register(&flow, "Pat", "pat@example.com").await;
    let outsider = register(&flow, "Oz", "oz@example.com").await;

    let ras = flow.groups.create(None, "RAs", GroupKind::Named).await.unwrap();
    let pis = flow.groups.create(None, "PIs", GroupKind::Named).await.unwrap();
    flow.groups.add_user(None, ras, analyst).await.unwrap();
    flow.groups.add_user(None, ras, lead).await.unwrap();
    flow.groups.add_user(None, pis, lead).await.unwrap();
    flow.groups.add_user(None, pis, approver).await.unwrap();

    let mut lab = Lab {
        flow,
        bp,
        analyst,
        lead,
        approver,
        outsider,
        ras,
        pis,
        doc: DocumentId(0),
    };
    lab.doc = lab.new_document("Request for 2 TB scratch").await;
    lab
}

pub async fn lab() -> Lab {
    lab_on(Flow::in_memory().await.unwrap()).await
}
