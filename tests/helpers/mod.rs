//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use transfer_workflow::case::{Actor, NewCase};
use transfer_workflow::config::EngineConfig;
use transfer_workflow::store::{CaseStore, MemoryCaseStore};
use transfer_workflow::workflow::{
    CatalogDefinition, CatalogLoader, DocumentRequest, DocumentService, HookError,
    WorkflowOrchestrator,
};

pub const CATALOG_YAML: &str = include_str!("../../config/catalog/property_transfer.yaml");

pub const REQUIRED_DOCUMENTS: [&str; 7] = [
    "SALE_AGREEMENT",
    "SELLER_CNIC",
    "BUYER_CNIC",
    "SITE_PLAN",
    "PHOTOGRAPHS",
    "NOC_SOCIETY",
    "UNDERTAKING",
];

pub fn catalog() -> CatalogDefinition {
    CatalogLoader::load_from_str(CATALOG_YAML).expect("shipped catalog must parse")
}

pub fn clerk() -> Actor {
    Actor::new("clerk-1", "CLERK")
}

pub fn scrutiny_officer() -> Actor {
    Actor::new("scrutiny-1", "SCRUTINY_OFFICER")
}

pub fn section_officer(section: &str) -> Actor {
    Actor::new(format!("{}-officer", section.to_lowercase()), "SECTION_OFFICER")
}

pub fn approver() -> Actor {
    Actor::new("director-1", "APPROVER")
}

/// Document service that remembers every request, optionally failing them
#[derive(Default)]
pub struct RecordingDocuments {
    pub requests: Mutex<Vec<DocumentRequest>>,
    pub fail: bool,
}

impl RecordingDocuments {
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn document_types(&self) -> Vec<String> {
        self.requests
            .lock()
            .await
            .iter()
            .map(|r| r.document_type.clone())
            .collect()
    }
}

#[async_trait]
impl DocumentService for RecordingDocuments {
    async fn generate(&self, request: &DocumentRequest) -> Result<String, HookError> {
        self.requests.lock().await.push(request.clone());
        if self.fail {
            return Err(HookError::Render("template missing".to_string()));
        }
        Ok(format!("DOC-{}", request.document_type))
    }
}

pub struct Harness {
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub store: MemoryCaseStore,
    pub documents: Arc<RecordingDocuments>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(EngineConfig::default(), RecordingDocuments::default())
    }

    pub fn with(config: EngineConfig, documents: RecordingDocuments) -> Self {
        let store = MemoryCaseStore::new();
        let documents = Arc::new(documents);
        let orchestrator = WorkflowOrchestrator::from_catalog(
            &catalog(),
            Arc::new(store.clone()),
            documents.clone(),
            config,
        )
        .expect("shipped catalog must build");

        Self {
            orchestrator: Arc::new(orchestrator),
            store,
            documents,
        }
    }

    pub async fn open_case(&self, reference: &str) -> Uuid {
        self.orchestrator
            .open_case(
                NewCase {
                    reference: reference.to_string(),
                    seller_id: "person-seller".to_string(),
                    buyer_id: "person-buyer".to_string(),
                    plot_id: "plot-42".to_string(),
                },
                &clerk(),
            )
            .await
            .expect("open case")
            .case_id
    }

    pub async fn attach(&self, case_id: Uuid, document_types: &[&str]) {
        for document_type in document_types {
            self.orchestrator
                .add_attachment(case_id, document_type, "files/scan.pdf", &clerk())
                .await
                .expect("add attachment");
        }
    }

    pub async fn stage(&self, case_id: Uuid) -> String {
        self.store
            .stage_snapshot(case_id)
            .await
            .expect("case exists")
            .stage
    }

    /// Open a case and walk it to SENT_TO_SECTIONS
    pub async fn case_with_sections(&self, reference: &str) -> Uuid {
        use transfer_workflow::workflow::TransitionRequest;

        let case_id = self.open_case(reference).await;
        self.attach(case_id, &REQUIRED_DOCUMENTS).await;
        self.orchestrator
            .commit(TransitionRequest::new(case_id, "UNDER_SCRUTINY", clerk()))
            .await
            .expect("scrutiny");
        self.orchestrator
            .commit(TransitionRequest::new(
                case_id,
                "SENT_TO_SECTIONS",
                scrutiny_officer(),
            ))
            .await
            .expect("sections");
        case_id
    }
}
