//! Stage Hooks
//!
//! Side effects fired after a case enters a stage. They run once the commit
//! has landed and the case lease is released; a failing hook is recorded in
//! the audit log and never unwinds the stage change.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::definition::{CatalogDefinition, HookDef};
use crate::case::{Actor, AuditAction, AuditEntry};
use crate::store::{CaseStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("document rendering failed: {0}")]
    Render(String),

    #[error("document service unavailable: {0}")]
    Unavailable(String),

    #[error("could not load case for hook: {0}")]
    Store(#[from] StoreError),
}

/// Input for the document service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub case_id: Uuid,
    pub document_type: String,
    pub template_data: serde_json::Value,
}

/// Renders documents (transfer letters, memos, certificates) for a case
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Returns the id of the stored document
    async fn generate(&self, request: &DocumentRequest) -> Result<String, HookError>;
}

/// Document service that only logs requests; used by the CLI simulation
#[derive(Debug, Default, Clone)]
pub struct LoggingDocumentService;

#[async_trait]
impl DocumentService for LoggingDocumentService {
    async fn generate(&self, request: &DocumentRequest) -> Result<String, HookError> {
        let document_id = format!("DOC-{}", Uuid::new_v4());
        info!(
            case_id = %request.case_id,
            document_type = %request.document_type,
            document_id = %document_id,
            "Document generated"
        );
        Ok(document_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HookOutcome {
    Generated {
        document_type: String,
        document_id: String,
    },
    Failed {
        document_type: String,
        error: String,
    },
}

impl HookOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, HookOutcome::Failed { .. })
    }
}

pub struct HookRunner {
    hooks: HashMap<String, Vec<HookDef>>,
    documents: Arc<dyn DocumentService>,
    store: Arc<dyn CaseStore>,
}

impl HookRunner {
    pub fn new(
        def: &CatalogDefinition,
        documents: Arc<dyn DocumentService>,
        store: Arc<dyn CaseStore>,
    ) -> Self {
        let hooks = def
            .hooks
            .iter()
            .map(|(stage, hooks)| (stage.clone(), hooks.clone()))
            .collect();
        Self {
            hooks,
            documents,
            store,
        }
    }

    pub fn hooks_for(&self, stage: &str) -> &[HookDef] {
        self.hooks.get(stage).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Run every hook registered for `stage`, in declared order. Each outcome
    /// is written to the audit log as DOCUMENT_GENERATED or HOOK_FAILED.
    pub async fn run(&self, case_id: Uuid, stage: &str, actor: &Actor) -> Vec<HookOutcome> {
        let hooks = self.hooks_for(stage);
        if hooks.is_empty() {
            return Vec::new();
        }

        let template_data = self.template_data(case_id, stage).await;
        let mut outcomes = Vec::with_capacity(hooks.len());

        for hook in hooks {
            let HookDef::GenerateDocument { document_type } = hook;

            let generated = match &template_data {
                Ok(data) => {
                    let request = DocumentRequest {
                        case_id,
                        document_type: document_type.clone(),
                        template_data: data.clone(),
                    };
                    self.documents.generate(&request).await
                }
                Err(e) => Err(HookError::Render(e.to_string())),
            };

            let (outcome, entry) = match generated {
                Ok(document_id) => (
                    HookOutcome::Generated {
                        document_type: document_type.clone(),
                        document_id: document_id.clone(),
                    },
                    AuditEntry::new(
                        case_id,
                        actor,
                        AuditAction::DocumentGenerated,
                        format!("{} generated as {}", document_type, document_id),
                    ),
                ),
                Err(e) => {
                    warn!(
                        case_id = %case_id,
                        stage = stage,
                        document_type = %document_type,
                        error = %e,
                        "Stage hook failed"
                    );
                    (
                        HookOutcome::Failed {
                            document_type: document_type.clone(),
                            error: e.to_string(),
                        },
                        AuditEntry::new(
                            case_id,
                            actor,
                            AuditAction::HookFailed,
                            format!("{} generation failed: {}", document_type, e),
                        ),
                    )
                }
            };

            if let Err(e) = self.store.append_audit(&entry.with_stage(stage)).await {
                warn!(case_id = %case_id, error = %e, "Could not record hook outcome");
            }
            outcomes.push(outcome);
        }

        outcomes
    }

    async fn template_data(&self, case_id: Uuid, stage: &str) -> Result<serde_json::Value, HookError> {
        let case = self.store.load_case(case_id).await?;

        let clearances: BTreeMap<&str, &str> = case
            .clearances
            .iter()
            .filter(|c| !c.superseded)
            .map(|c| (c.section.as_str(), c.status.as_str()))
            .collect();

        Ok(json!({
            "reference": case.reference,
            "stage": stage,
            "seller_id": case.seller_id,
            "buyer_id": case.buyer_id,
            "plot_id": case.plot_id,
            "clearances": clearances,
            "fee_total": case.accounts.as_ref().map(|a| a.total().to_string()),
            "deed_number": case.deed.as_ref().map(|d| d.deed_number.clone()),
        }))
    }
}
