//! Workflow Engine
//!
//! Guarded stage transitions for property-transfer cases.
//!
//! - `definition`: YAML catalog of stages, sections, guards, edges and hooks
//! - `graph`: arena-backed transition graph built from the catalog
//! - `guards`: closed set of guard kinds and the registry resolving names
//! - `evaluator`: dry-run and single-edge checks
//! - `hooks`: documents generated when a stage is entered
//! - `orchestrator`: leased commits, audit, hooks and auto-transitions
//! - `bulk`: one operation applied across many cases

pub mod blockers;
pub mod bulk;
pub mod definition;
pub mod evaluator;
pub mod graph;
pub mod guards;
pub mod hooks;
pub mod lease;
pub mod orchestrator;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub use blockers::{Blocker, BlockerType, GuardResult};
pub use bulk::{BulkFailure, BulkItemResult, BulkOperation, BulkRunner, BulkSuccess, BulkSummary};
pub use definition::{CatalogDefinition, CatalogLoader};
pub use evaluator::{EdgeDescription, TransitionEvaluator, TransitionOption};
pub use graph::{GraphWarning, Stage, Transition, TransitionGraph};
pub use guards::{GuardContext, GuardError, GuardKind, GuardRegistry};
pub use hooks::{
    DocumentRequest, DocumentService, HookError, HookOutcome, HookRunner, LoggingDocumentService,
};
pub use lease::{CaseLease, CaseLeases};
pub use orchestrator::{
    AutoTransitionOutcome, ClearanceInput, CommitOutcome, CommitReceipt, RecordOutcome,
    ReviewInput, TransitionRequest, WorkflowOrchestrator,
};

/// Errors surfaced by the workflow engine
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Case not found: {0}")]
    CaseNotFound(Uuid),

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Unknown section: {0}")]
    UnknownSection(String),

    #[error("Unknown section group: {0}")]
    UnknownGroup(String),

    /// The requested stage is not reachable by any edge from the current stage
    #[error("No such transition from current stage: {from} -> {to}")]
    InvalidEdge { from: String, to: String },

    /// Valid edge, but its guard is not satisfied
    #[error("Transition {from} -> {to} blocked: {}", result.reason)]
    TransitionBlocked {
        from: String,
        to: String,
        result: GuardResult,
    },

    /// The case moved while this commit was in flight
    #[error("Case {case_id} was modified concurrently")]
    ConcurrentModification { case_id: Uuid },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(case_id) => WorkflowError::CaseNotFound(case_id),
            StoreError::VersionConflict { case_id, .. } => {
                WorkflowError::ConcurrentModification { case_id }
            }
            other => WorkflowError::Store(other),
        }
    }
}

impl WorkflowError {
    /// Stable error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::CaseNotFound(_) => "CASE_NOT_FOUND",
            WorkflowError::UnknownStage(_) => "UNKNOWN_STAGE",
            WorkflowError::UnknownSection(_) => "UNKNOWN_SECTION",
            WorkflowError::UnknownGroup(_) => "UNKNOWN_GROUP",
            WorkflowError::InvalidEdge { .. } => "INVALID_EDGE",
            WorkflowError::TransitionBlocked { .. } => "TRANSITION_BLOCKED",
            WorkflowError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            WorkflowError::Precondition(_) => "PRECONDITION_FAILED",
            WorkflowError::Catalog(_) => "CATALOG_ERROR",
            WorkflowError::Config(_) => "CONFIG_ERROR",
            WorkflowError::Store(_) => "STORE_ERROR",
            WorkflowError::Io(_) => "IO_ERROR",
            WorkflowError::Yaml(_) => "YAML_ERROR",
        }
    }

    /// Transient errors a caller may retry with a fresh dry-run
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::ConcurrentModification { .. })
    }

    /// Blocked or invalid moves are the normal vocabulary of the engine,
    /// not failures worth logging loudly
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            WorkflowError::InvalidEdge { .. } | WorkflowError::TransitionBlocked { .. }
        )
    }
}
