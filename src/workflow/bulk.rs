//! Bulk Operations
//!
//! Applies one operation to many cases. Every case runs through the same
//! orchestrator path as a single request and fails on its own; distinct cases
//! run concurrently, a case listed more than once is processed in input
//! order. Cancellation stops unattempted items but never rolls back items
//! already committed.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::orchestrator::{
    ClearanceInput, CommitOutcome, RecordOutcome, ReviewInput, TransitionRequest,
    WorkflowOrchestrator,
};
use super::WorkflowError;
use crate::case::{Actor, ClearanceStatus};

/// Error reported for items never attempted because the run was cancelled
pub const CANCELLED: &str = "cancelled before processing";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum BulkOperation {
    RecordClearance {
        section: String,
        status: ClearanceStatus,
        #[serde(default)]
        remarks: Option<String>,
        actor: Actor,
        #[serde(default)]
        auto_transition: Option<String>,
    },
    RecordReview {
        group: String,
        confirmed: bool,
        #[serde(default)]
        remarks: Option<String>,
        actor: Actor,
        #[serde(default)]
        auto_transition: Option<String>,
    },
    Transition {
        to_stage: String,
        actor: Actor,
        #[serde(default)]
        remarks: Option<String>,
    },
}

impl BulkOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BulkOperation::RecordClearance { .. } => "record_clearance",
            BulkOperation::RecordReview { .. } => "record_review",
            BulkOperation::Transition { .. } => "transition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BulkItemResult {
    Recorded { outcome: RecordOutcome },
    Committed { outcome: CommitOutcome },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSuccess {
    pub case_id: Uuid,
    pub result: BulkItemResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkFailure {
    pub case_id: Uuid,
    /// `WorkflowError::code()`, or CANCELLED
    pub code: String,
    pub error: String,
}

impl BulkFailure {
    fn from_error(case_id: Uuid, err: &WorkflowError) -> Self {
        Self {
            case_id,
            code: err.code().to_string(),
            error: err.to_string(),
        }
    }

    fn cancelled(case_id: Uuid) -> Self {
        Self {
            case_id,
            code: "CANCELLED".to_string(),
            error: CANCELLED.to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error == CANCELLED
    }
}

/// `total == successful.len() + failed.len()`, both lists in input order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkSummary {
    pub total: usize,
    pub successful: Vec<BulkSuccess>,
    pub failed: Vec<BulkFailure>,
}

impl BulkSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct BulkRunner {
    orchestrator: Arc<WorkflowOrchestrator>,
    concurrency: usize,
}

impl BulkRunner {
    /// Concurrency comes from the orchestrator's `bulk_concurrency`
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        let concurrency = orchestrator.config().bulk_concurrency.max(1);
        Self {
            orchestrator,
            concurrency,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Apply `operation` to every listed case.
    ///
    /// `cancel` is checked before each item; once it reads `true`, remaining
    /// items are reported as failed with "cancelled before processing".
    pub async fn apply_to_many(
        &self,
        case_ids: &[Uuid],
        operation: &BulkOperation,
        cancel: Option<watch::Receiver<bool>>,
    ) -> BulkSummary {
        // Positions of each case in the input, grouped so repeats stay sequential
        let mut order: Vec<Uuid> = Vec::new();
        let mut positions: HashMap<Uuid, Vec<usize>> = HashMap::new();
        for (index, case_id) in case_ids.iter().enumerate() {
            positions
                .entry(*case_id)
                .or_insert_with(|| {
                    order.push(*case_id);
                    Vec::new()
                })
                .push(index);
        }

        let cancel = &cancel;
        let batches = order.into_iter().map(|case_id| {
            let indices = positions.remove(&case_id).unwrap_or_default();
            async move {
                let mut results = Vec::with_capacity(indices.len());
                for index in indices {
                    let result = if is_cancelled(cancel) {
                        Err(BulkFailure::cancelled(case_id))
                    } else {
                        self.apply_one(case_id, operation).await
                    };
                    results.push((index, result));
                }
                results
            }
        });

        let mut results: Vec<(usize, Result<BulkSuccess, BulkFailure>)> = stream::iter(batches)
            .buffer_unordered(self.concurrency)
            .flat_map(stream::iter)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let mut summary = BulkSummary {
            total: case_ids.len(),
            ..BulkSummary::default()
        };
        for (_, result) in results {
            match result {
                Ok(success) => summary.successful.push(success),
                Err(failure) => summary.failed.push(failure),
            }
        }

        info!(
            operation = operation.name(),
            total = summary.total,
            successful = summary.successful.len(),
            failed = summary.failed.len(),
            "Bulk operation finished"
        );
        summary
    }

    async fn apply_one(
        &self,
        case_id: Uuid,
        operation: &BulkOperation,
    ) -> Result<BulkSuccess, BulkFailure> {
        let result = match operation {
            BulkOperation::RecordClearance {
                section,
                status,
                remarks,
                actor,
                auto_transition,
            } => {
                let input = ClearanceInput {
                    case_id,
                    section: section.clone(),
                    status: *status,
                    remarks: remarks.clone(),
                    signed_document: None,
                    actor: actor.clone(),
                    auto_transition: auto_transition.clone(),
                };
                self.orchestrator
                    .record_clearance(input)
                    .await
                    .map(|outcome| BulkItemResult::Recorded { outcome })
            }
            BulkOperation::RecordReview {
                group,
                confirmed,
                remarks,
                actor,
                auto_transition,
            } => {
                let input = ReviewInput {
                    case_id,
                    group: group.clone(),
                    confirmed: *confirmed,
                    remarks: remarks.clone(),
                    actor: actor.clone(),
                    auto_transition: auto_transition.clone(),
                };
                self.orchestrator
                    .record_review(input)
                    .await
                    .map(|outcome| BulkItemResult::Recorded { outcome })
            }
            BulkOperation::Transition {
                to_stage,
                actor,
                remarks,
            } => {
                let mut request = TransitionRequest::new(case_id, to_stage.clone(), actor.clone());
                request.remarks = remarks.clone();
                self.orchestrator
                    .commit(request)
                    .await
                    .map(|outcome| BulkItemResult::Committed { outcome })
            }
        };

        match result {
            Ok(result) => Ok(BulkSuccess { case_id, result }),
            Err(e) => {
                if e.is_expected() {
                    debug!(case_id = %case_id, error = %e, "Bulk item not applied");
                } else {
                    warn!(case_id = %case_id, error = %e, "Bulk item failed");
                }
                Err(BulkFailure::from_error(case_id, &e))
            }
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
}
