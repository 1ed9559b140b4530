//! Workflow Orchestrator
//!
//! Owns the commit path. A commit takes the case lease, re-evaluates the
//! edge guard against fresh state, writes the stage change and its audit
//! entry in one store call, releases the lease, runs the hooks of the entered
//! stage, and finally tries the stage's auto edges through the same path.
//!
//! Recording operations (clearances, reviews, attachments, accounts, deed)
//! also write under the lease so guard inputs cannot change between a
//! commit's check and its write.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::blockers::GuardResult;
use super::definition::CatalogDefinition;
use super::evaluator::{TransitionEvaluator, TransitionOption};
use super::graph::TransitionGraph;
use super::guards::GuardRegistry;
use super::hooks::{DocumentService, HookOutcome, HookRunner};
use super::lease::CaseLeases;
use super::WorkflowError;
use crate::case::{
    stage_history, AccountsBreakdown, Actor, Attachment, AuditAction, AuditEntry, Case, Clearance,
    ClearanceStatus, FeeLine, NewCase, Payment, Review, StageChange, TransferDeed,
};
use crate::config::EngineConfig;
use crate::store::CaseStore;

/// Request to move a case to another stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub case_id: Uuid,
    pub to_stage: String,
    pub actor: Actor,
    #[serde(default)]
    pub remarks: Option<String>,
    /// Stage the caller believes the case is in. A mismatch at commit time
    /// is reported as a concurrent modification.
    #[serde(default)]
    pub expected_from: Option<String>,
}

impl TransitionRequest {
    pub fn new(case_id: Uuid, to_stage: impl Into<String>, actor: Actor) -> Self {
        Self {
            case_id,
            to_stage: to_stage.into(),
            actor,
            remarks: None,
            expected_from: None,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn expecting(mut self, from_stage: impl Into<String>) -> Self {
        self.expected_from = Some(from_stage.into());
        self
    }
}

/// One committed stage change and the hooks it fired
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub case_id: Uuid,
    pub from_stage: String,
    pub to_stage: String,
    pub audit_entry_id: Uuid,
    /// Empty when hooks run detached
    pub hooks: Vec<HookOutcome>,
}

/// Result of a successful commit, including auto-transitions it triggered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub case_id: Uuid,
    pub from_stage: String,
    pub to_stage: String,
    pub audit_entry_id: Uuid,
    pub hooks: Vec<HookOutcome>,
    /// Auto-transitions committed after this one, in order
    pub chained: Vec<CommitReceipt>,
}

impl CommitOutcome {
    /// Stage the case ended in after chaining
    pub fn final_stage(&self) -> &str {
        self.chained
            .last()
            .map(|r| r.to_stage.as_str())
            .unwrap_or(&self.to_stage)
    }
}

/// What happened to the transition requested alongside a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoTransitionOutcome {
    Committed { commit: CommitOutcome },
    /// The record was kept; only the transition did not happen
    NotCommitted { code: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    /// Id of the stored record, or of its audit entry for records without one
    pub record_id: Uuid,
    /// Present when the caller asked for a transition after the write
    pub auto_transition: Option<AutoTransitionOutcome>,
    /// Auto edges committed because the write satisfied their guards. When a
    /// requested transition commits, its own chain is reported on the commit
    /// instead and this stays empty.
    pub chained: Vec<CommitReceipt>,
}

/// A section's decision on a case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearanceInput {
    pub case_id: Uuid,
    pub section: String,
    pub status: ClearanceStatus,
    #[serde(default)]
    pub remarks: Option<String>,
    #[serde(default)]
    pub signed_document: Option<String>,
    pub actor: Actor,
    /// Stage to attempt once the clearance is stored
    #[serde(default)]
    pub auto_transition: Option<String>,
}

impl ClearanceInput {
    pub fn new(
        case_id: Uuid,
        section: impl Into<String>,
        status: ClearanceStatus,
        actor: Actor,
    ) -> Self {
        Self {
            case_id,
            section: section.into(),
            status,
            remarks: None,
            signed_document: None,
            actor,
            auto_transition: None,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn then_transition(mut self, to_stage: impl Into<String>) -> Self {
        self.auto_transition = Some(to_stage.into());
        self
    }
}

/// Front-office sign-off over a section group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewInput {
    pub case_id: Uuid,
    pub group: String,
    pub confirmed: bool,
    #[serde(default)]
    pub remarks: Option<String>,
    pub actor: Actor,
    #[serde(default)]
    pub auto_transition: Option<String>,
}

impl ReviewInput {
    pub fn new(case_id: Uuid, group: impl Into<String>, confirmed: bool, actor: Actor) -> Self {
        Self {
            case_id,
            group: group.into(),
            confirmed,
            remarks: None,
            actor,
            auto_transition: None,
        }
    }

    pub fn then_transition(mut self, to_stage: impl Into<String>) -> Self {
        self.auto_transition = Some(to_stage.into());
        self
    }
}

/// Stage change written by one commit attempt
struct Committed {
    from_stage: String,
    to_stage: String,
    audit_entry_id: Uuid,
}

pub struct WorkflowOrchestrator {
    evaluator: Arc<TransitionEvaluator>,
    registry: Arc<GuardRegistry>,
    store: Arc<dyn CaseStore>,
    hooks: Arc<HookRunner>,
    leases: CaseLeases,
    config: EngineConfig,
}

impl WorkflowOrchestrator {
    /// Build the graph, guard registry and hook table from one catalog
    pub fn from_catalog(
        def: &CatalogDefinition,
        store: Arc<dyn CaseStore>,
        documents: Arc<dyn DocumentService>,
        config: EngineConfig,
    ) -> Result<Self, WorkflowError> {
        let graph = Arc::new(TransitionGraph::build(def)?);
        let registry = Arc::new(GuardRegistry::from_catalog(def)?);

        if let Some(stage) = def.hooks.keys().find(|s| !graph.contains_stage(s)) {
            return Err(WorkflowError::Catalog(format!(
                "hooks registered for unknown stage {}",
                stage
            )));
        }

        let hooks = Arc::new(HookRunner::new(def, documents, store.clone()));
        let evaluator = Arc::new(TransitionEvaluator::new(
            graph,
            registry.clone(),
            store.clone(),
        ));

        info!(
            catalog = %def.catalog,
            version = def.version,
            stages = def.stages.len(),
            transitions = def.transitions.len(),
            "Workflow orchestrator ready"
        );

        Ok(Self {
            evaluator,
            registry,
            store,
            hooks,
            leases: CaseLeases::new(),
            config,
        })
    }

    pub fn evaluator(&self) -> &TransitionEvaluator {
        &self.evaluator
    }

    pub fn graph(&self) -> &TransitionGraph {
        self.evaluator.graph()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Evaluation
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn dry_run(
        &self,
        case_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<TransitionOption>, WorkflowError> {
        self.evaluator.dry_run(case_id, actor).await
    }

    pub async fn check(
        &self,
        case_id: Uuid,
        to_stage: &str,
        actor: &Actor,
    ) -> Result<GuardResult, WorkflowError> {
        self.evaluator.check(case_id, to_stage, actor).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────────

    /// Move a case to `request.to_stage` if its guard allows it right now
    pub async fn commit(&self, request: TransitionRequest) -> Result<CommitOutcome, WorkflowError> {
        if !self.graph().contains_stage(&request.to_stage) {
            return Err(WorkflowError::UnknownStage(request.to_stage));
        }

        let committed = self.commit_with_retry(&request).await?;
        let hooks = self.run_hooks(request.case_id, &committed.to_stage).await;
        let chained = self.auto_advance(request.case_id).await;

        Ok(CommitOutcome {
            case_id: request.case_id,
            from_stage: committed.from_stage,
            to_stage: committed.to_stage,
            audit_entry_id: committed.audit_entry_id,
            hooks,
            chained,
        })
    }

    async fn commit_with_retry(
        &self,
        request: &TransitionRequest,
    ) -> Result<Committed, WorkflowError> {
        let mut expected_from = request.expected_from.as_deref();
        let mut attempt = 0;

        loop {
            match self.commit_once(request, expected_from).await {
                Err(WorkflowError::ConcurrentModification { case_id })
                    if attempt < self.config.commit_retries =>
                {
                    attempt += 1;
                    // The retry evaluates against whatever stage the case is in now
                    expected_from = None;
                    debug!(
                        case_id = %case_id,
                        to = %request.to_stage,
                        attempt,
                        "Retrying commit after concurrent modification"
                    );
                }
                other => return other,
            }
        }
    }

    async fn commit_once(
        &self,
        request: &TransitionRequest,
        expected_from: Option<&str>,
    ) -> Result<Committed, WorkflowError> {
        let case_id = request.case_id;
        let _lease = self.leases.acquire(case_id, self.config.lease_wait).await?;

        let snapshot = self.store.stage_snapshot(case_id).await?;
        if let Some(expected) = expected_from {
            if expected != snapshot.stage {
                debug!(
                    case_id = %case_id,
                    expected = expected,
                    actual = %snapshot.stage,
                    "Case left the expected stage"
                );
                return Err(WorkflowError::ConcurrentModification { case_id });
            }
        }

        let result = self
            .evaluator
            .check_edge(case_id, &snapshot.stage, &request.to_stage, &request.actor)
            .await;
        if !result.can_transition {
            debug!(
                case_id = %case_id,
                from = %snapshot.stage,
                to = %request.to_stage,
                reason = %result.reason,
                "Transition blocked"
            );
            if result.is_invalid_edge() {
                return Err(WorkflowError::InvalidEdge {
                    from: snapshot.stage,
                    to: request.to_stage.clone(),
                });
            }
            return Err(WorkflowError::TransitionBlocked {
                from: snapshot.stage,
                to: request.to_stage.clone(),
                result,
            });
        }

        let entry = AuditEntry::stage_transition(
            case_id,
            &request.actor,
            &snapshot.stage,
            &request.to_stage,
            request.remarks.as_deref(),
        );
        self.store
            .commit_stage(case_id, snapshot.version, &request.to_stage, &entry)
            .await?;

        info!(
            case_id = %case_id,
            from = %snapshot.stage,
            to = %request.to_stage,
            actor = %request.actor.id,
            "Stage transition committed"
        );

        Ok(Committed {
            from_stage: snapshot.stage,
            to_stage: request.to_stage.clone(),
            audit_entry_id: entry.entry_id,
        })
    }

    /// Hooks of the entered stage. Never called while a lease is held.
    async fn run_hooks(&self, case_id: Uuid, stage: &str) -> Vec<HookOutcome> {
        if self.hooks.hooks_for(stage).is_empty() {
            return Vec::new();
        }

        if self.config.hooks_detached {
            let hooks = self.hooks.clone();
            let stage = stage.to_string();
            let actor = self.config.system_actor.clone();
            tokio::spawn(async move {
                hooks.run(case_id, &stage, &actor).await;
            });
            return Vec::new();
        }

        self.hooks
            .run(case_id, stage, &self.config.system_actor)
            .await
    }

    /// Commit allowed auto edges from the case's current stage, first allowed
    /// edge in declared order wins, up to `max_auto_chain` steps
    async fn auto_advance(&self, case_id: Uuid) -> Vec<CommitReceipt> {
        let mut receipts = Vec::new();

        for _ in 0..self.config.max_auto_chain {
            let stage = match self.store.stage_snapshot(case_id).await {
                Ok(snapshot) => snapshot.stage,
                Err(e) => {
                    warn!(case_id = %case_id, error = %e, "Auto-transition stopped");
                    break;
                }
            };

            let targets: Vec<String> = self
                .graph()
                .edges_from(&stage)
                .into_iter()
                .filter(|t| t.auto)
                .map(|t| t.to_stage.clone())
                .collect();

            let mut advanced = None;
            for to_stage in targets {
                let request =
                    TransitionRequest::new(case_id, to_stage, self.config.system_actor.clone())
                        .with_remarks("auto-transition")
                        .expecting(stage.clone());
                match self.commit_with_retry(&request).await {
                    Ok(committed) => {
                        advanced = Some(committed);
                        break;
                    }
                    Err(e) if e.is_expected() => continue,
                    Err(e) => {
                        debug!(case_id = %case_id, error = %e, "Auto-transition not attempted further");
                        break;
                    }
                }
            }

            let Some(committed) = advanced else {
                return receipts;
            };
            let hooks = self.run_hooks(case_id, &committed.to_stage).await;
            receipts.push(CommitReceipt {
                case_id,
                from_stage: committed.from_stage,
                to_stage: committed.to_stage,
                audit_entry_id: committed.audit_entry_id,
                hooks,
            });
        }

        if !receipts.is_empty() && receipts.len() == self.config.max_auto_chain {
            warn!(
                case_id = %case_id,
                limit = self.config.max_auto_chain,
                "Auto-transition chain hit its limit"
            );
        }
        receipts
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────────────────

    /// Open a case in the catalog's initial stage
    pub async fn open_case(&self, new: NewCase, actor: &Actor) -> Result<Case, WorkflowError> {
        let case = Case::open(new, self.graph().initial_stage().code.clone(), actor);
        self.store.insert_case(&case).await?;
        info!(
            case_id = %case.case_id,
            reference = %case.reference,
            stage = %case.current_stage,
            "Case opened"
        );
        Ok(case)
    }

    pub async fn record_clearance(&self, input: ClearanceInput) -> Result<RecordOutcome, WorkflowError> {
        if !self.registry.has_section(&input.section) {
            return Err(WorkflowError::UnknownSection(input.section));
        }

        let clearance_id = {
            let _lease = self.leases.acquire(input.case_id, self.config.lease_wait).await?;

            // Decision time is taken once the case is held
            let mut clearance = Clearance::new(&input.section, input.status, &input.actor.id);
            if let Some(remarks) = &input.remarks {
                clearance = clearance.with_remarks(remarks);
            }
            if let Some(document) = &input.signed_document {
                clearance = clearance.with_signed_document(document);
            }
            let entry = AuditEntry::new(
                input.case_id,
                &input.actor,
                AuditAction::ClearanceRecorded,
                with_remarks(
                    format!("{} clearance recorded as {}", input.section, input.status),
                    input.remarks.as_deref(),
                ),
            );

            self.store
                .record_clearance(input.case_id, &clearance, &entry)
                .await?;
            clearance.clearance_id
        };
        info!(
            case_id = %input.case_id,
            section = %input.section,
            status = %input.status,
            "Clearance recorded"
        );

        self.after_record(input.case_id, clearance_id, input.auto_transition, &input.actor)
            .await
    }

    pub async fn record_review(&self, input: ReviewInput) -> Result<RecordOutcome, WorkflowError> {
        if self.registry.group(&input.group).is_none() {
            return Err(WorkflowError::UnknownGroup(input.group));
        }

        let verdict = if input.confirmed { "confirmed" } else { "not confirmed" };
        let review_id = {
            let _lease = self.leases.acquire(input.case_id, self.config.lease_wait).await?;

            let mut review = Review::new(&input.group, input.confirmed, &input.actor.id);
            if let Some(remarks) = &input.remarks {
                review = review.with_remarks(remarks);
            }
            let entry = AuditEntry::new(
                input.case_id,
                &input.actor,
                AuditAction::ReviewRecorded,
                with_remarks(
                    format!("Review of {} sections {}", input.group, verdict),
                    input.remarks.as_deref(),
                ),
            );

            self.store.record_review(input.case_id, &review, &entry).await?;
            review.review_id
        };

        self.after_record(input.case_id, review_id, input.auto_transition, &input.actor)
            .await
    }

    pub async fn add_attachment(
        &self,
        case_id: Uuid,
        document_type: &str,
        reference: &str,
        actor: &Actor,
    ) -> Result<RecordOutcome, WorkflowError> {
        let attachment = Attachment::new(document_type, reference, &actor.id);
        let entry = AuditEntry::new(
            case_id,
            actor,
            AuditAction::AttachmentAdded,
            format!("{} attached", document_type),
        );

        {
            let _lease = self.leases.acquire(case_id, self.config.lease_wait).await?;
            self.store.add_attachment(case_id, &attachment, &entry).await?;
        }

        self.after_record(case_id, attachment.attachment_id, None, actor)
            .await
    }

    /// Replace the fee breakdown. A payment already recorded is carried over.
    pub async fn set_accounts(
        &self,
        case_id: Uuid,
        lines: Vec<FeeLine>,
        actor: &Actor,
    ) -> Result<RecordOutcome, WorkflowError> {
        let accounts = AccountsBreakdown::new(lines, &actor.id);
        accounts.validate().map_err(WorkflowError::Precondition)?;

        let record_id = {
            let _lease = self.leases.acquire(case_id, self.config.lease_wait).await?;
            let entry = AuditEntry::new(
                case_id,
                actor,
                AuditAction::AccountsUpdated,
                format!(
                    "Accounts breakdown prepared: {} fee heads, total {}",
                    accounts.lines.len(),
                    accounts.total()
                ),
            );
            self.store.save_accounts(case_id, &accounts, &entry).await?;
            entry.entry_id
        };

        self.after_record(case_id, record_id, None, actor).await
    }

    /// Record a payment against the prepared breakdown. Repeated payments
    /// accumulate.
    pub async fn record_payment(
        &self,
        case_id: Uuid,
        reference: &str,
        amount: Decimal,
        actor: &Actor,
    ) -> Result<RecordOutcome, WorkflowError> {
        if amount <= Decimal::ZERO {
            return Err(WorkflowError::Precondition(format!(
                "payment amount must be positive, got {}",
                amount
            )));
        }

        let record_id = {
            let _lease = self.leases.acquire(case_id, self.config.lease_wait).await?;
            let payment = Payment {
                reference: reference.to_string(),
                amount,
                received_at: Utc::now(),
            };
            let entry = AuditEntry::new(
                case_id,
                actor,
                AuditAction::PaymentRecorded,
                format!("Payment {} of {} received", reference, amount),
            );

            // The store adds to the stored total in the same write
            let accounts = self
                .store
                .record_payment(case_id, &payment, &entry)
                .await?
                .ok_or_else(|| {
                    WorkflowError::Precondition(
                        "payment recorded before accounts breakdown was prepared".to_string(),
                    )
                })?;
            debug!(
                case_id = %case_id,
                outstanding = %accounts.outstanding(),
                "Payment recorded"
            );
            entry.entry_id
        };

        self.after_record(case_id, record_id, None, actor).await
    }

    pub async fn record_deed(
        &self,
        case_id: Uuid,
        deed_number: &str,
        executed_on: NaiveDate,
        witnesses: Vec<String>,
        actor: &Actor,
    ) -> Result<RecordOutcome, WorkflowError> {
        if deed_number.trim().is_empty() {
            return Err(WorkflowError::Precondition(
                "deed number must not be empty".to_string(),
            ));
        }

        let deed = TransferDeed {
            deed_number: deed_number.to_string(),
            executed_on,
            witnesses,
            recorded_by: actor.id.clone(),
            recorded_at: Utc::now(),
        };
        let entry = AuditEntry::new(
            case_id,
            actor,
            AuditAction::DeedRecorded,
            format!("Transfer deed {} executed on {}", deed_number, executed_on),
        );

        {
            let _lease = self.leases.acquire(case_id, self.config.lease_wait).await?;
            self.store.save_deed(case_id, &deed, &entry).await?;
        }

        self.after_record(case_id, entry.entry_id, None, actor).await
    }

    /// Requested transition if any. Whatever auto edges the write unlocked
    /// still fire when there was none or it did not commit.
    async fn after_record(
        &self,
        case_id: Uuid,
        record_id: Uuid,
        auto_transition: Option<String>,
        actor: &Actor,
    ) -> Result<RecordOutcome, WorkflowError> {
        let Some(to_stage) = auto_transition else {
            return Ok(RecordOutcome {
                record_id,
                auto_transition: None,
                chained: self.auto_advance(case_id).await,
            });
        };

        let (outcome, chained) = match self
            .commit(TransitionRequest::new(case_id, &to_stage, actor.clone()))
            .await
        {
            Ok(commit) => (AutoTransitionOutcome::Committed { commit }, Vec::new()),
            Err(e) => {
                debug!(
                    case_id = %case_id,
                    to_stage = %to_stage,
                    error = %e,
                    "Requested transition not committed, trying auto edges"
                );
                let outcome = AutoTransitionOutcome::NotCommitted {
                    code: e.code().to_string(),
                    reason: e.to_string(),
                };
                (outcome, self.auto_advance(case_id).await)
            }
        };

        Ok(RecordOutcome {
            record_id,
            auto_transition: Some(outcome),
            chained,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn load_case(&self, case_id: Uuid) -> Result<Case, WorkflowError> {
        Ok(self.store.load_case(case_id).await?)
    }

    /// Audit entries oldest first
    pub async fn audit_log(&self, case_id: Uuid) -> Result<Vec<AuditEntry>, WorkflowError> {
        Ok(self.store.audit_log(case_id).await?)
    }

    pub async fn stage_history(&self, case_id: Uuid) -> Result<Vec<StageChange>, WorkflowError> {
        let log = self.store.audit_log(case_id).await?;
        Ok(stage_history(&log))
    }
}

fn with_remarks(details: String, remarks: Option<&str>) -> String {
    match remarks.filter(|r| !r.trim().is_empty()) {
        Some(remarks) => format!("{}. Remarks: {}", details, remarks),
        None => details,
    }
}
