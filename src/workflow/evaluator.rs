//! Transition Evaluator
//!
//! Read-only evaluation of outgoing edges. Dry-runs, single checks and the
//! orchestrator's commit-time check all go through [`TransitionEvaluator::check_edge`],
//! so a preview can never disagree with what a commit would decide.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::blockers::GuardResult;
use super::graph::TransitionGraph;
use super::guards::{evaluate_kind, GuardContext, GuardKind, GuardRegistry};
use super::WorkflowError;
use crate::case::Actor;
use crate::store::CaseStore;

/// One outgoing edge with its evaluated guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionOption {
    pub to_stage: String,
    pub guard_name: String,
    pub result: GuardResult,
}

/// Catalog listing of an edge without evaluation
#[derive(Debug, Clone, Serialize)]
pub struct EdgeDescription {
    pub from_stage: String,
    pub to_stage: String,
    pub to_stage_name: String,
    pub guard_name: String,
    pub guard: GuardKind,
    pub auto: bool,
    pub description: Option<String>,
}

pub struct TransitionEvaluator {
    graph: Arc<TransitionGraph>,
    registry: Arc<GuardRegistry>,
    store: Arc<dyn CaseStore>,
    /// Edge guards resolved once, keyed by guard name
    resolved: HashMap<String, GuardKind>,
}

impl TransitionEvaluator {
    pub fn new(
        graph: Arc<TransitionGraph>,
        registry: Arc<GuardRegistry>,
        store: Arc<dyn CaseStore>,
    ) -> Self {
        let mut resolved = HashMap::new();
        for transition in graph.transitions() {
            let kind = registry.resolve(&transition.guard);
            if !kind.is_configured() {
                warn!(
                    from = %transition.from_stage,
                    to = %transition.to_stage,
                    guard = %transition.guard,
                    "Transition uses an unconfigured guard and will always block"
                );
            }
            resolved.insert(transition.guard.clone(), kind);
        }

        Self {
            graph,
            registry,
            store,
            resolved,
        }
    }

    pub fn graph(&self) -> &TransitionGraph {
        &self.graph
    }

    pub fn registry(&self) -> &GuardRegistry {
        &self.registry
    }

    /// Evaluate every outgoing edge of the case's current stage, in declared order
    pub async fn dry_run(
        &self,
        case_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<TransitionOption>, WorkflowError> {
        let snapshot = self.store.stage_snapshot(case_id).await?;

        let mut options = Vec::new();
        for edge in self.graph.edges_from(&snapshot.stage) {
            let result = self
                .check_edge(case_id, &snapshot.stage, &edge.to_stage, actor)
                .await;
            options.push(TransitionOption {
                to_stage: edge.to_stage.clone(),
                guard_name: edge.guard.clone(),
                result,
            });
        }
        Ok(options)
    }

    /// Evaluate the single edge from the case's current stage to `to_stage`
    pub async fn check(
        &self,
        case_id: Uuid,
        to_stage: &str,
        actor: &Actor,
    ) -> Result<GuardResult, WorkflowError> {
        let snapshot = self.store.stage_snapshot(case_id).await?;
        Ok(self
            .check_edge(case_id, &snapshot.stage, to_stage, actor)
            .await)
    }

    /// Evaluate the edge `from -> to` for a case. A missing edge is a blocked
    /// result distinguishable through [`GuardResult::is_invalid_edge`].
    pub(crate) async fn check_edge(
        &self,
        case_id: Uuid,
        from_stage: &str,
        to_stage: &str,
        actor: &Actor,
    ) -> GuardResult {
        let edge = match self.graph.edge(from_stage, to_stage) {
            Some(edge) => edge,
            None => return GuardResult::no_such_transition(from_stage, to_stage),
        };

        let ctx = GuardContext {
            case_id,
            from_stage: from_stage.to_string(),
            to_stage: to_stage.to_string(),
            actor: actor.clone(),
        };

        match self.resolved.get(&edge.guard) {
            Some(kind) => evaluate_kind(&edge.guard, kind, &ctx, self.store.as_ref()).await,
            None => GuardResult::unconfigured(&edge.guard),
        }
    }

    /// Outgoing edges of a stage as declared in the catalog
    pub fn describe_from(&self, stage_code: &str) -> Result<Vec<EdgeDescription>, WorkflowError> {
        if !self.graph.contains_stage(stage_code) {
            return Err(WorkflowError::UnknownStage(stage_code.to_string()));
        }

        Ok(self
            .graph
            .edges_from(stage_code)
            .into_iter()
            .map(|edge| EdgeDescription {
                from_stage: edge.from_stage.clone(),
                to_stage: edge.to_stage.clone(),
                to_stage_name: self
                    .graph
                    .stage(&edge.to_stage)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                guard_name: edge.guard.clone(),
                guard: self.registry.resolve(&edge.guard),
                auto: edge.auto,
                description: edge.description.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{Attachment, AuditAction, AuditEntry, Case, NewCase};
    use crate::store::MemoryCaseStore;
    use crate::workflow::CatalogLoader;

    const CATALOG: &str = r#"
catalog: evaluator_test
stages:
  - { code: DRAFT, name: Draft, initial: true }
  - { code: FILED, name: Filed }
  - { code: WITHDRAWN, name: Withdrawn, terminal: true }
  - { code: LIMBO, name: Limbo }
guards:
  docs: { type: required_attachments, document_types: [SITE_PLAN] }
  anyone: { type: always }
transitions:
  - { from: DRAFT, to: FILED, guard: docs }
  - { from: DRAFT, to: WITHDRAWN, guard: anyone }
  - { from: FILED, to: LIMBO, guard: misspelled }
"#;

    async fn evaluator() -> (TransitionEvaluator, MemoryCaseStore, Uuid) {
        let def = CatalogLoader::load_from_str(CATALOG).unwrap();
        let graph = Arc::new(TransitionGraph::build(&def).unwrap());
        let registry = Arc::new(GuardRegistry::from_catalog(&def).unwrap());
        let store = MemoryCaseStore::new();

        let case = Case::open(
            NewCase {
                reference: "PT-9".into(),
                seller_id: "s".into(),
                buyer_id: "b".into(),
                plot_id: "p".into(),
            },
            "DRAFT",
            &Actor::system(),
        );
        store.insert_case(&case).await.unwrap();

        let evaluator = TransitionEvaluator::new(graph, registry, Arc::new(store.clone()));
        (evaluator, store, case.case_id)
    }

    #[tokio::test]
    async fn test_dry_run_lists_edges_in_order() {
        let (evaluator, _, case_id) = evaluator().await;
        let options = evaluator.dry_run(case_id, &Actor::system()).await.unwrap();

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].to_stage, "FILED");
        assert!(!options[0].result.can_transition);
        assert_eq!(options[1].to_stage, "WITHDRAWN");
        assert!(options[1].result.can_transition);
    }

    #[tokio::test]
    async fn test_check_matches_dry_run() {
        let (evaluator, _, case_id) = evaluator().await;
        let actor = Actor::system();

        for option in evaluator.dry_run(case_id, &actor).await.unwrap() {
            let checked = evaluator.check(case_id, &option.to_stage, &actor).await.unwrap();
            assert_eq!(checked, option.result);
        }
    }

    #[tokio::test]
    async fn test_missing_edge_is_invalid() {
        let (evaluator, _, case_id) = evaluator().await;
        let result = evaluator.check(case_id, "LIMBO", &Actor::system()).await.unwrap();
        assert!(result.is_invalid_edge());
        assert_eq!(result.reason, "no such transition from current stage");
    }

    #[tokio::test]
    async fn test_unconfigured_edge_guard_blocks() {
        let (evaluator, store, case_id) = evaluator().await;
        store
            .add_attachment(
                case_id,
                &Attachment::new("SITE_PLAN", "files/plan.pdf", "clerk"),
                &AuditEntry::new(case_id, &Actor::system(), AuditAction::AttachmentAdded, "plan"),
            )
            .await
            .unwrap();
        let snapshot = store.stage_snapshot(case_id).await.unwrap();
        store
            .commit_stage(
                case_id,
                snapshot.version,
                "FILED",
                &AuditEntry::stage_transition(case_id, &Actor::system(), "DRAFT", "FILED", None),
            )
            .await
            .unwrap();

        let result = evaluator.check(case_id, "LIMBO", &Actor::system()).await.unwrap();
        assert!(!result.can_transition);
        assert!(!result.is_invalid_edge());
        assert_eq!(result.reason, "unconfigured guard");
    }

    #[tokio::test]
    async fn test_unknown_case() {
        let (evaluator, _, _) = evaluator().await;
        assert!(matches!(
            evaluator.dry_run(Uuid::new_v4(), &Actor::system()).await,
            Err(WorkflowError::CaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_describe_from() {
        let (evaluator, _, _) = evaluator().await;
        let edges = evaluator.describe_from("DRAFT").unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[1].to_stage_name, "Withdrawn");
        assert_eq!(edges[1].guard, GuardKind::Always);

        assert!(evaluator.describe_from("WITHDRAWN").unwrap().is_empty());
        assert!(matches!(
            evaluator.describe_from("NOWHERE"),
            Err(WorkflowError::UnknownStage(_))
        ));
    }
}
