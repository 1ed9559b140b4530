//! Transition Graph
//!
//! Directed multigraph of stages and guarded edges, built once from a
//! catalog and shared read-only. Stages and edges live in flat tables;
//! adjacency lists hold edge indices in declared order.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

use super::definition::{CatalogDefinition, GuardDef};
use super::WorkflowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransitionId(usize);

#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub code: String,
    pub name: String,
    pub sort_order: i32,
    pub initial: bool,
    pub terminal: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub from_stage: String,
    pub to_stage: String,
    /// Name of the guard protecting this edge
    pub guard: String,
    pub auto: bool,
    pub description: Option<String>,
}

/// Non-fatal catalog findings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphWarning {
    /// No path from the initial stage leads here
    UnreachableStage { stage: String },
    /// Declared guard that no edge uses, directly or through `all_of`
    UnusedGuard { guard: String },
}

impl std::fmt::Display for GraphWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphWarning::UnreachableStage { stage } => {
                write!(f, "stage {} is unreachable from the initial stage", stage)
            }
            GraphWarning::UnusedGuard { guard } => {
                write!(f, "guard {} is declared but no transition uses it", guard)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransitionGraph {
    stages: Vec<Stage>,
    transitions: Vec<Transition>,
    /// Outgoing edges per stage, indexed by `StageId`
    outgoing: Vec<Vec<TransitionId>>,
    index: HashMap<String, StageId>,
    initial: StageId,
    warnings: Vec<GraphWarning>,
}

impl TransitionGraph {
    /// Build and validate the graph.
    ///
    /// Fatal: duplicate stage codes, edges naming unknown stages, anything
    /// other than exactly one initial stage, duplicate `(from, to)` and
    /// duplicate `(from, guard)` pairs. Unreachable stages are warnings.
    pub fn build(def: &CatalogDefinition) -> Result<Self, WorkflowError> {
        let mut stages = Vec::with_capacity(def.stages.len());
        let mut index = HashMap::with_capacity(def.stages.len());

        for stage in &def.stages {
            let id = StageId(stages.len());
            if index.insert(stage.code.clone(), id).is_some() {
                return Err(WorkflowError::Catalog(format!(
                    "duplicate stage code {}",
                    stage.code
                )));
            }
            stages.push(Stage {
                code: stage.code.clone(),
                name: stage.name.clone(),
                sort_order: stage.sort_order,
                initial: stage.initial,
                terminal: stage.terminal,
            });
        }

        let initials: Vec<StageId> = stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.initial)
            .map(|(i, _)| StageId(i))
            .collect();
        let initial = match initials.as_slice() {
            [only] => *only,
            [] => {
                return Err(WorkflowError::Catalog(
                    "catalog declares no initial stage".to_string(),
                ))
            }
            _ => {
                return Err(WorkflowError::Catalog(format!(
                    "catalog declares {} initial stages, expected exactly one",
                    initials.len()
                )))
            }
        };

        let mut transitions = Vec::with_capacity(def.transitions.len());
        let mut outgoing = vec![Vec::new(); stages.len()];
        let mut seen_targets: HashSet<(StageId, StageId)> = HashSet::new();
        let mut seen_guards: HashSet<(StageId, &str)> = HashSet::new();

        for t in &def.transitions {
            let from = *index.get(&t.from).ok_or_else(|| {
                WorkflowError::Catalog(format!(
                    "transition {} -> {} references unknown stage {}",
                    t.from, t.to, t.from
                ))
            })?;
            let to = *index.get(&t.to).ok_or_else(|| {
                WorkflowError::Catalog(format!(
                    "transition {} -> {} references unknown stage {}",
                    t.from, t.to, t.to
                ))
            })?;

            if !seen_targets.insert((from, to)) {
                return Err(WorkflowError::Catalog(format!(
                    "duplicate transition {} -> {}",
                    t.from, t.to
                )));
            }
            if !seen_guards.insert((from, t.guard.as_str())) {
                return Err(WorkflowError::Catalog(format!(
                    "guard {} used twice on transitions from {}",
                    t.guard, t.from
                )));
            }

            let id = TransitionId(transitions.len());
            transitions.push(Transition {
                from_stage: t.from.clone(),
                to_stage: t.to.clone(),
                guard: t.guard.clone(),
                auto: t.auto,
                description: t.description.clone(),
            });
            outgoing[from.0].push(id);
        }

        let mut graph = Self {
            stages,
            transitions,
            outgoing,
            index,
            initial,
            warnings: Vec::new(),
        };
        graph.warnings = graph.find_unreachable();
        graph.warnings.extend(find_unused_guards(def));
        for warning in &graph.warnings {
            warn!(catalog = %def.catalog, "{}", warning);
        }

        Ok(graph)
    }

    fn find_unreachable(&self) -> Vec<GraphWarning> {
        let mut visited = vec![false; self.stages.len()];
        let mut queue = VecDeque::from([self.initial]);
        visited[self.initial.0] = true;

        while let Some(stage) = queue.pop_front() {
            for edge in &self.outgoing[stage.0] {
                let target = self.index[&self.transitions[edge.0].to_stage];
                if !visited[target.0] {
                    visited[target.0] = true;
                    queue.push_back(target);
                }
            }
        }

        self.stages
            .iter()
            .zip(visited)
            .filter(|(_, seen)| !seen)
            .map(|(stage, _)| GraphWarning::UnreachableStage {
                stage: stage.code.clone(),
            })
            .collect()
    }

    pub fn stage(&self, code: &str) -> Option<&Stage> {
        self.index.get(code).map(|id| &self.stages[id.0])
    }

    pub fn contains_stage(&self, code: &str) -> bool {
        self.index.contains_key(code)
    }

    /// Stages in catalog order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Stages by `sort_order`, for listings
    pub fn stages_sorted(&self) -> Vec<&Stage> {
        let mut sorted: Vec<&Stage> = self.stages.iter().collect();
        sorted.sort_by_key(|s| s.sort_order);
        sorted
    }

    pub fn initial_stage(&self) -> &Stage {
        &self.stages[self.initial.0]
    }

    pub fn is_terminal(&self, code: &str) -> bool {
        self.stage(code).map(|s| s.terminal).unwrap_or(false)
    }

    /// Outgoing edges in declared order; empty for unknown stages
    pub fn edges_from(&self, stage_code: &str) -> Vec<&Transition> {
        match self.index.get(stage_code) {
            Some(id) => self.outgoing[id.0]
                .iter()
                .map(|t| &self.transitions[t.0])
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&Transition> {
        self.edges_from(from).into_iter().find(|t| t.to_stage == to)
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn warnings(&self) -> &[GraphWarning] {
        &self.warnings
    }
}

fn find_unused_guards(def: &CatalogDefinition) -> Vec<GraphWarning> {
    let mut used: HashSet<&str> = HashSet::new();
    let mut pending: Vec<&str> = def.transitions.iter().map(|t| t.guard.as_str()).collect();

    while let Some(name) = pending.pop() {
        if !used.insert(name) {
            continue;
        }
        if let Some(GuardDef::AllOf { guards }) = def.guards.get(name) {
            pending.extend(guards.iter().map(String::as_str));
        }
    }

    def.guards
        .keys()
        .filter(|name| !used.contains(name.as_str()))
        .map(|name| GraphWarning::UnusedGuard {
            guard: name.clone(),
        })
        .collect()
}
