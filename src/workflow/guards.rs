//! Guard Registry
//!
//! Guards are declared in the catalog with parameters and resolved once, at
//! load, into the closed [`GuardKind`] enum. Group names are replaced by their
//! member sections and `all_of` compositions are flattened, so evaluation is
//! a plain `match` with no further catalog lookups.
//!
//! Guards read the aggregate state they need from the injected [`CaseStore`]
//! and never write. Identical inputs give identical results.

use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use uuid::Uuid;

use super::blockers::{Blocker, BlockerType, GuardResult};
use super::definition::{CatalogDefinition, GuardDef};
use super::WorkflowError;
use crate::case::{Actor, Clearance, ClearanceStatus};
use crate::store::{CaseStore, StoreError};

/// Everything a guard may know about the requested move
#[derive(Debug, Clone, Serialize)]
pub struct GuardContext {
    pub case_id: Uuid,
    pub from_stage: String,
    pub to_stage: String,
    pub actor: Actor,
}

/// Error raised while evaluating a guard; the evaluator turns it into a
/// blocked result carrying the message
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Inconsistent(String),
}

/// A resolved guard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardKind {
    Always,
    RequiredAttachments {
        document_types: Vec<String>,
    },
    SectionGroupClear {
        group: String,
        sections: Vec<String>,
    },
    /// Passes when any member's latest decision is OBJECTION
    SectionGroupObjection {
        group: String,
        sections: Vec<String>,
    },
    /// Latest review confirmed, and no member decided after it was signed
    ReviewConfirmed {
        group: String,
        sections: Vec<String>,
    },
    AccountsPrepared,
    PaymentReceived,
    TransferDeedRecorded,
    ActorRole {
        roles: Vec<String>,
    },
    /// Flattened: members are never `AllOf` themselves
    AllOf {
        guards: Vec<GuardKind>,
    },
    /// Name did not resolve; always blocks
    Unconfigured {
        name: String,
    },
}

impl GuardKind {
    pub async fn evaluate(
        &self,
        ctx: &GuardContext,
        store: &dyn CaseStore,
    ) -> Result<GuardResult, GuardError> {
        match self {
            GuardKind::AllOf { guards } => {
                let mut results = Vec::with_capacity(guards.len());
                for guard in guards {
                    results.push(guard.evaluate_leaf(ctx, store).await?);
                }
                Ok(GuardResult::combine(results))
            }
            leaf => leaf.evaluate_leaf(ctx, store).await,
        }
    }

    async fn evaluate_leaf(
        &self,
        ctx: &GuardContext,
        store: &dyn CaseStore,
    ) -> Result<GuardResult, GuardError> {
        match self {
            GuardKind::Always => Ok(GuardResult::passed()),

            GuardKind::Unconfigured { name } => Ok(GuardResult::unconfigured(name)),

            GuardKind::RequiredAttachments { document_types } => {
                let present = store.attachment_types(ctx.case_id).await?;
                let missing: Vec<&String> = document_types
                    .iter()
                    .filter(|t| !present.contains(t.as_str()))
                    .collect();

                let blockers = missing
                    .iter()
                    .map(|t| {
                        Blocker::new(
                            BlockerType::MissingAttachment {
                                document_type: t.to_string(),
                            },
                            format!("Missing required attachment: {}", t),
                        )
                    })
                    .collect();

                Ok(GuardResult::blocked(blockers).with_metadata("missing", json!(missing)))
            }

            GuardKind::SectionGroupClear { sections, .. } => {
                let latest = store.latest_clearances(ctx.case_id, sections).await?;
                let (blockers, statuses) = unclear_sections(sections, &latest);
                Ok(GuardResult::blocked(blockers).with_metadata("sections", statuses.into()))
            }

            GuardKind::SectionGroupObjection { group, sections } => {
                let latest = store.latest_clearances(ctx.case_id, sections).await?;
                let objecting: Vec<&String> = sections
                    .iter()
                    .filter(|s| {
                        latest
                            .get(s.as_str())
                            .map(|c| c.status == ClearanceStatus::Objection)
                            .unwrap_or(false)
                    })
                    .collect();

                let result = if objecting.is_empty() {
                    GuardResult::blocked(vec![Blocker::new(
                        BlockerType::NoObjection {
                            group: group.clone(),
                        },
                        format!("No section in group {} has raised an objection", group),
                    )])
                } else {
                    GuardResult::passed()
                };
                Ok(result.with_metadata("objections", json!(objecting)))
            }

            GuardKind::ReviewConfirmed { group, sections } => {
                let review = match store.latest_review(ctx.case_id, group).await? {
                    Some(review) => review,
                    None => {
                        return Ok(GuardResult::blocked(vec![Blocker::new(
                            BlockerType::ReviewMissing {
                                group: group.clone(),
                            },
                            format!("Review of {} sections not recorded", group),
                        )]))
                    }
                };

                if !review.confirmed {
                    return Ok(GuardResult::blocked(vec![Blocker::new(
                        BlockerType::ReviewNotConfirmed {
                            group: group.clone(),
                        },
                        format!("Review of {} sections not confirmed", group),
                    )]));
                }

                // A confirmed review only vouches for the decisions it saw and
                // never outranks the sections' current standing.
                let latest = store.latest_clearances(ctx.case_id, sections).await?;
                let (mut blockers, statuses) = unclear_sections(sections, &latest);
                blockers.extend(
                    sections
                        .iter()
                        .filter_map(|s| latest.get(s))
                        .filter(|c| c.decided_at > review.reviewed_at)
                        .map(|c| {
                            Blocker::new(
                                BlockerType::ReviewStale {
                                    group: group.clone(),
                                    section: c.section.clone(),
                                },
                                format!(
                                    "{} decision changed after review of {} sections",
                                    c.section, group
                                ),
                            )
                        }),
                );

                Ok(GuardResult::blocked(blockers)
                    .with_metadata("reviewed_by", json!(review.reviewed_by))
                    .with_metadata("sections", statuses.into()))
            }

            GuardKind::AccountsPrepared => {
                let blocker = match store.accounts(ctx.case_id).await? {
                    None => Some("Accounts breakdown not prepared"),
                    Some(accounts) if accounts.lines.is_empty() || accounts.total().is_zero() => {
                        Some("Accounts breakdown has no chargeable fee heads")
                    }
                    Some(_) => None,
                };
                Ok(GuardResult::blocked(
                    blocker
                        .map(|d| Blocker::new(BlockerType::AccountsMissing, d))
                        .into_iter()
                        .collect(),
                ))
            }

            GuardKind::PaymentReceived => {
                let result = match store.accounts(ctx.case_id).await? {
                    None => GuardResult::blocked(vec![Blocker::new(
                        BlockerType::AccountsMissing,
                        "Accounts breakdown not prepared",
                    )]),
                    Some(accounts) if accounts.is_paid() => GuardResult::passed(),
                    Some(accounts) => {
                        let outstanding = accounts.outstanding().to_string();
                        GuardResult::blocked(vec![Blocker::new(
                            BlockerType::PaymentOutstanding {
                                outstanding: outstanding.clone(),
                            },
                            format!("Payment outstanding: {}", outstanding),
                        )])
                    }
                };
                Ok(result)
            }

            GuardKind::TransferDeedRecorded => {
                let result = match store.deed(ctx.case_id).await? {
                    Some(_) => GuardResult::passed(),
                    None => GuardResult::blocked(vec![Blocker::new(
                        BlockerType::DeedMissing,
                        "Transfer deed not recorded",
                    )]),
                };
                Ok(result)
            }

            GuardKind::ActorRole { roles } => {
                if roles.iter().any(|r| *r == ctx.actor.role) {
                    return Ok(GuardResult::passed());
                }
                Ok(GuardResult::blocked(vec![Blocker::new(
                    BlockerType::RoleNotPermitted {
                        role: ctx.actor.role.clone(),
                        permitted: roles.clone(),
                    },
                    format!(
                        "Role {} may not move a case from {} to {}",
                        ctx.actor.role, ctx.from_stage, ctx.to_stage
                    ),
                )]))
            }

            GuardKind::AllOf { .. } => Err(GuardError::Inconsistent(
                "nested all_of guard was not flattened".to_string(),
            )),
        }
    }

    pub fn is_configured(&self) -> bool {
        match self {
            GuardKind::Unconfigured { .. } => false,
            GuardKind::AllOf { guards } => guards.iter().all(|g| g.is_configured()),
            _ => true,
        }
    }
}

/// Immutable name → guard table built from one catalog
#[derive(Debug, Clone)]
pub struct GuardRegistry {
    guards: HashMap<String, GuardKind>,
    sections: Vec<String>,
    groups: BTreeMap<String, Vec<String>>,
}

impl GuardRegistry {
    /// Resolve every declared guard.
    ///
    /// Groups naming undeclared sections, guards naming undeclared groups and
    /// `all_of` cycles are catalog errors. An `all_of` member naming an
    /// undeclared guard resolves to `Unconfigured` and blocks at runtime.
    pub fn from_catalog(def: &CatalogDefinition) -> Result<Self, WorkflowError> {
        let sections: Vec<String> = def.sections.iter().map(|s| s.code.clone()).collect();

        for (group, members) in &def.groups {
            if let Some(unknown) = members.iter().find(|m| !sections.contains(m)) {
                return Err(WorkflowError::Catalog(format!(
                    "group {} references unknown section {}",
                    group, unknown
                )));
            }
        }

        let mut guards = HashMap::with_capacity(def.guards.len());
        for name in def.guards.keys() {
            let mut stack = Vec::new();
            let kind = resolve_def(name, def, &mut stack)?;
            guards.insert(name.clone(), kind);
        }

        Ok(Self {
            guards,
            sections,
            groups: def.groups.clone(),
        })
    }

    pub fn get(&self, name: &str) -> Option<&GuardKind> {
        self.guards.get(name)
    }

    /// Resolve a guard name; unknown names become `Unconfigured`
    pub fn resolve(&self, name: &str) -> GuardKind {
        match self.guards.get(name) {
            Some(kind) => kind.clone(),
            None => GuardKind::Unconfigured {
                name: name.to_string(),
            },
        }
    }

    pub fn guard_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.guards.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_section(&self, code: &str) -> bool {
        self.sections.iter().any(|s| s == code)
    }

    pub fn group(&self, name: &str) -> Option<&[String]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// Evaluate a guard by name. Errors become a blocked result whose reason
    /// is the error message.
    pub async fn evaluate(
        &self,
        guard_name: &str,
        ctx: &GuardContext,
        store: &dyn CaseStore,
    ) -> GuardResult {
        let kind = match self.guards.get(guard_name) {
            Some(kind) => kind,
            None => {
                warn!(guard = guard_name, "Unconfigured guard requested");
                return GuardResult::unconfigured(guard_name);
            }
        };
        evaluate_kind(guard_name, kind, ctx, store).await
    }
}

/// Shared by the registry and the evaluator
pub(crate) async fn evaluate_kind(
    guard_name: &str,
    kind: &GuardKind,
    ctx: &GuardContext,
    store: &dyn CaseStore,
) -> GuardResult {
    let result = match kind.evaluate(ctx, store).await {
        Ok(result) => result,
        Err(e) => GuardResult::failed(e.to_string()),
    };
    debug!(
        case_id = %ctx.case_id,
        guard = guard_name,
        from = %ctx.from_stage,
        to = %ctx.to_stage,
        allowed = result.can_transition,
        "Guard evaluated"
    );
    result
}

/// Blockers for members with no decision or one that does not count as clear,
/// plus each member's current status for the result metadata
fn unclear_sections(
    sections: &[String],
    latest: &BTreeMap<String, Clearance>,
) -> (Vec<Blocker>, serde_json::Map<String, serde_json::Value>) {
    let mut blockers = Vec::new();
    let mut statuses = serde_json::Map::new();

    for section in sections {
        match latest.get(section) {
            None => {
                statuses.insert(section.clone(), serde_json::Value::Null);
                blockers.push(Blocker::new(
                    BlockerType::ClearanceMissing {
                        section: section.clone(),
                    },
                    format!("No decision recorded for section {}", section),
                ));
            }
            Some(clearance) => {
                statuses.insert(section.clone(), json!(clearance.status.as_str()));
                if !clearance.status.satisfies_clear() {
                    blockers.push(Blocker::new(
                        BlockerType::SectionNotClear {
                            section: section.clone(),
                            status: clearance.status,
                        },
                        format!("{} clearance is {}", section, clearance.status),
                    ));
                }
            }
        }
    }

    (blockers, statuses)
}

fn resolve_def(
    name: &str,
    def: &CatalogDefinition,
    stack: &mut Vec<String>,
) -> Result<GuardKind, WorkflowError> {
    let guard_def = match def.guards.get(name) {
        Some(g) => g,
        None => {
            warn!(guard = name, "all_of references unconfigured guard");
            return Ok(GuardKind::Unconfigured {
                name: name.to_string(),
            });
        }
    };

    let group_members = |group: &str| -> Result<Vec<String>, WorkflowError> {
        def.groups.get(group).cloned().ok_or_else(|| {
            WorkflowError::Catalog(format!(
                "guard {} references unknown section group {}",
                name, group
            ))
        })
    };

    let kind = match guard_def {
        GuardDef::Always => GuardKind::Always,
        GuardDef::RequiredAttachments { document_types } => GuardKind::RequiredAttachments {
            document_types: document_types.clone(),
        },
        GuardDef::SectionGroupClear { group } => GuardKind::SectionGroupClear {
            group: group.clone(),
            sections: group_members(group)?,
        },
        GuardDef::SectionGroupObjection { group } => GuardKind::SectionGroupObjection {
            group: group.clone(),
            sections: group_members(group)?,
        },
        GuardDef::ReviewConfirmed { group } => GuardKind::ReviewConfirmed {
            group: group.clone(),
            sections: group_members(group)?,
        },
        GuardDef::AccountsPrepared => GuardKind::AccountsPrepared,
        GuardDef::PaymentReceived => GuardKind::PaymentReceived,
        GuardDef::TransferDeedRecorded => GuardKind::TransferDeedRecorded,
        GuardDef::ActorRole { roles } => GuardKind::ActorRole {
            roles: roles.clone(),
        },
        GuardDef::AllOf { guards } => {
            if stack.iter().any(|s| s == name) {
                return Err(WorkflowError::Catalog(format!(
                    "all_of guard {} is part of a cycle: {} -> {}",
                    name,
                    stack.join(" -> "),
                    name
                )));
            }
            stack.push(name.to_string());

            let mut flat = Vec::new();
            for member in guards {
                match resolve_def(member, def, stack)? {
                    GuardKind::AllOf { guards } => flat.extend(guards),
                    leaf => flat.push(leaf),
                }
            }

            stack.pop();
            GuardKind::AllOf { guards: flat }
        }
    };

    Ok(kind)
}
