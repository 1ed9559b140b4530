//! Guard Results and Blockers
//!
//! A guard either allows a transition or returns the blockers that stop it.
//! Blockers carry enough structure for the caller to render a disabled
//! action with its reason.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::case::ClearanceStatus;

/// Reason shown when the requested stage has no edge from the current one
pub const NO_SUCH_TRANSITION: &str = "no such transition from current stage";

/// Reason shown when an edge names a guard the registry does not know
pub const UNCONFIGURED_GUARD: &str = "unconfigured guard";

/// A blocker preventing a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    /// Type of blocker with details
    pub blocker_type: BlockerType,
    /// Human-readable description
    pub description: String,
    /// Operation that can resolve this blocker
    pub resolution_action: Option<String>,
}

impl Blocker {
    pub fn new(blocker_type: BlockerType, description: impl Into<String>) -> Self {
        let resolution_action = blocker_type.suggested_action().map(str::to_string);
        Self {
            blocker_type,
            description: description.into(),
            resolution_action,
        }
    }

    pub fn with_resolution(mut self, action: impl Into<String>) -> Self {
        self.resolution_action = Some(action.into());
        self
    }
}

/// Types of blockers with their specific data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum BlockerType {
    // ─────────────────────────────────────────────────────────────────────────────
    // Edge resolution
    // ─────────────────────────────────────────────────────────────────────────────
    /// Requested stage is not reachable from the current stage
    NoSuchTransition { from: String, to: String },

    /// Edge names a guard the registry does not know
    UnconfiguredGuard { guard: String },

    /// Guard could not be evaluated (missing aggregate, store failure)
    GuardError,

    // ─────────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────────
    MissingAttachment { document_type: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Sections
    // ─────────────────────────────────────────────────────────────────────────────
    /// No decision recorded for a section yet
    ClearanceMissing { section: String },

    /// Latest decision does not count as clear
    SectionNotClear {
        section: String,
        status: ClearanceStatus,
    },

    /// Branch requires an objection but none is recorded
    NoObjection { group: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Front-office review
    // ─────────────────────────────────────────────────────────────────────────────
    ReviewMissing { group: String },

    ReviewNotConfirmed { group: String },

    /// A section decided after the review was signed
    ReviewStale { group: String, section: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────────
    AccountsMissing,

    /// Outstanding amount as a decimal string
    PaymentOutstanding { outstanding: String },

    // ─────────────────────────────────────────────────────────────────────────────
    // Completion
    // ─────────────────────────────────────────────────────────────────────────────
    DeedMissing,

    /// Actor does not hold a role permitted to take this transition
    RoleNotPermitted { role: String, permitted: Vec<String> },
}

impl BlockerType {
    /// Operation that resolves this blocker, for the UI to offer
    pub fn suggested_action(&self) -> Option<&'static str> {
        match self {
            BlockerType::NoSuchTransition { .. } => None,
            BlockerType::UnconfiguredGuard { .. } => None,
            BlockerType::GuardError => None,

            BlockerType::MissingAttachment { .. } => Some("attachment.add"),

            BlockerType::ClearanceMissing { .. } => Some("clearance.record"),
            BlockerType::SectionNotClear { .. } => Some("clearance.record"),
            BlockerType::NoObjection { .. } => None,

            BlockerType::ReviewMissing { .. } => Some("review.record"),
            BlockerType::ReviewNotConfirmed { .. } => Some("review.record"),
            BlockerType::ReviewStale { .. } => Some("review.record"),

            BlockerType::AccountsMissing => Some("accounts.prepare"),
            BlockerType::PaymentOutstanding { .. } => Some("accounts.record-payment"),

            BlockerType::DeedMissing => Some("deed.record"),
            BlockerType::RoleNotPermitted { .. } => None,
        }
    }
}

/// Result of evaluating a guard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    pub can_transition: bool,
    /// Human-readable reason; the joined blocker descriptions when blocked
    pub reason: String,
    pub blockers: Vec<Blocker>,
    /// Guard-specific facts (e.g. per-section statuses) for display
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl GuardResult {
    /// Guard passed
    pub fn passed() -> Self {
        Self {
            can_transition: true,
            reason: "preconditions met".to_string(),
            blockers: vec![],
            metadata: BTreeMap::new(),
        }
    }

    /// Guard blocked with specific blockers
    pub fn blocked(blockers: Vec<Blocker>) -> Self {
        if blockers.is_empty() {
            return Self::passed();
        }

        let reason = blockers
            .iter()
            .map(|b| b.description.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            can_transition: false,
            reason,
            blockers,
            metadata: BTreeMap::new(),
        }
    }

    /// Guard failed with error
    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            can_transition: false,
            blockers: vec![Blocker::new(BlockerType::GuardError, reason.clone())],
            reason,
            metadata: BTreeMap::new(),
        }
    }

    /// No edge between the two stages
    pub fn no_such_transition(from: &str, to: &str) -> Self {
        Self {
            can_transition: false,
            reason: NO_SUCH_TRANSITION.to_string(),
            blockers: vec![Blocker::new(
                BlockerType::NoSuchTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                },
                NO_SUCH_TRANSITION,
            )],
            metadata: BTreeMap::new(),
        }
    }

    /// Edge names a guard that is not configured; fails closed
    pub fn unconfigured(guard: &str) -> Self {
        Self {
            can_transition: false,
            reason: UNCONFIGURED_GUARD.to_string(),
            blockers: vec![Blocker::new(
                BlockerType::UnconfiguredGuard {
                    guard: guard.to_string(),
                },
                UNCONFIGURED_GUARD,
            )],
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// "Not a valid move" as opposed to "valid move, preconditions unmet"
    pub fn is_invalid_edge(&self) -> bool {
        self.blockers
            .iter()
            .any(|b| matches!(b.blocker_type, BlockerType::NoSuchTransition { .. }))
    }

    /// Combine results of several guards: allowed only if all allowed,
    /// blockers and metadata concatenated in order
    pub fn combine(results: Vec<GuardResult>) -> Self {
        let mut blockers = Vec::new();
        let mut metadata = BTreeMap::new();
        for result in results {
            blockers.extend(result.blockers);
            metadata.extend(result.metadata);
        }

        let mut combined = Self::blocked(blockers);
        combined.metadata = metadata;
        combined
    }
}
