//! Audit Log
//!
//! Append-only record of everything that happened to a case. Stage history
//! is reconstructed by filtering the log, never stored separately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::aggregate::Actor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CaseOpened,
    StageTransition,
    ClearanceRecorded,
    ReviewRecorded,
    AttachmentAdded,
    AccountsUpdated,
    PaymentRecorded,
    DeedRecorded,
    DocumentGenerated,
    HookFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaseOpened => "CASE_OPENED",
            Self::StageTransition => "STAGE_TRANSITION",
            Self::ClearanceRecorded => "CLEARANCE_RECORDED",
            Self::ReviewRecorded => "REVIEW_RECORDED",
            Self::AttachmentAdded => "ATTACHMENT_ADDED",
            Self::AccountsUpdated => "ACCOUNTS_UPDATED",
            Self::PaymentRecorded => "PAYMENT_RECORDED",
            Self::DeedRecorded => "DEED_RECORDED",
            Self::DocumentGenerated => "DOCUMENT_GENERATED",
            Self::HookFailed => "HOOK_FAILED",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CASE_OPENED" => Ok(Self::CaseOpened),
            "STAGE_TRANSITION" => Ok(Self::StageTransition),
            "CLEARANCE_RECORDED" => Ok(Self::ClearanceRecorded),
            "REVIEW_RECORDED" => Ok(Self::ReviewRecorded),
            "ATTACHMENT_ADDED" => Ok(Self::AttachmentAdded),
            "ACCOUNTS_UPDATED" => Ok(Self::AccountsUpdated),
            "PAYMENT_RECORDED" => Ok(Self::PaymentRecorded),
            "DEED_RECORDED" => Ok(Self::DeedRecorded),
            "DOCUMENT_GENERATED" => Ok(Self::DocumentGenerated),
            "HOOK_FAILED" => Ok(Self::HookFailed),
            _ => Err(format!("Unknown audit action: {}", s)),
        }
    }
}

/// Immutable audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: Uuid,
    pub case_id: Uuid,
    pub actor: Actor,
    pub action: AuditAction,
    pub from_stage: Option<String>,
    pub to_stage: Option<String>,
    /// Free-text detail rendered on the case timeline
    pub details: String,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        case_id: Uuid,
        actor: &Actor,
        action: AuditAction,
        details: impl Into<String>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            case_id,
            actor: actor.clone(),
            action,
            from_stage: None,
            to_stage: None,
            details: details.into(),
            recorded_at: Utc::now(),
        }
    }

    /// The entry written for every committed stage change
    pub fn stage_transition(
        case_id: Uuid,
        actor: &Actor,
        from_stage: &str,
        to_stage: &str,
        remarks: Option<&str>,
    ) -> Self {
        let mut details = format!("Stage changed from {} to {}", from_stage, to_stage);
        if let Some(remarks) = remarks.filter(|r| !r.trim().is_empty()) {
            details.push_str(". Remarks: ");
            details.push_str(remarks);
        }

        Self {
            from_stage: Some(from_stage.to_string()),
            to_stage: Some(to_stage.to_string()),
            ..Self::new(case_id, actor, AuditAction::StageTransition, details)
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.to_stage = Some(stage.into());
        self
    }
}

/// One step of a case's stage history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageChange {
    pub from_stage: String,
    pub to_stage: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    pub entry_id: Uuid,
}

/// Reconstruct the stage history from an audit log, oldest first
pub fn stage_history(entries: &[AuditEntry]) -> Vec<StageChange> {
    entries
        .iter()
        .filter(|e| e.action == AuditAction::StageTransition)
        .filter_map(|e| {
            Some(StageChange {
                from_stage: e.from_stage.clone()?,
                to_stage: e.to_stage.clone()?,
                actor: e.actor.clone(),
                at: e.recorded_at,
                entry_id: e.entry_id,
            })
        })
        .collect()
}
