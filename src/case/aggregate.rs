//! Case root aggregate

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::accounts::AccountsBreakdown;
use super::audit::{AuditAction, AuditEntry};
use super::clearance::{Clearance, Review};

/// Someone (or something) acting on a case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    /// User id, or "system" for automatic triggers
    pub id: String,
    /// Role the actor holds in the approving office (e.g. "SCRUTINY_OFFICER")
    pub role: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
        }
    }

    /// Actor recorded for auto-transitions and hook side effects
    pub fn system() -> Self {
        Self::new("system", "SYSTEM")
    }

    pub fn is_system(&self) -> bool {
        self.id == "system"
    }
}

/// Data required to open a case. Person and plot records live elsewhere;
/// the case only carries their ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCase {
    /// Human-facing application number
    pub reference: String,
    pub seller_id: String,
    pub buyer_id: String,
    pub plot_id: String,
}

/// A document uploaded against the case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub attachment_id: Uuid,
    /// Attachment type code (e.g. "SITE_PLAN")
    pub document_type: String,
    /// Storage reference returned by the file store
    pub reference: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

impl Attachment {
    pub fn new(
        document_type: impl Into<String>,
        reference: impl Into<String>,
        uploaded_by: impl Into<String>,
    ) -> Self {
        Self {
            attachment_id: Uuid::new_v4(),
            document_type: document_type.into(),
            reference: reference.into(),
            uploaded_by: uploaded_by.into(),
            uploaded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDeed {
    pub deed_number: String,
    pub executed_on: NaiveDate,
    #[serde(default)]
    pub witnesses: Vec<String>,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

/// The property-transfer application.
///
/// `current_stage` only changes through [`Case::apply_transition`], which
/// also bumps `version` and appends the audit entry in one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub case_id: Uuid,
    pub reference: String,
    pub seller_id: String,
    pub buyer_id: String,
    pub plot_id: String,

    pub current_stage: String,
    /// Optimistic concurrency token, incremented on every stage change
    pub version: u64,

    /// All clearances ever recorded, superseded ones included
    pub clearances: Vec<Clearance>,
    pub reviews: Vec<Review>,
    pub attachments: Vec<Attachment>,
    pub accounts: Option<AccountsBreakdown>,
    pub deed: Option<TransferDeed>,

    /// Oldest first
    pub audit_log: Vec<AuditEntry>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Case {
    /// Open a case in the catalog's initial stage
    pub fn open(new: NewCase, initial_stage: impl Into<String>, actor: &Actor) -> Self {
        let now = Utc::now();
        let case_id = Uuid::new_v4();
        let initial_stage = initial_stage.into();

        let opened = AuditEntry::new(
            case_id,
            actor,
            AuditAction::CaseOpened,
            format!("Application {} opened", new.reference),
        )
        .with_stage(initial_stage.clone());

        Self {
            case_id,
            reference: new.reference,
            seller_id: new.seller_id,
            buyer_id: new.buyer_id,
            plot_id: new.plot_id,
            current_stage: initial_stage,
            version: 0,
            clearances: Vec::new(),
            reviews: Vec::new(),
            attachments: Vec::new(),
            accounts: None,
            deed: None,
            audit_log: vec![opened],
            created_at: now,
            updated_at: now,
        }
    }

    /// Latest non-superseded clearance for a section
    pub fn latest_clearance(&self, section: &str) -> Option<&Clearance> {
        self.clearances
            .iter()
            .rev()
            .find(|c| c.section == section && !c.superseded)
    }

    /// Latest clearance for each requested section that has one
    pub fn latest_clearances(&self, sections: &[String]) -> BTreeMap<String, Clearance> {
        sections
            .iter()
            .filter_map(|s| self.latest_clearance(s).map(|c| (s.clone(), c.clone())))
            .collect()
    }

    /// Record a clearance, superseding the section's previous one
    pub fn record_clearance(&mut self, clearance: Clearance, entry: AuditEntry) {
        for prior in self
            .clearances
            .iter_mut()
            .filter(|c| c.section == clearance.section)
        {
            prior.superseded = true;
        }
        self.clearances.push(clearance);
        self.append_audit(entry);
    }

    pub fn latest_review(&self, group: &str) -> Option<&Review> {
        self.reviews
            .iter()
            .rev()
            .find(|r| r.group == group && !r.superseded)
    }

    /// Record a review, superseding the group's previous one
    pub fn record_review(&mut self, review: Review, entry: AuditEntry) {
        for prior in self.reviews.iter_mut().filter(|r| r.group == review.group) {
            prior.superseded = true;
        }
        self.reviews.push(review);
        self.append_audit(entry);
    }

    pub fn add_attachment(&mut self, attachment: Attachment, entry: AuditEntry) {
        self.attachments.push(attachment);
        self.append_audit(entry);
    }

    /// Distinct attachment types present on the case
    pub fn attachment_types(&self) -> BTreeSet<String> {
        self.attachments
            .iter()
            .map(|a| a.document_type.clone())
            .collect()
    }

    pub fn set_accounts(&mut self, accounts: AccountsBreakdown, entry: AuditEntry) {
        self.accounts = Some(accounts);
        self.append_audit(entry);
    }

    pub fn set_deed(&mut self, deed: TransferDeed, entry: AuditEntry) {
        self.deed = Some(deed);
        self.append_audit(entry);
    }

    /// Move to a new stage. The caller is responsible for having checked the
    /// guard for this edge under the case lease.
    pub fn apply_transition(&mut self, to_stage: impl Into<String>, entry: AuditEntry) {
        self.current_stage = to_stage.into();
        self.version += 1;
        self.append_audit(entry);
    }

    pub fn append_audit(&mut self, entry: AuditEntry) {
        self.updated_at = entry.recorded_at;
        self.audit_log.push(entry);
    }
}
