//! Case Persistence
//!
//! The engine reads and writes cases exclusively through [`CaseStore`],
//! enabling pluggable backends (`MemoryCaseStore` for tests and the CLI,
//! `PgCaseStore` for production behind the `database` feature).

mod memory;
#[cfg(feature = "database")]
mod postgres;

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::case::{
    AccountsBreakdown, Attachment, AuditEntry, Case, Clearance, Payment, Review, TransferDeed,
};

pub use memory::MemoryCaseStore;
#[cfg(feature = "database")]
pub use postgres::PgCaseStore;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Case not found: {0}")]
    NotFound(Uuid),

    #[error("Version conflict on case {case_id}: expected {expected}, found {found}")]
    VersionConflict {
        case_id: Uuid,
        expected: u64,
        found: u64,
    },

    #[error("Duplicate case: {0}")]
    Duplicate(Uuid),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Backend(String),

    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Current stage and version of a case, read together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSnapshot {
    pub case_id: Uuid,
    pub stage: String,
    pub version: u64,
}

/// Persistence port for the case aggregate.
///
/// Every write that changes the case also takes the audit entry describing
/// it, so the record and its audit row land atomically. Writes to one case
/// are serialized by the store itself, so engines in different processes
/// sharing a backend cannot interleave them.
#[async_trait]
pub trait CaseStore: Send + Sync {
    // ── Case ──

    async fn insert_case(&self, case: &Case) -> StoreResult<()>;
    async fn load_case(&self, case_id: Uuid) -> StoreResult<Case>;
    async fn stage_snapshot(&self, case_id: Uuid) -> StoreResult<StageSnapshot>;

    /// Atomically move the case to `to_stage`, bump its version and append
    /// the audit entry. Fails with [`StoreError::VersionConflict`] when the
    /// stored version is no longer `expected_version`.
    async fn commit_stage(
        &self,
        case_id: Uuid,
        expected_version: u64,
        to_stage: &str,
        entry: &AuditEntry,
    ) -> StoreResult<StageSnapshot>;

    // ── Section decisions ──

    /// Store a decision, superseding the section's previous one. The stored
    /// `decided_at` is the time the write lands, which orders it against
    /// reviews of the same case.
    async fn record_clearance(
        &self,
        case_id: Uuid,
        clearance: &Clearance,
        entry: &AuditEntry,
    ) -> StoreResult<()>;

    /// Latest non-superseded clearance per requested section. Sections with
    /// no decision yet are absent from the map.
    async fn latest_clearances(
        &self,
        case_id: Uuid,
        sections: &[String],
    ) -> StoreResult<BTreeMap<String, Clearance>>;

    /// Store a review, superseding the group's previous one. `reviewed_at`
    /// is stamped the same way as `decided_at`.
    async fn record_review(&self, case_id: Uuid, review: &Review, entry: &AuditEntry)
        -> StoreResult<()>;
    async fn latest_review(&self, case_id: Uuid, group: &str) -> StoreResult<Option<Review>>;

    // ── Documents, accounts, deed ──

    async fn add_attachment(
        &self,
        case_id: Uuid,
        attachment: &Attachment,
        entry: &AuditEntry,
    ) -> StoreResult<()>;
    async fn attachment_types(&self, case_id: Uuid) -> StoreResult<BTreeSet<String>>;

    /// Replace the breakdown. When `accounts` carries no payment, the one
    /// already stored is kept.
    async fn save_accounts(
        &self,
        case_id: Uuid,
        accounts: &AccountsBreakdown,
        entry: &AuditEntry,
    ) -> StoreResult<()>;
    async fn accounts(&self, case_id: Uuid) -> StoreResult<Option<AccountsBreakdown>>;

    /// Add `payment.amount` to the payment stored on the breakdown and
    /// return the updated breakdown. `None` when no breakdown has been
    /// prepared; nothing is written then.
    async fn record_payment(
        &self,
        case_id: Uuid,
        payment: &Payment,
        entry: &AuditEntry,
    ) -> StoreResult<Option<AccountsBreakdown>>;

    async fn save_deed(&self, case_id: Uuid, deed: &TransferDeed, entry: &AuditEntry)
        -> StoreResult<()>;
    async fn deed(&self, case_id: Uuid) -> StoreResult<Option<TransferDeed>>;

    // ── Audit log (append-only) ──

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Audit entries for a case, oldest first
    async fn audit_log(&self, case_id: Uuid) -> StoreResult<Vec<AuditEntry>>;
}
