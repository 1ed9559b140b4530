//! In-memory case store

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CaseStore, StageSnapshot, StoreError, StoreResult};
use crate::case::{
    AccountsBreakdown, Attachment, AuditEntry, Case, Clearance, Payment, Review, TransferDeed,
};

/// Keeps every case behind one `RwLock`; each write holds the lock for the
/// whole record-plus-audit update, which makes it atomic.
#[derive(Clone, Default)]
pub struct MemoryCaseStore {
    cases: Arc<RwLock<HashMap<Uuid, Case>>>,
}

impl MemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.cases.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cases.read().await.is_empty()
    }

    async fn read<T>(&self, case_id: Uuid, f: impl FnOnce(&Case) -> T) -> StoreResult<T> {
        let cases = self.cases.read().await;
        cases
            .get(&case_id)
            .map(f)
            .ok_or(StoreError::NotFound(case_id))
    }

    async fn write<T>(&self, case_id: Uuid, f: impl FnOnce(&mut Case) -> T) -> StoreResult<T> {
        let mut cases = self.cases.write().await;
        cases
            .get_mut(&case_id)
            .map(f)
            .ok_or(StoreError::NotFound(case_id))
    }
}

#[async_trait]
impl CaseStore for MemoryCaseStore {
    async fn insert_case(&self, case: &Case) -> StoreResult<()> {
        let mut cases = self.cases.write().await;
        if cases.contains_key(&case.case_id) {
            return Err(StoreError::Duplicate(case.case_id));
        }
        cases.insert(case.case_id, case.clone());
        Ok(())
    }

    async fn load_case(&self, case_id: Uuid) -> StoreResult<Case> {
        self.read(case_id, Case::clone).await
    }

    async fn stage_snapshot(&self, case_id: Uuid) -> StoreResult<StageSnapshot> {
        self.read(case_id, |c| StageSnapshot {
            case_id,
            stage: c.current_stage.clone(),
            version: c.version,
        })
        .await
    }

    async fn commit_stage(
        &self,
        case_id: Uuid,
        expected_version: u64,
        to_stage: &str,
        entry: &AuditEntry,
    ) -> StoreResult<StageSnapshot> {
        self.write(case_id, |case| {
            if case.version != expected_version {
                return Err(StoreError::VersionConflict {
                    case_id,
                    expected: expected_version,
                    found: case.version,
                });
            }
            case.apply_transition(to_stage, entry.clone());
            Ok(StageSnapshot {
                case_id,
                stage: case.current_stage.clone(),
                version: case.version,
            })
        })
        .await?
    }

    async fn record_clearance(
        &self,
        case_id: Uuid,
        clearance: &Clearance,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        self.write(case_id, |case| {
            let mut clearance = clearance.clone();
            clearance.decided_at = Utc::now();
            case.record_clearance(clearance, entry.clone())
        })
        .await
    }

    async fn latest_clearances(
        &self,
        case_id: Uuid,
        sections: &[String],
    ) -> StoreResult<BTreeMap<String, Clearance>> {
        self.read(case_id, |case| case.latest_clearances(sections))
            .await
    }

    async fn record_review(
        &self,
        case_id: Uuid,
        review: &Review,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        self.write(case_id, |case| {
            let mut review = review.clone();
            review.reviewed_at = Utc::now();
            case.record_review(review, entry.clone())
        })
        .await
    }

    async fn latest_review(&self, case_id: Uuid, group: &str) -> StoreResult<Option<Review>> {
        self.read(case_id, |case| case.latest_review(group).cloned())
            .await
    }

    async fn add_attachment(
        &self,
        case_id: Uuid,
        attachment: &Attachment,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        self.write(case_id, |case| {
            case.add_attachment(attachment.clone(), entry.clone())
        })
        .await
    }

    async fn attachment_types(&self, case_id: Uuid) -> StoreResult<BTreeSet<String>> {
        self.read(case_id, Case::attachment_types).await
    }

    async fn save_accounts(
        &self,
        case_id: Uuid,
        accounts: &AccountsBreakdown,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        self.write(case_id, |case| {
            let mut accounts = accounts.clone();
            accounts.carry_payment_from(case.accounts.as_ref());
            case.set_accounts(accounts, entry.clone())
        })
        .await
    }

    async fn accounts(&self, case_id: Uuid) -> StoreResult<Option<AccountsBreakdown>> {
        self.read(case_id, |case| case.accounts.clone()).await
    }

    async fn record_payment(
        &self,
        case_id: Uuid,
        payment: &Payment,
        entry: &AuditEntry,
    ) -> StoreResult<Option<AccountsBreakdown>> {
        self.write(case_id, |case| {
            let mut accounts = case.accounts.clone()?;
            accounts.apply_payment(payment.clone());
            case.set_accounts(accounts.clone(), entry.clone());
            Some(accounts)
        })
        .await
    }

    async fn save_deed(
        &self,
        case_id: Uuid,
        deed: &TransferDeed,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        self.write(case_id, |case| case.set_deed(deed.clone(), entry.clone()))
            .await
    }

    async fn deed(&self, case_id: Uuid) -> StoreResult<Option<TransferDeed>> {
        self.read(case_id, |case| case.deed.clone()).await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.write(entry.case_id, |case| case.append_audit(entry.clone()))
            .await
    }

    async fn audit_log(&self, case_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        self.read(case_id, |case| case.audit_log.clone()).await
    }
}
