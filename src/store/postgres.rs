//! Postgres case store
//!
//! Schema lives in `migrations/0001_transfer_workflow.sql`.
//!
//! Every write runs in one transaction that starts by locking the case row,
//! so engines in separate processes serialize their writes per case. Decision
//! and review times come from the database clock once that lock is held.
//!
//! NOTE: All queries use runtime-checked sqlx::query() instead of compile-time
//! sqlx::query!() macros because the tables are created by migrations that may
//! not exist at compile time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::{CaseStore, StageSnapshot, StoreError, StoreResult};
use crate::case::{
    AccountsBreakdown, Actor, Attachment, AuditAction, AuditEntry, Case, Clearance,
    ClearanceStatus, Payment, Review, TransferDeed,
};

pub struct PgCaseStore {
    pool: PgPool,
}

impl PgCaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an audit row inside an open transaction
    async fn insert_audit(
        tx: &mut Transaction<'_, Postgres>,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transfer.audit_log
            (entry_id, case_id, actor_id, actor_role, action, from_stage, to_stage, details, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.case_id)
        .bind(&entry.actor.id)
        .bind(&entry.actor.role)
        .bind(entry.action.as_str())
        .bind(&entry.from_stage)
        .bind(&entry.to_stage)
        .bind(&entry.details)
        .bind(entry.recorded_at)
        .execute(&mut **tx)
        .await?;

        sqlx::query("UPDATE transfer.cases SET updated_at = $2 WHERE case_id = $1")
            .bind(entry.case_id)
            .bind(entry.recorded_at)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Fail with NotFound unless the case row exists
    async fn ensure_case(&self, case_id: Uuid) -> StoreResult<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM transfer.cases WHERE case_id = $1)")
                .bind(case_id)
                .fetch_one(&self.pool)
                .await?;

        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound(case_id))
        }
    }

    async fn load_json_column<T: serde::de::DeserializeOwned>(
        &self,
        case_id: Uuid,
        column: &str,
    ) -> StoreResult<Option<T>> {
        let query = format!(
            "SELECT {} FROM transfer.cases WHERE case_id = $1",
            column
        );
        let value: Option<serde_json::Value> = sqlx::query_scalar(&query)
            .bind(case_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(case_id))?;

        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("{} for case {}: {}", column, case_id, e)))
    }

    /// Lock the case row for the rest of the transaction. Every write takes
    /// this lock first, so writers in other processes queue behind it.
    async fn lock_case(tx: &mut Transaction<'_, Postgres>, case_id: Uuid) -> StoreResult<()> {
        sqlx::query_scalar::<_, i32>("SELECT 1 FROM transfer.cases WHERE case_id = $1 FOR UPDATE")
            .bind(case_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(StoreError::NotFound(case_id))?;
        Ok(())
    }

    /// Read a JSON column under the case row lock
    async fn lock_json_column<T: serde::de::DeserializeOwned>(
        tx: &mut Transaction<'_, Postgres>,
        case_id: Uuid,
        column: &str,
    ) -> StoreResult<Option<T>> {
        let query = format!(
            "SELECT {} FROM transfer.cases WHERE case_id = $1 FOR UPDATE",
            column
        );
        let value: Option<serde_json::Value> = sqlx::query_scalar(&query)
            .bind(case_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(StoreError::NotFound(case_id))?;

        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("{} for case {}: {}", column, case_id, e)))
    }

    /// Overwrite a JSON column; the caller holds the row lock
    async fn write_json_column<T: serde::Serialize>(
        tx: &mut Transaction<'_, Postgres>,
        case_id: Uuid,
        column: &str,
        value: &T,
    ) -> StoreResult<()> {
        let json = serde_json::to_value(value)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))?;

        let query = format!(
            "UPDATE transfer.cases SET {} = $2 WHERE case_id = $1",
            column
        );
        sqlx::query(&query)
            .bind(case_id)
            .bind(json)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

fn clearance_from_row(row: &PgRow) -> StoreResult<Clearance> {
    let status: String = row.get("status");
    Ok(Clearance {
        clearance_id: row.get("clearance_id"),
        section: row.get("section"),
        status: status.parse::<ClearanceStatus>().map_err(StoreError::Corrupt)?,
        remarks: row.get("remarks"),
        signed_document: row.get("signed_document"),
        decided_by: row.get("decided_by"),
        decided_at: row.get("decided_at"),
        superseded: row.get("superseded"),
    })
}

fn review_from_row(row: &PgRow) -> Review {
    Review {
        review_id: row.get("review_id"),
        group: row.get("group_name"),
        confirmed: row.get("confirmed"),
        remarks: row.get("remarks"),
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: row.get("reviewed_at"),
        superseded: row.get("superseded"),
    }
}

fn audit_from_row(row: &PgRow) -> StoreResult<AuditEntry> {
    let action: String = row.get("action");
    Ok(AuditEntry {
        entry_id: row.get("entry_id"),
        case_id: row.get("case_id"),
        actor: Actor::new(
            row.get::<String, _>("actor_id"),
            row.get::<String, _>("actor_role"),
        ),
        action: action.parse::<AuditAction>().map_err(StoreError::Corrupt)?,
        from_stage: row.get("from_stage"),
        to_stage: row.get("to_stage"),
        details: row.get("details"),
        recorded_at: row.get("recorded_at"),
    })
}

#[async_trait]
impl CaseStore for PgCaseStore {
    async fn insert_case(&self, case: &Case) -> StoreResult<()> {
        let accounts = case
            .accounts
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let deed = case
            .deed
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO transfer.cases
            (case_id, reference, seller_id, buyer_id, plot_id, current_stage, version,
             accounts, deed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (case_id) DO NOTHING
            "#,
        )
        .bind(case.case_id)
        .bind(&case.reference)
        .bind(&case.seller_id)
        .bind(&case.buyer_id)
        .bind(&case.plot_id)
        .bind(&case.current_stage)
        .bind(case.version as i64)
        .bind(accounts)
        .bind(deed)
        .bind(case.created_at)
        .bind(case.updated_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Duplicate(case.case_id));
        }

        for entry in &case.audit_log {
            Self::insert_audit(&mut tx, entry).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_case(&self, case_id: Uuid) -> StoreResult<Case> {
        let row = sqlx::query(
            r#"
            SELECT case_id, reference, seller_id, buyer_id, plot_id, current_stage, version,
                   accounts, deed, created_at, updated_at
            FROM transfer.cases
            WHERE case_id = $1
            "#,
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(case_id))?;

        let clearances = sqlx::query(
            r#"
            SELECT clearance_id, section, status, remarks, signed_document,
                   decided_by, decided_at, superseded
            FROM transfer.clearances
            WHERE case_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(clearance_from_row)
        .collect::<StoreResult<Vec<_>>>()?;

        let reviews = sqlx::query(
            r#"
            SELECT review_id, group_name, confirmed, remarks, reviewed_by, reviewed_at, superseded
            FROM transfer.reviews
            WHERE case_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(review_from_row)
        .collect();

        let attachments = sqlx::query(
            r#"
            SELECT attachment_id, document_type, reference, uploaded_by, uploaded_at
            FROM transfer.attachments
            WHERE case_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| Attachment {
            attachment_id: r.get("attachment_id"),
            document_type: r.get("document_type"),
            reference: r.get("reference"),
            uploaded_by: r.get("uploaded_by"),
            uploaded_at: r.get("uploaded_at"),
        })
        .collect();

        let accounts: Option<serde_json::Value> = row.get("accounts");
        let deed: Option<serde_json::Value> = row.get("deed");
        let version: i64 = row.get("version");

        Ok(Case {
            case_id,
            reference: row.get("reference"),
            seller_id: row.get("seller_id"),
            buyer_id: row.get("buyer_id"),
            plot_id: row.get("plot_id"),
            current_stage: row.get("current_stage"),
            version: version as u64,
            clearances,
            reviews,
            attachments,
            accounts: accounts
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| StoreError::Corrupt(format!("accounts: {}", e)))?,
            deed: deed
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| StoreError::Corrupt(format!("deed: {}", e)))?,
            audit_log: self.audit_log(case_id).await?,
            created_at: row.get::<DateTime<Utc>, _>("created_at"),
            updated_at: row.get::<DateTime<Utc>, _>("updated_at"),
        })
    }

    async fn stage_snapshot(&self, case_id: Uuid) -> StoreResult<StageSnapshot> {
        let (stage, version): (String, i64) = sqlx::query_as(
            "SELECT current_stage, version FROM transfer.cases WHERE case_id = $1",
        )
        .bind(case_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound(case_id))?;

        Ok(StageSnapshot {
            case_id,
            stage,
            version: version as u64,
        })
    }

    async fn commit_stage(
        &self,
        case_id: Uuid,
        expected_version: u64,
        to_stage: &str,
        entry: &AuditEntry,
    ) -> StoreResult<StageSnapshot> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes commits from other processes sharing the database
        let found: i64 = sqlx::query_scalar(
            r#"
            SELECT version FROM transfer.cases
            WHERE case_id = $1
            FOR UPDATE
            "#,
        )
        .bind(case_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(case_id))?;

        if found as u64 != expected_version {
            return Err(StoreError::VersionConflict {
                case_id,
                expected: expected_version,
                found: found as u64,
            });
        }

        sqlx::query(
            r#"
            UPDATE transfer.cases
            SET current_stage = $2, version = version + 1
            WHERE case_id = $1
            "#,
        )
        .bind(case_id)
        .bind(to_stage)
        .execute(&mut *tx)
        .await?;

        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;

        Ok(StageSnapshot {
            case_id,
            stage: to_stage.to_string(),
            version: expected_version + 1,
        })
    }

    async fn record_clearance(
        &self,
        case_id: Uuid,
        clearance: &Clearance,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_case(&mut tx, case_id).await?;

        sqlx::query(
            r#"
            UPDATE transfer.clearances SET superseded = TRUE
            WHERE case_id = $1 AND section = $2 AND NOT superseded
            "#,
        )
        .bind(case_id)
        .bind(&clearance.section)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO transfer.clearances
            (clearance_id, case_id, section, status, remarks, signed_document, decided_by, decided_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, clock_timestamp())
            "#,
        )
        .bind(clearance.clearance_id)
        .bind(case_id)
        .bind(&clearance.section)
        .bind(clearance.status.as_str())
        .bind(&clearance.remarks)
        .bind(&clearance.signed_document)
        .bind(&clearance.decided_by)
        .execute(&mut *tx)
        .await?;

        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest_clearances(
        &self,
        case_id: Uuid,
        sections: &[String],
    ) -> StoreResult<BTreeMap<String, Clearance>> {
        self.ensure_case(case_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT clearance_id, section, status, remarks, signed_document,
                   decided_by, decided_at, superseded
            FROM transfer.clearances
            WHERE case_id = $1 AND section = ANY($2) AND NOT superseded
            ORDER BY seq ASC
            "#,
        )
        .bind(case_id)
        .bind(sections)
        .fetch_all(&self.pool)
        .await?;

        let mut latest = BTreeMap::new();
        for row in &rows {
            let clearance = clearance_from_row(row)?;
            latest.insert(clearance.section.clone(), clearance);
        }
        Ok(latest)
    }

    async fn record_review(
        &self,
        case_id: Uuid,
        review: &Review,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_case(&mut tx, case_id).await?;

        sqlx::query(
            r#"
            UPDATE transfer.reviews SET superseded = TRUE
            WHERE case_id = $1 AND group_name = $2 AND NOT superseded
            "#,
        )
        .bind(case_id)
        .bind(&review.group)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO transfer.reviews
            (review_id, case_id, group_name, confirmed, remarks, reviewed_by, reviewed_at)
            VALUES ($1, $2, $3, $4, $5, $6, clock_timestamp())
            "#,
        )
        .bind(review.review_id)
        .bind(case_id)
        .bind(&review.group)
        .bind(review.confirmed)
        .bind(&review.remarks)
        .bind(&review.reviewed_by)
        .execute(&mut *tx)
        .await?;

        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest_review(&self, case_id: Uuid, group: &str) -> StoreResult<Option<Review>> {
        self.ensure_case(case_id).await?;

        let row = sqlx::query(
            r#"
            SELECT review_id, group_name, confirmed, remarks, reviewed_by, reviewed_at, superseded
            FROM transfer.reviews
            WHERE case_id = $1 AND group_name = $2 AND NOT superseded
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(case_id)
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(review_from_row))
    }

    async fn add_attachment(
        &self,
        case_id: Uuid,
        attachment: &Attachment,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_case(&mut tx, case_id).await?;

        sqlx::query(
            r#"
            INSERT INTO transfer.attachments
            (attachment_id, case_id, document_type, reference, uploaded_by, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(attachment.attachment_id)
        .bind(case_id)
        .bind(&attachment.document_type)
        .bind(&attachment.reference)
        .bind(&attachment.uploaded_by)
        .bind(attachment.uploaded_at)
        .execute(&mut *tx)
        .await?;

        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn attachment_types(&self, case_id: Uuid) -> StoreResult<BTreeSet<String>> {
        self.ensure_case(case_id).await?;

        let types: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT document_type FROM transfer.attachments WHERE case_id = $1",
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(types.into_iter().collect())
    }

    async fn save_accounts(
        &self,
        case_id: Uuid,
        accounts: &AccountsBreakdown,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let previous: Option<AccountsBreakdown> =
            Self::lock_json_column(&mut tx, case_id, "accounts").await?;

        let mut accounts = accounts.clone();
        accounts.carry_payment_from(previous.as_ref());
        Self::write_json_column(&mut tx, case_id, "accounts", &accounts).await?;

        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn accounts(&self, case_id: Uuid) -> StoreResult<Option<AccountsBreakdown>> {
        self.load_json_column(case_id, "accounts").await
    }

    async fn record_payment(
        &self,
        case_id: Uuid,
        payment: &Payment,
        entry: &AuditEntry,
    ) -> StoreResult<Option<AccountsBreakdown>> {
        let mut tx = self.pool.begin().await?;
        let Some(mut accounts) =
            Self::lock_json_column::<AccountsBreakdown>(&mut tx, case_id, "accounts").await?
        else {
            // Dropping the transaction rolls it back
            return Ok(None);
        };

        accounts.apply_payment(payment.clone());
        Self::write_json_column(&mut tx, case_id, "accounts", &accounts).await?;

        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(Some(accounts))
    }

    async fn save_deed(
        &self,
        case_id: Uuid,
        deed: &TransferDeed,
        entry: &AuditEntry,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_case(&mut tx, case_id).await?;
        Self::write_json_column(&mut tx, case_id, "deed", deed).await?;
        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn deed(&self, case_id: Uuid) -> StoreResult<Option<TransferDeed>> {
        self.load_json_column(case_id, "deed").await
    }

    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_case(&mut tx, entry.case_id).await?;
        Self::insert_audit(&mut tx, entry).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn audit_log(&self, case_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, case_id, actor_id, actor_role, action, from_stage, to_stage,
                   details, recorded_at
            FROM transfer.audit_log
            WHERE case_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(case_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(audit_from_row).collect()
    }
}
