//! Per-case leases
//!
//! Serializes commits on the same case inside one process. Different cases
//! never contend. Cross-process safety comes from the store's version check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use super::WorkflowError;

/// Exclusive hold on one case; released on drop
#[derive(Debug)]
pub struct CaseLease {
    case_id: Uuid,
    _guard: OwnedMutexGuard<()>,
}

impl CaseLease {
    pub fn case_id(&self) -> Uuid {
        self.case_id
    }
}

#[derive(Debug, Default)]
pub struct CaseLeases {
    slots: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl CaseLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `wait` for the case; a timeout surfaces as
    /// `ConcurrentModification`
    pub async fn acquire(&self, case_id: Uuid, wait: Duration) -> Result<CaseLease, WorkflowError> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // Only the table holds an idle slot
            slots.retain(|id, slot| *id == case_id || Arc::strong_count(slot) > 1);
            slots.entry(case_id).or_default().clone()
        };

        match tokio::time::timeout(wait, slot.lock_owned()).await {
            Ok(guard) => Ok(CaseLease {
                case_id,
                _guard: guard,
            }),
            Err(_) => {
                debug!(case_id = %case_id, wait_ms = wait.as_millis() as u64, "Lease wait timed out");
                Err(WorkflowError::ConcurrentModification { case_id })
            }
        }
    }

    /// Number of cases with a slot in the table
    pub async fn tracked(&self) -> usize {
        self.slots.lock().await.len()
    }
}
