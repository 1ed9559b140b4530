//! Accounts breakdown: fee heads, derived total and payment state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One fee head on the breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeLine {
    /// Fee head (e.g. "TRANSFER_FEE", "STAMP_DUTY")
    pub head: String,
    pub amount: Decimal,
}

impl FeeLine {
    pub fn new(head: impl Into<String>, amount: Decimal) -> Self {
        Self {
            head: head.into(),
            amount,
        }
    }
}

/// Payment received against the breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Bank challan / receipt number
    pub reference: String,
    pub amount: Decimal,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountsBreakdown {
    pub lines: Vec<FeeLine>,
    pub prepared_by: String,
    pub prepared_at: DateTime<Utc>,
    #[serde(default)]
    pub payment: Option<Payment>,
}

impl AccountsBreakdown {
    pub fn new(lines: Vec<FeeLine>, prepared_by: impl Into<String>) -> Self {
        Self {
            lines,
            prepared_by: prepared_by.into(),
            prepared_at: Utc::now(),
            payment: None,
        }
    }

    /// Sum of all fee heads
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(|l| l.amount).sum()
    }

    /// Amount still owed after any recorded payment
    pub fn outstanding(&self) -> Decimal {
        let paid = self
            .payment
            .as_ref()
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO);
        (self.total() - paid).max(Decimal::ZERO)
    }

    pub fn is_paid(&self) -> bool {
        self.payment.is_some() && self.outstanding().is_zero()
    }

    /// Add `payment` to what was received before. The latest reference and
    /// receipt time win.
    pub fn apply_payment(&mut self, payment: Payment) {
        let already_paid = self
            .payment
            .as_ref()
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO);
        self.payment = Some(Payment {
            amount: already_paid + payment.amount,
            ..payment
        });
    }

    /// Keep the payment of the breakdown being replaced unless this one
    /// carries its own
    pub fn carry_payment_from(&mut self, previous: Option<&AccountsBreakdown>) {
        if self.payment.is_none() {
            self.payment = previous.and_then(|p| p.payment.clone());
        }
    }

    /// Check the breakdown is well formed: at least one head, no duplicate
    /// heads, no negative amounts.
    pub fn validate(&self) -> Result<(), String> {
        if self.lines.is_empty() {
            return Err("accounts breakdown has no fee heads".to_string());
        }

        let mut seen = HashSet::new();
        for line in &self.lines {
            if line.head.trim().is_empty() {
                return Err("fee head must not be empty".to_string());
            }
            if !seen.insert(line.head.as_str()) {
                return Err(format!("duplicate fee head: {}", line.head));
            }
            if line.amount.is_sign_negative() {
                return Err(format!("negative amount for fee head {}", line.head));
            }
        }

        Ok(())
    }
}
