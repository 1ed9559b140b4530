//! Case Aggregate
//!
//! The property-transfer application and its dependent sub-records:
//! clearances, reviews, attachments, accounts breakdown, transfer deed and
//! the audit log. Pure data plus the invariants that keep it consistent.
//! The transition engine only reads these records to decide eligibility.

mod accounts;
mod aggregate;
pub mod audit;
mod clearance;

pub use accounts::{AccountsBreakdown, FeeLine, Payment};
pub use aggregate::{Actor, Attachment, Case, NewCase, TransferDeed};
pub use audit::{stage_history, AuditAction, AuditEntry, StageChange};
pub use clearance::{Clearance, ClearanceStatus, Review};
