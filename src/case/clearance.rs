//! Section decisions: clearances and front-office reviews.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome vocabulary for a section's decision on a case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearanceStatus {
    Clear,
    Objection,
    Pending,
    /// Section has nothing to assess for this case (e.g. no utility connection)
    NotApplicable,
    /// Cleared subject to conditions that still need follow-up
    Conditional,
}

impl ClearanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "CLEAR",
            Self::Objection => "OBJECTION",
            Self::Pending => "PENDING",
            Self::NotApplicable => "NOT_APPLICABLE",
            Self::Conditional => "CONDITIONAL",
        }
    }

    /// Does this status count as cleared for group-completeness checks?
    pub fn satisfies_clear(&self) -> bool {
        matches!(self, Self::Clear | Self::NotApplicable)
    }
}

impl std::fmt::Display for ClearanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ClearanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLEAR" => Ok(Self::Clear),
            "OBJECTION" => Ok(Self::Objection),
            "PENDING" => Ok(Self::Pending),
            "NOT_APPLICABLE" => Ok(Self::NotApplicable),
            "CONDITIONAL" => Ok(Self::Conditional),
            _ => Err(format!("Unknown clearance status: {}", s)),
        }
    }
}

/// A section's decision on a case.
///
/// Recording a new clearance for the same section supersedes the previous
/// one. Superseded clearances stay on the case for audit but never count
/// toward a guard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clearance {
    pub clearance_id: Uuid,
    /// Section code (e.g. "BCA", "HOUSING")
    pub section: String,
    pub status: ClearanceStatus,
    pub remarks: Option<String>,
    /// Reference to the signed clearance letter held by the document store
    pub signed_document: Option<String>,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub superseded: bool,
}

impl Clearance {
    pub fn new(
        section: impl Into<String>,
        status: ClearanceStatus,
        decided_by: impl Into<String>,
    ) -> Self {
        Self {
            clearance_id: Uuid::new_v4(),
            section: section.into(),
            status,
            remarks: None,
            signed_document: None,
            decided_by: decided_by.into(),
            decided_at: Utc::now(),
            superseded: false,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }

    pub fn with_signed_document(mut self, reference: impl Into<String>) -> Self {
        self.signed_document = Some(reference.into());
        self
    }
}

/// Front-office sign-off over a group of section clearances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: Uuid,
    /// Section group name from the catalog (e.g. "primary")
    pub group: String,
    pub confirmed: bool,
    pub remarks: Option<String>,
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
    #[serde(default)]
    pub superseded: bool,
}

impl Review {
    pub fn new(group: impl Into<String>, confirmed: bool, reviewed_by: impl Into<String>) -> Self {
        Self {
            review_id: Uuid::new_v4(),
            group: group.into(),
            confirmed,
            remarks: None,
            reviewed_by: reviewed_by.into(),
            reviewed_at: Utc::now(),
            superseded: false,
        }
    }

    pub fn with_remarks(mut self, remarks: impl Into<String>) -> Self {
        self.remarks = Some(remarks.into());
        self
    }
}
