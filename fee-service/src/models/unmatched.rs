//! Holding store for bank deposits that could not be applied.
//!
//! Deposits land here when the admission number is unknown or the student
//! has no ledger record for the deposit's period. The webhook still gets a
//! 200 so the bank does not retry forever; an administrator resolves the
//! row later, which creates the real payment and links it back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedStatus {
    /// No student carries the deposit's admission number.
    UnmatchedStudent,
    /// Student found, but no ledger record exists for the period.
    UnmatchedLedger,
    /// An administrator applied the deposit; `resolved_payment_id` links
    /// the payment that was created.
    Resolved,
}

impl UnmatchedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnmatchedStudent => "unmatched_student",
            Self::UnmatchedLedger => "unmatched_ledger",
            Self::Resolved => "resolved",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "unmatched_student" => Some(Self::UnmatchedStudent),
            "unmatched_ledger" => Some(Self::UnmatchedLedger),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for UnmatchedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One held deposit. `student_id` is populated for `unmatched_ledger` rows
/// where the student was identified but had nothing to bill against.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UnmatchedPayment {
    pub unmatched_id: Uuid,
    pub admission_number: String,
    pub amount: Decimal,
    pub reference: Option<String>,
    pub bank_account: Option<String>,
    pub narration: Option<String>,
    pub term: Option<i16>,
    pub academic_year: Option<String>,
    pub status: String,
    pub student_id: Option<Uuid>,
    pub resolved_payment_id: Option<Uuid>,
    pub recorded_utc: DateTime<Utc>,
    pub resolved_utc: Option<DateTime<Utc>>,
}

impl UnmatchedPayment {
    pub fn parsed_status(&self) -> Option<UnmatchedStatus> {
        UnmatchedStatus::from_str(&self.status)
    }
}
