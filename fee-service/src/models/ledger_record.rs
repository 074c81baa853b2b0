//! Per-student, per-fee-structure billing ledger record.

use crate::models::term::BillingPeriod;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Payment state of a ledger record, derived from its totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Partial,
    Paid,
    Overpaid,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Partial => "partial",
            Self::Paid => "paid",
            Self::Overpaid => "overpaid",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "partial" => Some(Self::Partial),
            "paid" => Some(Self::Paid),
            "overpaid" => Some(Self::Overpaid),
            _ => None,
        }
    }
}

impl std::fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The derived portion of a ledger record.
///
/// This is the only place the derivation rules live; the aggregator applies
/// the result inside the owning transaction, and the carryover planner uses
/// it when simulating transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedTotals {
    pub outstanding_balance: Decimal,
    pub credit_generated: Decimal,
    pub status: LedgerStatus,
}

impl DerivedTotals {
    pub fn derive(total_billed: Decimal, total_paid: Decimal, credit_applied: Decimal) -> Self {
        let covered = total_paid + credit_applied;
        let outstanding_balance = (total_billed - covered).max(Decimal::ZERO);
        let credit_generated = (covered - total_billed).max(Decimal::ZERO);

        let status = if covered.is_zero() && !total_billed.is_zero() {
            LedgerStatus::Pending
        } else if covered < total_billed {
            LedgerStatus::Partial
        } else if covered == total_billed {
            LedgerStatus::Paid
        } else {
            LedgerStatus::Overpaid
        };

        Self {
            outstanding_balance,
            credit_generated,
            status,
        }
    }
}

/// One row of the fee ledger: what one student owes for one fee structure.
///
/// `total_paid`, `credit_applied` and the derived fields are only ever
/// written by the aggregator inside the transaction that changed the
/// underlying payments or transfers.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub record_id: Uuid,
    pub student_id: Uuid,
    pub fee_structure_id: Uuid,
    pub term: i16,
    pub academic_year: String,
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    pub credit_applied: Decimal,
    pub outstanding_balance: Decimal,
    pub credit_generated: Decimal,
    pub status: String,
    pub last_payment_date: Option<NaiveDate>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn parsed_status(&self) -> Option<LedgerStatus> {
        LedgerStatus::from_str(&self.status)
    }

    pub fn billing_period(&self) -> Option<BillingPeriod> {
        BillingPeriod::from_columns(&self.academic_year, self.term)
    }
}
