//! Request and response DTOs for the HTTP surface.

use crate::models::{CreditTransfer, LedgerRecord, Payment};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Requests
// ============================================================================

/// Bank deposit webhook payload.
///
/// `term`/`academic_year` are optional hints parsed out of the deposit
/// narration by the bank integration; amounts are validated in the service
/// so the error carries the value.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BankDepositRequest {
    pub amount: Decimal,

    #[validate(length(min = 1, max = 32, message = "admission_number is required"))]
    pub admission_number: String,

    #[validate(length(min = 1, max = 128, message = "reference must be 1-128 characters"))]
    pub reference: Option<String>,

    #[validate(length(max = 64, message = "bank_account is too long"))]
    pub bank_account: Option<String>,

    pub narration: Option<String>,

    #[validate(range(min = 1, max = 3, message = "term must be 1, 2 or 3"))]
    pub term: Option<i16>,

    #[validate(length(equal = 9, message = "academic_year must look like 2026-2027"))]
    pub academic_year: Option<String>,
}

/// Manual payment entry against a known ledger record.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ManualPaymentRequest {
    pub ledger_record_id: Uuid,

    pub amount: Decimal,

    #[validate(length(min = 1, max = 16, message = "method is required"))]
    pub method: String,

    #[validate(length(min = 1, max = 128, message = "reference must be 1-128 characters"))]
    pub reference: Option<String>,

    pub payment_date: Option<NaiveDate>,

    pub notes: Option<String>,
}

/// Payment status correction. Only `reversed` is accepted.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdatePaymentStatusRequest {
    #[validate(length(min = 1, message = "status is required"))]
    pub status: String,
}

/// Billing generation trigger.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GenerateBillingRequest {
    pub fee_structure_id: Uuid,
}

/// Manual reconciliation of a held deposit. Exactly one mode:
/// `ledger_record_id` applies it to an existing record; `student_id` plus
/// `term`/`academic_year` pre-registers it for a term not yet billed.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResolveUnmatchedRequest {
    pub ledger_record_id: Option<Uuid>,

    pub student_id: Option<Uuid>,

    #[validate(range(min = 1, max = 3, message = "term must be 1, 2 or 3"))]
    pub term: Option<i16>,

    #[validate(length(equal = 9, message = "academic_year must look like 2026-2027"))]
    pub academic_year: Option<String>,
}

/// Query string for the holding store listing.
#[derive(Debug, Clone, Deserialize)]
pub struct UnmatchedListQuery {
    pub status: Option<String>,
    pub page_size: Option<i32>,
}

// ============================================================================
// Responses
// ============================================================================

/// Outcome of applying a payment, shared by the webhook, manual entry and
/// resolution endpoints.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentApplicationResponse {
    /// The payment landed on a ledger record.
    Matched {
        payment_id: Uuid,
        ledger_record_id: Uuid,
        updated_balance: Decimal,
        credit_generated: Decimal,
        record_status: String,
    },
    /// The deposit went to the holding store.
    Unmatched { reason: String, unmatched_id: Uuid },
    /// The payment was pre-registered for a term without billing yet.
    Registered {
        payment_id: Uuid,
        student_id: Uuid,
        term: i16,
        academic_year: String,
    },
}

impl PaymentApplicationResponse {
    pub fn matched(payment: &Payment, record: &LedgerRecord) -> Self {
        Self::Matched {
            payment_id: payment.payment_id,
            ledger_record_id: record.record_id,
            updated_balance: record.outstanding_balance,
            credit_generated: record.credit_generated,
            record_status: record.status.clone(),
        }
    }
}

/// Result of reversing a payment: the reversed payment plus the record it
/// was detached from, re-aggregated (absent for unadopted pre-registered
/// payments).
#[derive(Debug, Serialize)]
pub struct ReversalResponse {
    pub payment: Payment,
    pub ledger_record: Option<LedgerRecord>,
}

/// One billing generation run.
#[derive(Debug, Serialize)]
pub struct BillingRunResponse {
    pub fee_structure_id: Uuid,
    pub students_matched: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub failures: usize,
}

/// Ledger record with its payment history.
#[derive(Debug, Serialize)]
pub struct LedgerRecordResponse {
    pub record: LedgerRecord,
    pub payments: Vec<Payment>,
}

/// Rollup totals across a student's records.
#[derive(Debug, Serialize)]
pub struct LedgerSummary {
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    pub credit_applied: Decimal,
    pub outstanding_balance: Decimal,
    pub credit_generated: Decimal,
    /// Generated credit not yet consumed by transfers to later records.
    pub credit_available: Decimal,
}

impl LedgerSummary {
    pub fn from_records(records: &[LedgerRecord], transfers: &[CreditTransfer]) -> Self {
        let consumed: Decimal = transfers.iter().map(|t| t.amount).sum();
        let credit_generated: Decimal = records.iter().map(|r| r.credit_generated).sum();

        Self {
            total_billed: records.iter().map(|r| r.total_billed).sum(),
            total_paid: records.iter().map(|r| r.total_paid).sum(),
            credit_applied: records.iter().map(|r| r.credit_applied).sum(),
            outstanding_balance: records.iter().map(|r| r.outstanding_balance).sum(),
            credit_generated,
            credit_available: credit_generated - consumed,
        }
    }
}

/// Full ledger view for one student.
#[derive(Debug, Serialize)]
pub struct StudentLedgerResponse {
    pub student_id: Uuid,
    pub records: Vec<LedgerRecord>,
    pub summary: LedgerSummary,
}
