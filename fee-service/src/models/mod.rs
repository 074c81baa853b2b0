//! Domain models for fee-service.

mod credit;
mod fee_structure;
mod ledger_record;
mod payment;
mod term;
mod unmatched;

pub use credit::{
    CreditApplyOrder, CreditTransfer, PlannedTransfer, RecordSnapshot, TransferBalance,
    plan_transfers,
};
pub use fee_structure::{FeeCategory, FeeStructure, Student, StudentType};
pub use ledger_record::{DerivedTotals, LedgerRecord, LedgerStatus};
pub use payment::{Payment, PaymentMethod, PaymentSource, PaymentStatus};
pub use term::{AcademicYear, BillingPeriod, Term, period_for_date};
pub use unmatched::{UnmatchedPayment, UnmatchedStatus};
