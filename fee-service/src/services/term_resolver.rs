//! Target-record resolution for incoming payments.
//!
//! Decides which ledger record a deposit lands on, given the student's
//! locked record set. The resolver only ever picks among records that
//! already exist; when nothing fits, the caller routes the deposit to the
//! unmatched holding store instead of guessing.

use crate::models::{BillingPeriod, LedgerRecord, period_for_date};
use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Pick the record a payment should be applied to.
///
/// `records` must be sorted by `(academic_year, term, created_utc)`, the
/// order the loaders return.
///
/// With an explicit period: among that period's records, the earliest
/// created one still carrying an outstanding balance, else the latest
/// created (the deposit becomes an overpayment there). Without one: the
/// earliest record with an outstanding balance, else the most recently
/// billed record. `None` means no usable record exists.
pub(crate) fn resolve_target<'a>(
    records: &'a [LedgerRecord],
    explicit: Option<BillingPeriod>,
) -> Option<&'a LedgerRecord> {
    match explicit {
        Some(period) => {
            let in_period: Vec<&LedgerRecord> = records
                .iter()
                .filter(|r| r.billing_period() == Some(period))
                .collect();

            in_period
                .iter()
                .find(|r| r.outstanding_balance > Decimal::ZERO)
                .copied()
                .or_else(|| in_period.last().copied())
        }
        None => records
            .iter()
            .find(|r| r.outstanding_balance > Decimal::ZERO)
            .or_else(|| records.last()),
    }
}

/// Period stored on an unmatched holding row as a hint for the reviewer:
/// the sender's explicit term when given, else the calendar default for
/// the deposit date.
pub(crate) fn advisory_period(
    explicit: Option<BillingPeriod>,
    deposit_date: NaiveDate,
) -> BillingPeriod {
    explicit.unwrap_or_else(|| period_for_date(deposit_date))
}
