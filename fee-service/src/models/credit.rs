//! Credit carryover: transfer rows and the transfer planner.
//!
//! Overpayment on one ledger record becomes credit on strictly later
//! records of the same student. Transfers are immutable audit rows; a
//! reversal that leaves a source over-consumed is compensated with
//! negative-amount rows rather than deletes.
//!
//! The planner itself is a pure function over an in-memory snapshot of the
//! student's records. The carryover service loads the snapshot under row
//! locks, plans to a fixpoint here, then applies the plan inside the same
//! transaction.

use crate::models::fee_structure::FeeCategory;
use crate::models::ledger_record::{DerivedTotals, LedgerRecord};
use crate::models::term::BillingPeriod;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// An applied (or compensating, when negative) credit movement between two
/// ledger records of the same student.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CreditTransfer {
    pub transfer_id: Uuid,
    pub student_id: Uuid,
    pub source_record_id: Uuid,
    pub target_record_id: Uuid,
    pub amount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Order in which same-period targets receive credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditApplyOrder {
    /// Record created first is funded first.
    CreatedFirst,
    /// Mandatory fees are funded before optional ones, then by creation.
    MandatoryFirst,
}

impl CreditApplyOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreatedFirst => "created_first",
            Self::MandatoryFirst => "mandatory_first",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "created_first" => Some(Self::CreatedFirst),
            "mandatory_first" => Some(Self::MandatoryFirst),
            _ => None,
        }
    }
}

impl Default for CreditApplyOrder {
    fn default() -> Self {
        Self::CreatedFirst
    }
}

/// Planner view of one ledger record.
///
/// `consumed` is the net amount already transferred out of this record
/// (the sum over `credit_transfers` rows where it is the source).
#[derive(Debug, Clone)]
pub struct RecordSnapshot {
    pub record_id: Uuid,
    pub period: BillingPeriod,
    pub category: FeeCategory,
    pub created_utc: DateTime<Utc>,
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    pub credit_applied: Decimal,
    pub consumed: Decimal,
}

impl RecordSnapshot {
    /// Build from a loaded row plus its consumed sum. Returns `None` when
    /// the stored period columns do not parse, which the integrity check
    /// reports separately.
    pub fn from_record(
        record: &LedgerRecord,
        category: FeeCategory,
        consumed: Decimal,
    ) -> Option<Self> {
        Some(Self {
            record_id: record.record_id,
            period: record.billing_period()?,
            category,
            created_utc: record.created_utc,
            total_billed: record.total_billed,
            total_paid: record.total_paid,
            credit_applied: record.credit_applied,
            consumed,
        })
    }

    fn derived(&self) -> DerivedTotals {
        DerivedTotals::derive(self.total_billed, self.total_paid, self.credit_applied)
    }

    /// Surplus still exportable from this record.
    fn available(&self) -> Decimal {
        self.derived().credit_generated - self.consumed
    }
}

/// Net transferred amount between one (source, target) pair, summed over
/// the existing transfer rows. Input to clawback planning.
#[derive(Debug, Clone, FromRow)]
pub struct TransferBalance {
    pub source_record_id: Uuid,
    pub target_record_id: Uuid,
    pub net_amount: Decimal,
}

/// One step of a transfer plan. Negative amounts unwind previous transfers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTransfer {
    pub source_record_id: Uuid,
    pub target_record_id: Uuid,
    pub amount: Decimal,
}

/// Plan all credit movements for one student to a fixpoint.
///
/// First unwinds over-consumed sources (latest-funded targets first) until
/// every source satisfies `consumed <= credit_generated`, then distributes
/// available surplus: sources in chronological order, each funding the
/// earliest strictly-later record with an outstanding balance, same-period
/// ties broken by `order`.
pub fn plan_transfers(
    records: &[RecordSnapshot],
    pair_balances: &[TransferBalance],
    order: CreditApplyOrder,
) -> Vec<PlannedTransfer> {
    let mut recs: Vec<RecordSnapshot> = records.to_vec();
    let index: HashMap<Uuid, usize> = recs
        .iter()
        .enumerate()
        .map(|(i, r)| (r.record_id, i))
        .collect();

    let mut pairs: HashMap<(Uuid, Uuid), Decimal> = HashMap::new();
    for balance in pair_balances {
        *pairs
            .entry((balance.source_record_id, balance.target_record_id))
            .or_insert(Decimal::ZERO) += balance.net_amount;
    }

    // Chronological processing order for sources.
    let mut chronological: Vec<usize> = (0..recs.len()).collect();
    chronological.sort_by_key(|&i| (recs[i].period, recs[i].created_utc, recs[i].record_id));

    let mut plan: Vec<PlannedTransfer> = Vec::new();

    // Phase 1: clawback. A reversal or rebilling can leave a source having
    // exported more credit than it now generates; unwind until consistent.
    loop {
        let Some(&src_idx) = chronological
            .iter()
            .find(|&&i| recs[i].consumed > recs[i].derived().credit_generated)
        else {
            break;
        };

        let mut excess = recs[src_idx].consumed - recs[src_idx].derived().credit_generated;
        let source_id = recs[src_idx].record_id;

        let mut funded: Vec<(Uuid, Decimal)> = pairs
            .iter()
            .filter(|((source, _), net)| *source == source_id && **net > Decimal::ZERO)
            .map(|((_, target), net)| (*target, *net))
            .collect();
        // Latest-funded targets are unwound first.
        funded.sort_by_key(|(target, _)| {
            let t = &recs[index[target]];
            std::cmp::Reverse((t.period, t.created_utc, t.record_id))
        });

        let mut unwound_any = false;
        for (target_id, net) in funded {
            if excess.is_zero() {
                break;
            }
            let tgt_idx = index[&target_id];
            let take = excess.min(net).min(recs[tgt_idx].credit_applied);
            if take <= Decimal::ZERO {
                continue;
            }

            plan.push(PlannedTransfer {
                source_record_id: source_id,
                target_record_id: target_id,
                amount: -take,
            });
            recs[src_idx].consumed -= take;
            recs[tgt_idx].credit_applied -= take;
            *pairs.entry((source_id, target_id)).or_insert(Decimal::ZERO) -= take;
            excess -= take;
            unwound_any = true;
        }

        if !unwound_any {
            // Nothing left to unwind: stored state is inconsistent with the
            // transfer history. Leave it for the integrity check to report.
            break;
        }
    }

    // Phase 2: distribute surplus forward.
    loop {
        let mut made_transfer = false;

        for &src_idx in &chronological {
            let available = recs[src_idx].available();
            if available <= Decimal::ZERO {
                continue;
            }
            let src_period = recs[src_idx].period;

            let target_idx = chronological
                .iter()
                .copied()
                .filter(|&i| i != src_idx && recs[i].period > src_period)
                .filter(|&i| recs[i].derived().outstanding_balance > Decimal::ZERO)
                .min_by_key(|&i| {
                    let r = &recs[i];
                    let optional_last = match order {
                        CreditApplyOrder::CreatedFirst => false,
                        CreditApplyOrder::MandatoryFirst => r.category != FeeCategory::Mandatory,
                    };
                    (r.period, optional_last, r.created_utc, r.record_id)
                });

            let Some(tgt_idx) = target_idx else {
                continue;
            };

            let amount = available.min(recs[tgt_idx].derived().outstanding_balance);
            let source_id = recs[src_idx].record_id;
            let target_id = recs[tgt_idx].record_id;

            plan.push(PlannedTransfer {
                source_record_id: source_id,
                target_record_id: target_id,
                amount,
            });
            recs[src_idx].consumed += amount;
            recs[tgt_idx].credit_applied += amount;
            *pairs.entry((source_id, target_id)).or_insert(Decimal::ZERO) += amount;

            made_transfer = true;
            break;
        }

        if !made_transfer {
            break;
        }
    }

    plan
}
