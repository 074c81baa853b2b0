//! Credit carryover execution.
//!
//! Loads the planner snapshot from the caller's transaction, runs the pure
//! planner, appends the planned transfer rows and re-aggregates the records
//! whose applied credit changed. The caller holds the row locks on the
//! student's records and commits or rolls back the whole flow.

use crate::models::{
    BillingPeriod, CreditApplyOrder, FeeCategory, RecordSnapshot, TransferBalance, plan_transfers,
};
use crate::services::aggregator;
use crate::services::database::db_error;
use crate::services::metrics::record_credit_transferred;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use service_core::error::AppError;
use sqlx::FromRow;
use sqlx::postgres::PgConnection;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// What one rebalance pass actually moved.
#[derive(Debug, Default)]
pub(crate) struct AppliedTransfers {
    pub transfers: usize,
    pub forward_amount: Decimal,
    pub clawback_amount: Decimal,
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    record_id: Uuid,
    term: i16,
    academic_year: String,
    category: String,
    created_utc: DateTime<Utc>,
    total_billed: Decimal,
    total_paid: Decimal,
    credit_applied: Decimal,
    consumed: Decimal,
}

/// Re-plan and apply credit transfers for one student.
///
/// Caller must hold `FOR UPDATE` locks on all of the student's records.
#[instrument(skip(conn), fields(student_id = %student_id))]
pub(crate) async fn rebalance_student(
    conn: &mut PgConnection,
    student_id: Uuid,
    order: CreditApplyOrder,
) -> Result<AppliedTransfers, AppError> {
    let rows = sqlx::query_as::<_, SnapshotRow>(
        r#"
        SELECT r.record_id, r.term, r.academic_year, f.category, r.created_utc,
               r.total_billed, r.total_paid, r.credit_applied,
               COALESCE(t_out.consumed, 0) AS consumed
        FROM ledger_records r
        JOIN fee_structures f ON f.fee_structure_id = r.fee_structure_id
        LEFT JOIN (
            SELECT source_record_id, SUM(amount) AS consumed
            FROM credit_transfers
            GROUP BY source_record_id
        ) t_out ON t_out.source_record_id = r.record_id
        WHERE r.student_id = $1
        "#,
    )
    .bind(student_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to load carryover snapshot", e))?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(period) = BillingPeriod::from_columns(&row.academic_year, row.term) else {
            warn!(record_id = %row.record_id, "Skipping record with unparsable period");
            continue;
        };
        snapshots.push(RecordSnapshot {
            record_id: row.record_id,
            period,
            category: FeeCategory::from_str(&row.category).unwrap_or(FeeCategory::Optional),
            created_utc: row.created_utc,
            total_billed: row.total_billed,
            total_paid: row.total_paid,
            credit_applied: row.credit_applied,
            consumed: row.consumed,
        });
    }

    let balances = sqlx::query_as::<_, TransferBalance>(
        r#"
        SELECT source_record_id, target_record_id, SUM(amount) AS net_amount
        FROM credit_transfers
        WHERE student_id = $1
        GROUP BY source_record_id, target_record_id
        "#,
    )
    .bind(student_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to load transfer balances", e))?;

    let plan = plan_transfers(&snapshots, &balances, order);
    if plan.is_empty() {
        return Ok(AppliedTransfers::default());
    }

    let mut applied = AppliedTransfers::default();
    let mut changed_targets: BTreeSet<Uuid> = BTreeSet::new();

    for step in &plan {
        sqlx::query(
            r#"
            INSERT INTO credit_transfers (transfer_id, student_id, source_record_id, target_record_id, amount)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(step.source_record_id)
        .bind(step.target_record_id)
        .bind(step.amount)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("Failed to insert credit transfer", e))?;

        if step.amount < Decimal::ZERO {
            applied.clawback_amount += -step.amount;
        } else {
            applied.forward_amount += step.amount;
        }
        applied.transfers += 1;
        changed_targets.insert(step.target_record_id);
    }

    // Only targets carry transfer-derived columns; sources keep their
    // stored aggregates and expose consumption through the transfer rows.
    for record_id in changed_targets {
        aggregator::recompute_record(conn, record_id).await?;
    }

    record_credit_transferred("forward", applied.forward_amount.to_f64().unwrap_or(0.0));
    record_credit_transferred("clawback", applied.clawback_amount.to_f64().unwrap_or(0.0));

    info!(
        student_id = %student_id,
        transfers = applied.transfers,
        forward_amount = %applied.forward_amount,
        clawback_amount = %applied.clawback_amount,
        "Credit transfers applied"
    );

    Ok(applied)
}
