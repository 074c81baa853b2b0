//! Ledger aggregate maintenance.
//!
//! `recompute_record` is the only code path that writes the derived
//! columns of a ledger record. It re-derives them from the completed
//! payments and the net credit transfers inside the caller's transaction,
//! so the stored aggregates always restate the audit rows. Callers must
//! already hold the row lock on the student's records.

use crate::models::{DerivedTotals, LedgerRecord};
use crate::services::database::db_error;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::FromRow;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, FromRow)]
struct PaymentAggregate {
    total_paid: Decimal,
    last_payment_date: Option<NaiveDate>,
}

/// Recompute one record's derived columns from its payments and transfers.
///
/// Caller must hold the row lock (`SELECT ... FOR UPDATE`) on the record.
#[instrument(skip(conn), fields(record_id = %record_id))]
pub(crate) async fn recompute_record(
    conn: &mut PgConnection,
    record_id: Uuid,
) -> Result<LedgerRecord, AppError> {
    let paid = sqlx::query_as::<_, PaymentAggregate>(
        r#"
        SELECT COALESCE(SUM(amount_paid), 0) AS total_paid,
               MAX(payment_date) AS last_payment_date
        FROM payments
        WHERE ledger_record_id = $1 AND status = 'completed'
        "#,
    )
    .bind(record_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to sum payments", e))?;

    let credit_applied: Decimal = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM credit_transfers WHERE target_record_id = $1",
    )
    .bind(record_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to sum credit transfers", e))?;

    let total_billed: Decimal =
        sqlx::query_scalar("SELECT total_billed FROM ledger_records WHERE record_id = $1")
            .bind(record_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| db_error("Failed to read ledger record", e))?
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Ledger record {} not found", record_id))
            })?;

    let derived = DerivedTotals::derive(total_billed, paid.total_paid, credit_applied);

    let record = sqlx::query_as::<_, LedgerRecord>(
        r#"
        UPDATE ledger_records
        SET total_paid = $2,
            credit_applied = $3,
            outstanding_balance = $4,
            credit_generated = $5,
            status = $6,
            last_payment_date = $7,
            updated_utc = now()
        WHERE record_id = $1
        RETURNING record_id, student_id, fee_structure_id, term, academic_year,
                  total_billed, total_paid, credit_applied, outstanding_balance, credit_generated,
                  status, last_payment_date, created_utc, updated_utc
        "#,
    )
    .bind(record_id)
    .bind(paid.total_paid)
    .bind(credit_applied)
    .bind(derived.outstanding_balance)
    .bind(derived.credit_generated)
    .bind(derived.status.as_str())
    .bind(paid.last_payment_date)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to update ledger record", e))?;

    Ok(record)
}

// -------------------------------------------------------------------------
// Integrity audit
// -------------------------------------------------------------------------

/// One discrepancy between a stored aggregate and its recomputed value.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityIssue {
    pub record_id: Uuid,
    pub student_id: Uuid,
    pub field: String,
    pub stored: String,
    pub expected: String,
}

/// Result of a full ledger integrity scan.
#[derive(Debug, Serialize)]
pub struct IntegrityReport {
    pub records_checked: i64,
    pub issues: Vec<IntegrityIssue>,
}

#[derive(Debug, FromRow)]
struct AuditRow {
    record_id: Uuid,
    student_id: Uuid,
    total_billed: Decimal,
    total_paid: Decimal,
    credit_applied: Decimal,
    outstanding_balance: Decimal,
    credit_generated: Decimal,
    status: String,
    paid_sum: Decimal,
    credit_in: Decimal,
    credit_out: Decimal,
}

/// Recompute every record from its payments and transfers and report
/// mismatches. Read-only; repairs are a manual follow-up.
#[instrument(skip(pool))]
pub async fn audit_ledger(pool: &PgPool) -> Result<IntegrityReport, AppError> {
    let rows = sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT r.record_id, r.student_id, r.total_billed, r.total_paid, r.credit_applied,
               r.outstanding_balance, r.credit_generated, r.status,
               COALESCE(p.paid_sum, 0) AS paid_sum,
               COALESCE(t_in.credit_in, 0) AS credit_in,
               COALESCE(t_out.credit_out, 0) AS credit_out
        FROM ledger_records r
        LEFT JOIN (
            SELECT ledger_record_id, SUM(amount_paid) AS paid_sum
            FROM payments
            WHERE status = 'completed' AND ledger_record_id IS NOT NULL
            GROUP BY ledger_record_id
        ) p ON p.ledger_record_id = r.record_id
        LEFT JOIN (
            SELECT target_record_id, SUM(amount) AS credit_in
            FROM credit_transfers
            GROUP BY target_record_id
        ) t_in ON t_in.target_record_id = r.record_id
        LEFT JOIN (
            SELECT source_record_id, SUM(amount) AS credit_out
            FROM credit_transfers
            GROUP BY source_record_id
        ) t_out ON t_out.source_record_id = r.record_id
        ORDER BY r.student_id, r.academic_year, r.term
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| db_error("Failed to scan ledger for audit", e))?;

    let records_checked = rows.len() as i64;
    let mut issues = Vec::new();

    for row in &rows {
        let derived = DerivedTotals::derive(row.total_billed, row.paid_sum, row.credit_in);

        let mut push = |field: &str, stored: String, expected: String| {
            issues.push(IntegrityIssue {
                record_id: row.record_id,
                student_id: row.student_id,
                field: field.to_string(),
                stored,
                expected,
            });
        };

        if row.total_paid != row.paid_sum {
            push("total_paid", row.total_paid.to_string(), row.paid_sum.to_string());
        }
        if row.credit_applied != row.credit_in {
            push(
                "credit_applied",
                row.credit_applied.to_string(),
                row.credit_in.to_string(),
            );
        }
        if row.outstanding_balance != derived.outstanding_balance {
            push(
                "outstanding_balance",
                row.outstanding_balance.to_string(),
                derived.outstanding_balance.to_string(),
            );
        }
        if row.credit_generated != derived.credit_generated {
            push(
                "credit_generated",
                row.credit_generated.to_string(),
                derived.credit_generated.to_string(),
            );
        }
        if row.status != derived.status.as_str() {
            push(
                "status",
                row.status.clone(),
                derived.status.as_str().to_string(),
            );
        }
        if row.credit_out > derived.credit_generated {
            push(
                "credit_consumed",
                row.credit_out.to_string(),
                derived.credit_generated.to_string(),
            );
        }
    }

    Ok(IntegrityReport {
        records_checked,
        issues,
    })
}
