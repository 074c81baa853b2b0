//! Billing generation.
//!
//! Creates or refreshes one ledger record per eligible student for a fee
//! structure. Each student is processed in its own transaction so a single
//! failure does not poison the run, and re-running is idempotent because
//! `(student_id, fee_structure_id)` is unique. New records adopt payments
//! that were registered for the period before billing existed.

use crate::config::EngineSettings;
use crate::models::DerivedTotals;
use crate::services::aggregator::recompute_record;
use crate::services::carryover::rebalance_student;
use crate::services::database::{Database, db_error};
use crate::services::ingest::lock_student_records;
use crate::services::metrics::{record_billing_records, record_billing_run, record_error};
use rust_decimal::Decimal;
use service_core::db::retry_db_op;
use service_core::error::AppError;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome counts of one billing run.
#[derive(Debug, Default)]
pub struct BillingRun {
    pub students_matched: usize,
    pub records_created: usize,
    pub records_updated: usize,
    pub failures: usize,
}

enum StudentAction {
    Created,
    Updated,
    Unchanged,
}

/// Run the billing generator for one fee structure.
///
/// Students already holding a record for the structure get their
/// `total_billed` refreshed when the structure's amount changed; everyone
/// else gets a new record. Inactive structures generate nothing. Students
/// who left the structure's classes keep their existing records.
#[instrument(skip(db, engine), fields(fee_structure_id = %fee_structure_id))]
pub async fn generate_billing(
    db: &Database,
    engine: &EngineSettings,
    fee_structure_id: Uuid,
) -> Result<BillingRun, AppError> {
    let structure = db.get_fee_structure(fee_structure_id).await?.ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!(
            "Fee structure {} not found",
            fee_structure_id
        ))
    })?;

    if !structure.active {
        info!(
            fee_structure_id = %fee_structure_id,
            "Fee structure is inactive, nothing to generate"
        );
        record_billing_run("success");
        return Ok(BillingRun::default());
    }

    let class_ids = db.fee_structure_class_ids(fee_structure_id).await?;
    let students = db
        .eligible_students(&class_ids, &structure.student_type)
        .await?;

    let mut run = BillingRun {
        students_matched: students.len(),
        ..Default::default()
    };

    for student in &students {
        let result = retry_db_op(&engine.retry, "bill_student", || async {
            let mut tx = db
                .pool()
                .begin()
                .await
                .map_err(|e| db_error("Failed to begin transaction", e))?;

            let records =
                lock_student_records(&mut tx, student.student_id, engine.lock_timeout_ms).await?;
            let existing = records
                .iter()
                .find(|r| r.fee_structure_id == fee_structure_id);

            let action = match existing {
                Some(record) if record.total_billed == structure.amount => {
                    tx.rollback().await.ok();
                    StudentAction::Unchanged
                }
                Some(record) => {
                    sqlx::query(
                        r#"
                        UPDATE ledger_records
                        SET total_billed = $2, updated_utc = now()
                        WHERE record_id = $1
                        "#,
                    )
                    .bind(record.record_id)
                    .bind(structure.amount)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to update billed amount", e))?;

                    recompute_record(&mut tx, record.record_id).await?;
                    rebalance_student(&mut tx, student.student_id, engine.credit_apply_order)
                        .await?;

                    tx.commit()
                        .await
                        .map_err(|e| db_error("Failed to commit billing update", e))?;
                    StudentAction::Updated
                }
                None => {
                    let record_id = Uuid::new_v4();
                    let derived =
                        DerivedTotals::derive(structure.amount, Decimal::ZERO, Decimal::ZERO);

                    sqlx::query(
                        r#"
                        INSERT INTO ledger_records (record_id, student_id, fee_structure_id, term,
                                                    academic_year, total_billed, total_paid,
                                                    credit_applied, outstanding_balance,
                                                    credit_generated, status)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                        "#,
                    )
                    .bind(record_id)
                    .bind(student.student_id)
                    .bind(fee_structure_id)
                    .bind(structure.term)
                    .bind(&structure.academic_year)
                    .bind(structure.amount)
                    .bind(Decimal::ZERO)
                    .bind(Decimal::ZERO)
                    .bind(derived.outstanding_balance)
                    .bind(derived.credit_generated)
                    .bind(derived.status.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to insert ledger record", e))?;

                    // Adopt payments registered for this period before the
                    // record existed.
                    let adopted = sqlx::query(
                        r#"
                        UPDATE payments
                        SET ledger_record_id = $1
                        WHERE student_id = $2 AND term = $3 AND academic_year = $4
                          AND ledger_record_id IS NULL
                        "#,
                    )
                    .bind(record_id)
                    .bind(student.student_id)
                    .bind(structure.term)
                    .bind(&structure.academic_year)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| db_error("Failed to adopt registered payments", e))?
                    .rows_affected();

                    if adopted > 0 {
                        info!(
                            record_id = %record_id,
                            student_id = %student.student_id,
                            adopted = adopted,
                            "Adopted pre-registered payments"
                        );
                    }

                    recompute_record(&mut tx, record_id).await?;
                    rebalance_student(&mut tx, student.student_id, engine.credit_apply_order)
                        .await?;

                    tx.commit()
                        .await
                        .map_err(|e| db_error("Failed to commit billing insert", e))?;
                    StudentAction::Created
                }
            };

            Ok(action)
        })
        .await;

        match result {
            Ok(StudentAction::Created) => run.records_created += 1,
            Ok(StudentAction::Updated) => run.records_updated += 1,
            Ok(StudentAction::Unchanged) => {}
            Err(e) => {
                warn!(
                    student_id = %student.student_id,
                    error = %e,
                    "Billing failed for student"
                );
                record_error("billing_student", "generate_billing");
                run.failures += 1;
            }
        }
    }

    record_billing_run(if run.failures == 0 { "success" } else { "partial" });
    record_billing_records(run.records_created as u64, run.records_updated as u64);
    info!(
        fee_structure_id = %fee_structure_id,
        students_matched = run.students_matched,
        records_created = run.records_created,
        records_updated = run.records_updated,
        failures = run.failures,
        "Billing run complete"
    );

    Ok(run)
}
