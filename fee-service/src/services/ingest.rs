//! Transactional payment intake.
//!
//! Every write flow here runs as one database transaction: lock the
//! student's ledger records in a fixed order, insert or update the payment,
//! re-derive the touched records and rebalance credit carryover, then
//! commit. Nothing reads a balance outside the transaction and writes it
//! back later. Transient lock failures retry the whole transaction once
//! through `retry_db_op`.

use crate::config::EngineSettings;
use crate::dtos::{BankDepositRequest, ManualPaymentRequest, ResolveUnmatchedRequest};
use crate::models::{
    BillingPeriod, LedgerRecord, Payment, PaymentMethod, PaymentSource, PaymentStatus,
    UnmatchedPayment, UnmatchedStatus,
};
use crate::services::aggregator::recompute_record;
use crate::services::carryover::rebalance_student;
use crate::services::database::{Database, db_error};
use crate::services::metrics::{
    record_payment_amount, record_payment_ingested, record_unmatched_payment,
};
use crate::services::term_resolver::{advisory_period, resolve_target};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use service_core::db::retry_db_op;
use service_core::error::AppError;
use sqlx::PgConnection;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// How a bank deposit landed.
#[derive(Debug)]
pub enum DepositOutcome {
    /// Applied to a ledger record inside the ingest transaction.
    Matched {
        payment: Payment,
        record: LedgerRecord,
    },
    /// Routed to the holding store for manual review.
    Unmatched(UnmatchedPayment),
}

/// How an unmatched deposit was resolved.
#[derive(Debug)]
pub enum ResolutionOutcome {
    /// Applied to an existing ledger record.
    Applied {
        payment: Payment,
        record: LedgerRecord,
    },
    /// Recorded against the student for a period that has no billing yet;
    /// the billing generator adopts the payment when the record appears.
    Registered(Payment),
}

/// Parse the optional explicit term and academic year of a request.
///
/// The pair travels together: one without the other is a bad request, since
/// a bare term number is ambiguous across years.
fn parse_explicit_period(
    term: Option<i16>,
    academic_year: Option<&str>,
) -> Result<Option<BillingPeriod>, AppError> {
    match (term, academic_year) {
        (None, None) => Ok(None),
        (Some(term), Some(year)) => BillingPeriod::from_columns(year, term)
            .map(Some)
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "Invalid term/academic_year: term must be 1-3 and academic_year must look like \"2025-2026\""
                ))
            }),
        _ => Err(AppError::BadRequest(anyhow::anyhow!(
            "term and academic_year must be supplied together"
        ))),
    }
}

/// Lock every ledger record of a student and return them in period order.
///
/// Rows are locked in `record_id` order so concurrent writers touching the
/// same student always acquire locks in the same sequence. The returned
/// slice is re-sorted to `(academic_year, term, created_utc)`, the order
/// the resolver and the carryover planner expect.
pub(crate) async fn lock_student_records(
    conn: &mut PgConnection,
    student_id: Uuid,
    lock_timeout_ms: u64,
) -> Result<Vec<LedgerRecord>, AppError> {
    // SET LOCAL does not accept bind parameters.
    sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_ms))
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("Failed to set lock timeout", e))?;

    let mut records = sqlx::query_as::<_, LedgerRecord>(
        r#"
        SELECT record_id, student_id, fee_structure_id, term, academic_year,
               total_billed, total_paid, credit_applied, outstanding_balance,
               credit_generated, status, last_payment_date, created_utc, updated_utc
        FROM ledger_records
        WHERE student_id = $1
        ORDER BY record_id
        FOR UPDATE
        "#,
    )
    .bind(student_id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to lock ledger records", e))?;

    records.sort_by(|a, b| {
        (a.academic_year.as_str(), a.term, a.created_utc).cmp(&(
            b.academic_year.as_str(),
            b.term,
            b.created_utc,
        ))
    });

    Ok(records)
}

/// Insert a payment row inside the caller's transaction.
///
/// A duplicate `transaction_reference` surfaces as a conflict; the partial
/// unique index on `payments` is the authority, the pre-checks in the
/// public flows only exist to answer the common case without a write.
#[allow(clippy::too_many_arguments)]
async fn insert_payment(
    conn: &mut PgConnection,
    student_id: Uuid,
    ledger_record_id: Option<Uuid>,
    amount: Decimal,
    method: PaymentMethod,
    reference: Option<&str>,
    payment_date: NaiveDate,
    term: i16,
    academic_year: &str,
    source: PaymentSource,
    notes: Option<&str>,
) -> Result<Payment, AppError> {
    let result = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (payment_id, student_id, ledger_record_id, amount_paid, method,
                              transaction_reference, status, payment_date, term, academic_year,
                              source, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING payment_id, student_id, ledger_record_id, amount_paid, method,
                  transaction_reference, status, payment_date, term, academic_year,
                  source, notes, recorded_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(ledger_record_id)
    .bind(amount)
    .bind(method.as_str())
    .bind(reference)
    .bind(PaymentStatus::Completed.as_str())
    .bind(payment_date)
    .bind(term)
    .bind(academic_year)
    .bind(source.as_str())
    .bind(notes)
    .fetch_one(&mut *conn)
    .await;

    match result {
        Ok(payment) => Ok(payment),
        Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
            Err(AppError::Conflict(anyhow::anyhow!(
                "A payment with transaction reference {} already exists",
                reference.unwrap_or("<none>")
            )))
        }
        Err(e) => Err(db_error("Failed to insert payment", e)),
    }
}

/// Re-read one record inside the transaction after carryover may have
/// shifted credit into or out of it.
async fn get_record_in_tx(
    conn: &mut PgConnection,
    record_id: Uuid,
) -> Result<LedgerRecord, AppError> {
    sqlx::query_as::<_, LedgerRecord>(
        r#"
        SELECT record_id, student_id, fee_structure_id, term, academic_year,
               total_billed, total_paid, credit_applied, outstanding_balance,
               credit_generated, status, last_payment_date, created_utc, updated_utc
        FROM ledger_records
        WHERE record_id = $1
        "#,
    )
    .bind(record_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to re-read ledger record", e))?
    .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Ledger record {} not found", record_id)))
}

/// Park a deposit in the holding store.
///
/// When the deposit carries a reference and an open holding row with that
/// reference already exists (a webhook redelivery racing this insert), the
/// existing row is returned instead of a duplicate.
async fn hold_deposit(
    db: &Database,
    req: &BankDepositRequest,
    status: UnmatchedStatus,
    student_id: Option<Uuid>,
    advisory: BillingPeriod,
) -> Result<UnmatchedPayment, AppError> {
    let inserted = sqlx::query_as::<_, UnmatchedPayment>(
        r#"
        INSERT INTO unmatched_payments (unmatched_id, admission_number, amount, reference,
                                        bank_account, narration, term, academic_year,
                                        status, student_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (reference) WHERE reference IS NOT NULL AND status <> 'resolved'
            DO NOTHING
        RETURNING unmatched_id, admission_number, amount, reference, bank_account, narration,
                  term, academic_year, status, student_id, resolved_payment_id,
                  recorded_utc, resolved_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&req.admission_number)
    .bind(req.amount)
    .bind(req.reference.as_deref())
    .bind(req.bank_account.as_deref())
    .bind(req.narration.as_deref())
    .bind(advisory.term.as_i16())
    .bind(advisory.year.label())
    .bind(status.as_str())
    .bind(student_id)
    .fetch_optional(db.pool())
    .await
    .map_err(|e| db_error("Failed to record unmatched payment", e))?;

    if let Some(row) = inserted {
        warn!(
            unmatched_id = %row.unmatched_id,
            admission_number = %req.admission_number,
            status = %status,
            "Deposit held for manual review"
        );
        return Ok(row);
    }

    // Another delivery of the same reference won the insert.
    match &req.reference {
        Some(reference) => db
            .get_open_unmatched_by_reference(reference)
            .await?
            .ok_or_else(|| {
                AppError::Conflict(anyhow::anyhow!(
                    "A payment with transaction reference {} already exists",
                    reference
                ))
            }),
        None => Err(AppError::DatabaseError(anyhow::anyhow!(
            "Insert of unmatched payment returned no row"
        ))),
    }
}

/// Flip an open holding row to resolved and link the payment created for
/// it. Returns false when the row was already resolved by someone else.
async fn claim_unmatched(
    conn: &mut PgConnection,
    unmatched_id: Uuid,
    student_id: Uuid,
    payment_id: Uuid,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE unmatched_payments
        SET status = 'resolved', student_id = $2, resolved_payment_id = $3, resolved_utc = now()
        WHERE unmatched_id = $1 AND status <> 'resolved'
        "#,
    )
    .bind(unmatched_id)
    .bind(student_id)
    .bind(payment_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error("Failed to resolve unmatched payment", e))?;

    Ok(result.rows_affected() > 0)
}

/// Apply a bank deposit reported by the deposit webhook.
///
/// The deposit is matched to a student by admission number and to a ledger
/// record by the resolver. When either step fails the deposit is parked in
/// the holding store and the caller acknowledges the webhook; the bank
/// retries deliveries that are not acknowledged, so "could not match" must
/// not look like an error. A reference that already belongs to a recorded
/// payment is a conflict; one that is merely held re-acknowledges the
/// holding row.
#[instrument(skip(db, engine, req), fields(admission_number = %req.admission_number))]
pub async fn ingest_bank_deposit(
    db: &Database,
    engine: &EngineSettings,
    req: &BankDepositRequest,
) -> Result<DepositOutcome, AppError> {
    if req.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Deposit amount must be positive"
        )));
    }
    let explicit = parse_explicit_period(req.term, req.academic_year.as_deref())?;
    let today = Utc::now().date_naive();

    if let Some(reference) = req.reference.as_deref() {
        if db.get_payment_by_reference(reference).await?.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "A payment with transaction reference {} already exists",
                reference
            )));
        }
        if let Some(held) = db.get_open_unmatched_by_reference(reference).await? {
            info!(
                unmatched_id = %held.unmatched_id,
                reference = reference,
                "Redelivered deposit is already held, re-acknowledging"
            );
            return Ok(DepositOutcome::Unmatched(held));
        }
    }

    let student = match db
        .get_student_by_admission_number(&req.admission_number)
        .await?
    {
        Some(student) => student,
        None => {
            let advisory = advisory_period(explicit, today);
            let held = hold_deposit(db, req, UnmatchedStatus::UnmatchedStudent, None, advisory)
                .await?;
            record_payment_ingested("webhook", "unmatched");
            record_unmatched_payment(UnmatchedStatus::UnmatchedStudent.as_str());
            return Ok(DepositOutcome::Unmatched(held));
        }
    };

    let applied = retry_db_op(&engine.retry, "ingest_bank_deposit", || async {
        let mut tx = db
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let records = lock_student_records(&mut tx, student.student_id, engine.lock_timeout_ms)
            .await?;

        let target = match resolve_target(&records, explicit) {
            Some(record) => record,
            None => {
                tx.rollback().await.ok();
                return Ok(None);
            }
        };
        let record_id = target.record_id;

        let payment = insert_payment(
            &mut tx,
            student.student_id,
            Some(record_id),
            req.amount,
            PaymentMethod::BankDeposit,
            req.reference.as_deref(),
            today,
            target.term,
            &target.academic_year,
            PaymentSource::Webhook,
            req.narration.as_deref(),
        )
        .await?;

        recompute_record(&mut tx, record_id).await?;
        rebalance_student(&mut tx, student.student_id, engine.credit_apply_order).await?;
        let record = get_record_in_tx(&mut tx, record_id).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit deposit", e))?;

        Ok(Some((payment, record)))
    })
    .await?;

    match applied {
        Some((payment, record)) => {
            record_payment_ingested("webhook", "matched");
            record_payment_amount("webhook", req.amount.to_f64().unwrap_or(0.0));
            info!(
                payment_id = %payment.payment_id,
                record_id = %record.record_id,
                student_id = %student.student_id,
                amount = %req.amount,
                "Bank deposit applied"
            );
            Ok(DepositOutcome::Matched { payment, record })
        }
        None => {
            let advisory = advisory_period(explicit, today);
            let held = hold_deposit(
                db,
                req,
                UnmatchedStatus::UnmatchedLedger,
                Some(student.student_id),
                advisory,
            )
            .await?;
            record_payment_ingested("webhook", "unmatched");
            record_unmatched_payment(UnmatchedStatus::UnmatchedLedger.as_str());
            Ok(DepositOutcome::Unmatched(held))
        }
    }
}

/// Record a payment entered by an admin against a specific ledger record.
#[instrument(skip(db, engine, req), fields(ledger_record_id = %req.ledger_record_id))]
pub async fn record_manual_payment(
    db: &Database,
    engine: &EngineSettings,
    req: &ManualPaymentRequest,
) -> Result<(Payment, LedgerRecord), AppError> {
    if req.amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment amount must be positive"
        )));
    }
    let method = PaymentMethod::from_str(&req.method).ok_or_else(|| {
        AppError::BadRequest(anyhow::anyhow!("Unknown payment method: {}", req.method))
    })?;

    let record = db
        .get_ledger_record(req.ledger_record_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!(
                "Ledger record {} not found",
                req.ledger_record_id
            ))
        })?;

    if let Some(reference) = req.reference.as_deref() {
        if db.get_payment_by_reference(reference).await?.is_some() {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "A payment with transaction reference {} already exists",
                reference
            )));
        }
    }

    let payment_date = req
        .payment_date
        .unwrap_or_else(|| Utc::now().date_naive());
    let student_id = record.student_id;

    let (payment, record) = retry_db_op(&engine.retry, "record_manual_payment", || async {
        let mut tx = db
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let records = lock_student_records(&mut tx, student_id, engine.lock_timeout_ms).await?;
        let target = records
            .iter()
            .find(|r| r.record_id == req.ledger_record_id)
            .ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!(
                    "Ledger record {} not found",
                    req.ledger_record_id
                ))
            })?;

        let payment = insert_payment(
            &mut tx,
            student_id,
            Some(target.record_id),
            req.amount,
            method,
            req.reference.as_deref(),
            payment_date,
            target.term,
            &target.academic_year,
            PaymentSource::Manual,
            req.notes.as_deref(),
        )
        .await?;

        recompute_record(&mut tx, req.ledger_record_id).await?;
        rebalance_student(&mut tx, student_id, engine.credit_apply_order).await?;
        let record = get_record_in_tx(&mut tx, req.ledger_record_id).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit payment", e))?;

        Ok((payment, record))
    })
    .await?;

    record_payment_ingested("manual", "matched");
    record_payment_amount("manual", req.amount.to_f64().unwrap_or(0.0));
    info!(
        payment_id = %payment.payment_id,
        record_id = %record.record_id,
        amount = %req.amount,
        "Manual payment recorded"
    );

    Ok((payment, record))
}

enum ReversalStep {
    Reversed {
        payment: Payment,
        record: Option<LedgerRecord>,
    },
    AlreadyReversed(Payment),
}

/// Reverse a payment and re-aggregate the record it was applied to.
///
/// Reversal is the only correction path; payments are never deleted or
/// edited in place. Reversing an already-reversed payment is a no-op that
/// returns the unchanged row. Excess credit that the reversed money had
/// pushed into later terms is clawed back by the same rebalance pass that
/// applies carryover.
#[instrument(skip(db, engine), fields(payment_id = %payment_id))]
pub async fn reverse_payment(
    db: &Database,
    engine: &EngineSettings,
    payment_id: Uuid,
) -> Result<(Payment, Option<LedgerRecord>), AppError> {
    let existing = db.get_payment(payment_id).await?.ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id))
    })?;
    let student_id = existing.student_id;

    let step = retry_db_op(&engine.retry, "reverse_payment", || async {
        let mut tx = db
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        lock_student_records(&mut tx, student_id, engine.lock_timeout_ms).await?;

        // The row lock serializes against the billing generator adopting
        // this payment; the re-read sees the adopted ledger_record_id.
        let current = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, student_id, ledger_record_id, amount_paid, method,
                   transaction_reference, status, payment_date, term, academic_year,
                   source, notes, recorded_utc
            FROM payments
            WHERE payment_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to lock payment", e))?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id))
        })?;

        if current.status == PaymentStatus::Reversed.as_str() {
            tx.rollback().await.ok();
            return Ok(ReversalStep::AlreadyReversed(current));
        }

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            UPDATE payments
            SET status = $2
            WHERE payment_id = $1
            RETURNING payment_id, student_id, ledger_record_id, amount_paid, method,
                      transaction_reference, status, payment_date, term, academic_year,
                      source, notes, recorded_utc
            "#,
        )
        .bind(payment_id)
        .bind(PaymentStatus::Reversed.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to reverse payment", e))?;

        let record = match payment.ledger_record_id {
            Some(record_id) => {
                recompute_record(&mut tx, record_id).await?;
                rebalance_student(&mut tx, student_id, engine.credit_apply_order).await?;
                Some(get_record_in_tx(&mut tx, record_id).await?)
            }
            None => None,
        };

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit reversal", e))?;

        Ok(ReversalStep::Reversed { payment, record })
    })
    .await?;

    match step {
        ReversalStep::Reversed { payment, record } => {
            record_payment_ingested(&payment.source, "reversed");
            info!(
                payment_id = %payment.payment_id,
                record_id = ?payment.ledger_record_id,
                amount = %payment.amount_paid,
                "Payment reversed"
            );
            Ok((payment, record))
        }
        ReversalStep::AlreadyReversed(payment) => {
            let record = match payment.ledger_record_id {
                Some(record_id) => db.get_ledger_record(record_id).await?,
                None => None,
            };
            info!(payment_id = %payment.payment_id, "Payment was already reversed");
            Ok((payment, record))
        }
    }
}

enum ResolutionStep {
    Applied {
        payment: Payment,
        record: LedgerRecord,
    },
    Registered(Payment),
    RowAlreadyClaimed,
}

/// Resolve a held deposit by admin decision.
///
/// Exactly one of `ledger_record_id` (apply to that record) or `student_id`
/// (attribute to that student and let the resolver pick the record, or
/// pre-register the payment when no record fits) must be given. The holding
/// row is flipped to resolved in the same transaction that creates the
/// payment, so a racing second resolution loses cleanly.
#[instrument(skip(db, engine, req), fields(unmatched_id = %unmatched_id))]
pub async fn resolve_unmatched(
    db: &Database,
    engine: &EngineSettings,
    unmatched_id: Uuid,
    req: &ResolveUnmatchedRequest,
) -> Result<ResolutionOutcome, AppError> {
    let held = db.get_unmatched_payment(unmatched_id).await?.ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("Unmatched payment {} not found", unmatched_id))
    })?;
    if held.status == UnmatchedStatus::Resolved.as_str() {
        return Err(AppError::Conflict(anyhow::anyhow!(
            "Unmatched payment {} is already resolved",
            unmatched_id
        )));
    }

    let (student_id, pinned_record) = match (req.ledger_record_id, req.student_id) {
        (Some(record_id), None) => {
            let record = db.get_ledger_record(record_id).await?.ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Ledger record {} not found", record_id))
            })?;
            (record.student_id, Some(record_id))
        }
        (None, Some(student_id)) => {
            db.get_student(student_id).await?.ok_or_else(|| {
                AppError::NotFound(anyhow::anyhow!("Student {} not found", student_id))
            })?;
            (student_id, None)
        }
        _ => {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Provide exactly one of ledger_record_id or student_id"
            )));
        }
    };

    // The request's term/year override the hint stored on the holding row.
    let explicit = if req.term.is_some() || req.academic_year.is_some() {
        parse_explicit_period(req.term, req.academic_year.as_deref())?
    } else {
        match (held.term, held.academic_year.as_deref()) {
            (Some(term), Some(year)) => BillingPeriod::from_columns(year, term),
            _ => None,
        }
    };
    let deposit_date = held.recorded_utc.date_naive();

    let step = retry_db_op(&engine.retry, "resolve_unmatched", || async {
        let mut tx = db
            .pool()
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let records = lock_student_records(&mut tx, student_id, engine.lock_timeout_ms).await?;

        let target = match pinned_record {
            Some(record_id) => Some(
                records
                    .iter()
                    .find(|r| r.record_id == record_id)
                    .ok_or_else(|| {
                        AppError::NotFound(anyhow::anyhow!(
                            "Ledger record {} not found",
                            record_id
                        ))
                    })?,
            ),
            None => resolve_target(&records, explicit),
        };

        let step = match target {
            Some(record) => {
                let record_id = record.record_id;
                let payment = insert_payment(
                    &mut tx,
                    student_id,
                    Some(record_id),
                    held.amount,
                    PaymentMethod::BankDeposit,
                    held.reference.as_deref(),
                    deposit_date,
                    record.term,
                    &record.academic_year,
                    PaymentSource::Webhook,
                    held.narration.as_deref(),
                )
                .await?;

                if !claim_unmatched(&mut tx, unmatched_id, student_id, payment.payment_id)
                    .await?
                {
                    tx.rollback().await.ok();
                    return Ok(ResolutionStep::RowAlreadyClaimed);
                }

                recompute_record(&mut tx, record_id).await?;
                rebalance_student(&mut tx, student_id, engine.credit_apply_order).await?;
                let record = get_record_in_tx(&mut tx, record_id).await?;

                tx.commit()
                    .await
                    .map_err(|e| db_error("Failed to commit resolution", e))?;

                ResolutionStep::Applied { payment, record }
            }
            None => {
                // No usable record: register the payment for the period so
                // the billing generator can adopt it later.
                let period = advisory_period(explicit, deposit_date);
                let payment = insert_payment(
                    &mut tx,
                    student_id,
                    None,
                    held.amount,
                    PaymentMethod::BankDeposit,
                    held.reference.as_deref(),
                    deposit_date,
                    period.term.as_i16(),
                    &period.year.label(),
                    PaymentSource::Webhook,
                    held.narration.as_deref(),
                )
                .await?;

                if !claim_unmatched(&mut tx, unmatched_id, student_id, payment.payment_id)
                    .await?
                {
                    tx.rollback().await.ok();
                    return Ok(ResolutionStep::RowAlreadyClaimed);
                }

                tx.commit()
                    .await
                    .map_err(|e| db_error("Failed to commit resolution", e))?;

                ResolutionStep::Registered(payment)
            }
        };

        Ok(step)
    })
    .await?;

    match step {
        ResolutionStep::Applied { payment, record } => {
            record_payment_ingested("webhook", "resolved");
            record_payment_amount("webhook", held.amount.to_f64().unwrap_or(0.0));
            info!(
                unmatched_id = %unmatched_id,
                payment_id = %payment.payment_id,
                record_id = %record.record_id,
                "Unmatched payment applied"
            );
            Ok(ResolutionOutcome::Applied { payment, record })
        }
        ResolutionStep::Registered(payment) => {
            record_payment_ingested("webhook", "resolved");
            record_payment_amount("webhook", held.amount.to_f64().unwrap_or(0.0));
            info!(
                unmatched_id = %unmatched_id,
                payment_id = %payment.payment_id,
                term = payment.term,
                academic_year = %payment.academic_year,
                "Unmatched payment registered ahead of billing"
            );
            Ok(ResolutionOutcome::Registered(payment))
        }
        ResolutionStep::RowAlreadyClaimed => Err(AppError::Conflict(anyhow::anyhow!(
            "Unmatched payment {} is already resolved",
            unmatched_id
        ))),
    }
}
