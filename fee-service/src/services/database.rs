//! Database service for fee-service.
//!
//! Owns the connection pool and the read-side queries. Write flows that
//! need locking and transactional carryover live in `ingest`, `billing`
//! and `carryover`; they borrow the pool from here.

use crate::models::{
    CreditTransfer, FeeStructure, LedgerRecord, Payment, Student, UnmatchedPayment,
    UnmatchedStatus,
};
use crate::services::metrics::DB_QUERY_DURATION;
use service_core::db::is_transient;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Map a sqlx error to the service error taxonomy.
///
/// Transient failures (serialization, deadlock, lock timeout, pool
/// exhaustion) become `ServiceUnavailable` so `retry_db_op` can retry the
/// enclosing transaction; everything else is a hard database error.
pub(crate) fn db_error(context: &str, err: sqlx::Error) -> AppError {
    if is_transient(&err) {
        warn!(error = %err, context = context, "Transient database error");
        return AppError::ServiceUnavailable;
    }
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, err))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "fee-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Registry reads (students and fee structures are owned elsewhere)
    // -------------------------------------------------------------------------

    /// Get a student by ID.
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn get_student(&self, student_id: Uuid) -> Result<Option<Student>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_student"])
            .start_timer();

        let student = sqlx::query_as::<_, Student>(
            r#"
            SELECT student_id, admission_number, full_name, student_type, class_id, active, created_utc
            FROM students
            WHERE student_id = $1
            "#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get student", e))?;

        timer.observe_duration();

        Ok(student)
    }

    /// Get a student by admission number, the key bank deposits carry.
    #[instrument(skip(self), fields(admission_number = %admission_number))]
    pub async fn get_student_by_admission_number(
        &self,
        admission_number: &str,
    ) -> Result<Option<Student>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_student_by_admission_number"])
            .start_timer();

        let student = sqlx::query_as::<_, Student>(
            r#"
            SELECT student_id, admission_number, full_name, student_type, class_id, active, created_utc
            FROM students
            WHERE admission_number = $1
            "#,
        )
        .bind(admission_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get student by admission number", e))?;

        timer.observe_duration();

        Ok(student)
    }

    /// Get a fee structure by ID.
    #[instrument(skip(self), fields(fee_structure_id = %fee_structure_id))]
    pub async fn get_fee_structure(
        &self,
        fee_structure_id: Uuid,
    ) -> Result<Option<FeeStructure>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_fee_structure"])
            .start_timer();

        let structure = sqlx::query_as::<_, FeeStructure>(
            r#"
            SELECT fee_structure_id, name, term, academic_year, category, student_type, amount, active, created_utc
            FROM fee_structures
            WHERE fee_structure_id = $1
            "#,
        )
        .bind(fee_structure_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get fee structure", e))?;

        timer.observe_duration();

        Ok(structure)
    }

    /// Class IDs a fee structure applies to.
    #[instrument(skip(self), fields(fee_structure_id = %fee_structure_id))]
    pub async fn fee_structure_class_ids(
        &self,
        fee_structure_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["fee_structure_class_ids"])
            .start_timer();

        let class_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT class_id FROM fee_structure_classes WHERE fee_structure_id = $1",
        )
        .bind(fee_structure_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get fee structure classes", e))?;

        timer.observe_duration();

        Ok(class_ids)
    }

    /// Active students a fee structure applies to: class membership first,
    /// then the structure's student type unless it bills everyone.
    #[instrument(skip(self, class_ids), fields(classes = class_ids.len()))]
    pub async fn eligible_students(
        &self,
        class_ids: &[Uuid],
        student_type: &str,
    ) -> Result<Vec<Student>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["eligible_students"])
            .start_timer();

        let students = sqlx::query_as::<_, Student>(
            r#"
            SELECT student_id, admission_number, full_name, student_type, class_id, active, created_utc
            FROM students
            WHERE class_id = ANY($1) AND active = TRUE
              AND ($2 = 'all' OR student_type = $2)
            ORDER BY admission_number
            "#,
        )
        .bind(class_ids)
        .bind(student_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list eligible students", e))?;

        timer.observe_duration();

        Ok(students)
    }

    // -------------------------------------------------------------------------
    // Ledger reads
    // -------------------------------------------------------------------------

    /// Get a ledger record by ID.
    #[instrument(skip(self), fields(record_id = %record_id))]
    pub async fn get_ledger_record(
        &self,
        record_id: Uuid,
    ) -> Result<Option<LedgerRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_ledger_record"])
            .start_timer();

        let record = sqlx::query_as::<_, LedgerRecord>(
            r#"
            SELECT record_id, student_id, fee_structure_id, term, academic_year,
                   total_billed, total_paid, credit_applied, outstanding_balance, credit_generated,
                   status, last_payment_date, created_utc, updated_utc
            FROM ledger_records
            WHERE record_id = $1
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get ledger record", e))?;

        timer.observe_duration();

        Ok(record)
    }

    /// All ledger records for a student in period order.
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn get_student_records(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<LedgerRecord>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_student_records"])
            .start_timer();

        let records = sqlx::query_as::<_, LedgerRecord>(
            r#"
            SELECT record_id, student_id, fee_structure_id, term, academic_year,
                   total_billed, total_paid, credit_applied, outstanding_balance, credit_generated,
                   status, last_payment_date, created_utc, updated_utc
            FROM ledger_records
            WHERE student_id = $1
            ORDER BY academic_year, term, created_utc
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get student records", e))?;

        timer.observe_duration();

        Ok(records)
    }

    /// Credit transfer history for a student, oldest first.
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn get_student_transfers(
        &self,
        student_id: Uuid,
    ) -> Result<Vec<CreditTransfer>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_student_transfers"])
            .start_timer();

        let transfers = sqlx::query_as::<_, CreditTransfer>(
            r#"
            SELECT transfer_id, student_id, source_record_id, target_record_id, amount, created_utc
            FROM credit_transfers
            WHERE student_id = $1
            ORDER BY created_utc, transfer_id
            "#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get credit transfers", e))?;

        timer.observe_duration();

        Ok(transfers)
    }

    // -------------------------------------------------------------------------
    // Payment reads
    // -------------------------------------------------------------------------

    /// Get a payment by ID.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, student_id, ledger_record_id, amount_paid, method,
                   transaction_reference, status, payment_date, term, academic_year, source, notes, recorded_utc
            FROM payments
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get payment", e))?;

        timer.observe_duration();

        Ok(payment)
    }

    /// Payments recorded against one ledger record, oldest first.
    #[instrument(skip(self), fields(record_id = %record_id))]
    pub async fn list_payments_for_record(
        &self,
        record_id: Uuid,
    ) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments_for_record"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, student_id, ledger_record_id, amount_paid, method,
                   transaction_reference, status, payment_date, term, academic_year, source, notes, recorded_utc
            FROM payments
            WHERE ledger_record_id = $1
            ORDER BY recorded_utc, payment_id
            "#,
        )
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list payments", e))?;

        timer.observe_duration();

        Ok(payments)
    }

    /// Look up a payment by its bank transaction reference.
    #[instrument(skip(self))]
    pub async fn get_payment_by_reference(
        &self,
        transaction_reference: &str,
    ) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment_by_reference"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(
            r#"
            SELECT payment_id, student_id, ledger_record_id, amount_paid, method,
                   transaction_reference, status, payment_date, term, academic_year, source, notes, recorded_utc
            FROM payments
            WHERE transaction_reference = $1
            "#,
        )
        .bind(transaction_reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get payment by reference", e))?;

        timer.observe_duration();

        Ok(payment)
    }

    // -------------------------------------------------------------------------
    // Unmatched payment reads
    // -------------------------------------------------------------------------

    /// Get an unmatched payment by ID.
    #[instrument(skip(self), fields(unmatched_id = %unmatched_id))]
    pub async fn get_unmatched_payment(
        &self,
        unmatched_id: Uuid,
    ) -> Result<Option<UnmatchedPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_unmatched_payment"])
            .start_timer();

        let row = sqlx::query_as::<_, UnmatchedPayment>(
            r#"
            SELECT unmatched_id, admission_number, amount, reference, bank_account, narration,
                   term, academic_year, status, student_id, resolved_payment_id, recorded_utc, resolved_utc
            FROM unmatched_payments
            WHERE unmatched_id = $1
            "#,
        )
        .bind(unmatched_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get unmatched payment", e))?;

        timer.observe_duration();

        Ok(row)
    }

    /// Find an open (not yet resolved) held deposit carrying the given
    /// bank reference. Used to re-acknowledge webhook redeliveries without
    /// inserting a second holding row.
    #[instrument(skip(self), fields(reference = %reference))]
    pub async fn get_open_unmatched_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<UnmatchedPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_open_unmatched_by_reference"])
            .start_timer();

        let row = sqlx::query_as::<_, UnmatchedPayment>(
            r#"
            SELECT unmatched_id, admission_number, amount, reference, bank_account, narration,
                   term, academic_year, status, student_id, resolved_payment_id, recorded_utc, resolved_utc
            FROM unmatched_payments
            WHERE reference = $1 AND status <> 'resolved'
            ORDER BY recorded_utc
            LIMIT 1
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to look up unmatched payment by reference", e))?;

        timer.observe_duration();

        Ok(row)
    }

    /// List held deposits, newest first, optionally filtered by status.
    #[instrument(skip(self))]
    pub async fn list_unmatched_payments(
        &self,
        status: Option<UnmatchedStatus>,
        page_size: i32,
    ) -> Result<Vec<UnmatchedPayment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_unmatched_payments"])
            .start_timer();

        let limit = page_size.min(100).max(1) as i64;

        let rows = sqlx::query_as::<_, UnmatchedPayment>(
            r#"
            SELECT unmatched_id, admission_number, amount, reference, bank_account, narration,
                   term, academic_year, status, student_id, resolved_payment_id, recorded_utc, resolved_utc
            FROM unmatched_payments
            WHERE ($1::varchar IS NULL OR status = $1)
            ORDER BY recorded_utc DESC, unmatched_id DESC
            LIMIT $2
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list unmatched payments", e))?;

        timer.observe_duration();

        Ok(rows)
    }
}
