//! Ledger read model.
//!
//! Plain reads, no locks. Concurrent writers may commit between the record
//! query and the transfer query; the summary is a snapshot, not a source
//! of truth, and the integrity endpoint is the consistency check.

use axum::{
    Json,
    extract::{Path, State},
};
use service_core::error::AppError;
use uuid::Uuid;

use crate::dtos::{LedgerRecordResponse, LedgerSummary, StudentLedgerResponse};
use crate::services::aggregator::{IntegrityReport, audit_ledger};
use crate::services::metrics::record_error;
use crate::startup::AppState;

/// Fetch one ledger record with its payment history.
pub async fn get_record(
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> Result<Json<LedgerRecordResponse>, AppError> {
    let record = state
        .db
        .get_ledger_record(record_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Ledger record {} not found", record_id))
        })?;
    let payments = state.db.list_payments_for_record(record_id).await?;

    Ok(Json(LedgerRecordResponse { record, payments }))
}

/// Full ledger for one student: every record in period order plus rollup
/// totals, including how much generated credit is still unconsumed.
pub async fn get_student_ledger(
    State(state): State<AppState>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<StudentLedgerResponse>, AppError> {
    state
        .db
        .get_student(student_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Student {} not found", student_id)))?;

    let records = state.db.get_student_records(student_id).await?;
    let transfers = state.db.get_student_transfers(student_id).await?;
    let summary = LedgerSummary::from_records(&records, &transfers);

    Ok(Json(StudentLedgerResponse {
        student_id,
        records,
        summary,
    }))
}

/// Audit every record's stored aggregates against re-derivation from the
/// payment and transfer rows.
pub async fn integrity(State(state): State<AppState>) -> Result<Json<IntegrityReport>, AppError> {
    let report = audit_ledger(state.db.pool()).await?;

    if !report.issues.is_empty() {
        record_error("integrity_violation", "audit_ledger");
        tracing::warn!(
            issues = report.issues.len(),
            records_checked = report.records_checked,
            "Ledger integrity audit found mismatches"
        );
    }

    Ok(Json(report))
}
