//! Holding store review and manual reconciliation.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use service_core::error::AppError;
use service_core::utils::ValidatedJson;
use uuid::Uuid;

use crate::dtos::{PaymentApplicationResponse, ResolveUnmatchedRequest, UnmatchedListQuery};
use crate::models::{UnmatchedPayment, UnmatchedStatus};
use crate::services::ingest::{ResolutionOutcome, resolve_unmatched};
use crate::startup::AppState;

/// List held deposits, optionally filtered by status.
pub async fn list_unmatched(
    State(state): State<AppState>,
    Query(query): Query<UnmatchedListQuery>,
) -> Result<Json<Vec<UnmatchedPayment>>, AppError> {
    let status = match query.status.as_deref() {
        Some(value) => Some(UnmatchedStatus::from_str(value).ok_or_else(|| {
            AppError::BadRequest(anyhow::anyhow!("Unknown status filter: {}", value))
        })?),
        None => None,
    };
    let page_size = query.page_size.unwrap_or(50);

    let rows = state.db.list_unmatched_payments(status, page_size).await?;

    Ok(Json(rows))
}

/// Fetch one held deposit.
pub async fn get_unmatched(
    State(state): State<AppState>,
    Path(unmatched_id): Path<Uuid>,
) -> Result<Json<UnmatchedPayment>, AppError> {
    let row = state
        .db
        .get_unmatched_payment(unmatched_id)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(anyhow::anyhow!("Unmatched payment {} not found", unmatched_id))
        })?;

    Ok(Json(row))
}

/// Resolve a held deposit by admin decision: apply it to a given record,
/// or attribute it to a student and let the resolver place it.
pub async fn resolve(
    State(state): State<AppState>,
    Path(unmatched_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ResolveUnmatchedRequest>,
) -> Result<Json<PaymentApplicationResponse>, AppError> {
    let outcome = resolve_unmatched(&state.db, &state.config.engine, unmatched_id, &req).await?;

    let response = match outcome {
        ResolutionOutcome::Applied { payment, record } => {
            PaymentApplicationResponse::matched(&payment, &record)
        }
        ResolutionOutcome::Registered(payment) => PaymentApplicationResponse::Registered {
            payment_id: payment.payment_id,
            student_id: payment.student_id,
            term: payment.term,
            academic_year: payment.academic_year,
        },
    };

    Ok(Json(response))
}
