//! Manual payment entry and corrections.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use service_core::error::AppError;
use service_core::utils::ValidatedJson;
use uuid::Uuid;

use crate::dtos::{
    ManualPaymentRequest, PaymentApplicationResponse, ReversalResponse,
    UpdatePaymentStatusRequest,
};
use crate::models::Payment;
use crate::services::ingest::{record_manual_payment, reverse_payment};
use crate::startup::AppState;

/// Record a payment an admin entered against a specific ledger record.
pub async fn create_payment(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ManualPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentApplicationResponse>), AppError> {
    let (payment, record) = record_manual_payment(&state.db, &state.config.engine, &req).await?;

    Ok((
        StatusCode::CREATED,
        Json(PaymentApplicationResponse::matched(&payment, &record)),
    ))
}

/// Fetch a payment by ID.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state
        .db
        .get_payment(payment_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment {} not found", payment_id)))?;

    Ok(Json(payment))
}

/// Correct a payment. The only supported correction is reversal; amounts
/// and targets are never edited in place.
pub async fn update_payment_status(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdatePaymentStatusRequest>,
) -> Result<Json<ReversalResponse>, AppError> {
    if req.status != "reversed" {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payments can only be corrected by reversal; status must be \"reversed\", got \"{}\"",
            req.status
        )));
    }

    let (payment, ledger_record) =
        reverse_payment(&state.db, &state.config.engine, payment_id).await?;

    Ok(Json(ReversalResponse {
        payment,
        ledger_record,
    }))
}
