//! Bank deposit webhook intake.

use axum::{Json, extract::State, http::StatusCode};
use service_core::error::AppError;
use service_core::utils::ValidatedJson;

use crate::dtos::{BankDepositRequest, PaymentApplicationResponse};
use crate::services::ingest::{DepositOutcome, ingest_bank_deposit};
use crate::startup::AppState;

/// Apply a deposit reported by the bank integration.
///
/// Answers 200 whenever the money was recorded somewhere, applied to a
/// record or parked in the holding store; the bank redelivers anything
/// else, so an unmatched deposit must not look like a failure. Duplicate
/// transaction references are the exception and come back as 409.
pub async fn bank_deposit(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<BankDepositRequest>,
) -> Result<(StatusCode, Json<PaymentApplicationResponse>), AppError> {
    let outcome = ingest_bank_deposit(&state.db, &state.config.engine, &req).await?;

    let response = match outcome {
        DepositOutcome::Matched { payment, record } => {
            PaymentApplicationResponse::matched(&payment, &record)
        }
        DepositOutcome::Unmatched(held) => PaymentApplicationResponse::Unmatched {
            reason: held.status.clone(),
            unmatched_id: held.unmatched_id,
        },
    };

    Ok((StatusCode::OK, Json(response)))
}
