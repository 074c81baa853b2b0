//! Billing generation endpoint.

use axum::{Json, extract::State};
use service_core::error::AppError;
use service_core::utils::ValidatedJson;

use crate::dtos::{BillingRunResponse, GenerateBillingRequest};
use crate::services::billing::generate_billing;
use crate::startup::AppState;

/// Run the billing generator for a fee structure and report the counts.
pub async fn generate(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<GenerateBillingRequest>,
) -> Result<Json<BillingRunResponse>, AppError> {
    let run = generate_billing(&state.db, &state.config.engine, req.fee_structure_id).await?;

    Ok(Json(BillingRunResponse {
        fee_structure_id: req.fee_structure_id,
        students_matched: run.students_matched,
        records_created: run.records_created,
        records_updated: run.records_updated,
        failures: run.failures,
    }))
}
