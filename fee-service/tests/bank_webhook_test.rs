//! Bank deposit webhook integration tests.
//!
//! The webhook must acknowledge everything it can park or apply: only
//! duplicates and invalid payloads are refused, because the bank retries
//! unacknowledged deliveries.

mod common;

use common::{TestApp, dec, json_decimal};
use serde_json::json;
use uuid::Uuid;

async fn unmatched_row_count(app: &TestApp) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM unmatched_payments")
        .fetch_one(app.db.pool())
        .await
        .expect("Failed to count unmatched payments")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_for_known_student_applies_to_outstanding_record() {
    // Arrange
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let fee_structure_id = app
        .seed_fee_structure(
            "Term 1 Tuition",
            1,
            "2026-2027",
            "mandatory",
            "day_scholar",
            "20000",
            &[class_id],
        )
        .await;
    let client = app.client();
    client
        .post(format!("{}/billing/generate", app.address))
        .json(&json!({ "fee_structure_id": fee_structure_id }))
        .send()
        .await
        .expect("Failed to execute request");

    // Act
    let response = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 12000,
            "admission_number": "ADM-001",
            "reference": "BANK-TXN-001",
            "bank_account": "0100200300",
            "narration": "Fees ADM-001"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "matched");
    assert_eq!(json_decimal(&body["updated_balance"]), dec("8000"));

    let record = app.ledger_record(student_id, fee_structure_id).await;
    assert_eq!(record.total_paid, dec("12000"));
    assert_eq!(record.status, "partial");

    let payments = app.payments_for_record(record.record_id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].method, "bank_deposit");
    assert_eq!(payments[0].source, "webhook");
    assert_eq!(
        payments[0].transaction_reference.as_deref(),
        Some("BANK-TXN-001")
    );

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_with_unknown_admission_number_is_held() {
    // Arrange
    let app = TestApp::spawn().await;
    let client = app.client();

    // Act
    let response = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 9000,
            "admission_number": "GHOST-404",
            "reference": "BANK-TXN-002"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert - acknowledged, parked for review
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "unmatched");
    assert_eq!(body["reason"], "unmatched_student");
    let unmatched_id = body["unmatched_id"].as_str().expect("unmatched_id missing");

    let held = client
        .get(format!("{}/unmatched-payments/{}", app.address, unmatched_id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(held.status(), 200);
    let held: serde_json::Value = held.json().await.expect("Failed to parse response");
    assert_eq!(held["admission_number"], "GHOST-404");
    assert_eq!(json_decimal(&held["amount"]), dec("9000"));
    assert_eq!(held["status"], "unmatched_student");
    assert!(held["student_id"].is_null());

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_for_student_without_billing_is_held_with_student_link() {
    // Arrange - student exists but nothing has been billed
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;

    // Act
    let response = app
        .client()
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 9000,
            "admission_number": "ADM-001",
            "reference": "BANK-TXN-003"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "unmatched");
    assert_eq!(body["reason"], "unmatched_ledger");

    let unmatched_id = body["unmatched_id"].as_str().expect("unmatched_id missing");
    let held: serde_json::Value = app
        .client()
        .get(format!("{}/unmatched-payments/{}", app.address, unmatched_id))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(held["student_id"], student_id.to_string().as_str());

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_with_explicit_term_routes_to_that_record() {
    // Arrange - two billed terms, both outstanding
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let term1 = app
        .seed_fee_structure(
            "Term 1 Tuition",
            1,
            "2026-2027",
            "mandatory",
            "day_scholar",
            "20000",
            &[class_id],
        )
        .await;
    let term2 = app
        .seed_fee_structure(
            "Term 2 Tuition",
            2,
            "2026-2027",
            "mandatory",
            "day_scholar",
            "15000",
            &[class_id],
        )
        .await;
    let client = app.client();
    for id in [term1, term2] {
        client
            .post(format!("{}/billing/generate", app.address))
            .json(&json!({ "fee_structure_id": id }))
            .send()
            .await
            .expect("Failed to execute request");
    }

    // Act - the narration named Term 2 explicitly
    let response = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 15000,
            "admission_number": "ADM-001",
            "reference": "BANK-TXN-004",
            "term": 2,
            "academic_year": "2026-2027"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert - Term 2 settled, Term 1 untouched
    assert_eq!(response.status(), 200);
    let term2_record = app.ledger_record(student_id, term2).await;
    assert_eq!(term2_record.total_paid, dec("15000"));
    assert_eq!(term2_record.status, "paid");

    let term1_record = app.ledger_record(student_id, term1).await;
    assert_eq!(term1_record.total_paid, dec("0"));
    assert_eq!(term1_record.status, "pending");

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_for_unbilled_term_is_held_with_the_hint() {
    // Arrange - only Term 1 is billed, deposit names Term 3
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    app.seed_student("ADM-001", class_id, "day_scholar").await;
    let term1 = app
        .seed_fee_structure(
            "Term 1 Tuition",
            1,
            "2026-2027",
            "mandatory",
            "day_scholar",
            "20000",
            &[class_id],
        )
        .await;
    let client = app.client();
    client
        .post(format!("{}/billing/generate", app.address))
        .json(&json!({ "fee_structure_id": term1 }))
        .send()
        .await
        .expect("Failed to execute request");

    // Act
    let response = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 5000,
            "admission_number": "ADM-001",
            "reference": "BANK-TXN-005",
            "term": 3,
            "academic_year": "2026-2027"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert - held as unmatched_ledger carrying the explicit period
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "unmatched");
    assert_eq!(body["reason"], "unmatched_ledger");

    let unmatched_id = body["unmatched_id"].as_str().expect("unmatched_id missing");
    let held: serde_json::Value = client
        .get(format!("{}/unmatched-payments/{}", app.address, unmatched_id))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(held["term"], 3);
    assert_eq!(held["academic_year"], "2026-2027");

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn redelivered_deposit_for_applied_reference_is_conflict() {
    // Arrange
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let fee_structure_id = app
        .seed_fee_structure(
            "Term 1 Tuition",
            1,
            "2026-2027",
            "mandatory",
            "day_scholar",
            "20000",
            &[class_id],
        )
        .await;
    let client = app.client();
    client
        .post(format!("{}/billing/generate", app.address))
        .json(&json!({ "fee_structure_id": fee_structure_id }))
        .send()
        .await
        .expect("Failed to execute request");

    let deposit = json!({
        "amount": 12000,
        "admission_number": "ADM-001",
        "reference": "BANK-TXN-006"
    });
    let first = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&deposit)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(first.status(), 200);

    // Act - the bank redelivers after the deposit was applied
    let second = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&deposit)
        .send()
        .await
        .expect("Failed to execute request");

    // Assert - conflict, no double application
    assert_eq!(second.status(), 409);
    let record = app.ledger_record(student_id, fee_structure_id).await;
    assert_eq!(record.total_paid, dec("12000"));
    assert_eq!(app.payments_for_record(record.record_id).await.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn redelivered_held_deposit_reacknowledges_the_same_row() {
    // Arrange - deposit that lands in the holding store
    let app = TestApp::spawn().await;
    let client = app.client();
    let deposit = json!({
        "amount": 9000,
        "admission_number": "GHOST-404",
        "reference": "BANK-TXN-007"
    });

    let first = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&deposit)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(first.status(), 200);
    let first: serde_json::Value = first.json().await.expect("Failed to parse response");

    // Act - redelivery of the same reference
    let second = client
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&deposit)
        .send()
        .await
        .expect("Failed to execute request");

    // Assert - same holding row, acknowledged again, no duplicate
    assert_eq!(second.status(), 200);
    let second: serde_json::Value = second.json().await.expect("Failed to parse response");
    assert_eq!(second["status"], "unmatched");
    assert_eq!(second["unmatched_id"], first["unmatched_id"]);
    assert_eq!(unmatched_row_count(&app).await, 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_rejects_non_positive_amount() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .client()
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": -100,
            "admission_number": "ADM-001"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert - nothing recorded anywhere
    assert_eq!(response.status(), 400);
    assert_eq!(unmatched_row_count(&app).await, 0);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_with_term_but_no_year_is_bad_request() {
    // Arrange
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    app.seed_student("ADM-001", class_id, "day_scholar").await;

    // Act - a bare term number is ambiguous across years
    let response = app
        .client()
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 5000,
            "admission_number": "ADM-001",
            "term": 2
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn deposit_with_invalid_fields_fails_validation() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act - empty admission number and out-of-range term
    let response = app
        .client()
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 5000,
            "admission_number": "",
            "term": 9,
            "academic_year": "2026-2027"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 422);

    app.cleanup().await;
}
