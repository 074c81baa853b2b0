//! Manual payment entry integration tests.
//!
//! Admin-entered payments against known ledger records: application,
//! status transitions, duplicate references and input rejection.

mod common;

use common::{TestApp, dec, json_decimal};
use serde_json::json;
use uuid::Uuid;

/// Seed one billed student and return (student_id, fee_structure_id, record_id).
async fn billed_student(app: &TestApp, amount: &str) -> (Uuid, Uuid, Uuid) {
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let fee_structure_id = app
        .seed_fee_structure(
            "Term 1 Tuition",
            1,
            "2026-2027",
            "mandatory",
            "day_scholar",
            amount,
            &[class_id],
        )
        .await;

    app.client()
        .post(format!("{}/billing/generate", app.address))
        .json(&json!({ "fee_structure_id": fee_structure_id }))
        .send()
        .await
        .expect("Failed to execute request");

    let record = app.ledger_record(student_id, fee_structure_id).await;
    (student_id, fee_structure_id, record.record_id)
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn manual_payment_applies_to_record() {
    // Arrange
    let app = TestApp::spawn().await;
    let (_, _, record_id) = billed_student(&app, "20000").await;

    // Act
    let response = app
        .client()
        .post(format!("{}/payments", app.address))
        .json(&json!({
            "ledger_record_id": record_id,
            "amount": 5000,
            "method": "cash",
            "notes": "Paid at the school office"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "matched");
    assert_eq!(body["ledger_record_id"], record_id.to_string().as_str());
    assert_eq!(json_decimal(&body["updated_balance"]), dec("15000"));
    assert_eq!(json_decimal(&body["credit_generated"]), dec("0"));
    assert_eq!(body["record_status"], "partial");

    let payments = app.payments_for_record(record_id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount_paid, dec("5000"));
    assert_eq!(payments[0].method, "cash");
    assert_eq!(payments[0].source, "manual");
    assert_eq!(payments[0].status, "completed");

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn payments_accumulate_through_partial_to_paid() {
    // Arrange
    let app = TestApp::spawn().await;
    let (student_id, fee_structure_id, record_id) = billed_student(&app, "20000").await;
    let client = app.client();

    let pay = |amount: i64| {
        let client = client.clone();
        let address = app.address.clone();
        async move {
            let response = client
                .post(format!("{}/payments", address))
                .json(&json!({
                    "ledger_record_id": record_id,
                    "amount": amount,
                    "method": "mobile_money"
                }))
                .send()
                .await
                .expect("Failed to execute request");
            assert_eq!(response.status(), 201);
            response
                .json::<serde_json::Value>()
                .await
                .expect("Failed to parse response")
        }
    };

    // Act + Assert - each instalment moves the derived state forward
    let first = pay(12000).await;
    assert_eq!(first["record_status"], "partial");
    assert_eq!(json_decimal(&first["updated_balance"]), dec("8000"));

    let second = pay(8000).await;
    assert_eq!(second["record_status"], "paid");
    assert_eq!(json_decimal(&second["updated_balance"]), dec("0"));

    let record = app.ledger_record(student_id, fee_structure_id).await;
    assert_eq!(record.total_paid, dec("20000"));
    assert_eq!(record.status, "paid");

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn overpayment_marks_record_overpaid_and_generates_credit() {
    // Arrange - single record, nowhere for the surplus to go
    let app = TestApp::spawn().await;
    let (_, _, record_id) = billed_student(&app, "20000").await;

    // Act
    let response = app
        .client()
        .post(format!("{}/payments", app.address))
        .json(&json!({
            "ledger_record_id": record_id,
            "amount": 25000,
            "method": "bank_deposit",
            "reference": "SLIP-889"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 201);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["record_status"], "overpaid");
    assert_eq!(json_decimal(&body["updated_balance"]), dec("0"));
    assert_eq!(json_decimal(&body["credit_generated"]), dec("5000"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn manual_payment_unknown_record_returns_404() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .client()
        .post(format!("{}/payments", app.address))
        .json(&json!({
            "ledger_record_id": Uuid::new_v4(),
            "amount": 5000,
            "method": "cash"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn manual_payment_rejects_non_positive_amounts() {
    // Arrange
    let app = TestApp::spawn().await;
    let (_, _, record_id) = billed_student(&app, "20000").await;
    let client = app.client();

    for amount in [0, -500] {
        // Act
        let response = client
            .post(format!("{}/payments", app.address))
            .json(&json!({
                "ledger_record_id": record_id,
                "amount": amount,
                "method": "cash"
            }))
            .send()
            .await
            .expect("Failed to execute request");

        // Assert
        assert_eq!(response.status(), 400);
    }

    let payments = app.payments_for_record(record_id).await;
    assert!(payments.is_empty());

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn manual_payment_rejects_unknown_method() {
    // Arrange
    let app = TestApp::spawn().await;
    let (_, _, record_id) = billed_student(&app, "20000").await;

    // Act
    let response = app
        .client()
        .post(format!("{}/payments", app.address))
        .json(&json!({
            "ledger_record_id": record_id,
            "amount": 5000,
            "method": "barter"
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
async fn duplicate_transaction_reference_is_a_conflict() {
    // Arrange
    let app = TestApp::spawn().await;
    let (_, _, record_id) = billed_student(&app, "20000").await;
    let client = app.client();

    let body = json!({
        "ledger_record_id": record_id,
        "amount": 5000,
        "method": "cheque",
        "reference": "CHQ-1001"
    });

    let first = client
        .post(format!("{}/payments", app.address))
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(first.status(), 201);

    // Act - same reference again
    let second = client
        .post(format!("{}/payments", app.address))
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");

    // Assert - rejected, and only one payment exists
    assert_eq!(second.status(), 409);
    let payments = app.payments_for_record(record_id).await;
    assert_eq!(payments.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn get_payment_returns_the_recorded_row() {
    // Arrange
    let app = TestApp::spawn().await;
    let (student_id, _, record_id) = billed_student(&app, "20000").await;
    let client = app.client();

    let created: serde_json::Value = client
        .post(format!("{}/payments", app.address))
        .json(&json!({
            "ledger_record_id": record_id,
            "amount": 7500,
            "method": "card",
            "payment_date": "2026-05-10"
        }))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse response");
    let payment_id = created["payment_id"].as_str().expect("payment_id missing");

    // Act
    let response = client
        .get(format!("{}/payments/{}", app.address, payment_id))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["payment_id"], payment_id);
    assert_eq!(body["student_id"], student_id.to_string().as_str());
    assert_eq!(json_decimal(&body["amount_paid"]), dec("7500"));
    assert_eq!(body["method"], "card");
    assert_eq!(body["payment_date"], "2026-05-10");
    assert_eq!(body["source"], "manual");

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn get_payment_unknown_returns_404() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .client()
        .get(format!("{}/payments/{}", app.address, Uuid::new_v4()))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn malformed_payment_body_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act - not even valid JSON for the DTO
    let response = app
        .client()
        .post(format!("{}/payments", app.address))
        .header("content-type", "application/json")
        .body(r#"{"ledger_record_id": "not-a-uuid"}"#)
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}
