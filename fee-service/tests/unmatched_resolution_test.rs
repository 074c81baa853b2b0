//! Holding store review and manual resolution tests.

mod common;

use common::{TestApp, dec, json_decimal};
use serde_json::json;
use uuid::Uuid;

/// Park a deposit in the holding store via the webhook and return its ID.
async fn hold_deposit(app: &TestApp, admission_number: &str, amount: i64, reference: &str) -> Uuid {
    let response = app
        .client()
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": amount,
            "admission_number": admission_number,
            "reference": reference
        }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "unmatched");
    body["unmatched_id"]
        .as_str()
        .expect("unmatched_id missing")
        .parse()
        .expect("unmatched_id is not a UUID")
}

async fn resolve(app: &TestApp, unmatched_id: Uuid, body: serde_json::Value) -> reqwest::Response {
    app.client()
        .post(format!(
            "{}/unmatched-payments/{}/resolve",
            app.address, unmatched_id
        ))
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request")
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn listing_is_newest_first() {
    // Arrange
    let app = TestApp::spawn().await;
    let first = hold_deposit(&app, "GHOST-1", 4000, "LIST-1").await;
    tokio::time::sleep(tokio::time::Duration::from_millis(25)).await;
    let second = hold_deposit(&app, "GHOST-2", 5000, "LIST-2").await;

    // Act
    let response = app
        .client()
        .get(format!("{}/unmatched-payments", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 200);
    let rows: serde_json::Value = response.json().await.expect("Failed to parse response");
    let rows = rows.as_array().expect("expected an array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["unmatched_id"], second.to_string());
    assert_eq!(rows[1]["unmatched_id"], first.to_string());

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn listing_filters_by_status() {
    // Arrange - one open hold and one resolved one
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
    app.client()
        .post(format!("{}/billing/generate", app.address))
        .json(&json!({ "fee_structure_id": fee_structure_id }))
        .send()
        .await
        .expect("Failed to execute request");

    let open_id = hold_deposit(&app, "GHOST-1", 4000, "FILTER-1").await;
    let resolved_id = hold_deposit(&app, "GHOST-2", 5000, "FILTER-2").await;
    let record = app.ledger_record(student_id, fee_structure_id).await;
    let response = resolve(
        &app,
        resolved_id,
        json!({ "ledger_record_id": record.record_id }),
    )
    .await;
    assert_eq!(response.status(), 200);

    // Act
    let open: serde_json::Value = app
        .client()
        .get(format!(
            "{}/unmatched-payments?status=unmatched_student",
            app.address
        ))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse response");
    let resolved: serde_json::Value = app
        .client()
        .get(format!("{}/unmatched-payments?status=resolved", app.address))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse response");

    // Assert
    let open = open.as_array().expect("expected an array");
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["unmatched_id"], open_id.to_string());

    let resolved = resolved.as_array().expect("expected an array");
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["unmatched_id"], resolved_id.to_string());
    assert!(resolved[0]["resolved_payment_id"].is_string());

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn unknown_status_filter_is_rejected() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .client()
        .get(format!("{}/unmatched-payments?status=pending", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn fetching_an_unknown_hold_returns_404() {
    // Arrange
    let app = TestApp::spawn().await;

    // Act
    let response = app
        .client()
        .get(format!(
            "{}/unmatched-payments/{}",
            app.address,
            Uuid::new_v4()
        ))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn resolving_to_a_pinned_record_applies_the_deposit() {
    // Arrange - a typo in the admission number parked the deposit
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
    app.client()
        .post(format!("{}/billing/generate", app.address))
        .json(&json!({ "fee_structure_id": fee_structure_id }))
        .send()
        .await
        .expect("Failed to execute request");

    let unmatched_id = hold_deposit(&app, "AMD-001", 12000, "TYPO-1").await;
    let record = app.ledger_record(student_id, fee_structure_id).await;

    // Act
    let response = resolve(
        &app,
        unmatched_id,
        json!({ "ledger_record_id": record.record_id }),
    )
    .await;

    // Assert - the deposit now behaves like any webhook payment
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
    assert_eq!(payments[0].transaction_reference.as_deref(), Some("TYPO-1"));

    let held: serde_json::Value = app
        .client()
        .get(format!(
            "{}/unmatched-payments/{}",
            app.address, unmatched_id
        ))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(held["status"], "resolved");
    assert_eq!(
        held["resolved_payment_id"],
        payments[0].payment_id.to_string()
    );
    assert_eq!(held["student_id"], student_id.to_string());

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn resolving_by_student_picks_the_earliest_outstanding_record() {
    // Arrange - two outstanding terms
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let mut structures = Vec::new();
    for (name, term) in [("Term 1 Tuition", 1), ("Term 2 Tuition", 2)] {
        let id = app
            .seed_fee_structure(
                name,
                term,
                "2026-2027",
                "mandatory",
                "day_scholar",
                "10000",
                &[class_id],
            )
            .await;
        app.client()
            .post(format!("{}/billing/generate", app.address))
            .json(&json!({ "fee_structure_id": id }))
            .send()
            .await
            .expect("Failed to execute request");
        structures.push(id);
    }
    let unmatched_id = hold_deposit(&app, "GHOST-1", 6000, "PICK-1").await;

    // Act
    let response = resolve(&app, unmatched_id, json!({ "student_id": student_id })).await;

    // Assert - Term 1 takes the money, Term 2 is untouched
    assert_eq!(response.status(), 200);
    let t1 = app.ledger_record(student_id, structures[0]).await;
    assert_eq!(t1.total_paid, dec("6000"));
    let t2 = app.ledger_record(student_id, structures[1]).await;
    assert_eq!(t2.total_paid, dec("0"));

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn request_period_overrides_the_held_hint() {
    // Arrange - the deposit carried a Term 1 hint
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let mut structures = Vec::new();
    for (name, term) in [("Term 1 Tuition", 1), ("Term 2 Tuition", 2)] {
        let id = app
            .seed_fee_structure(
                name,
                term,
                "2026-2027",
                "mandatory",
                "day_scholar",
                "10000",
                &[class_id],
            )
            .await;
        app.client()
            .post(format!("{}/billing/generate", app.address))
            .json(&json!({ "fee_structure_id": id }))
            .send()
            .await
            .expect("Failed to execute request");
        structures.push(id);
    }

    let response = app
        .client()
        .post(format!("{}/webhooks/bank-deposit", app.address))
        .json(&json!({
            "amount": 10000,
            "admission_number": "GHOST-1",
            "reference": "HINT-1",
            "term": 1,
            "academic_year": "2026-2027"
        }))
        .send()
        .await
        .expect("Failed to execute request");
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    let unmatched_id: Uuid = body["unmatched_id"]
        .as_str()
        .expect("unmatched_id missing")
        .parse()
        .expect("unmatched_id is not a UUID");

    // Act - the admin disagrees with the bank's hint
    let response = resolve(
        &app,
        unmatched_id,
        json!({
            "student_id": student_id,
            "term": 2,
            "academic_year": "2026-2027"
        }),
    )
    .await;

    // Assert - the request's period wins
    assert_eq!(response.status(), 200);
    let t1 = app.ledger_record(student_id, structures[0]).await;
    assert_eq!(t1.total_paid, dec("0"));
    let t2 = app.ledger_record(student_id, structures[1]).await;
    assert_eq!(t2.total_paid, dec("10000"));
    assert_eq!(t2.status, "paid");

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn resolving_into_an_unbilled_term_preregisters_the_payment() {
    // Arrange - the student exists but Term 2 has not been billed
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let unmatched_id = hold_deposit(&app, "GHOST-1", 6000, "EARLY-1").await;

    // Act
    let response = resolve(
        &app,
        unmatched_id,
        json!({
            "student_id": student_id,
            "term": 2,
            "academic_year": "2026-2027"
        }),
    )
    .await;

    // Assert - registered, waiting for billing
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["status"], "registered");
    assert_eq!(body["student_id"], student_id.to_string());
    assert_eq!(body["term"], 2);
    assert_eq!(body["academic_year"], "2026-2027");

    // Billing that term later adopts the registered payment
    let fee_structure_id = app
        .seed_fee_structure(
            "Term 2 Tuition",
            2,
            "2026-2027",
            "mandatory",
            "day_scholar",
            "10000",
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
    assert_eq!(record.total_paid, dec("6000"));
    assert_eq!(record.outstanding_balance, dec("4000"));
    assert_eq!(record.status, "partial");

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn a_hold_can_only_be_resolved_once() {
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
    app.client()
        .post(format!("{}/billing/generate", app.address))
        .json(&json!({ "fee_structure_id": fee_structure_id }))
        .send()
        .await
        .expect("Failed to execute request");
    let unmatched_id = hold_deposit(&app, "GHOST-1", 4000, "ONCE-1").await;
    let record = app.ledger_record(student_id, fee_structure_id).await;
    let first = resolve(
        &app,
        unmatched_id,
        json!({ "ledger_record_id": record.record_id }),
    )
    .await;
    assert_eq!(first.status(), 200);

    // Act
    let second = resolve(
        &app,
        unmatched_id,
        json!({ "ledger_record_id": record.record_id }),
    )
    .await;

    // Assert - no double application
    assert_eq!(second.status(), 409);
    let payments = app.payments_for_record(record.record_id).await;
    assert_eq!(payments.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn resolution_requires_exactly_one_mode() {
    // Arrange
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;
    let unmatched_id = hold_deposit(&app, "GHOST-1", 4000, "MODE-1").await;

    // Act
    let both = resolve(
        &app,
        unmatched_id,
        json!({
            "ledger_record_id": Uuid::new_v4(),
            "student_id": student_id
        }),
    )
    .await;
    let neither = resolve(&app, unmatched_id, json!({})).await;

    // Assert
    assert_eq!(both.status(), 400);
    assert_eq!(neither.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn resolving_an_unknown_hold_returns_404() {
    // Arrange
    let app = TestApp::spawn().await;
    let class_id = Uuid::new_v4();
    let student_id = app.seed_student("ADM-001", class_id, "day_scholar").await;

    // Act
    let response = resolve(
        &app,
        Uuid::new_v4(),
        json!({ "student_id": student_id }),
    )
    .await;

    // Assert
    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn resolving_against_an_unknown_record_returns_404() {
    // Arrange
    let app = TestApp::spawn().await;
    let unmatched_id = hold_deposit(&app, "GHOST-1", 4000, "BADREC-1").await;

    // Act
    let response = resolve(
        &app,
        unmatched_id,
        json!({ "ledger_record_id": Uuid::new_v4() }),
    )
    .await;

    // Assert - and the hold stays open for another attempt
    assert_eq!(response.status(), 404);
    let held: serde_json::Value = app
        .client()
        .get(format!(
            "{}/unmatched-payments/{}",
            app.address, unmatched_id
        ))
        .send()
        .await
        .expect("Failed to execute request")
        .json()
        .await
        .expect("Failed to parse response");
    assert_eq!(held["status"], "unmatched_student");

    app.cleanup().await;
}
