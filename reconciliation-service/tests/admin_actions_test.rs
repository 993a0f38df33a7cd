//! Admin action tests: state machine enforcement and audit atomicity.

mod common;

use common::spawn_app;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn confirm_applies_and_audits() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let invoice_id = app
        .seed_invoice(
            "Confirm Target Co",
            Decimal::new(5100_01, 2),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        )
        .await;
    let transaction_id = app
        .seed_transaction(batch_id, "auto_matched", Some(invoice_id), None)
        .await;

    let response = app
        .post_empty(&format!("/transactions/{transaction_id}/confirm"))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["transaction"]["status"], "confirmed");
    assert_eq!(
        body["transaction"]["matchedInvoiceId"],
        invoice_id.to_string()
    );
    assert!(body["auditLogId"].as_str().is_some());

    assert_eq!(app.transaction_status(transaction_id).await, "confirmed");
    assert_eq!(app.audit_count(transaction_id, "confirmed").await, 1);
}

#[tokio::test]
async fn invalid_transitions_leave_row_and_audit_untouched() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let transaction_id = app
        .seed_transaction(batch_id, "unmatched", None, None)
        .await;

    // confirm is not allowed from unmatched.
    let response = app
        .post_empty(&format!("/transactions/{transaction_id}/confirm"))
        .await;
    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("Invalid state"));

    assert_eq!(app.transaction_status(transaction_id).await, "unmatched");
    assert_eq!(app.audit_count(transaction_id, "confirmed").await, 0);
}

#[tokio::test]
async fn reject_clears_the_matched_invoice() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let invoice_id = app
        .seed_invoice(
            "Reject Target Co",
            Decimal::new(5200_02, 2),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        )
        .await;
    let transaction_id = app
        .seed_transaction(batch_id, "needs_review", Some(invoice_id), None)
        .await;

    let response = app
        .post_json(
            &format!("/transactions/{transaction_id}/reject"),
            &json!({ "reason": "wrong customer", "performedBy": "reviewer-1" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["transaction"]["status"], "unmatched");
    assert!(body["transaction"]["matchedInvoiceId"].is_null());

    assert_eq!(app.audit_count(transaction_id, "rejected").await, 1);
}

#[tokio::test]
async fn manual_match_requires_an_existing_invoice() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let transaction_id = app
        .seed_transaction(batch_id, "unmatched", None, None)
        .await;

    // Unknown invoice id: rejected, row untouched.
    let response = app
        .post_json(
            &format!("/transactions/{transaction_id}/match"),
            &json!({ "invoiceId": Uuid::new_v4().to_string() }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(app.transaction_status(transaction_id).await, "unmatched");

    // Known invoice id: confirmed with the invoice attached.
    let invoice_id = app
        .seed_invoice(
            "Manual Match Co",
            Decimal::new(5300_03, 2),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        )
        .await;
    let response = app
        .post_json(
            &format!("/transactions/{transaction_id}/match"),
            &json!({ "invoiceId": invoice_id.to_string(), "performedBy": "ops" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["transaction"]["status"], "confirmed");
    assert_eq!(
        body["transaction"]["matchedInvoiceId"],
        invoice_id.to_string()
    );
    assert_eq!(app.audit_count(transaction_id, "manual_matched").await, 1);
}

#[tokio::test]
async fn mark_external_is_terminal_for_unmatched_rows() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let transaction_id = app
        .seed_transaction(batch_id, "unmatched", None, None)
        .await;

    let response = app
        .post_json(
            &format!("/transactions/{transaction_id}/external"),
            &json!({ "reason": "owner draw" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.transaction_status(transaction_id).await, "external");
    assert_eq!(app.audit_count(transaction_id, "marked_external").await, 1);

    // Already external: no further transitions.
    let response = app
        .post_empty(&format!("/transactions/{transaction_id}/external"))
        .await;
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(app.audit_count(transaction_id, "marked_external").await, 1);
}

#[tokio::test]
async fn bulk_confirm_confirms_each_row_exactly_once() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let invoice_id = app
        .seed_invoice(
            "Bulk Confirm Co",
            Decimal::new(5400_04, 2),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        )
        .await;

    let mut auto_ids = Vec::new();
    for _ in 0..3 {
        auto_ids.push(
            app.seed_transaction(batch_id, "auto_matched", Some(invoice_id), None)
                .await,
        );
    }
    let review_id = app
        .seed_transaction(batch_id, "needs_review", Some(invoice_id), None)
        .await;

    let response = app
        .post_json(
            "/transactions/bulk-confirm",
            &json!({ "batchId": batch_id.to_string() }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["confirmedCount"], 3);
    assert_eq!(body["transactionIds"].as_array().unwrap().len(), 3);

    for id in &auto_ids {
        assert_eq!(app.transaction_status(*id).await, "confirmed");
        assert_eq!(app.audit_count(*id, "confirmed").await, 1);
    }
    // needs_review rows are out of scope for bulk confirmation.
    assert_eq!(app.transaction_status(review_id).await, "needs_review");

    // Second invocation finds nothing left to confirm and audits nothing.
    let response = app
        .post_json(
            "/transactions/bulk-confirm",
            &json!({ "batchId": batch_id.to_string() }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["confirmedCount"], 0);
    for id in &auto_ids {
        assert_eq!(app.audit_count(*id, "confirmed").await, 1);
    }
}

#[tokio::test]
async fn bulk_confirm_unknown_batch_is_404() {
    let Some(app) = spawn_app().await else { return };

    let response = app
        .post_json(
            "/transactions/bulk-confirm",
            &json!({ "batchId": Uuid::new_v4().to_string() }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn system_actor_is_reserved_for_the_worker() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let transaction_id = app
        .seed_transaction(batch_id, "auto_matched", None, None)
        .await;

    let response = app
        .post_json(
            &format!("/transactions/{transaction_id}/confirm"),
            &json!({ "performedBy": "system" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
    assert_eq!(app.transaction_status(transaction_id).await, "auto_matched");
}

#[tokio::test]
async fn transaction_detail_includes_invoice_and_audit() {
    let Some(app) = spawn_app().await else { return };

    let batch_id = app.seed_batch().await;
    let invoice_id = app
        .seed_invoice(
            "Detail View Co",
            Decimal::new(5500_05, 2),
            NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
        )
        .await;
    let transaction_id = app
        .seed_transaction(batch_id, "auto_matched", Some(invoice_id), None)
        .await;
    app.post_empty(&format!("/transactions/{transaction_id}/confirm"))
        .await;

    let response = app.get(&format!("/transactions/{transaction_id}")).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["transaction"]["id"], transaction_id.to_string());
    assert_eq!(body["matchedInvoice"]["id"], invoice_id.to_string());
    assert_eq!(body["auditLog"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn actions_on_unknown_transactions_are_404() {
    let Some(app) = spawn_app().await else { return };

    let missing = Uuid::new_v4();
    let response = app.post_empty(&format!("/transactions/{missing}/confirm")).await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app.get(&format!("/transactions/{missing}")).await;
    assert_eq!(response.status().as_u16(), 404);

    let response = app.post_empty("/transactions/not-a-uuid/confirm").await;
    assert_eq!(response.status().as_u16(), 400);
}
