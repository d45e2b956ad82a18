//! API integration tests
//!
//! Drive the full router over in-memory storage.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use rust_decimal_macros::dec;
use serde_json::json;
use tower::util::ServiceExt;

use common::{decimal, fast_workers, TestApp};
use ledger_backend::domain::Role;

fn app() -> TestApp {
    TestApp::spawn(&[(1, dec!(100)), (2, dec!(10))], fast_workers(2))
}

// =========================================================================
// Health & auth
// =========================================================================

#[tokio::test]
async fn test_health_needs_no_token() {
    let app = app();

    let (status, body) = app.request("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["accepting_jobs"], true);
    assert_eq!(body["data"]["queue_capacity"], 100);
}

#[tokio::test]
async fn test_missing_token_rejected() {
    let app = app();

    let (status, body) = app
        .request("GET", "/api/v1/balances/current", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn test_forged_token_rejected() {
    let app = app();
    let forged = ledger_backend::auth::TokenService::new("some-other-secret")
        .issue(1, Role::Admin, None, chrono::Duration::hours(1))
        .unwrap();

    let (status, _) = app
        .request("GET", "/api/v1/balances/current", Some(&forged), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_correlation_id_echoed() {
    let app = app();
    let token = app.token(1, Role::User);

    let correlation_id = uuid::Uuid::new_v4().to_string();

    let request = Request::builder()
        .uri("/api/v1/balances/current")
        .header("authorization", format!("Bearer {}", token))
        .header("x-correlation-id", &correlation_id)
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-correlation-id"], correlation_id.as_str());
}

// =========================================================================
// Queued mutations
// =========================================================================

#[tokio::test]
async fn test_deposit_is_queued_then_applied() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/deposit",
            Some(&token),
            Some(json!({ "amount": 50, "user_id": 1 })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "queued");
    assert_eq!(body["data"]["type"], "deposit");
    assert!(body["data"]["job_id"].is_string());

    app.wait_for_processed(1).await;

    let (status, body) = app
        .request("GET", "/api/v1/balances/current", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["data"]["amount"]), dec!(150));

    let (_, body) = app
        .request("GET", "/api/v1/transactions/history", Some(&token), None)
        .await;
    let records = body["data"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["type"], "deposit");
    assert!(records[0]["from_user_id"].is_null());
    assert_eq!(records[0]["to_user_id"], 1);
}

#[tokio::test]
async fn test_deposit_for_other_user_forbidden() {
    let app = app();
    let token = app.token(2, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/deposit",
            Some(&token),
            Some(json!({ "amount": 50, "user_id": 1 })),
        )
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn test_admin_may_queue_for_any_user() {
    let app = app();
    let token = app.token(99, Role::Admin);

    let (status, _) = app
        .request(
            "POST",
            "/api/v1/transactions/withdraw",
            Some(&token),
            Some(json!({ "amount": 25, "user_id": 1, "type": "withdraw" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    app.wait_for_processed(1).await;
    let user = app.token(1, Role::User);
    let (_, body) = app
        .request("GET", "/api/v1/balances/current", Some(&user), None)
        .await;
    assert_eq!(decimal(&body["data"]["amount"]), dec!(75));
}

#[tokio::test]
async fn test_overdraft_withdraw_is_accepted_then_dropped() {
    let app = app();
    let token = app.token(2, Role::User);

    let (status, _) = app
        .request(
            "POST",
            "/api/v1/transactions/withdraw",
            Some(&token),
            Some(json!({ "amount": 500, "user_id": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    app.wait_for_processed(1).await;
    assert_eq!(app.stats().failed, 1);

    let (_, body) = app
        .request("GET", "/api/v1/balances/current", Some(&token), None)
        .await;
    assert_eq!(decimal(&body["data"]["amount"]), dec!(10));
    assert!(app.log.is_empty().await);
}

#[tokio::test]
async fn test_withdraw_with_wrong_type() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/withdraw",
            Some(&token),
            Some(json!({ "amount": 5, "user_id": 1, "type": "deposit" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["details"]["type"].is_string());

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/withdraw",
            Some(&token),
            Some(json!({ "amount": 5, "user_id": 1, "type": "refund" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "unknown_transaction_type");
}

#[tokio::test]
async fn test_full_queue_rejects_with_conflict() {
    let app = TestApp::without_workers(&[(1, dec!(100))], 1);
    let token = app.token(1, Role::User);
    let body = json!({ "amount": 1, "user_id": 1 });

    let (status, _) = app
        .request("POST", "/api/v1/transactions/deposit", Some(&token), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, response) = app
        .request("POST", "/api/v1/transactions/deposit", Some(&token), Some(body))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(response["error"]["code"], "queue_full");

    let (_, health) = app.request("GET", "/health", None, None).await;
    assert_eq!(health["data"]["queued_jobs"], 1);
}

#[tokio::test]
async fn test_submissions_after_shutdown_unavailable() {
    let mut app = TestApp::spawn(&[(1, dec!(100))], fast_workers(1));
    let token = app.token(1, Role::User);

    app.shutdown().await;

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/deposit",
            Some(&token),
            Some(json!({ "amount": 1, "user_id": 1 })),
        )
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "shutting_down");

    let (_, health) = app.request("GET", "/health", None, None).await;
    assert_eq!(health["data"]["accepting_jobs"], false);
}

// =========================================================================
// Synchronous mutations
// =========================================================================

#[tokio::test]
async fn test_transfer_moves_funds() {
    let app = app();
    let sender = app.token(1, Role::User);
    let recipient = app.token(2, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/transfer",
            Some(&sender),
            Some(json!({ "to_user_id": 2, "amount": 40 })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["to_user_id"], 2);
    assert_eq!(decimal(&body["data"]["amount"]), dec!(40));
    let transaction_id = body["data"]["transaction_id"].as_i64().unwrap();

    let (_, body) = app
        .request("GET", "/api/v1/balances/current", Some(&sender), None)
        .await;
    assert_eq!(decimal(&body["data"]["amount"]), dec!(60));

    let (_, body) = app
        .request("GET", "/api/v1/balances/current", Some(&recipient), None)
        .await;
    assert_eq!(decimal(&body["data"]["amount"]), dec!(50));

    // Both sides can read the record
    for token in [&sender, &recipient] {
        let (status, body) = app
            .request(
                "GET",
                &format!("/api/v1/transactions/{}", transaction_id),
                Some(token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["type"], "transfer");
        assert_eq!(body["data"]["from_user_id"], 1);
        assert_eq!(body["data"]["to_user_id"], 2);
        assert_eq!(body["data"]["status"], "completed");
    }
}

#[tokio::test]
async fn test_transfer_overdraft_conflict() {
    let app = app();
    let token = app.token(2, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/transfer",
            Some(&token),
            Some(json!({ "to_user_id": 1, "amount": 11 })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "insufficient_funds");
    assert_eq!(app.balances.total(), dec!(110));
    assert!(app.log.is_empty().await);
}

#[tokio::test]
async fn test_transfer_to_self_conflict() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/transfer",
            Some(&token),
            Some(json!({ "to_user_id": 1, "amount": 5 })),
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "same_user_transfer");
}

#[tokio::test]
async fn test_transfer_to_unknown_user_not_found() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/transfer",
            Some(&token),
            Some(json!({ "to_user_id": 77, "amount": 5 })),
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "balance_not_found");
    assert_eq!(app.balances.total(), dec!(110));
}

#[tokio::test]
async fn test_debit_credits_caller() {
    let app = app();
    let token = app.token(2, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/debit",
            Some(&token),
            Some(json!({ "amount": "2.50" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["transaction_id"].is_i64());

    let (_, body) = app
        .request("GET", "/api/v1/balances/current", Some(&token), None)
        .await;
    assert_eq!(decimal(&body["data"]["amount"]), dec!(12.50));

    let (_, body) = app
        .request("GET", "/api/v1/transactions/history", Some(&token), None)
        .await;
    assert_eq!(body["data"][0]["type"], "debit");
    assert_eq!(body["data"][0]["to_user_id"], 2);
}

// =========================================================================
// Validation
// =========================================================================

#[tokio::test]
async fn test_invalid_amount_lists_fields() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/deposit",
            Some(&token),
            Some(json!({ "amount": -5, "user_id": 0 })),
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");
    assert!(body["error"]["details"]["amount"].is_string());
    assert!(body["error"]["details"]["user_id"].is_string());
}

#[tokio::test]
async fn test_malformed_body_bad_request() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request(
            "POST",
            "/api/v1/transactions/transfer",
            Some(&token),
            Some(json!({ "amount": 5 })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_negative_paging_rejected() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request(
            "GET",
            "/api/v1/transactions/history?limit=-1",
            Some(&token),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["details"]["limit"].is_string());
}

// =========================================================================
// Reads
// =========================================================================

#[tokio::test]
async fn test_history_pages_newest_first() {
    let app = app();
    let token = app.token(1, Role::User);

    for amount in ["1", "2", "3"] {
        let (status, _) = app
            .request(
                "POST",
                "/api/v1/transactions/debit",
                Some(&token),
                Some(json!({ "amount": amount })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = app
        .request(
            "GET",
            "/api/v1/transactions/history?limit=2",
            Some(&token),
            None,
        )
        .await;
    let page = body["data"].as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(decimal(&page[0]["amount"]), dec!(3));
    assert_eq!(decimal(&page[1]["amount"]), dec!(2));

    let (_, body) = app
        .request(
            "GET",
            "/api/v1/transactions/history?limit=2&offset=2",
            Some(&token),
            None,
        )
        .await;
    let page = body["data"].as_array().unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(decimal(&page[0]["amount"]), dec!(1));
}

#[tokio::test]
async fn test_history_reflects_new_records_after_cache() {
    let app = app();
    let token = app.token(1, Role::User);

    let (_, body) = app
        .request("GET", "/api/v1/transactions/history", Some(&token), None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    app.request(
        "POST",
        "/api/v1/transactions/debit",
        Some(&token),
        Some(json!({ "amount": 1 })),
    )
    .await;

    let (_, body) = app
        .request("GET", "/api/v1/transactions/history", Some(&token), None)
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_foreign_record_hidden() {
    let app = app();
    let owner = app.token(1, Role::User);
    let stranger = app.token(2, Role::User);

    let (_, body) = app
        .request(
            "POST",
            "/api/v1/transactions/debit",
            Some(&owner),
            Some(json!({ "amount": 1 })),
        )
        .await;
    let id = body["data"]["transaction_id"].as_i64().unwrap();

    let (status, _) = app
        .request("GET", &format!("/api/v1/transactions/{}", id), Some(&stranger), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let admin = app.token(50, Role::Admin);
    let (status, _) = app
        .request("GET", &format!("/api/v1/transactions/{}", id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_record_not_found() {
    let app = app();
    let token = app.token(1, Role::User);

    let (status, body) = app
        .request("GET", "/api/v1/transactions/4242", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "transaction_not_found");

    let (status, _) = app
        .request("GET", "/api/v1/transactions/abc", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_all_transactions_admin_only() {
    let app = app();
    let user = app.token(1, Role::User);
    let admin = app.token(50, Role::Admin);

    app.request(
        "POST",
        "/api/v1/transactions/transfer",
        Some(&user),
        Some(json!({ "to_user_id": 2, "amount": 1 })),
    )
    .await;

    let (status, body) = app
        .request("GET", "/api/v1/transactions/all", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    let (status, body) = app
        .request("GET", "/api/v1/transactions/all", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_open_balance_then_deposit() {
    let app = TestApp::spawn(&[], fast_workers(1));
    let token = app.token(7, Role::User);

    let (status, body) = app
        .request("POST", "/api/v1/balances/7", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["user_id"], 7);
    assert_eq!(decimal(&body["data"]["amount"]), dec!(0));

    let (status, _) = app
        .request(
            "POST",
            "/api/v1/transactions/deposit",
            Some(&token),
            Some(json!({ "amount": 25, "user_id": 7 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    app.wait_for_processed(1).await;
    assert_eq!(app.stats().succeeded, 1);

    let (_, body) = app
        .request("GET", "/api/v1/balances/current", Some(&token), None)
        .await;
    assert_eq!(decimal(&body["data"]["amount"]), dec!(25));

    let (status, body) = app
        .request("POST", "/api/v1/balances/7", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "balance_exists");
}

#[tokio::test]
async fn test_open_balance_for_someone_else() {
    let app = TestApp::spawn(&[], fast_workers(1));
    let user = app.token(7, Role::User);
    let admin = app.token(50, Role::Admin);

    let (status, _) = app
        .request("POST", "/api/v1/balances/8", Some(&user), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request("POST", "/api/v1/balances/8", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .request("POST", "/api/v1/balances/0", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"]["details"]["user_id"].is_string());
}

#[tokio::test]
async fn test_balance_missing_for_unknown_user() {
    let app = app();
    let token = app.token(404, Role::User);

    let (status, _) = app
        .request("GET", "/api/v1/balances/current", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
