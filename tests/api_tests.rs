//! HTTP API tests against the router with an in-process chain and mirror

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use mfuko_server::config::Environment;
use mfuko_server::loan::LoanKind;
use mfuko_server::mirror::{InMemoryLoanMirror, LoanMirror};
use mfuko_server::routes::api_router;
use mfuko_server::state::AppState;

fn app(h: &Harness<InMemoryLoanMirror>) -> Router {
    api_router(AppState::new(h.commands.clone(), Environment::Development))
}

async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health_reports_mirror_connected() {
    let h = harness(LoanKind::Repayment);

    let (status, body) = send(app(&h), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["environment"], "development");
}

#[tokio::test]
async fn test_get_loan_returns_projected_view() {
    let h = harness(LoanKind::Repayment);
    h.fake.seed_repayment(repayment_loan(1, 1000, 0, NOW - 1, true));

    let (status, body) = send(app(&h), "GET", "/api/loans/1", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["id"], 1);
    assert_eq!(body["data"]["status"], "overdue");
    assert_eq!(body["data"]["remainingAmount"], "1000");
    assert_eq!(body["data"]["progressPercent"], 0);
    assert_eq!(body["data"]["detail"]["kind"], "repayment");
}

#[tokio::test]
async fn test_missing_loan_is_404() {
    let h = harness(LoanKind::Funding);
    h.fake.seed_funding(funding_loan(900, 0, NOW + DAY));

    let (status, body) = send(app(&h), "GET", "/api/loans/9", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_connect_wallet_registers_user() {
    let h = harness(LoanKind::Repayment);
    h.fake.set_account(OWNER);

    let (status, body) = send(app(&h), "POST", "/api/wallet/connect", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isAdmin"], true);
    assert_eq!(body["data"]["signer"]["chainId"], 31337);
    assert!(h.chain.signer().await.is_ok());

    // Same address maps to the same user
    let first = h.mirror.find_or_create_user_by_address(OWNER).await.unwrap();
    let second = h.mirror.find_or_create_user_by_address(OWNER).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_short_repayment_is_a_validation_error() {
    let h = harness(LoanKind::Repayment);
    h.fake.seed_repayment(repayment_loan(1, 1000, 0, NOW + DAY, true));
    h.chain.connect().await.unwrap();

    let (status, body) = send(
        app(&h),
        "POST",
        "/api/loans/1/repay",
        Some(json!({ "amount": "500" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(h.fake.sent_count(), 0);
}

#[tokio::test]
async fn test_repay_without_wallet_is_forbidden() {
    let h = harness(LoanKind::Repayment);
    h.fake.seed_repayment(repayment_loan(1, 1000, 0, NOW + DAY, true));

    let (status, _) = send(
        app(&h),
        "POST",
        "/api/loans/1/repay",
        Some(json!({ "amount": "1000" })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_request_loan_route_is_not_shadowed_by_id() {
    let h = harness(LoanKind::Repayment);
    h.chain.connect().await.unwrap();

    let (status, body) = send(
        app(&h),
        "POST",
        "/api/loans/request",
        Some(json!({
            "amount": "1000",
            "interest_rate": 10,
            "repayment_period_days": 30
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["view"]["id"], 1);
    assert_eq!(body["data"]["view"]["status"], "pending");
    assert_eq!(body["data"]["view"]["remainingAmount"], "1100");
    assert_eq!(body["data"]["view"]["deadline"], NOW + 30 * DAY);
}

#[tokio::test]
async fn test_create_loan_body_is_validated() {
    let h = harness(LoanKind::Funding);
    h.chain.connect().await.unwrap();

    let (status, body) = send(
        app(&h),
        "POST",
        "/api/loans",
        Some(json!({
            "title": "",
            "amount_required": "900",
            "deadline": NOW + DAY
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(h.fake.sent_count(), 0);
}

#[tokio::test]
async fn test_sync_then_list() {
    let h = harness(LoanKind::Repayment);
    h.fake.seed_repayment(repayment_loan(1, 1000, 0, NOW + DAY, false));
    h.fake.seed_repayment(repayment_loan(2, 1000, 0, NOW + DAY, true));

    let (status, body) = send(app(&h), "POST", "/api/loans/sync", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalOnChain"], 2);
    assert_eq!(body["data"]["syncedCount"], 2);
    assert_eq!(body["data"]["complete"], true);

    let (status, body) = send(app(&h), "GET", "/api/loans?status=active", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 1);
    assert_eq!(body["data"]["data"][0]["chainLoanId"], 2);

    let (_, body) = send(app(&h), "POST", "/api/loans/sync", None).await;
    assert_eq!(body["data"]["syncedCount"], 0);
}

#[tokio::test]
async fn test_lenders_include_on_chain_contributions() {
    let h = harness(LoanKind::Funding);
    h.fake.seed_funding(funding_loan(900, 0, NOW + DAY));
    h.fake.set_account(LENDER);
    h.chain.connect().await.unwrap();
    h.commands.donate(0, wei(200)).await.unwrap();

    let (status, body) = send(app(&h), "GET", "/api/loans/0/lenders", None).await;

    assert_eq!(status, StatusCode::OK);
    let lenders = body["data"]["lenders"].as_array().unwrap();
    assert_eq!(lenders.len(), 1);
    assert_eq!(lenders[0]["amount"], "200");
}

#[tokio::test]
async fn test_borrower_loans_rejects_bad_address() {
    let h = harness(LoanKind::Repayment);

    let (status, _) = send(app(&h), "GET", "/api/borrowers/not-an-address/loans", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_borrower_loans_lists_own_loans() {
    let h = harness(LoanKind::Repayment);
    h.fake.seed_repayment(repayment_loan(1, 1000, 0, NOW + DAY, true));
    h.fake.seed_repayment(repayment_loan(2, 500, 0, NOW + DAY, false));

    let uri = format!("/api/borrowers/{:#x}/loans", BORROWER);
    let (status, body) = send(app(&h), "GET", &uri, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_contract_address_update_persists_and_disconnects() {
    let h = harness(LoanKind::Funding);
    h.chain.connect().await.unwrap();

    let (status, body) = send(
        app(&h),
        "PUT",
        "/api/contract/address",
        Some(json!({ "address": "0x1234" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(h.mirror.load_contract_address().await.unwrap().is_none());

    let next = "0xe46b96b92543aa5e843d21a1bbe63320eb1e9f49";
    let (status, _) = send(
        app(&h),
        "PUT",
        "/api/contract/address",
        Some(json!({ "address": next })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stored = h.mirror.load_contract_address().await.unwrap().unwrap();
    assert_eq!(format!("{:#x}", stored), next);
    assert_eq!(format!("{:#x}", h.gateway.contract_address().await), next);
    assert!(h.chain.signer().await.is_err());
}
