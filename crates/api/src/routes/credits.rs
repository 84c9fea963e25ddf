//! Credit ledger routes.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use skillswap_core::credits::{EntryFilter, HistoryQuery, TransferRequest};
use skillswap_shared::types::{AccountId, PageRequest, TransferId};

use crate::AppState;
use crate::error::ApiError;

/// Creates credit routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/accounts/{account_id}", post(open_account))
        .route("/accounts/{account_id}/credits/balance", get(get_balance))
        .route("/accounts/{account_id}/credits/history", get(get_history))
        .route("/accounts/{account_id}/credits/stats", get(get_statistics))
        .route("/accounts/{account_id}/credits/check", get(check_credits))
        .route("/accounts/{account_id}/credits/transfer", post(transfer))
        .route("/accounts/{account_id}/credits/purchase", post(purchase))
        .route(
            "/accounts/{account_id}/credits/reservations",
            get(list_reservations).post(reserve),
        )
        .route(
            "/accounts/{account_id}/credits/reservations/{purpose}",
            delete(release_reservation),
        )
}

/// Query parameters for the history endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    /// 1-indexed page number.
    pub page: Option<u32>,
    /// Items per page, clamped to 1..=100.
    pub per_page: Option<u32>,
    /// `created_at`, `amount`, `kind`, `status` or `id`.
    pub sort_by: Option<String>,
    /// `asc` or `desc`.
    pub sort_dir: Option<String>,
    /// Entry kind filter.
    pub kind: Option<String>,
    /// Entry status filter.
    pub status: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
}

impl HistoryParams {
    fn into_query(self) -> Result<HistoryQuery, ApiError> {
        let defaults = PageRequest::default();
        let mut query = HistoryQuery {
            page: PageRequest::new(
                self.page.unwrap_or(defaults.page),
                self.per_page.unwrap_or(defaults.per_page),
            ),
            ..HistoryQuery::default()
        };

        if let Some(sort_by) = self.sort_by {
            query.sort_by = sort_by.parse().map_err(invalid_query)?;
        }
        if let Some(sort_dir) = self.sort_dir {
            query.direction = sort_dir.parse().map_err(invalid_query)?;
        }

        query.filter = EntryFilter {
            kind: self.kind.map(|k| k.parse()).transpose().map_err(invalid_query)?,
            status: self.status.map(|s| s.parse()).transpose().map_err(invalid_query)?,
            from: self.from,
            to: self.to,
        };
        Ok(query)
    }
}

fn invalid_query(message: String) -> ApiError {
    ApiError::bad_request("INVALID_QUERY", message)
}

/// Query parameters for the sufficiency check.
#[derive(Debug, Deserialize)]
pub struct CheckParams {
    /// Amount the caller intends to spend.
    pub amount: Decimal,
}

/// Sufficiency check result.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// The account.
    pub account_id: AccountId,
    /// Requested amount.
    pub amount: Decimal,
    /// Whether the available balance covers `amount`.
    pub sufficient: bool,
}

/// Body of a transfer request; the sender comes from the path.
#[derive(Debug, Deserialize)]
pub struct TransferBody {
    /// Receiving account.
    pub to: AccountId,
    /// Credits to move.
    pub amount: Decimal,
    /// Free text copied to both legs.
    #[serde(default)]
    pub description: String,
    /// Client-chosen id making the transfer safe to retry.
    pub idempotency_key: Option<TransferId>,
}

/// Body of a purchase request.
#[derive(Debug, Deserialize)]
pub struct PurchaseBody {
    /// Credits bought.
    pub amount: Decimal,
    /// Id of the confirmed payment.
    pub payment_reference: String,
}

/// Body of a reservation request.
#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    /// Credits to hold.
    pub amount: Decimal,
    /// What the hold is for; one hold per purpose.
    pub purpose: String,
}

async fn open_account(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.credits.open_account(account_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "account_id": summary.account_id,
            "current_balance": summary.current_balance,
            "created_at": summary.created_at
        })),
    ))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let balance = state.credits.get_balance(account_id).await?;
    Ok(Json(balance))
}

async fn get_history(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_query()?;
    let page = state.credits.get_history(account_id, &query).await?;
    Ok(Json(page))
}

async fn get_statistics(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.credits.get_statistics(account_id).await?;
    Ok(Json(stats))
}

async fn check_credits(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Query(params): Query<CheckParams>,
) -> Result<impl IntoResponse, ApiError> {
    let sufficient = state
        .credits
        .has_sufficient_credits(account_id, params.amount)
        .await?;
    Ok(Json(CheckResponse {
        account_id,
        amount: params.amount,
        sufficient,
    }))
}

async fn transfer(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(body): Json<TransferBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = TransferRequest {
        from: account_id,
        to: body.to,
        amount: body.amount,
        description: body.description,
        idempotency_key: body.idempotency_key,
    };
    let receipt = state.credits.transfer(&request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn purchase(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(body): Json<PurchaseBody>,
) -> Result<impl IntoResponse, ApiError> {
    let entry = state
        .credits
        .purchase(account_id, body.amount, &body.payment_reference)
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn list_reservations(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
) -> Result<impl IntoResponse, ApiError> {
    let reservations = state.credits.reservations(account_id).await?;
    Ok(Json(json!({ "data": reservations })))
}

async fn reserve(
    State(state): State<AppState>,
    Path(account_id): Path<AccountId>,
    Json(body): Json<ReserveBody>,
) -> Result<impl IntoResponse, ApiError> {
    let reservation = state
        .credits
        .reserve(account_id, body.amount, &body.purpose)
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

async fn release_reservation(
    State(state): State<AppState>,
    Path((account_id, purpose)): Path<(AccountId, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let released = state
        .credits
        .release_reservation(account_id, &purpose)
        .await?;
    Ok(Json(released))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, header},
    };
    use http_body_util::BodyExt;
    use serde_json::Value;
    use skillswap_core::credits::{CreditService, InMemoryLedgerStore};
    use skillswap_shared::config::{CreditsConfig, LedgerConfig};
    use tower::ServiceExt;

    use super::*;
    use crate::create_router;

    fn test_state() -> AppState {
        let store = Arc::new(InMemoryLedgerStore::new());
        AppState {
            credits: Arc::new(CreditService::new(
                store,
                &LedgerConfig::default(),
                CreditsConfig::default(),
            )),
        }
    }

    async fn funded_account(state: &AppState) -> AccountId {
        let account = AccountId::new();
        state.credits.open_account(account).await.unwrap();
        state.credits.grant_registration_bonus(account).await.unwrap();
        account
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let (status, body) = send(&test_state(), get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_open_account_then_balance() {
        let state = test_state();
        let account = AccountId::new();

        let (status, _) = send(
            &state,
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/accounts/{account}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &state,
            get(&format!("/api/v1/accounts/{account}/credits/balance")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_balance"], "0");
        assert_eq!(body["available_balance"], "0");
    }

    #[tokio::test]
    async fn test_balance_unknown_account_is_404() {
        let (status, body) = send(
            &test_state(),
            get(&format!("/api/v1/accounts/{}/credits/balance", AccountId::new())),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "account_not_found");
    }

    #[tokio::test]
    async fn test_check_credits() {
        let state = test_state();
        let account = funded_account(&state).await;

        let (status, body) = send(
            &state,
            get(&format!("/api/v1/accounts/{account}/credits/check?amount=10.00")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sufficient"], true);

        let (_, body) = send(
            &state,
            get(&format!("/api/v1/accounts/{account}/credits/check?amount=10.01")),
        )
        .await;
        assert_eq!(body["sufficient"], false);
    }

    #[tokio::test]
    async fn test_check_rejects_non_positive_amount() {
        let state = test_state();
        let account = funded_account(&state).await;

        let (status, body) = send(
            &state,
            get(&format!("/api/v1/accounts/{account}/credits/check?amount=0")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_amount");
    }

    #[tokio::test]
    async fn test_transfer_moves_credits() {
        let state = test_state();
        let from = funded_account(&state).await;
        let to = AccountId::new();
        state.credits.open_account(to).await.unwrap();

        let (status, body) = send(
            &state,
            post_json(
                &format!("/api/v1/accounts/{from}/credits/transfer"),
                &json!({ "to": to, "amount": "4.00", "description": "thanks" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["debit"]["amount"], "-4.00");
        assert_eq!(body["credit"]["amount"], "4.00");

        let (_, body) = send(&state, get(&format!("/api/v1/accounts/{to}/credits/balance"))).await;
        assert_eq!(body["current_balance"], "4.00");
    }

    #[tokio::test]
    async fn test_transfer_overdraft_is_422() {
        let state = test_state();
        let from = funded_account(&state).await;
        let to = AccountId::new();
        state.credits.open_account(to).await.unwrap();

        let (status, body) = send(
            &state,
            post_json(
                &format!("/api/v1/accounts/{from}/credits/transfer"),
                &json!({ "to": to, "amount": "50.00" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "insufficient_funds");
    }

    #[tokio::test]
    async fn test_transfer_to_self_is_rejected() {
        let state = test_state();
        let account = funded_account(&state).await;

        let (status, body) = send(
            &state,
            post_json(
                &format!("/api/v1/accounts/{account}/credits/transfer"),
                &json!({ "to": account, "amount": "1.00" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "same_account");
    }

    #[tokio::test]
    async fn test_transfer_key_reused_by_other_sender_is_409() {
        let state = test_state();
        let alice = funded_account(&state).await;
        let carol = funded_account(&state).await;
        let bob = AccountId::new();
        state.credits.open_account(bob).await.unwrap();
        let key = TransferId::new();

        let (status, _) = send(
            &state,
            post_json(
                &format!("/api/v1/accounts/{alice}/credits/transfer"),
                &json!({ "to": bob, "amount": "4.00", "idempotency_key": key }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &state,
            post_json(
                &format!("/api/v1/accounts/{carol}/credits/transfer"),
                &json!({ "to": bob, "amount": "4.00", "idempotency_key": key }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "duplicate_reference");
        assert!(body.get("debit").is_none());

        let (_, balance) = send(
            &state,
            get(&format!("/api/v1/accounts/{carol}/credits/balance")),
        )
        .await;
        assert_eq!(balance["current_balance"], "10.00");
    }

    #[tokio::test]
    async fn test_purchase_replay_returns_same_entry() {
        let state = test_state();
        let account = AccountId::new();
        state.credits.open_account(account).await.unwrap();
        let uri = format!("/api/v1/accounts/{account}/credits/purchase");
        let body = json!({ "amount": "25.00", "payment_reference": "pay_123" });

        let (status, first) = send(&state, post_json(&uri, &body)).await;
        assert_eq!(status, StatusCode::CREATED);
        let (_, second) = send(&state, post_json(&uri, &body)).await;
        assert_eq!(first["id"], second["id"]);

        let (_, balance) = send(
            &state,
            get(&format!("/api/v1/accounts/{account}/credits/balance")),
        )
        .await;
        assert_eq!(balance["current_balance"], "25.00");
    }

    #[tokio::test]
    async fn test_history_paging_and_filters() {
        let state = test_state();
        let account = funded_account(&state).await;
        for reference in ["p1", "p2", "p3"] {
            state
                .credits
                .purchase(account, Decimal::ONE, reference)
                .await
                .unwrap();
        }

        let (status, body) = send(
            &state,
            get(&format!(
                "/api/v1/accounts/{account}/credits/history?page=1&per_page=2&sort_by=id&sort_dir=asc"
            )),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meta"]["total"], 4);
        assert_eq!(body["meta"]["total_pages"], 2);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"][0]["kind"], "bonus_registration");

        let (_, body) = send(
            &state,
            get(&format!(
                "/api/v1/accounts/{account}/credits/history?kind=purchase"
            )),
        )
        .await;
        assert_eq!(body["meta"]["total"], 3);
    }

    #[tokio::test]
    async fn test_history_rejects_unknown_sort_field() {
        let state = test_state();
        let account = funded_account(&state).await;

        let (status, body) = send(
            &state,
            get(&format!(
                "/api/v1/accounts/{account}/credits/history?sort_by=colour"
            )),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_query");
    }

    #[tokio::test]
    async fn test_statistics() {
        let state = test_state();
        let account = funded_account(&state).await;

        let (status, body) = send(
            &state,
            get(&format!("/api/v1/accounts/{account}/credits/stats")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_earned"], "10.00");
        assert_eq!(body["total_spent"], "0");
    }

    #[tokio::test]
    async fn test_reservation_lifecycle() {
        let state = test_state();
        let account = funded_account(&state).await;
        let uri = format!("/api/v1/accounts/{account}/credits/reservations");

        let (status, _) = send(
            &state,
            post_json(&uri, &json!({ "amount": "6.00", "purpose": "session-42" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, balance) = send(
            &state,
            get(&format!("/api/v1/accounts/{account}/credits/balance")),
        )
        .await;
        assert_eq!(balance["available_balance"], "4.00");

        let (status, _) = send(
            &state,
            post_json(&uri, &json!({ "amount": "1.00", "purpose": "session-42" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &state,
            Request::builder()
                .method("DELETE")
                .uri(format!("{uri}/session-42"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, listed) = send(&state, get(&uri)).await;
        assert!(listed["data"].as_array().unwrap().is_empty());
    }
}
