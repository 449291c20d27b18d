//! Axum REST API handlers.
//!
//! Handlers stay thin: extract the caller and a validated body, delegate to
//! the owning service, serialise the result. Every failure is an
//! [`AppError`], which renders itself as a JSON error response.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use validator::Validate;

use crate::approval::ApprovalGate;
use crate::auth::{Principal, Role};
use crate::checkout::{Checkout, OrderView, WebhookAck};
use crate::commission::{CommissionLedger, CommissionQuote, CommissionSummary};
use crate::db;
use crate::errors::{AppError, Result};
use crate::listings::ListingPublisher;
use crate::models::{Commission, Harvest, Listing};
use crate::money::Money;
use crate::provider::{PaymentSession, SIGNATURE_HEADER};
use crate::validation::{
    ApproveHarvestRequest, CalculateCommissionRequest, CreateCommissionRequest,
    CreateListingRequest, CreateOrderRequest, DisputeCommissionRequest, InitializePaymentRequest,
    ListCommissionsQuery, OnboardFarmerRequest, PageQuery, PayCommissionRequest,
    RejectHarvestRequest, ResolveDisputeRequest, SubmitHarvestRequest, UpdateCommissionRequest,
    ValidatedJson, ValidatedQuery,
};
use crate::verifier::{Reconciler, ReconcilerStatus, VerificationOutcome};

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub approvals: ApprovalGate,
    pub listings: ListingPublisher,
    pub checkout: Checkout,
    pub commissions: CommissionLedger,
    pub reconciler: Arc<Reconciler>,
}

type Shared = State<Arc<ApiState>>;

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/harvests", post(submit_harvest))
        .route("/harvests/:id", get(get_harvest))
        .route("/partners/farmers", post(onboard_farmer))
        .route("/harvest-approval/pending", get(pending_harvests))
        .route("/harvest-approval/:id/approve", patch(approve_harvest))
        .route("/harvest-approval/:id/reject", patch(reject_harvest))
        .route("/harvest-approval/:id/create-listing", post(create_listing))
        .route("/listings", get(active_listings))
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/payments/initialize", post(initialize_payment))
        .route("/payments/verify/:reference", get(verify_payment))
        .route("/payments/webhook", post(payment_webhook))
        .route("/commissions", post(create_commission).get(list_commissions))
        .route("/commissions/calculate", post(calculate_commission))
        .route("/commissions/summary/:partner_id", get(commission_summary))
        .route("/commissions/:id", get(get_commission).patch(update_commission))
        .route("/commissions/:id/approve", patch(approve_commission))
        .route("/commissions/:id/pay", patch(pay_commission))
        .route("/commissions/:id/dispute", patch(dispute_commission))
        .route("/commissions/:id/resolve", patch(resolve_commission))
        .route("/commissions/:id/cancel", patch(cancel_commission))
        .route("/admin/reconciler", get(reconciler_status))
        .route("/admin/reconciler/start", post(start_reconciler))
        .route("/admin/reconciler/stop", post(stop_reconciler))
        .route("/admin/reconciler/run", post(run_reconciler))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            count: items.len(),
            items,
        }
    }
}

#[derive(Serialize)]
pub struct ReconcilerControlResponse {
    /// Whether the call changed the scheduler state.
    pub changed: bool,
    #[serde(flatten)]
    pub status: ReconcilerStatus,
}

// ─────────────────────────────────────────────────────────
// Handlers — harvests and listings
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /harvests`
pub async fn submit_harvest(
    State(state): Shared,
    actor: Principal,
    ValidatedJson(req): ValidatedJson<SubmitHarvestRequest>,
) -> Result<(StatusCode, Json<Harvest>)> {
    let harvest = state.approvals.submit_harvest(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(harvest)))
}

/// `GET /harvests/:id`
pub async fn get_harvest(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
) -> Result<Json<Harvest>> {
    Ok(Json(state.approvals.get_harvest(&actor, &id).await?))
}

/// `POST /partners/farmers`
pub async fn onboard_farmer(
    State(state): Shared,
    actor: Principal,
    ValidatedJson(req): ValidatedJson<OnboardFarmerRequest>,
) -> Result<impl IntoResponse> {
    let created = state.approvals.onboard_farmer(&actor, &req.farmer_id).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(json!({ "partner_id": actor.id, "farmer_id": req.farmer_id, "created": created })),
    ))
}

/// `GET /harvest-approval/pending`
pub async fn pending_harvests(
    State(state): Shared,
    actor: Principal,
    ValidatedQuery(page): ValidatedQuery<PageQuery>,
) -> Result<Json<ListResponse<Harvest>>> {
    let rows = state.approvals.pending_for_approver(&actor, page).await?;
    Ok(Json(rows.into()))
}

/// `PATCH /harvest-approval/:id/approve`
pub async fn approve_harvest(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<ApproveHarvestRequest>,
) -> Result<Json<Harvest>> {
    let harvest = state
        .approvals
        .approve(&actor, &id, req.quality, req.notes.as_deref())
        .await?;
    Ok(Json(harvest))
}

/// `PATCH /harvest-approval/:id/reject`
pub async fn reject_harvest(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<RejectHarvestRequest>,
) -> Result<Json<Harvest>> {
    let harvest = state
        .approvals
        .reject(&actor, &id, &req.rejection_reason)
        .await?;
    Ok(Json(harvest))
}

/// `POST /harvest-approval/:id/create-listing`
pub async fn create_listing(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<CreateListingRequest>,
) -> Result<(StatusCode, Json<Listing>)> {
    let listing = state
        .listings
        .create_listing_from_harvest(&actor, &id, req.price, req.description.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(listing)))
}

/// `GET /listings`
pub async fn active_listings(
    State(state): Shared,
    ValidatedQuery(page): ValidatedQuery<PageQuery>,
) -> Result<Json<ListResponse<Listing>>> {
    Ok(Json(state.listings.list_active_listings(page).await?.into()))
}

// ─────────────────────────────────────────────────────────
// Handlers — orders and payments
// ─────────────────────────────────────────────────────────

/// `POST /orders`
pub async fn create_order(
    State(state): Shared,
    actor: Principal,
    ValidatedJson(req): ValidatedJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderView>)> {
    let view = state.checkout.create_order(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /orders/:id`
pub async fn get_order(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
) -> Result<Json<OrderView>> {
    Ok(Json(state.checkout.get_order(&actor, &id).await?))
}

/// `POST /payments/initialize`
pub async fn initialize_payment(
    State(state): Shared,
    actor: Principal,
    ValidatedJson(req): ValidatedJson<InitializePaymentRequest>,
) -> Result<Json<PaymentSession>> {
    let session = state
        .checkout
        .initialize_payment(&actor, &req.order_id, &req.email)
        .await?;
    Ok(Json(session))
}

/// `GET /payments/verify/:reference`
///
/// Admins may verify any reference; buyers only their own orders' payments.
pub async fn verify_payment(
    State(state): Shared,
    actor: Principal,
    Path(reference): Path<String>,
) -> Result<Json<VerificationOutcome>> {
    actor.require(&[Role::Buyer, Role::Admin], "verify payments")?;
    if !actor.is_admin() {
        let owned = match db::transactions::get_by_reference(&state.pool, &reference).await? {
            Some(tx) => db::orders::get_order(&state.pool, &tx.order_id)
                .await?
                .is_some_and(|o| o.buyer_id == actor.id),
            None => false,
        };
        if !owned {
            return Err(AppError::NotFound(format!("transaction {reference} not found")));
        }
    }
    let outcome = state
        .reconciler
        .verifier()
        .verify_reference(&reference)
        .await?;
    Ok(Json(outcome))
}

/// `POST /payments/webhook`
pub async fn payment_webhook(
    State(state): Shared,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    Ok(Json(state.checkout.handle_webhook(&body, signature).await?))
}

// ─────────────────────────────────────────────────────────
// Handlers — commissions
// ─────────────────────────────────────────────────────────

/// `POST /commissions`
pub async fn create_commission(
    State(state): Shared,
    actor: Principal,
    ValidatedJson(req): ValidatedJson<CreateCommissionRequest>,
) -> Result<(StatusCode, Json<Commission>)> {
    let c = state.commissions.create(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(c)))
}

/// `GET /commissions`
pub async fn list_commissions(
    State(state): Shared,
    actor: Principal,
    ValidatedQuery(query): ValidatedQuery<ListCommissionsQuery>,
) -> Result<Json<ListResponse<Commission>>> {
    Ok(Json(state.commissions.list(&actor, query).await?.into()))
}

/// `POST /commissions/calculate`
pub async fn calculate_commission(
    State(state): Shared,
    actor: Principal,
    ValidatedJson(req): ValidatedJson<CalculateCommissionRequest>,
) -> Result<Json<CommissionQuote>> {
    let quote = state
        .commissions
        .quote(
            &actor,
            &req.partner_id,
            Money::from_major(req.transaction_amount),
            req.transaction_type,
        )
        .await?;
    Ok(Json(quote))
}

/// `GET /commissions/summary/:partner_id`
pub async fn commission_summary(
    State(state): Shared,
    actor: Principal,
    Path(partner_id): Path<String>,
) -> Result<Json<CommissionSummary>> {
    Ok(Json(state.commissions.summary(&actor, &partner_id).await?))
}

/// `GET /commissions/:id`
pub async fn get_commission(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
) -> Result<Json<Commission>> {
    Ok(Json(state.commissions.get(&actor, &id).await?))
}

/// `PATCH /commissions/:id`
pub async fn update_commission(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<UpdateCommissionRequest>,
) -> Result<Json<Commission>> {
    Ok(Json(state.commissions.update(&actor, &id, req).await?))
}

/// `PATCH /commissions/:id/approve`
pub async fn approve_commission(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
) -> Result<Json<Commission>> {
    Ok(Json(state.commissions.approve(&actor, &id).await?))
}

/// `PATCH /commissions/:id/pay`
///
/// The body is optional; an empty body means no external payout reference.
pub async fn pay_commission(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Commission>> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        PayCommissionRequest::default()
    } else {
        let req: PayCommissionRequest = serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("malformed body: {e}")))?;
        req.validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        req
    };
    let c = state
        .commissions
        .process_payment(&actor, &id, req.payment_transaction_id.as_deref())
        .await?;
    Ok(Json(c))
}

/// `PATCH /commissions/:id/dispute`
pub async fn dispute_commission(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<DisputeCommissionRequest>,
) -> Result<Json<Commission>> {
    Ok(Json(state.commissions.dispute(&actor, &id, &req.reason).await?))
}

/// `PATCH /commissions/:id/resolve`
pub async fn resolve_commission(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
    ValidatedJson(req): ValidatedJson<ResolveDisputeRequest>,
) -> Result<Json<Commission>> {
    Ok(Json(
        state
            .commissions
            .resolve(&actor, &id, req.resolution)
            .await?,
    ))
}

/// `PATCH /commissions/:id/cancel`
pub async fn cancel_commission(
    State(state): Shared,
    actor: Principal,
    Path(id): Path<String>,
) -> Result<Json<Commission>> {
    Ok(Json(state.commissions.cancel(&actor, &id).await?))
}

// ─────────────────────────────────────────────────────────
// Handlers — reconciler control (admin)
// ─────────────────────────────────────────────────────────

/// `GET /admin/reconciler`
pub async fn reconciler_status(
    State(state): Shared,
    actor: Principal,
) -> Result<Json<ReconcilerStatus>> {
    actor.require(&[Role::Admin], "inspect the reconciler")?;
    Ok(Json(state.reconciler.status().await))
}

/// `POST /admin/reconciler/start`
pub async fn start_reconciler(
    State(state): Shared,
    actor: Principal,
) -> Result<Json<ReconcilerControlResponse>> {
    actor.require(&[Role::Admin], "start the reconciler")?;
    let changed = state.reconciler.start().await?;
    Ok(Json(ReconcilerControlResponse {
        changed,
        status: state.reconciler.status().await,
    }))
}

/// `POST /admin/reconciler/stop`
pub async fn stop_reconciler(
    State(state): Shared,
    actor: Principal,
) -> Result<Json<ReconcilerControlResponse>> {
    actor.require(&[Role::Admin], "stop the reconciler")?;
    let changed = state.reconciler.stop().await;
    Ok(Json(ReconcilerControlResponse {
        changed,
        status: state.reconciler.status().await,
    }))
}

/// `POST /admin/reconciler/run`
///
/// Runs one pass now, whether or not the schedule is active.
pub async fn run_reconciler(
    State(state): Shared,
    actor: Principal,
) -> Result<impl IntoResponse> {
    actor.require(&[Role::Admin], "run the reconciler")?;
    let report = state.reconciler.verifier().run_reconciliation_pass().await;
    Ok(Json(report))
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{USER_ID_HEADER, USER_ROLE_HEADER};
    use crate::config::ReconcilerConfig;
    use crate::provider;
    use crate::test_support::{paid, Fixture, FARMER};
    use reqwest::Client;
    use serde_json::Value;

    const SECRET: &str = "sk_test_api";

    struct TestServer {
        base: String,
        client: Client,
        fx: Fixture,
    }

    impl TestServer {
        async fn start() -> Self {
            let fx = Fixture::new().await;
            let verifier = Arc::new(fx.verifier(ReconcilerConfig::default()));
            let state = Arc::new(ApiState {
                pool: fx.pool.clone(),
                approvals: ApprovalGate::new(fx.pool.clone()),
                listings: ListingPublisher::new(fx.pool.clone()),
                checkout: Checkout::new(
                    fx.pool.clone(),
                    fx.provider.clone(),
                    verifier.clone(),
                    SECRET.to_string(),
                    None,
                ),
                commissions: fx.ledger.clone(),
                reconciler: Arc::new(Reconciler::new(verifier)),
            });

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, router(state)).await.unwrap();
            });
            Self {
                base: format!("http://{addr}"),
                client: Client::new(),
                fx,
            }
        }

        fn as_user(&self, method: reqwest::Method, path: &str, id: &str, role: &str) -> reqwest::RequestBuilder {
            self.client
                .request(method, format!("{}{path}", self.base))
                .header(USER_ID_HEADER, id)
                .header(USER_ROLE_HEADER, role)
        }
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let srv = TestServer::start().await;
        let body: Value = srv
            .client
            .get(format!("{}/health", srv.base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn harvest_to_paid_order_over_http() {
        use reqwest::Method;
        let srv = TestServer::start().await;

        let res = srv
            .as_user(Method::POST, "/harvests", FARMER, "farmer")
            .json(&json!({
                "crop_type": "maize", "quantity": 100.0, "unit": "kg",
                "location": "Kaduna", "quality": "good"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED.as_u16());
        let harvest: Value = res.json().await.unwrap();
        let harvest_id = harvest["id"].as_str().unwrap().to_string();

        let res = srv
            .as_user(Method::POST, "/partners/farmers", "partner-1", "partner")
            .json(&json!({ "farmer_id": FARMER }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED.as_u16());

        // Listing before approval is a conflict.
        let res = srv
            .as_user(Method::POST, &format!("/harvest-approval/{harvest_id}/create-listing"), "partner-1", "partner")
            .json(&json!({ "price": 500.0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT.as_u16());

        let queue: Value = srv
            .as_user(Method::GET, "/harvest-approval/pending?limit=500", "partner-1", "partner")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(queue["count"], 1);

        let res = srv
            .as_user(Method::PATCH, &format!("/harvest-approval/{harvest_id}/approve"), "partner-1", "partner")
            .json(&json!({ "quality": "excellent" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK.as_u16());

        let res = srv
            .as_user(Method::POST, &format!("/harvest-approval/{harvest_id}/create-listing"), "partner-1", "partner")
            .json(&json!({ "price": -5 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST.as_u16());

        let res = srv
            .as_user(Method::POST, &format!("/harvest-approval/{harvest_id}/create-listing"), "partner-1", "partner")
            .json(&json!({ "price": 500.0 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED.as_u16());
        let listing: Value = res.json().await.unwrap();
        assert_eq!(listing["price"], 500.0);
        assert_eq!(listing["status"], "active");

        let res = srv
            .as_user(Method::POST, "/orders", "buyer-1", "buyer")
            .json(&json!({ "items": [{ "listing_id": listing["id"], "quantity": 10.0 }] }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED.as_u16());
        let order: Value = res.json().await.unwrap();
        assert_eq!(order["total_amount"], 5000.0);

        let session: Value = srv
            .as_user(Method::POST, "/payments/initialize", "buyer-1", "buyer")
            .json(&json!({ "order_id": order["id"], "email": "ada@example.com" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let reference = session["reference"].as_str().unwrap().to_string();
        srv.fx.provider.script(paid(&reference, 500_000));

        let outcome: Value = srv
            .as_user(Method::GET, &format!("/payments/verify/{reference}"), "buyer-1", "buyer")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(outcome["settlement"], "completed");
        assert_eq!(outcome["transaction_status"], "completed");
        assert_eq!(outcome["commissions_created"], 1);

        let order: Value = srv
            .as_user(Method::GET, &format!("/orders/{}", order["id"].as_str().unwrap()), "buyer-1", "buyer")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(order["status"], "paid");
        assert_eq!(order["payment_reference"], reference.as_str());

        let commissions: Value = srv
            .as_user(Method::GET, "/commissions", "partner-1", "partner")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(commissions["count"], 1);
        assert_eq!(commissions["items"][0]["amount"], 250.0);
    }

    #[tokio::test]
    async fn identity_and_role_errors() {
        use reqwest::Method;
        let srv = TestServer::start().await;

        let res = srv
            .client
            .get(format!("{}/harvest-approval/pending", srv.base))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED.as_u16());

        let res = srv
            .as_user(Method::GET, "/harvest-approval/pending", FARMER, "farmer")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN.as_u16());
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"], "forbidden");

        let res = srv
            .as_user(Method::POST, "/admin/reconciler/stop", "partner-1", "partner")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN.as_u16());

        let res = srv
            .as_user(Method::PATCH, "/harvest-approval/nope/reject", "partner-1", "partner")
            .json(&json!({ "rejectionReason": "" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST.as_u16());

        let res = srv
            .as_user(Method::GET, "/commissions?startDate=2024-06-01T00:00:00Z&endDate=2024-05-01T00:00:00Z", "admin-1", "admin")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST.as_u16());
    }

    #[tokio::test]
    async fn admin_controls_the_reconciler() {
        use reqwest::Method;
        let srv = TestServer::start().await;

        let started: Value = srv
            .as_user(Method::POST, "/admin/reconciler/start", "admin-1", "admin")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(started["changed"], true);
        assert_eq!(started["scheduled"], true);

        let stopped: Value = srv
            .as_user(Method::POST, "/admin/reconciler/stop", "admin-1", "admin")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(stopped["changed"], true);
        assert_eq!(stopped["scheduled"], false);

        let report: Value = srv
            .as_user(Method::POST, "/admin/reconciler/run", "admin-1", "admin")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["skipped"], false);
        assert_eq!(report["examined"], 0);
    }

    #[tokio::test]
    async fn webhook_requires_valid_signature() {
        let srv = TestServer::start().await;
        let body = r#"{"event":"charge.success","data":{"reference":"GRC-000000000000"}}"#;

        let res = srv
            .client
            .post(format!("{}/payments/webhook", srv.base))
            .header(SIGNATURE_HEADER, "deadbeef")
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED.as_u16());

        let res = srv
            .client
            .post(format!("{}/payments/webhook", srv.base))
            .header(SIGNATURE_HEADER, provider::sign(SECRET, body.as_bytes()))
            .body(body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK.as_u16());
        let ack: Value = res.json().await.unwrap();
        assert_eq!(ack["reference"], "GRC-000000000000");
        assert!(ack["settlement"].is_null());
    }
}
