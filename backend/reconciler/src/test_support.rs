//! Shared fixtures for the in-crate tests: an in-memory database, a scripted
//! payment provider and helpers that seed a harvest → listing → order →
//! transaction chain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::types::Json;
use sqlx::SqlitePool;

use crate::commission::{CommissionLedger, TierTable};
use crate::config::ReconcilerConfig;
use crate::db;
use crate::db::orders::NewOrderItem;
use crate::errors::{AppError, Result};
use crate::models::{
    new_id, new_reference, Harvest, HarvestStatus, Listing, ListingStatus, Order, OrderStatus,
    PaymentStatus, QualityGrade, Transaction, TransactionStatus,
};
use crate::money::Money;
use crate::provider::{
    normalize, PaymentInit, PaymentProvider, PaymentSession, Verification, VerifyResponse,
};
use crate::verifier::PaymentVerifier;

pub const FARMER: &str = "farmer-1";
pub const PARTNER: &str = "partner-1";
pub const BUYER: &str = "buyer-1";

// ─── Scripted provider ───────────────────────────────────

/// Answers `verify` from a script; unknown references come back unavailable.
#[derive(Default)]
pub struct FakeProvider {
    answers: Mutex<HashMap<String, Verification>>,
    seen: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    refuse_initialize: AtomicBool,
}

impl FakeProvider {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Script the answer for `v.reference`.
    pub fn script(&self, v: Verification) {
        let reference = v.reference.clone().unwrap_or_default();
        if let Ok(mut answers) = self.answers.lock() {
            answers.insert(reference, v);
        }
    }

    pub fn refuse_initialize(&self) {
        self.refuse_initialize.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn verify(&self, reference: &str) -> Verification {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(reference.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.answers
            .lock()
            .ok()
            .and_then(|a| a.get(reference).cloned())
            .unwrap_or_else(|| Verification::unavailable("connection refused"))
    }

    async fn initialize(&self, init: &PaymentInit) -> Result<PaymentSession> {
        if self.refuse_initialize.load(Ordering::SeqCst) {
            return Err(AppError::Provider("initialize refused".into()));
        }
        Ok(PaymentSession {
            authorization_url: format!("https://checkout.test/{}", init.reference),
            access_code: Some("code".into()),
            reference: init.reference.clone(),
        })
    }
}

/// Provider answer for a settled charge of `amount` kobo.
pub fn paid(reference: &str, amount: i64) -> Verification {
    normalize(VerifyResponse {
        status: json!(true),
        message: Some("Verification successful".into()),
        data: Some(json!({ "status": "success", "amount": amount, "reference": reference })),
    })
}

/// Provider answer carrying an arbitrary charge status.
pub fn provider_says(reference: &str, status: &str) -> Verification {
    normalize(VerifyResponse {
        status: json!(true),
        message: Some("Verification successful".into()),
        data: Some(json!({ "status": status, "reference": reference })),
    })
}

// ─── Fixture ─────────────────────────────────────────────

pub struct Fixture {
    pub pool: SqlitePool,
    pub provider: Arc<FakeProvider>,
    pub ledger: CommissionLedger,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::build(FakeProvider::default()).await
    }

    pub async fn with_delay(delay: Duration) -> Self {
        Self::build(FakeProvider::with_delay(delay)).await
    }

    async fn build(provider: FakeProvider) -> Self {
        let pool = db::memory_pool().await;
        let ledger = CommissionLedger::new(pool.clone(), Arc::new(TierTable::default()), 30);
        Self {
            pool,
            provider: Arc::new(provider),
            ledger,
        }
    }

    pub fn verifier(&self, config: ReconcilerConfig) -> PaymentVerifier {
        PaymentVerifier::new(
            self.pool.clone(),
            self.provider.clone(),
            self.ledger.clone(),
            config,
        )
    }
}

// ─── Seeding ─────────────────────────────────────────────

pub async fn seed_harvest(pool: &SqlitePool, farmer_id: &str, status: HarvestStatus) -> Harvest {
    let now = Utc::now();
    let h = Harvest {
        id: new_id(),
        batch_id: new_reference("GRO"),
        farmer_id: farmer_id.to_string(),
        crop_type: "maize".into(),
        quantity: 100.0,
        unit: "kg".into(),
        location: "Kaduna".into(),
        quality: QualityGrade::Good,
        status,
        verified_by: None,
        verified_at: None,
        approval_notes: None,
        rejection_reason: None,
        created_at: now,
        updated_at: now,
    };
    db::harvests::insert_harvest(pool, &h)
        .await
        .expect("insert harvest");
    h
}

pub struct Chain {
    pub harvest: Harvest,
    pub listing: Listing,
    pub order: Order,
    pub transaction: Transaction,
}

/// Partner-approved harvest of 100 kg, listed at `amount / 10` per kg, and a
/// pending order for 10 kg paid by a pending transaction `reference`.
pub async fn seed_chain(
    pool: &SqlitePool,
    reference: &str,
    amount: f64,
    created_at: DateTime<Utc>,
) -> Chain {
    let now = Utc::now();
    db::harvests::link_partner_farmer(pool, PARTNER, FARMER, now)
        .await
        .expect("link partner");
    let pending = seed_harvest(pool, FARMER, HarvestStatus::Pending).await;
    db::harvests::approve_pending(
        pool,
        &pending.id,
        db::harvests::ApproverScope {
            approver_id: PARTNER,
            unrestricted: false,
        },
        QualityGrade::Good,
        None,
        now,
    )
    .await
    .expect("approve harvest");
    let harvest = db::harvests::get_harvest(pool, &pending.id)
        .await
        .expect("read harvest")
        .expect("harvest exists");

    let listing = Listing {
        id: new_id(),
        harvest_id: harvest.id.clone(),
        farmer_id: harvest.farmer_id.clone(),
        crop_type: harvest.crop_type.clone(),
        unit: harvest.unit.clone(),
        price: Money::from_major(amount / 10.0),
        description: None,
        quantity: harvest.quantity,
        status: ListingStatus::Active,
        created_at: now,
        updated_at: now,
    };
    db::listings::insert_listing(pool, &listing)
        .await
        .expect("insert listing");

    let order = Order {
        id: new_id(),
        buyer_id: BUYER.into(),
        total_amount: listing.price.times(10.0),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_reference: None,
        created_at: now,
        updated_at: now,
    };
    let item = NewOrderItem {
        listing_id: listing.id.clone(),
        quantity: 10.0,
        unit_price: listing.price,
        amount: order.total_amount,
    };
    db::orders::insert_order(pool, &order, &[item])
        .await
        .expect("insert order");

    let transaction = Transaction {
        id: new_id(),
        reference: reference.to_string(),
        order_id: order.id.clone(),
        amount: order.total_amount,
        currency: "NGN".into(),
        status: TransactionStatus::Pending,
        provider: "paystack".into(),
        processed_at: None,
        metadata: Json(json!({})),
        created_at,
        updated_at: created_at,
    };
    db::transactions::insert_transaction(pool, &transaction)
        .await
        .expect("insert transaction");

    Chain {
        harvest,
        listing,
        order,
        transaction,
    }
}

/// Another buyer order of `quantity` on `listing`, with its pending
/// transaction `reference`.
pub async fn seed_order(
    pool: &SqlitePool,
    listing: &Listing,
    quantity: f64,
    reference: &str,
) -> (Order, Transaction) {
    let now = Utc::now();
    let order = Order {
        id: new_id(),
        buyer_id: BUYER.into(),
        total_amount: listing.price.times(quantity),
        status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        payment_reference: None,
        created_at: now,
        updated_at: now,
    };
    let item = NewOrderItem {
        listing_id: listing.id.clone(),
        quantity,
        unit_price: listing.price,
        amount: order.total_amount,
    };
    db::orders::insert_order(pool, &order, &[item])
        .await
        .expect("insert order");

    let transaction = Transaction {
        id: new_id(),
        reference: reference.to_string(),
        order_id: order.id.clone(),
        amount: order.total_amount,
        currency: "NGN".into(),
        status: TransactionStatus::Pending,
        provider: "paystack".into(),
        processed_at: None,
        metadata: Json(json!({})),
        created_at: now,
        updated_at: now,
    };
    db::transactions::insert_transaction(pool, &transaction)
        .await
        .expect("insert transaction");
    (order, transaction)
}

/// Pending transaction `reference` for an order worth `amount`.
pub async fn seed_pending_transaction(
    pool: &SqlitePool,
    reference: &str,
    amount: f64,
) -> Transaction {
    seed_chain(pool, reference, amount, Utc::now()).await.transaction
}
