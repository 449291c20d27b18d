//! Checkout — orders against active listings, payment initialisation with
//! the provider and the provider's webhook.
//!
//! Settlement never happens here directly: the webhook only nudges the
//! [`PaymentVerifier`], which asks the provider itself before touching the
//! ledger.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use sqlx::types::Json;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::auth::{Principal, Role};
use crate::db;
use crate::db::orders::NewOrderItem;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::models::{
    new_id, new_reference, ListingStatus, Order, OrderItem, OrderStatus, PaymentStatus,
    Transaction, TransactionStatus,
};
use crate::money::Money;
use crate::provider::{self, PaymentInit, PaymentProvider, PaymentSession, WebhookEvent};
use crate::validation::CreateOrderRequest;
use crate::verifier::{PaymentVerifier, Settlement};

const CURRENCY: &str = "NGN";

#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub event: String,
    pub reference: Option<String>,
    pub settlement: Option<Settlement>,
}

#[derive(Clone)]
pub struct Checkout {
    pool: SqlitePool,
    provider: Arc<dyn PaymentProvider>,
    verifier: Arc<PaymentVerifier>,
    webhook_secret: String,
    callback_url: Option<String>,
}

impl Checkout {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn PaymentProvider>,
        verifier: Arc<PaymentVerifier>,
        webhook_secret: String,
        callback_url: Option<String>,
    ) -> Self {
        Self {
            pool,
            provider,
            verifier,
            webhook_secret,
            callback_url,
        }
    }

    pub async fn create_order(&self, actor: &Principal, req: CreateOrderRequest) -> Result<OrderView> {
        actor.require(&[Role::Buyer], "place orders")?;

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(req.items.len());
        for line in &req.items {
            if !seen.insert(line.listing_id.as_str()) {
                return Err(AppError::Validation(format!(
                    "listing {} appears more than once",
                    line.listing_id
                )));
            }
            let listing = db::listings::get_listing(&self.pool, &line.listing_id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("listing {} not found", line.listing_id))
                })?;
            if listing.status != ListingStatus::Active {
                return Err(AppError::Conflict(format!(
                    "listing {} is not available",
                    listing.id
                )));
            }
            if line.quantity > listing.quantity {
                return Err(AppError::Conflict(format!(
                    "listing {} has only {} {} left",
                    listing.id, listing.quantity, listing.unit
                )));
            }
            items.push(NewOrderItem {
                listing_id: listing.id,
                quantity: line.quantity,
                unit_price: listing.price,
                amount: listing.price.times(line.quantity),
            });
        }

        let total: Money = items.iter().map(|i| i.amount).sum();
        if !total.is_positive() {
            return Err(AppError::Validation("order total must be positive".into()));
        }

        let now = Utc::now();
        let order = Order {
            id: new_id(),
            buyer_id: actor.id.clone(),
            total_amount: total,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        };
        db::orders::insert_order(&self.pool, &order, &items).await?;
        info!("Order {} placed by {} for {total}", order.id, actor.id);

        let items = db::orders::order_items(&self.pool, &order.id).await?;
        Ok(OrderView { order, items })
    }

    pub async fn get_order(&self, actor: &Principal, id: &str) -> Result<OrderView> {
        actor.require(&[Role::Buyer, Role::Admin], "view orders")?;
        let order = self.owned_order(actor, id).await?;
        let items = db::orders::order_items(&self.pool, &order.id).await?;
        Ok(OrderView { order, items })
    }

    /// Open a pending ledger transaction for the order and hand the buyer to
    /// the provider's checkout page.
    pub async fn initialize_payment(
        &self,
        actor: &Principal,
        order_id: &str,
        email: &str,
    ) -> Result<PaymentSession> {
        actor.require(&[Role::Buyer], "pay for orders")?;
        let order = self.owned_order(actor, order_id).await?;
        if order.payment_status == PaymentStatus::Paid {
            return Err(AppError::Conflict(format!("order {order_id} is already paid")));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(AppError::Conflict(format!("order {order_id} is cancelled")));
        }

        let now = Utc::now();
        let tx = Transaction {
            id: new_id(),
            reference: new_reference("GRC"),
            order_id: order.id.clone(),
            amount: order.total_amount,
            currency: CURRENCY.to_string(),
            status: TransactionStatus::Pending,
            provider: self.provider.name().to_string(),
            processed_at: None,
            metadata: Json(json!({ "email": email })),
            created_at: now,
            updated_at: now,
        };
        match db::transactions::insert_transaction(&self.pool, &tx).await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::Conflict("payment reference collision, retry".into()))
            }
            Err(e) => return Err(e.into()),
        }

        let init = PaymentInit {
            reference: tx.reference.clone(),
            email: email.to_string(),
            amount: tx.amount,
            currency: tx.currency.clone(),
            order_id: order.id.clone(),
            callback_url: self.callback_url.clone(),
        };
        match self.provider.initialize(&init).await {
            Ok(session) => {
                info!(
                    "Payment {} initialised for order {} ({})",
                    tx.reference, order.id, tx.amount
                );
                Ok(session)
            }
            Err(e) => {
                warn!("Payment initialisation for {} failed: {e}", tx.reference);
                db::transactions::finish_pending(
                    &self.pool,
                    &tx.reference,
                    TransactionStatus::Failed,
                    &json!({ "initialize_error": e.to_string() }),
                    Utc::now(),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// Authenticate a provider callback and re-verify the charge it names.
    /// Events we do not act on are acknowledged and ignored.
    pub async fn handle_webhook(&self, body: &[u8], signature: Option<&str>) -> Result<WebhookAck> {
        let signature = signature
            .ok_or_else(|| AppError::Unauthenticated("missing webhook signature".into()))?;
        if !provider::verify_signature(&self.webhook_secret, body, signature) {
            return Err(AppError::Unauthenticated("invalid webhook signature".into()));
        }
        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("malformed webhook body: {e}")))?;

        let Some(reference) = event.successful_charge_reference().map(str::to_string) else {
            info!("Ignoring webhook event {}", event.event);
            return Ok(WebhookAck {
                event: event.event,
                reference: None,
                settlement: None,
            });
        };

        let settlement = match self.verifier.verify_reference(&reference).await {
            Ok(outcome) => Some(outcome.settlement),
            Err(AppError::NotFound(_)) => {
                warn!("Webhook for unknown reference {reference}");
                None
            }
            Err(e) => return Err(e),
        };
        Ok(WebhookAck {
            event: event.event,
            reference: Some(reference),
            settlement,
        })
    }

    async fn owned_order(&self, actor: &Principal, id: &str) -> Result<Order> {
        db::orders::get_order(&self.pool, id)
            .await?
            .filter(|o| actor.is_admin() || o.buyer_id == actor.id)
            .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::models::HarvestStatus;
    use crate::test_support::{paid, seed_chain, seed_harvest, Fixture, BUYER, FARMER};
    use crate::validation::OrderItemRequest;

    const SECRET: &str = "sk_test_secret";

    fn checkout(fx: &Fixture) -> Checkout {
        let verifier = Arc::new(fx.verifier(ReconcilerConfig::default()));
        Checkout::new(
            fx.pool.clone(),
            fx.provider.clone(),
            verifier,
            SECRET.to_string(),
            None,
        )
    }

    fn buyer() -> Principal {
        Principal::new(BUYER, Role::Buyer)
    }

    async fn listing(fx: &Fixture, price: f64) -> String {
        let h = seed_harvest(&fx.pool, FARMER, HarvestStatus::Approved).await;
        crate::listings::ListingPublisher::new(fx.pool.clone())
            .create_listing_from_harvest(&Principal::new("admin", Role::Admin), &h.id, price, None)
            .await
            .unwrap()
            .id
    }

    fn order_of(listing_id: &str, quantity: f64) -> CreateOrderRequest {
        CreateOrderRequest {
            items: vec![OrderItemRequest {
                listing_id: listing_id.to_string(),
                quantity,
            }],
        }
    }

    #[tokio::test]
    async fn order_totals_follow_listing_prices() {
        let fx = Fixture::new().await;
        let c = checkout(&fx);
        let a = listing(&fx, 250.0).await;
        let b = listing(&fx, 99.99).await;

        let view = c
            .create_order(
                &buyer(),
                CreateOrderRequest {
                    items: vec![
                        OrderItemRequest {
                            listing_id: a,
                            quantity: 4.0,
                        },
                        OrderItemRequest {
                            listing_id: b,
                            quantity: 2.0,
                        },
                    ],
                },
            )
            .await
            .unwrap();
        assert_eq!(view.order.total_amount, Money::from_major(1_199.98));
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn order_cannot_exceed_stock_or_repeat_listing() {
        let fx = Fixture::new().await;
        let c = checkout(&fx);
        let id = listing(&fx, 10.0).await;

        assert!(matches!(
            c.create_order(&buyer(), order_of(&id, 101.0)).await,
            Err(AppError::Conflict(_))
        ));
        let twice = CreateOrderRequest {
            items: vec![
                OrderItemRequest {
                    listing_id: id.clone(),
                    quantity: 1.0,
                },
                OrderItemRequest {
                    listing_id: id,
                    quantity: 1.0,
                },
            ],
        };
        assert!(matches!(
            c.create_order(&buyer(), twice).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            c.create_order(&buyer(), order_of("missing", 1.0)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn initialize_opens_pending_transaction() {
        let fx = Fixture::new().await;
        let c = checkout(&fx);
        let id = listing(&fx, 500.0).await;
        let view = c.create_order(&buyer(), order_of(&id, 2.0)).await.unwrap();

        let session = c
            .initialize_payment(&buyer(), &view.order.id, "ada@example.com")
            .await
            .unwrap();
        assert!(session.reference.starts_with("GRC-"));
        assert!(session.authorization_url.ends_with(&session.reference));

        let tx = db::transactions::get_by_reference(&fx.pool, &session.reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.amount, Money::from_major(1_000.0));
        assert_eq!(tx.order_id, view.order.id);

        let stranger = Principal::new("buyer-2", Role::Buyer);
        assert!(matches!(
            c.initialize_payment(&stranger, &view.order.id, "x@example.com").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn provider_refusal_fails_the_transaction() {
        let fx = Fixture::new().await;
        fx.provider.refuse_initialize();
        let c = checkout(&fx);
        let id = listing(&fx, 500.0).await;
        let view = c.create_order(&buyer(), order_of(&id, 1.0)).await.unwrap();

        assert!(matches!(
            c.initialize_payment(&buyer(), &view.order.id, "ada@example.com").await,
            Err(AppError::Provider(_))
        ));
        let pending = db::transactions::pending_since(
            &fx.pool,
            Utc::now() - chrono::Duration::hours(1),
            10,
        )
        .await
        .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn signed_charge_success_webhook_settles_through_verifier() {
        let fx = Fixture::new().await;
        let c = checkout(&fx);
        let chain = seed_chain(&fx.pool, "TXW", 3_000.0, Utc::now()).await;
        fx.provider.script(paid("TXW", chain.transaction.amount.minor()));

        let body = br#"{"event":"charge.success","data":{"reference":"TXW","status":"success"}}"#;
        let sig = provider::sign(SECRET, body);
        let ack = c.handle_webhook(body, Some(&sig)).await.unwrap();
        assert_eq!(ack.reference.as_deref(), Some("TXW"));
        assert_eq!(ack.settlement, Some(Settlement::Completed));

        let order = db::orders::get_order(&fx.pool, &chain.order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(order.payment_status, PaymentStatus::Paid);

        // A replayed webhook changes nothing.
        let again = c.handle_webhook(body, Some(&sig)).await.unwrap();
        assert_eq!(again.settlement, Some(Settlement::AlreadyCompleted));
    }

    #[tokio::test]
    async fn webhook_payload_alone_never_settles() {
        let fx = Fixture::new().await;
        let c = checkout(&fx);
        seed_chain(&fx.pool, "TXF", 3_000.0, Utc::now()).await;

        // Correctly signed, but the provider itself does not confirm.
        let body = br#"{"event":"charge.success","data":{"reference":"TXF"}}"#;
        let ack = c
            .handle_webhook(body, Some(&provider::sign(SECRET, body)))
            .await
            .unwrap();
        assert_eq!(ack.settlement, Some(Settlement::Pending));
    }

    #[tokio::test]
    async fn webhook_signature_is_enforced() {
        let fx = Fixture::new().await;
        let c = checkout(&fx);
        let body = br#"{"event":"charge.success","data":{"reference":"TXW"}}"#;

        assert!(matches!(
            c.handle_webhook(body, None).await,
            Err(AppError::Unauthenticated(_))
        ));
        assert!(matches!(
            c.handle_webhook(body, Some(&provider::sign("wrong", body))).await,
            Err(AppError::Unauthenticated(_))
        ));

        let other = br#"{"event":"transfer.success","data":{}}"#;
        let ack = c
            .handle_webhook(other, Some(&provider::sign(SECRET, other)))
            .await
            .unwrap();
        assert!(ack.reference.is_none());
    }
}
