//! Order, order-item and stock queries.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

use crate::errors::Result;
use crate::models::{Order, OrderItem};
use crate::money::Money;

const ORDER_COLUMNS: &str = "id, buyer_id, total_amount, status, payment_status, \
     payment_reference, created_at, updated_at";

/// Line of an order before it is persisted.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub listing_id: String,
    pub quantity: f64,
    pub unit_price: Money,
    pub amount: Money,
}

/// Persist an order and its items atomically.
pub async fn insert_order(pool: &SqlitePool, order: &Order, items: &[NewOrderItem]) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO orders
            (id, buyer_id, total_amount, status, payment_status, payment_reference,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(&order.id)
    .bind(&order.buyer_id)
    .bind(order.total_amount)
    .bind(order.status)
    .bind(order.payment_status)
    .bind(&order.payment_reference)
    .bind(order.created_at)
    .bind(order.updated_at)
    .execute(&mut *tx)
    .await?;

    for item in items {
        sqlx::query(
            r#"
            INSERT INTO order_items (order_id, listing_id, quantity, unit_price, amount)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&order.id)
        .bind(&item.listing_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.amount)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_order(pool: &SqlitePool, id: &str) -> Result<Option<Order>> {
    let row = sqlx::query_as::<_, Order>(&format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn order_items(pool: &SqlitePool, order_id: &str) -> Result<Vec<OrderItem>> {
    let rows = sqlx::query_as::<_, OrderItem>(
        r#"
        SELECT id, order_id, listing_id, quantity, unit_price, amount
        FROM   order_items
        WHERE  order_id = ?1
        ORDER  BY id ASC
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Mark the order paid and take its items out of listing stock, in one
/// database transaction.
///
/// Returns `false` (and changes nothing) when the order was already paid, so
/// stock is released exactly once per order however often this is called.
pub async fn mark_paid_and_release_stock(
    pool: &SqlitePool,
    order_id: &str,
    payment_reference: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query(
        r#"
        UPDATE orders
        SET    status = CASE WHEN status = 'pending' THEN 'paid' ELSE status END,
               payment_status = 'paid',
               payment_reference = ?1,
               updated_at = ?2
        WHERE  id = ?3 AND payment_status <> 'paid'
        "#,
    )
    .bind(payment_reference)
    .bind(now)
    .bind(order_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    if rows == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let items: Vec<(String, f64)> =
        sqlx::query_as("SELECT listing_id, quantity FROM order_items WHERE order_id = ?1")
            .bind(order_id)
            .fetch_all(&mut *tx)
            .await?;

    for (listing_id, quantity) in items {
        // Stock is not reserved at order time, so two paid orders can claim
        // the same units. The charge already went through; the order stands.
        let left: Option<(f64,)> = sqlx::query_as("SELECT quantity FROM listings WHERE id = ?1")
            .bind(&listing_id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some((left,)) = left.filter(|(left,)| *left < quantity) {
            warn!(
                "Order {order_id} takes {quantity} from listing {listing_id} with only {left} left; clamping stock to 0"
            );
        }

        // SET expressions all read the pre-update row.
        sqlx::query(
            r#"
            UPDATE listings
            SET    quantity = MAX(quantity - ?1, 0),
                   status = CASE
                              WHEN status = 'active' AND quantity - ?1 <= 0 THEN 'out_of_stock'
                              ELSE status
                            END,
                   updated_at = ?2
            WHERE  id = ?3
            "#,
        )
        .bind(quantity)
        .bind(now)
        .bind(&listing_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// `payment_status: pending → failed`. Returns whether the order changed.
pub async fn mark_payment_failed(
    pool: &SqlitePool,
    order_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE orders
        SET    payment_status = 'failed', updated_at = ?1
        WHERE  id = ?2 AND payment_status = 'pending'
        "#,
    )
    .bind(now)
    .bind(order_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Order value per verifying partner, derived from the harvests behind the
/// ordered listings. Only approvals made by a partner who onboarded the
/// farmer earn a share; admin approvals are skipped.
pub async fn partner_shares(pool: &SqlitePool, order_id: &str) -> Result<Vec<(String, Money)>> {
    let rows: Vec<(String, Money)> = sqlx::query_as(
        r#"
        SELECT h.verified_by, SUM(oi.amount)
        FROM   order_items oi
        JOIN   listings l ON l.id = oi.listing_id
        JOIN   harvests h ON h.id = l.harvest_id
        JOIN   partner_farmers pf
               ON pf.partner_id = h.verified_by AND pf.farmer_id = h.farmer_id
        WHERE  oi.order_id = ?1
        GROUP  BY h.verified_by
        ORDER  BY h.verified_by ASC
        "#,
    )
    .bind(order_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
