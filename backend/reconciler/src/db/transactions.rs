//! Ledger transaction queries.
//!
//! Terminal writes are conditional on `status = 'pending'`, so each
//! transaction leaves `pending` at most once no matter how many writers
//! (reconciler pass, webhook, manual verify) race on the same reference.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::errors::Result;
use crate::models::{Transaction, TransactionStatus};

const TRANSACTION_COLUMNS: &str = "id, reference, order_id, amount, currency, status, provider, \
     processed_at, metadata, created_at, updated_at";

/// Insert a transaction. Returns the raw `sqlx::Error` so a duplicate
/// reference can be told apart.
pub async fn insert_transaction(
    pool: &SqlitePool,
    t: &Transaction,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO transactions
            (id, reference, order_id, amount, currency, status, provider,
             processed_at, metadata, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&t.id)
    .bind(&t.reference)
    .bind(&t.order_id)
    .bind(t.amount)
    .bind(&t.currency)
    .bind(t.status)
    .bind(&t.provider)
    .bind(t.processed_at)
    .bind(&t.metadata)
    .bind(t.created_at)
    .bind(t.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_by_reference(pool: &SqlitePool, reference: &str) -> Result<Option<Transaction>> {
    let row = sqlx::query_as::<_, Transaction>(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reference = ?1"
    ))
    .bind(reference)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Pending transactions created at or after `since`, oldest first, at most
/// `limit` of them.
pub async fn pending_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<Transaction>> {
    let rows = sqlx::query_as::<_, Transaction>(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM   transactions
        WHERE  status = 'pending' AND created_at >= ?1
        ORDER  BY created_at ASC, id ASC
        LIMIT  ?2
        "#
    ))
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Completed transactions created at or after `since` whose settlement was
/// cut short: the order is still unpaid, or this transaction paid it and a
/// partner behind it has no commission yet. Oldest first, at most `limit`.
pub async fn unsettled_since(
    pool: &SqlitePool,
    since: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<Transaction>> {
    let rows = sqlx::query_as::<_, Transaction>(
        r#"
        SELECT t.id, t.reference, t.order_id, t.amount, t.currency, t.status, t.provider,
               t.processed_at, t.metadata, t.created_at, t.updated_at
        FROM   transactions t
        JOIN   orders o ON o.id = t.order_id
        WHERE  t.status = 'completed'
          AND  t.created_at >= ?1
          AND  (o.payment_status <> 'paid'
                OR (o.payment_reference = t.reference
                    AND EXISTS (
                        SELECT 1
                        FROM   order_items oi
                        JOIN   listings l ON l.id = oi.listing_id
                        JOIN   harvests h ON h.id = l.harvest_id
                        JOIN   partner_farmers pf
                               ON pf.partner_id = h.verified_by AND pf.farmer_id = h.farmer_id
                        WHERE  oi.order_id = o.id
                          AND  NOT EXISTS (
                                 SELECT 1 FROM commissions c
                                 WHERE  c.transaction_id = t.id
                                   AND  c.partner_id = h.verified_by))))
        ORDER  BY t.created_at ASC, t.id ASC
        LIMIT  ?2
        "#,
    )
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Move a pending transaction to `status`, stamping `processed_at` and
/// merging `metadata` into the stored payload.
///
/// Returns `false` when the transaction was not pending any more.
pub async fn finish_pending(
    pool: &SqlitePool,
    reference: &str,
    status: TransactionStatus,
    metadata: &Value,
    now: DateTime<Utc>,
) -> Result<bool> {
    let patch = serde_json::to_string(metadata)?;
    let rows = sqlx::query(
        r#"
        UPDATE transactions
        SET    status = ?1,
               processed_at = ?2,
               metadata = json_patch(metadata, ?3),
               updated_at = ?2
        WHERE  reference = ?4 AND status = 'pending'
        "#,
    )
    .bind(status)
    .bind(now)
    .bind(patch)
    .bind(reference)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}
