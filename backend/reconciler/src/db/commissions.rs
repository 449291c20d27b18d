//! Commission queries and state transitions.
//!
//! Each transition is a single conditional UPDATE whose WHERE clause encodes
//! the allowed source states; callers inspect the returned flag to tell a
//! successful transition from a rejected one.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::errors::Result;
use crate::models::{Commission, CommissionStatus, DisputeResolution};
use crate::money::Money;

const COMMISSION_COLUMNS: &str = "id, partner_id, transaction_id, order_id, transaction_type, \
     transaction_amount, rate, amount, status, due_date, notes, approved_by, approved_at, \
     paid_by, paid_at, payment_transaction_id, dispute_reason, disputed_by, disputed_at, \
     pre_dispute_status, resolution, resolved_by, resolved_at, created_at, updated_at";

#[derive(Debug, Clone, Default)]
pub struct CommissionFilter {
    pub partner_id: Option<String>,
    pub status: Option<CommissionStatus>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: u32,
    pub offset: u32,
}

/// Insert a commission. Returns the raw `sqlx::Error` so a duplicate
/// `(transaction_id, partner_id)` pair can be told apart.
pub async fn insert_commission(
    pool: &SqlitePool,
    c: &Commission,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO commissions
            (id, partner_id, transaction_id, order_id, transaction_type, transaction_amount,
             rate, amount, status, due_date, notes, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&c.id)
    .bind(&c.partner_id)
    .bind(&c.transaction_id)
    .bind(&c.order_id)
    .bind(c.transaction_type)
    .bind(c.transaction_amount)
    .bind(c.rate)
    .bind(c.amount)
    .bind(c.status)
    .bind(c.due_date)
    .bind(&c.notes)
    .bind(c.created_at)
    .bind(c.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_commission(pool: &SqlitePool, id: &str) -> Result<Option<Commission>> {
    let row = sqlx::query_as::<_, Commission>(&format!(
        "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn commissions_for_transaction(
    pool: &SqlitePool,
    transaction_id: &str,
) -> Result<Vec<Commission>> {
    let rows = sqlx::query_as::<_, Commission>(&format!(
        "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE transaction_id = ?1 ORDER BY partner_id"
    ))
    .bind(transaction_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_commissions(pool: &SqlitePool, f: &CommissionFilter) -> Result<Vec<Commission>> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {COMMISSION_COLUMNS} FROM commissions WHERE 1 = 1"
    ));
    if let Some(partner_id) = &f.partner_id {
        qb.push(" AND partner_id = ").push_bind(partner_id.clone());
    }
    if let Some(status) = f.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(start) = f.start_date {
        qb.push(" AND created_at >= ").push_bind(start);
    }
    if let Some(end) = f.end_date {
        qb.push(" AND created_at <= ").push_bind(end);
    }
    qb.push(" ORDER BY created_at DESC, id ASC LIMIT ")
        .push_bind(f.limit)
        .push(" OFFSET ")
        .push_bind(f.offset);

    let rows = qb.build_query_as::<Commission>().fetch_all(pool).await?;
    Ok(rows)
}

/// Number of live (non-cancelled) commissions and their cumulative
/// transaction volume; drives tier selection.
pub async fn partner_volume(pool: &SqlitePool, partner_id: &str) -> Result<(i64, Money)> {
    let row: (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(transaction_amount), 0)
        FROM   commissions
        WHERE  partner_id = ?1 AND status <> 'cancelled'
        "#,
    )
    .bind(partner_id)
    .fetch_one(pool)
    .await?;
    Ok((row.0, Money::from_minor(row.1)))
}

/// Count and commission total per status for one partner.
pub async fn partner_summary(
    pool: &SqlitePool,
    partner_id: &str,
) -> Result<Vec<(CommissionStatus, i64, Money)>> {
    let rows: Vec<(CommissionStatus, i64, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*), COALESCE(SUM(amount), 0)
        FROM   commissions
        WHERE  partner_id = ?1
        GROUP  BY status
        ORDER  BY status
        "#,
    )
    .bind(partner_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(s, n, total)| (s, n, Money::from_minor(total)))
        .collect())
}

// ─────────────────────────────────────────────────────────
// Transitions
// ─────────────────────────────────────────────────────────

/// Change rate, amount, due date or notes while still pending.
pub async fn update_terms(
    pool: &SqlitePool,
    id: &str,
    rate: Option<f64>,
    amount: Option<Money>,
    due_date: Option<DateTime<Utc>>,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE commissions
        SET    rate = COALESCE(?1, rate),
               amount = COALESCE(?2, amount),
               due_date = COALESCE(?3, due_date),
               notes = COALESCE(?4, notes),
               updated_at = ?5
        WHERE  id = ?6 AND status = 'pending'
        "#,
    )
    .bind(rate)
    .bind(amount)
    .bind(due_date)
    .bind(notes)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// `pending → approved`
pub async fn approve(pool: &SqlitePool, id: &str, actor: &str, now: DateTime<Utc>) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE commissions
        SET    status = 'approved', approved_by = ?1, approved_at = ?2, updated_at = ?2
        WHERE  id = ?3 AND status = 'pending'
        "#,
    )
    .bind(actor)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// `approved → paid`
pub async fn mark_paid(
    pool: &SqlitePool,
    id: &str,
    actor: &str,
    payment_transaction_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE commissions
        SET    status = 'paid', paid_by = ?1, paid_at = ?2,
               payment_transaction_id = ?3, updated_at = ?2
        WHERE  id = ?4 AND status = 'approved'
        "#,
    )
    .bind(actor)
    .bind(now)
    .bind(payment_transaction_id)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// `pending | approved → cancelled`
pub async fn cancel(pool: &SqlitePool, id: &str, now: DateTime<Utc>) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE commissions
        SET    status = 'cancelled', updated_at = ?1
        WHERE  id = ?2 AND status IN ('pending', 'approved')
        "#,
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// `pending | approved → disputed`, remembering the status it left.
pub async fn dispute(
    pool: &SqlitePool,
    id: &str,
    actor: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE commissions
        SET    pre_dispute_status = status,
               status = 'disputed',
               dispute_reason = ?1, disputed_by = ?2, disputed_at = ?3,
               resolution = NULL, resolved_by = NULL, resolved_at = NULL,
               updated_at = ?3
        WHERE  id = ?4 AND status IN ('pending', 'approved')
        "#,
    )
    .bind(reason)
    .bind(actor)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// `disputed → pre-dispute status` (resolved) or `disputed → cancelled` (closed).
pub async fn resolve(
    pool: &SqlitePool,
    id: &str,
    actor: &str,
    resolution: DisputeResolution,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        r#"
        UPDATE commissions
        SET    status = CASE
                          WHEN ?1 = 'resolved' THEN COALESCE(pre_dispute_status, 'pending')
                          ELSE 'cancelled'
                        END,
               resolution = ?1, resolved_by = ?2, resolved_at = ?3,
               pre_dispute_status = NULL,
               updated_at = ?3
        WHERE  id = ?4 AND status = 'disputed'
        "#,
    )
    .bind(resolution)
    .bind(actor)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}
