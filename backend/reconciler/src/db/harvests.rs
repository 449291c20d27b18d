//! Harvest and partner-farmer queries.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::errors::Result;
use crate::models::{Harvest, QualityGrade};

const HARVEST_COLUMNS: &str = "id, batch_id, farmer_id, crop_type, quantity, unit, location, \
     quality, status, verified_by, verified_at, approval_notes, rejection_reason, \
     created_at, updated_at";

/// Who is acting on the approval queue. Admins see every farmer; partners
/// only the farmers they onboarded.
#[derive(Debug, Clone, Copy)]
pub struct ApproverScope<'a> {
    pub approver_id: &'a str,
    pub unrestricted: bool,
}

pub async fn insert_harvest(pool: &SqlitePool, h: &Harvest) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO harvests
            (id, batch_id, farmer_id, crop_type, quantity, unit, location, quality,
             status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&h.id)
    .bind(&h.batch_id)
    .bind(&h.farmer_id)
    .bind(&h.crop_type)
    .bind(h.quantity)
    .bind(&h.unit)
    .bind(&h.location)
    .bind(h.quality)
    .bind(h.status)
    .bind(h.created_at)
    .bind(h.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_harvest(pool: &SqlitePool, id: &str) -> Result<Option<Harvest>> {
    let row = sqlx::query_as::<_, Harvest>(&format!(
        "SELECT {HARVEST_COLUMNS} FROM harvests WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Link a farmer to a partner. Returns `false` when the link already existed.
pub async fn link_partner_farmer(
    pool: &SqlitePool,
    partner_id: &str,
    farmer_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = sqlx::query(
        "INSERT OR IGNORE INTO partner_farmers (partner_id, farmer_id, created_at) VALUES (?1, ?2, ?3)",
    )
    .bind(partner_id)
    .bind(farmer_id)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows == 1)
}

/// Whether `partner_id` onboarded `farmer_id`.
pub async fn is_onboarded(pool: &SqlitePool, partner_id: &str, farmer_id: &str) -> Result<bool> {
    let linked: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM partner_farmers WHERE partner_id = ?1 AND farmer_id = ?2")
            .bind(partner_id)
            .bind(farmer_id)
            .fetch_optional(pool)
            .await?;
    Ok(linked.is_some())
}

/// `pending → approved`. Returns the number of rows changed (0 or 1).
pub async fn approve_pending(
    pool: &SqlitePool,
    id: &str,
    scope: ApproverScope<'_>,
    quality: QualityGrade,
    notes: Option<&str>,
    now: DateTime<Utc>,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE harvests
        SET    status = 'approved', quality = ?1, approval_notes = ?2,
               verified_by = ?3, verified_at = ?4, updated_at = ?4
        WHERE  id = ?5
          AND  status = 'pending'
          AND  (?6 = 1 OR farmer_id IN
                  (SELECT farmer_id FROM partner_farmers WHERE partner_id = ?3))
        "#,
    )
    .bind(quality)
    .bind(notes)
    .bind(scope.approver_id)
    .bind(now)
    .bind(id)
    .bind(scope.unrestricted)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// `pending → rejected`. Returns the number of rows changed (0 or 1).
pub async fn reject_pending(
    pool: &SqlitePool,
    id: &str,
    scope: ApproverScope<'_>,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let rows = sqlx::query(
        r#"
        UPDATE harvests
        SET    status = 'rejected', rejection_reason = ?1,
               verified_by = ?2, verified_at = ?3, updated_at = ?3
        WHERE  id = ?4
          AND  status = 'pending'
          AND  (?5 = 1 OR farmer_id IN
                  (SELECT farmer_id FROM partner_farmers WHERE partner_id = ?2))
        "#,
    )
    .bind(reason)
    .bind(scope.approver_id)
    .bind(now)
    .bind(id)
    .bind(scope.unrestricted)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows)
}

/// Pending harvests visible to the approver, oldest first.
pub async fn pending_for(
    pool: &SqlitePool,
    scope: ApproverScope<'_>,
    limit: u32,
    offset: u32,
) -> Result<Vec<Harvest>> {
    let rows = sqlx::query_as::<_, Harvest>(&format!(
        r#"
        SELECT {HARVEST_COLUMNS}
        FROM   harvests
        WHERE  status = 'pending'
          AND  (?1 = 1 OR farmer_id IN
                  (SELECT farmer_id FROM partner_farmers WHERE partner_id = ?2))
        ORDER  BY created_at ASC, id ASC
        LIMIT  ?3 OFFSET ?4
        "#
    ))
    .bind(scope.unrestricted)
    .bind(scope.approver_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
