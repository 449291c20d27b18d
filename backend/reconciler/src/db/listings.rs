//! Marketplace listing queries.

use sqlx::SqlitePool;

use crate::errors::Result;
use crate::models::Listing;

const LISTING_COLUMNS: &str = "id, harvest_id, farmer_id, crop_type, unit, price, description, \
     quantity, status, created_at, updated_at";

/// Insert a listing. The raw `sqlx::Error` is returned so callers can tell a
/// UNIQUE(harvest_id) violation apart from other failures.
pub async fn insert_listing(pool: &SqlitePool, l: &Listing) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO listings
            (id, harvest_id, farmer_id, crop_type, unit, price, description,
             quantity, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
    )
    .bind(&l.id)
    .bind(&l.harvest_id)
    .bind(&l.farmer_id)
    .bind(&l.crop_type)
    .bind(&l.unit)
    .bind(l.price)
    .bind(&l.description)
    .bind(l.quantity)
    .bind(l.status)
    .bind(l.created_at)
    .bind(l.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_listing(pool: &SqlitePool, id: &str) -> Result<Option<Listing>> {
    let row = sqlx::query_as::<_, Listing>(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn listing_for_harvest(pool: &SqlitePool, harvest_id: &str) -> Result<Option<Listing>> {
    let row = sqlx::query_as::<_, Listing>(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings WHERE harvest_id = ?1"
    ))
    .bind(harvest_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Active listings, newest first.
pub async fn active_listings(pool: &SqlitePool, limit: u32, offset: u32) -> Result<Vec<Listing>> {
    let rows = sqlx::query_as::<_, Listing>(&format!(
        r#"
        SELECT {LISTING_COLUMNS}
        FROM   listings
        WHERE  status = 'active'
        ORDER  BY created_at DESC, id ASC
        LIMIT  ?1 OFFSET ?2
        "#
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
