//! Listing publisher — turns an approved harvest into its single marketplace
//! listing.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::auth::{Principal, Role};
use crate::db;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::models::{new_id, HarvestStatus, Listing, ListingStatus};
use crate::money::Money;
use crate::validation::PageQuery;

#[derive(Clone)]
pub struct ListingPublisher {
    pool: SqlitePool,
}

impl ListingPublisher {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Publish `harvest_id` at `price` per unit. Quantity and unit are copied
    /// from the harvest; the harvest itself is left untouched.
    pub async fn create_listing_from_harvest(
        &self,
        actor: &Principal,
        harvest_id: &str,
        price: f64,
        description: Option<&str>,
    ) -> Result<Listing> {
        actor.require(&[Role::Farmer, Role::Partner, Role::Admin], "publish listings")?;
        if !price.is_finite() || price <= 0.0 {
            return Err(AppError::Validation(
                "price must be a positive number".into(),
            ));
        }
        let price = Money::from_major(price);
        if !price.is_positive() {
            return Err(AppError::Validation(
                "price must be at least one minor unit".into(),
            ));
        }

        let not_found = || AppError::NotFound(format!("harvest {harvest_id} not found"));
        let harvest = db::harvests::get_harvest(&self.pool, harvest_id)
            .await?
            .ok_or_else(not_found)?;
        // Same visibility as the approval gate: farmers their own harvests,
        // partners those of farmers they onboarded.
        let in_scope = match actor.role {
            Role::Farmer => harvest.farmer_id == actor.id,
            Role::Partner => {
                db::harvests::is_onboarded(&self.pool, &actor.id, &harvest.farmer_id).await?
            }
            _ => true,
        };
        if !in_scope {
            return Err(not_found());
        }
        if harvest.status != HarvestStatus::Approved {
            return Err(AppError::Conflict(format!(
                "harvest {harvest_id} is not approved"
            )));
        }

        let now = Utc::now();
        let listing = Listing {
            id: new_id(),
            harvest_id: harvest.id.clone(),
            farmer_id: harvest.farmer_id.clone(),
            crop_type: harvest.crop_type.clone(),
            unit: harvest.unit.clone(),
            price,
            description: description
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            quantity: harvest.quantity,
            status: ListingStatus::Active,
            created_at: now,
            updated_at: now,
        };

        match db::listings::insert_listing(&self.pool, &listing).await {
            Ok(()) => {
                info!(
                    "Listing {} published for harvest {} at {} per {}",
                    listing.id, harvest.id, listing.price, listing.unit
                );
                Ok(listing)
            }
            Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(format!(
                "harvest {harvest_id} already has a listing"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_active_listings(&self, page: PageQuery) -> Result<Vec<Listing>> {
        let (limit, offset) = page.resolve();
        db::listings::active_listings(&self.pool, limit, offset).await
    }
}
