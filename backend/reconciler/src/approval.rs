//! Harvest approval gate.
//!
//! Farmers submit harvest batches; a partner who onboarded the farmer (or an
//! admin) approves or rejects each batch exactly once. Only approved batches
//! can be published to the marketplace.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::auth::{Principal, Role};
use crate::db;
use crate::db::harvests::ApproverScope;
use crate::errors::{AppError, Result};
use crate::models::{new_id, new_reference, Harvest, HarvestStatus, QualityGrade};
use crate::validation::{PageQuery, SubmitHarvestRequest};

const APPROVERS: &[Role] = &[Role::Partner, Role::Admin];

#[derive(Clone)]
pub struct ApprovalGate {
    pool: SqlitePool,
}

impl ApprovalGate {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn submit_harvest(
        &self,
        actor: &Principal,
        req: SubmitHarvestRequest,
    ) -> Result<Harvest> {
        actor.require(&[Role::Farmer], "submit harvests")?;
        let now = Utc::now();
        let harvest = Harvest {
            id: new_id(),
            batch_id: new_reference("GRO"),
            farmer_id: actor.id.clone(),
            crop_type: req.crop_type.trim().to_string(),
            quantity: req.quantity,
            unit: req.unit.trim().to_string(),
            location: req.location.trim().to_string(),
            quality: req.quality,
            status: HarvestStatus::Pending,
            verified_by: None,
            verified_at: None,
            approval_notes: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
        };
        db::harvests::insert_harvest(&self.pool, &harvest).await?;
        info!(
            "Harvest {} ({}) submitted by farmer {}",
            harvest.id, harvest.batch_id, harvest.farmer_id
        );
        Ok(harvest)
    }

    /// Farmers see their own harvests, partners those of farmers they
    /// onboarded, admins all of them.
    pub async fn get_harvest(&self, actor: &Principal, id: &str) -> Result<Harvest> {
        let harvest = db::harvests::get_harvest(&self.pool, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        let visible = match actor.role {
            Role::Admin => true,
            Role::Farmer => harvest.farmer_id == actor.id,
            Role::Partner => {
                db::harvests::is_onboarded(&self.pool, &actor.id, &harvest.farmer_id).await?
            }
            Role::Buyer => harvest.status == HarvestStatus::Approved,
        };
        if visible {
            Ok(harvest)
        } else {
            Err(not_found(id))
        }
    }

    /// Link `farmer_id` to the calling partner. Returns `false` when the link
    /// already existed.
    pub async fn onboard_farmer(&self, actor: &Principal, farmer_id: &str) -> Result<bool> {
        actor.require(&[Role::Partner], "onboard farmers")?;
        let farmer_id = farmer_id.trim();
        if farmer_id.is_empty() {
            return Err(AppError::Validation("farmer_id is required".into()));
        }
        let created =
            db::harvests::link_partner_farmer(&self.pool, &actor.id, farmer_id, Utc::now()).await?;
        if created {
            info!("Partner {} onboarded farmer {farmer_id}", actor.id);
        }
        Ok(created)
    }

    /// `pending → approved`, recording the approver and the final grade.
    pub async fn approve(
        &self,
        actor: &Principal,
        id: &str,
        quality: QualityGrade,
        notes: Option<&str>,
    ) -> Result<Harvest> {
        actor.require(APPROVERS, "approve harvests")?;
        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        let changed = db::harvests::approve_pending(
            &self.pool,
            id,
            scope(actor),
            quality,
            notes,
            Utc::now(),
        )
        .await?;
        if changed == 0 {
            return Err(not_pending(id));
        }
        info!("Harvest {id} approved by {}", actor.id);
        self.reload(id).await
    }

    /// `pending → rejected`. The reason must not be blank.
    pub async fn reject(&self, actor: &Principal, id: &str, reason: &str) -> Result<Harvest> {
        actor.require(APPROVERS, "reject harvests")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation("rejection reason is required".into()));
        }
        let changed =
            db::harvests::reject_pending(&self.pool, id, scope(actor), reason, Utc::now()).await?;
        if changed == 0 {
            return Err(not_pending(id));
        }
        info!("Harvest {id} rejected by {}: {reason}", actor.id);
        self.reload(id).await
    }

    /// Oldest-first queue of pending harvests the caller may act on.
    pub async fn pending_for_approver(
        &self,
        actor: &Principal,
        page: PageQuery,
    ) -> Result<Vec<Harvest>> {
        actor.require(APPROVERS, "view the approval queue")?;
        let (limit, offset) = page.resolve();
        db::harvests::pending_for(&self.pool, scope(actor), limit, offset).await
    }

    async fn reload(&self, id: &str) -> Result<Harvest> {
        db::harvests::get_harvest(&self.pool, id)
            .await?
            .ok_or_else(|| not_found(id))
    }
}

fn scope(actor: &Principal) -> ApproverScope<'_> {
    ApproverScope {
        approver_id: &actor.id,
        unrestricted: actor.is_admin(),
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("harvest {id} not found"))
}

fn not_pending(id: &str) -> AppError {
    AppError::NotFound(format!("harvest {id} not found or not pending"))
}
