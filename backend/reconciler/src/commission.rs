//! Partner commissions — tiered rate calculation and the
//! `pending → approved → paid` lifecycle with its dispute side-track.
//!
//! ## Tiers
//!
//! A [`TierTable`] is an ascending list of tiers. A partner qualifies for a
//! tier once its live commission count reaches `min_transactions` **or** its
//! cumulative transaction volume reaches `min_volume`; the last qualifying
//! tier wins. The first tier is the baseline and must have zero thresholds.
//!
//! ## Lifecycle
//!
//! ```text
//!   pending ──approve──▶ approved ──pay──▶ paid
//!      │  ╲                 │  ╲
//!   cancel dispute       cancel dispute
//!      ▼      ╲             ▼      ╲
//!  cancelled   disputed ◀──────────┘
//!                 │ resolve(resolved) → back to the pre-dispute status
//!                 │ resolve(closed)   → cancelled
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::auth::{Principal, Role};
use crate::db;
use crate::db::commissions::CommissionFilter;
use crate::errors::{is_unique_violation, AppError, Result};
use crate::models::{
    new_id, Commission, CommissionStatus, DisputeResolution, Transaction, TransactionType,
};
use crate::money::Money;
use crate::validation::{
    resolve_page, CreateCommissionRequest, ListCommissionsQuery, UpdateCommissionRequest,
};

// ─────────────────────────────────────────────────────────
// Tier table
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTier {
    pub name: String,
    pub min_transactions: i64,
    pub min_volume: Money,
    /// Base percentage, in `[0, 100]`.
    pub rate: f64,
    /// Extra percentage for large transactions.
    #[serde(default)]
    pub bonus_rate: f64,
    /// Smallest transaction amount that earns the bonus.
    #[serde(default)]
    pub bonus_min_amount: Money,
}

impl CommissionTier {
    fn qualifies(&self, volume: &PartnerVolume) -> bool {
        volume.transactions >= self.min_transactions || volume.volume >= self.min_volume
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TierTable {
    tiers: Vec<CommissionTier>,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                CommissionTier {
                    name: "bronze".to_string(),
                    min_transactions: 0,
                    min_volume: Money::ZERO,
                    rate: 5.0,
                    bonus_rate: 0.0,
                    bonus_min_amount: Money::ZERO,
                },
                CommissionTier {
                    name: "silver".to_string(),
                    min_transactions: 25,
                    min_volume: Money::from_major(1_000_000.0),
                    rate: 6.0,
                    bonus_rate: 0.5,
                    bonus_min_amount: Money::from_major(100_000.0),
                },
                CommissionTier {
                    name: "gold".to_string(),
                    min_transactions: 100,
                    min_volume: Money::from_major(10_000_000.0),
                    rate: 7.5,
                    bonus_rate: 1.0,
                    bonus_min_amount: Money::from_major(250_000.0),
                },
            ],
        }
    }
}

impl TierTable {
    pub fn new(tiers: Vec<CommissionTier>) -> Result<Self> {
        let first = tiers
            .first()
            .ok_or_else(|| AppError::Config("commission tier table is empty".to_string()))?;
        if first.min_transactions != 0 || first.min_volume != Money::ZERO {
            return Err(AppError::Config(format!(
                "first commission tier `{}` must have zero thresholds",
                first.name
            )));
        }
        for tier in &tiers {
            let rate_ok = (0.0..=100.0).contains(&tier.rate);
            let bonus_ok = (0.0..=100.0).contains(&tier.bonus_rate);
            if !rate_ok || !bonus_ok || tier.min_transactions < 0 {
                return Err(AppError::Config(format!(
                    "commission tier `{}` has an out-of-range rate or threshold",
                    tier.name
                )));
            }
        }
        Ok(Self { tiers })
    }

    /// Parse a JSON array of tiers (the `COMMISSION_TIERS` variable).
    pub fn from_json(raw: &str) -> Result<Self> {
        let tiers: Vec<CommissionTier> = serde_json::from_str(raw)
            .map_err(|e| AppError::Config(format!("Invalid COMMISSION_TIERS: {e}")))?;
        Self::new(tiers)
    }

    pub fn tiers(&self) -> &[CommissionTier] {
        &self.tiers
    }

    pub fn tier_for(&self, volume: &PartnerVolume) -> &CommissionTier {
        self.tiers
            .iter()
            .rev()
            .find(|t| t.qualifies(volume))
            .unwrap_or(&self.tiers[0])
    }

    /// Price a commission. Pure: the result depends only on the arguments
    /// and this table.
    pub fn calculate(
        &self,
        volume: &PartnerVolume,
        amount: Money,
        transaction_type: TransactionType,
    ) -> Result<CommissionQuote> {
        if !amount.is_positive() {
            return Err(AppError::Validation(
                "transaction amount must be positive".to_string(),
            ));
        }
        let tier = self.tier_for(volume);
        let bonus = if tier.bonus_rate > 0.0 && amount >= tier.bonus_min_amount {
            tier.bonus_rate
        } else {
            0.0
        };
        let rate = (tier.rate + bonus).min(100.0);

        Ok(CommissionQuote {
            tier: tier.name.clone(),
            base_rate: tier.rate,
            bonus_rate: bonus,
            rate,
            transaction_type,
            transaction_amount: amount,
            commission_amount: amount.percent(rate),
        })
    }
}

/// A partner's track record, as far as tier selection is concerned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PartnerVolume {
    pub transactions: i64,
    pub volume: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionQuote {
    pub tier: String,
    pub base_rate: f64,
    pub bonus_rate: f64,
    /// Effective rate, bonus included, capped at 100.
    pub rate: f64,
    pub transaction_type: TransactionType,
    pub transaction_amount: Money,
    pub commission_amount: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusTotal {
    pub status: CommissionStatus,
    pub count: i64,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionSummary {
    pub partner_id: String,
    pub tier: String,
    pub volume: PartnerVolume,
    pub by_status: Vec<StatusTotal>,
    pub outstanding: Money,
    pub paid: Money,
}

// ─────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────

/// Persistence-backed commission operations.
#[derive(Clone)]
pub struct CommissionLedger {
    pool: SqlitePool,
    tiers: Arc<TierTable>,
    due_days: i64,
}

impl CommissionLedger {
    pub fn new(pool: SqlitePool, tiers: Arc<TierTable>, due_days: i64) -> Self {
        Self {
            pool,
            tiers,
            due_days,
        }
    }

    pub async fn volume(&self, partner_id: &str) -> Result<PartnerVolume> {
        let (transactions, volume) = db::commissions::partner_volume(&self.pool, partner_id).await?;
        Ok(PartnerVolume {
            transactions,
            volume,
        })
    }

    pub async fn quote(
        &self,
        actor: &Principal,
        partner_id: &str,
        amount: Money,
        transaction_type: TransactionType,
    ) -> Result<CommissionQuote> {
        actor.require(&[Role::Partner, Role::Admin], "calculate commissions")?;
        if actor.role == Role::Partner && actor.id != partner_id {
            return Err(AppError::Forbidden(
                "partners may only quote their own commissions".to_string(),
            ));
        }
        let volume = self.volume(partner_id).await?;
        self.tiers.calculate(&volume, amount, transaction_type)
    }

    /// Commission earned by `partner_id` on a completed ledger transaction.
    ///
    /// Returns `None` when this partner already holds a commission for the
    /// transaction, so re-running settlement never pays twice.
    pub async fn record_sale(
        &self,
        partner_id: &str,
        transaction: &Transaction,
        share: Money,
    ) -> Result<Option<Commission>> {
        let volume = self.volume(partner_id).await?;
        let quote = self
            .tiers
            .calculate(&volume, share, TransactionType::MarketplaceSale)?;
        let commission = self.build(
            partner_id,
            Some(transaction.id.clone()),
            Some(transaction.order_id.clone()),
            &quote,
            None,
            None,
        );

        match db::commissions::insert_commission(&self.pool, &commission).await {
            Ok(()) => {
                info!(
                    "Commission {} recorded for partner {partner_id}: {} at {}% ({} tier)",
                    commission.id, commission.amount, commission.rate, quote.tier
                );
                Ok(Some(commission))
            }
            Err(e) if is_unique_violation(&e) => {
                debug!(
                    "Commission for partner {partner_id} on transaction {} already exists",
                    transaction.reference
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Manual commission entry (admin).
    pub async fn create(
        &self,
        actor: &Principal,
        req: CreateCommissionRequest,
    ) -> Result<Commission> {
        actor.require(&[Role::Admin], "create commissions")?;

        let amount = Money::from_major(req.transaction_amount);
        let mut quote = {
            let volume = self.volume(&req.partner_id).await?;
            self.tiers.calculate(&volume, amount, req.transaction_type)?
        };
        if let Some(rate) = req.commission_rate {
            quote.rate = rate;
            quote.bonus_rate = 0.0;
            quote.commission_amount = amount.percent(rate);
        }

        let commission = self.build(
            &req.partner_id,
            req.transaction_id,
            req.order_id,
            &quote,
            req.due_date,
            req.notes,
        );
        match db::commissions::insert_commission(&self.pool, &commission).await {
            Ok(()) => Ok(commission),
            Err(e) if is_unique_violation(&e) => Err(AppError::Conflict(
                "a commission already exists for this partner and transaction".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, actor: &Principal, id: &str) -> Result<Commission> {
        actor.require(&[Role::Partner, Role::Admin], "view commissions")?;
        let commission = db::commissions::get_commission(&self.pool, id)
            .await?
            .filter(|c| actor.is_admin() || c.partner_id == actor.id)
            .ok_or_else(|| not_found(id))?;
        Ok(commission)
    }

    /// Partners always see only their own commissions.
    pub async fn list(
        &self,
        actor: &Principal,
        query: ListCommissionsQuery,
    ) -> Result<Vec<Commission>> {
        actor.require(&[Role::Partner, Role::Admin], "view commissions")?;
        let (limit, offset) = resolve_page(query.page, query.limit);
        let partner_id = if actor.is_admin() {
            query.partner_id
        } else {
            Some(actor.id.clone())
        };
        let filter = CommissionFilter {
            partner_id,
            status: query.status,
            start_date: query.start_date,
            end_date: query.end_date,
            limit,
            offset,
        };
        db::commissions::list_commissions(&self.pool, &filter).await
    }

    pub async fn summary(&self, actor: &Principal, partner_id: &str) -> Result<CommissionSummary> {
        actor.require(&[Role::Partner, Role::Admin], "view commissions")?;
        if !actor.is_admin() && actor.id != partner_id {
            return Err(AppError::Forbidden(
                "partners may only view their own summary".to_string(),
            ));
        }
        let volume = self.volume(partner_id).await?;
        let by_status: Vec<StatusTotal> =
            db::commissions::partner_summary(&self.pool, partner_id)
                .await?
                .into_iter()
                .map(|(status, count, amount)| StatusTotal {
                    status,
                    count,
                    amount,
                })
                .collect();
        let sum_of = |pred: fn(CommissionStatus) -> bool| -> Money {
            by_status
                .iter()
                .filter(|t| pred(t.status))
                .map(|t| t.amount)
                .sum()
        };
        let outstanding = sum_of(|s| {
            matches!(
                s,
                CommissionStatus::Pending | CommissionStatus::Approved | CommissionStatus::Disputed
            )
        });
        let paid = sum_of(|s| s == CommissionStatus::Paid);

        Ok(CommissionSummary {
            partner_id: partner_id.to_string(),
            tier: self.tiers.tier_for(&volume).name.clone(),
            volume,
            by_status,
            outstanding,
            paid,
        })
    }

    /// Amend a pending commission; a new rate recomputes the amount.
    pub async fn update(
        &self,
        actor: &Principal,
        id: &str,
        req: UpdateCommissionRequest,
    ) -> Result<Commission> {
        actor.require(&[Role::Admin], "update commissions")?;
        let current = db::commissions::get_commission(&self.pool, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        let amount = req
            .commission_rate
            .map(|rate| current.transaction_amount.percent(rate));
        let changed = db::commissions::update_terms(
            &self.pool,
            id,
            req.commission_rate,
            amount,
            req.due_date,
            req.notes.as_deref(),
            Utc::now(),
        )
        .await?;
        self.after_transition(id, changed, "update").await
    }

    /// `pending → approved`
    pub async fn approve(&self, actor: &Principal, id: &str) -> Result<Commission> {
        actor.require(&[Role::Admin], "approve commissions")?;
        let changed = db::commissions::approve(&self.pool, id, &actor.id, Utc::now()).await?;
        self.after_transition(id, changed, "approve").await
    }

    /// `approved → paid`
    pub async fn process_payment(
        &self,
        actor: &Principal,
        id: &str,
        payment_transaction_id: Option<&str>,
    ) -> Result<Commission> {
        actor.require(&[Role::Admin], "pay commissions")?;
        let changed =
            db::commissions::mark_paid(&self.pool, id, &actor.id, payment_transaction_id, Utc::now())
                .await?;
        self.after_transition(id, changed, "pay").await
    }

    pub async fn cancel(&self, actor: &Principal, id: &str) -> Result<Commission> {
        actor.require(&[Role::Admin], "cancel commissions")?;
        let changed = db::commissions::cancel(&self.pool, id, Utc::now()).await?;
        self.after_transition(id, changed, "cancel").await
    }

    pub async fn dispute(&self, actor: &Principal, id: &str, reason: &str) -> Result<Commission> {
        actor.require(&[Role::Partner, Role::Admin], "dispute commissions")?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::Validation(
                "a dispute reason is required".to_string(),
            ));
        }
        if !actor.is_admin() {
            // Ownership check; other partners' commissions look absent.
            self.get(actor, id).await?;
        }
        let changed =
            db::commissions::dispute(&self.pool, id, &actor.id, reason, Utc::now()).await?;
        self.after_transition(id, changed, "dispute").await
    }

    pub async fn resolve(
        &self,
        actor: &Principal,
        id: &str,
        resolution: DisputeResolution,
    ) -> Result<Commission> {
        actor.require(&[Role::Admin], "resolve commission disputes")?;
        let changed =
            db::commissions::resolve(&self.pool, id, &actor.id, resolution, Utc::now()).await?;
        self.after_transition(id, changed, "resolve").await
    }

    fn build(
        &self,
        partner_id: &str,
        transaction_id: Option<String>,
        order_id: Option<String>,
        quote: &CommissionQuote,
        due_date: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Commission {
        let now = Utc::now();
        Commission {
            id: new_id(),
            partner_id: partner_id.to_string(),
            transaction_id,
            order_id,
            transaction_type: quote.transaction_type,
            transaction_amount: quote.transaction_amount,
            rate: quote.rate,
            amount: quote.commission_amount,
            status: CommissionStatus::Pending,
            due_date: due_date.unwrap_or(now + Duration::days(self.due_days)),
            notes,
            approved_by: None,
            approved_at: None,
            paid_by: None,
            paid_at: None,
            payment_transaction_id: None,
            dispute_reason: None,
            disputed_by: None,
            disputed_at: None,
            pre_dispute_status: None,
            resolution: None,
            resolved_by: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Re-read after a conditional update; a refused transition becomes
    /// `NotFound` or `Conflict` depending on whether the row exists.
    async fn after_transition(&self, id: &str, changed: bool, action: &str) -> Result<Commission> {
        let current = db::commissions::get_commission(&self.pool, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        if changed {
            info!("Commission {id}: {action} → {}", current.status.as_str());
            return Ok(current);
        }
        Err(match current.status {
            CommissionStatus::Disputed => AppError::Conflict(format!(
                "commission {id} is disputed; resolve the dispute before you {action} it"
            )),
            status => AppError::Conflict(format!(
                "cannot {action} commission {id} while it is {}",
                status.as_str()
            )),
        })
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("commission {id} not found"))
}
