//! Domain records of the harvest-to-market workflow.
//!
//! Every record maps 1:1 onto a table in `migrations/`; status enums are
//! stored as their snake_case names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::money::Money;

// ─────────────────────────────────────────────────────────
// Harvest
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum HarvestStatus {
    Pending,
    Approved,
    Rejected,
}

/// Quality grade, declared by the farmer and overwritten by the approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Harvest {
    pub id: String,
    pub batch_id: String,
    pub farmer_id: String,
    pub crop_type: String,
    pub quantity: f64,
    pub unit: String,
    pub location: String,
    pub quality: QualityGrade,
    pub status: HarvestStatus,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub approval_notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────
// Marketplace listing
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ListingStatus {
    Active,
    OutOfStock,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Listing {
    pub id: String,
    pub harvest_id: String,
    pub farmer_id: String,
    pub crop_type: String,
    pub unit: String,
    /// Price per unit.
    pub price: Money,
    pub description: Option<String>,
    pub quantity: f64,
    pub status: ListingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────
// Orders
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub total_amount: Money,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: String,
    pub listing_id: String,
    pub quantity: f64,
    pub unit_price: Money,
    pub amount: Money,
}

// ─────────────────────────────────────────────────────────
// Ledger transactions
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Transaction {
    pub id: String,
    pub reference: String,
    pub order_id: String,
    pub amount: Money,
    pub currency: String,
    pub status: TransactionStatus,
    pub provider: String,
    pub processed_at: Option<DateTime<Utc>>,
    pub metadata: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────
// Commissions
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Approved,
    Paid,
    Cancelled,
    Disputed,
}

impl CommissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }

    /// `paid` and `cancelled` admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Cancelled)
    }
}

/// What kind of activity earned the commission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TransactionType {
    MarketplaceSale,
    HarvestSale,
    FarmerOnboarding,
    LoanReferral,
    Other,
}

/// How a dispute was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DisputeResolution {
    /// The commission returns to the status it held before the dispute.
    Resolved,
    /// The commission is cancelled.
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Commission {
    pub id: String,
    pub partner_id: String,
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub transaction_type: TransactionType,
    pub transaction_amount: Money,
    /// Effective percentage applied, bonus included.
    pub rate: f64,
    pub amount: Money,
    pub status: CommissionStatus,
    pub due_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub paid_by: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_transaction_id: Option<String>,
    pub dispute_reason: Option<String>,
    pub disputed_by: Option<String>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub pre_dispute_status: Option<CommissionStatus>,
    pub resolution: Option<DisputeResolution>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generate a new opaque record identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Generate a short uppercase reference with the given prefix,
/// e.g. `GRO-3F9A0C12D4E5` for harvest batches.
pub fn new_reference(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4();
    format!("{prefix}-{}", hex::encode_upper(&id.as_bytes()[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_carry_prefix_and_twelve_hex_digits() {
        let r = new_reference("GRO");
        assert!(r.starts_with("GRO-"));
        let tail = &r[4..];
        assert_eq!(tail.len(), 12);
        assert!(tail.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_ne!(new_reference("GRO"), r);
    }

    #[test]
    fn statuses_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ListingStatus::OutOfStock).unwrap(),
            "\"out_of_stock\""
        );
        assert_eq!(
            serde_json::from_str::<TransactionType>("\"marketplace_sale\"").unwrap(),
            TransactionType::MarketplaceSale
        );
    }

    #[test]
    fn terminal_commission_statuses() {
        assert!(CommissionStatus::Paid.is_terminal());
        assert!(CommissionStatus::Cancelled.is_terminal());
        assert!(!CommissionStatus::Disputed.is_terminal());
        assert!(!CommissionStatus::Approved.is_terminal());
    }
}
