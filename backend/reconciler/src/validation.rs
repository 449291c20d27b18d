//! Request schemas and the extractors that enforce them.
//!
//! Every body or query string is deserialised and validated here before any
//! handler logic runs, so a malformed request never reaches the database.

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
    Json,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::errors::AppError;
use crate::models::{CommissionStatus, DisputeResolution, QualityGrade, TransactionType};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────

/// `Json<T>` that also runs `T::validate()`; both failures become
/// `AppError::Validation`.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        value
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok(ValidatedJson(value))
    }
}

/// `Query<T>` that also runs `T::validate()`.
pub struct ValidatedQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;
        value
            .validate()
            .map_err(|e| AppError::Validation(e.to_string()))?;
        Ok(ValidatedQuery(value))
    }
}

// ─────────────────────────────────────────────────────────
// Pagination and date ranges
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Deserialize, Validate)]
pub struct PageQuery {
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1))]
    pub limit: Option<u32>,
}

impl PageQuery {
    /// `(limit, offset)` with `limit` clamped to [`MAX_PAGE_SIZE`].
    pub fn resolve(&self) -> (u32, u32) {
        resolve_page(self.page, self.limit)
    }
}

pub fn resolve_page(page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let page = page.unwrap_or(1).max(1);
    (limit, (page - 1).saturating_mul(limit))
}

/// A date range filter is only meaningful when `end_date > start_date`.
pub fn check_period(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ValidationError> {
    match (start, end) {
        (Some(s), Some(e)) if e <= s => {
            let mut err = ValidationError::new("date_range");
            err.message = Some("endDate must be after startDate".into());
            Err(err)
        }
        _ => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────
// Harvests and listings
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitHarvestRequest {
    #[validate(length(min = 1, max = 64))]
    pub crop_type: String,
    #[validate(range(exclusive_min = 0.0, max = 1_000_000_000.0))]
    pub quantity: f64,
    #[validate(length(min = 1, max = 16))]
    pub unit: String,
    #[validate(length(min = 1, max = 128))]
    pub location: String,
    pub quality: QualityGrade,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OnboardFarmerRequest {
    #[validate(length(min = 1, max = 128))]
    pub farmer_id: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApproveHarvestRequest {
    pub quality: QualityGrade,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectHarvestRequest {
    #[validate(length(min = 1, max = 1000))]
    pub rejection_reason: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateListingRequest {
    #[validate(range(exclusive_min = 0.0, max = 1_000_000_000_000.0))]
    pub price: f64,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Orders and payments
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, serde::Serialize, Validate)]
pub struct OrderItemRequest {
    #[validate(length(min = 1, max = 128))]
    pub listing_id: String,
    #[validate(range(exclusive_min = 0.0, max = 1_000_000_000.0))]
    pub quantity: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, max = 50), nested)]
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct InitializePaymentRequest {
    #[validate(length(min = 1, max = 128))]
    pub order_id: String,
    #[validate(email)]
    pub email: String,
}

// ─────────────────────────────────────────────────────────
// Commissions
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCommissionRequest {
    #[validate(length(min = 1, max = 128))]
    pub partner_id: String,
    #[validate(length(min = 1, max = 128))]
    pub transaction_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub order_id: Option<String>,
    pub transaction_type: TransactionType,
    #[validate(range(exclusive_min = 0.0, max = 1_000_000_000_000.0))]
    pub transaction_amount: f64,
    /// Overrides the tier rate when given.
    #[validate(range(min = 0.0, max = 100.0))]
    pub commission_rate: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateCommissionRequest {
    #[validate(range(min = 0.0, max = 100.0))]
    pub commission_rate: Option<f64>,
    pub due_date: Option<DateTime<Utc>>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CalculateCommissionRequest {
    #[validate(length(min = 1, max = 128))]
    pub partner_id: String,
    #[validate(range(exclusive_min = 0.0, max = 1_000_000_000_000.0))]
    pub transaction_amount: f64,
    pub transaction_type: TransactionType,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PayCommissionRequest {
    #[validate(length(min = 1, max = 128))]
    pub payment_transaction_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DisputeCommissionRequest {
    #[validate(length(min = 1, max = 1000))]
    pub reason: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResolveDisputeRequest {
    pub resolution: DisputeResolution,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "validate_commission_period"))]
pub struct ListCommissionsQuery {
    #[serde(alias = "partner_id")]
    pub partner_id: Option<String>,
    pub status: Option<CommissionStatus>,
    #[serde(alias = "start_date")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(alias = "end_date")]
    pub end_date: Option<DateTime<Utc>>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1))]
    pub limit: Option<u32>,
}

fn validate_commission_period(q: &ListCommissionsQuery) -> Result<(), ValidationError> {
    check_period(q.start_date, q.end_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn limit_is_clamped_to_one_hundred() {
        assert_eq!(resolve_page(None, None), (DEFAULT_PAGE_SIZE, 0));
        assert_eq!(resolve_page(Some(1), Some(500)), (100, 0));
        assert_eq!(resolve_page(Some(3), Some(10)), (10, 20));
        assert_eq!(resolve_page(Some(0), Some(0)), (1, 0));
    }

    #[test]
    fn end_date_must_follow_start_date() {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert!(check_period(Some(start), Some(end)).is_ok());
        assert!(check_period(Some(end), Some(start)).is_err());
        assert!(check_period(Some(start), Some(start)).is_err());
        assert!(check_period(None, Some(start)).is_ok());

        let q = ListCommissionsQuery {
            start_date: Some(end),
            end_date: Some(start),
            ..Default::default()
        };
        assert!(q.validate().is_err());
    }

    #[test]
    fn commission_rate_is_bounded() {
        let mut req: CreateCommissionRequest = serde_json::from_value(serde_json::json!({
            "partner_id": "p1",
            "transaction_type": "marketplace_sale",
            "transaction_amount": 1000.0,
            "commission_rate": 100.0
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        req.commission_rate = Some(100.5);
        assert!(req.validate().is_err());
        req.commission_rate = Some(-1.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn amounts_must_be_positive() {
        let req: CalculateCommissionRequest = serde_json::from_value(serde_json::json!({
            "partner_id": "p1",
            "transaction_type": "harvest_sale",
            "transaction_amount": 0.0
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let listing: CreateListingRequest =
            serde_json::from_value(serde_json::json!({ "price": -5.0 })).unwrap();
        assert!(listing.validate().is_err());
    }

    #[test]
    fn unknown_enum_values_fail_to_deserialize() {
        let res = serde_json::from_value::<CalculateCommissionRequest>(serde_json::json!({
            "partner_id": "p1",
            "transaction_type": "lottery",
            "transaction_amount": 10.0
        }));
        assert!(res.is_err());
    }

    #[test]
    fn reject_reason_is_required() {
        assert!(serde_json::from_value::<RejectHarvestRequest>(serde_json::json!({})).is_err());
        let empty: RejectHarvestRequest =
            serde_json::from_value(serde_json::json!({ "rejectionReason": "" })).unwrap();
        assert!(empty.validate().is_err());
    }

    #[test]
    fn orders_need_at_least_one_valid_item() {
        let empty = CreateOrderRequest { items: vec![] };
        assert!(empty.validate().is_err());

        let bad_qty = CreateOrderRequest {
            items: vec![OrderItemRequest {
                listing_id: "l1".into(),
                quantity: 0.0,
            }],
        };
        assert!(bad_qty.validate().is_err());
    }
}
