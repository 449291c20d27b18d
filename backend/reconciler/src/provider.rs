//! Payment provider client — Paystack transaction verification,
//! initialisation and webhook signatures.
//!
//! ## Contract
//!
//! * [`PaymentProvider::verify`] never returns an error: network failures,
//!   non-2xx responses and undecodable bodies all come back as a
//!   [`Verification`] with `success == false`, so one bad record cannot abort
//!   a reconciliation pass.
//! * A transaction counts as paid iff the provider reports
//!   `data.status == "success"`.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha512;
use tracing::{debug, warn};

use crate::errors::{AppError, Result};
use crate::money::Money;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

// ─────────────────────────────────────────────────────────
// Normalised shapes
// ─────────────────────────────────────────────────────────

/// Provider answer for one reference, reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    /// The provider was reached and answered with a well-formed body.
    pub success: bool,
    /// The provider reports the charge as settled.
    pub paid: bool,
    pub provider_status: Option<String>,
    /// Amount in minor units, as reported by the provider.
    pub amount: Option<i64>,
    pub reference: Option<String>,
    pub message: Option<String>,
    /// Provider `data` object, merged into the transaction metadata.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Verification {
    /// The provider could not be asked or did not answer usefully.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            success: false,
            paid: false,
            provider_status: None,
            amount: None,
            reference: None,
            message: Some(message.into()),
            payload: Value::Null,
        }
    }

    /// The provider declared the charge failed for good.
    pub fn is_failed(&self) -> bool {
        self.success && !self.paid && self.provider_status.as_deref() == Some("failed")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInit {
    pub reference: String,
    pub email: String,
    pub amount: Money,
    pub currency: String,
    pub order_id: String,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub authorization_url: String,
    pub access_code: Option<String>,
    pub reference: String,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Short provider name stored on each transaction.
    fn name(&self) -> &'static str;

    async fn verify(&self, reference: &str) -> Verification;

    async fn initialize(&self, init: &PaymentInit) -> Result<PaymentSession>;
}

// ─────────────────────────────────────────────────────────
// Paystack wire shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct VerifyResponse {
    /// Paystack sends a boolean; some proxies and fixtures send `"success"`.
    pub status: Value,
    pub message: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: Value,
    message: Option<String>,
    data: Option<InitializeData>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: Option<String>,
    reference: String,
}

fn is_ok_status(v: &Value) -> bool {
    matches!(v, Value::Bool(true)) || v.as_str() == Some("success")
}

/// Reduce a decoded verify response to a [`Verification`].
pub fn normalize(body: VerifyResponse) -> Verification {
    if !is_ok_status(&body.status) {
        return Verification {
            message: body.message.or_else(|| Some("provider rejected the request".into())),
            ..Verification::unavailable("")
        };
    }
    let data = body.data.unwrap_or(Value::Null);
    let provider_status = data
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string);
    let amount = data.get("amount").and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().map(|f| f.round() as i64))
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    });
    let reference = data
        .get("reference")
        .and_then(Value::as_str)
        .map(str::to_string);

    Verification {
        success: true,
        paid: provider_status.as_deref() == Some("success"),
        provider_status,
        amount,
        reference,
        message: body.message,
        payload: data,
    }
}

/// References we generate are `[A-Za-z0-9._-]`; anything else never goes on
/// the wire.
fn is_safe_reference(reference: &str) -> bool {
    !reference.is_empty()
        && reference.len() <= 100
        && reference
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

// ─────────────────────────────────────────────────────────
// Paystack client
// ─────────────────────────────────────────────────────────

pub struct Paystack {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl Paystack {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentProvider for Paystack {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn verify(&self, reference: &str) -> Verification {
        if !is_safe_reference(reference) {
            return Verification::unavailable(format!("refusing to verify malformed reference {reference:?}"));
        }
        let url = format!("{}/transaction/verify/{reference}", self.base_url);

        let response = match self
            .client
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Paystack verify request for {reference} failed: {e}");
                return Verification::unavailable(e.to_string());
            }
        };

        let status = response.status();
        match response.json::<VerifyResponse>().await {
            Ok(body) => {
                let v = normalize(body);
                debug!(
                    "Paystack verify {reference}: http={status} success={} paid={} status={:?}",
                    v.success, v.paid, v.provider_status
                );
                v
            }
            Err(e) => {
                warn!("Paystack verify response for {reference} undecodable (http {status}): {e}");
                Verification::unavailable(format!("undecodable provider response (http {status})"))
            }
        }
    }

    async fn initialize(&self, init: &PaymentInit) -> Result<PaymentSession> {
        let mut body = json!({
            "email": init.email,
            "amount": init.amount.minor(),
            "currency": init.currency,
            "reference": init.reference,
            "metadata": { "order_id": init.order_id },
        });
        if let Some(cb) = &init.callback_url {
            body["callback_url"] = json!(cb);
        }

        let resp: InitializeResponse = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !is_ok_status(&resp.status) {
            return Err(AppError::Provider(
                resp.message
                    .unwrap_or_else(|| "payment initialisation rejected".to_string()),
            ));
        }
        let data = resp
            .data
            .ok_or_else(|| AppError::Provider("empty initialisation response".to_string()))?;
        Ok(PaymentSession {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Webhooks
// ─────────────────────────────────────────────────────────

/// Check `x-paystack-signature`: hex HMAC-SHA512 of the raw body keyed with
/// the secret key. Comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl WebhookEvent {
    /// Reference of a `charge.success` event, if that is what this is.
    pub fn successful_charge_reference(&self) -> Option<&str> {
        if self.event != "charge.success" {
            return None;
        }
        self.data.get("reference").and_then(Value::as_str)
    }
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
