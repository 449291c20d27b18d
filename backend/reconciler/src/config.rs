//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::commission::TierTable;
use crate::errors::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Paystack API root (e.g. https://api.paystack.co)
    pub paystack_base_url: String,
    /// Paystack secret key; also the webhook signing secret
    pub paystack_secret_key: String,
    /// Where Paystack redirects the buyer after checkout
    pub callback_url: Option<String>,
    pub reconciler: ReconcilerConfig,
    /// Days between a commission's creation and its due date
    pub commission_due_days: i64,
    pub commission_tiers: TierTable,
}

/// Knobs of the periodic payment reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay between two reconciliation passes
    pub interval: Duration,
    /// Only transactions created within this window are re-checked
    pub lookback: Duration,
    /// Maximum transactions examined per pass
    pub batch_size: u32,
    /// Hard timeout on each provider verification call
    pub provider_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            lookback: Duration::from_secs(24 * 3600),
            batch_size: 50,
            provider_timeout: Duration::from_secs(8),
        }
    }
}

impl ReconcilerConfig {
    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(AppError::Config(
                "RECONCILE_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(AppError::Config(
                "RECONCILE_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        if self.provider_timeout.is_zero() || self.provider_timeout >= Duration::from_secs(10) {
            return Err(AppError::Config(
                "PROVIDER_TIMEOUT_SECS must be between 1 and 9".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let reconciler = ReconcilerConfig {
            interval: Duration::from_secs(parse_var("RECONCILE_INTERVAL_SECS", "30")?),
            lookback: lookback_hours(parse_var("RECONCILE_LOOKBACK_HOURS", "24")?)?,
            batch_size: parse_var("RECONCILE_BATCH_SIZE", "50")?,
            provider_timeout: Duration::from_secs(parse_var("PROVIDER_TIMEOUT_SECS", "8")?),
        };
        reconciler.validate()?;

        let commission_tiers = match env_var("COMMISSION_TIERS") {
            Ok(raw) => TierTable::from_json(&raw)?,
            Err(_) => TierTable::default(),
        };

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./grochain.db".to_string()),
            api_port: parse_var("API_PORT", "3001")?,
            paystack_base_url: env_var("PAYSTACK_BASE_URL")
                .unwrap_or_else(|_| "https://api.paystack.co".to_string()),
            paystack_secret_key: env_var("PAYSTACK_SECRET_KEY").map_err(|_| {
                AppError::Config("PAYSTACK_SECRET_KEY environment variable is required".to_string())
            })?,
            callback_url: env_var("PAYMENT_CALLBACK_URL").ok(),
            reconciler,
            commission_due_days: parse_var("COMMISSION_DUE_DAYS", "30")?,
            commission_tiers,
        })
    }
}

fn lookback_hours(hours: u64) -> Result<Duration> {
    hours
        .checked_mul(3600)
        .map(Duration::from_secs)
        .ok_or_else(|| AppError::Config("RECONCILE_LOOKBACK_HOURS is too large".to_string()))
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}

fn parse_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T> {
    env_var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| AppError::Config(format!("Invalid {key}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_var_falls_back_to_default() {
        let v: u32 = parse_var("GROCHAIN_TEST_SURELY_UNSET_VAR", "42").unwrap();
        assert_eq!(v, 42);
    }

    #[test]
    fn parse_var_rejects_garbage_default() {
        let err = parse_var::<u16>("GROCHAIN_TEST_SURELY_UNSET_VAR", "port").unwrap_err();
        assert!(matches!(err, AppError::Config(m) if m.contains("GROCHAIN_TEST_SURELY_UNSET_VAR")));
    }

    #[test]
    fn default_reconciler_window_is_bounded() {
        let cfg = ReconcilerConfig::default();
        assert!(cfg.provider_timeout < Duration::from_secs(10));
        assert_eq!(cfg.batch_size, 50);
        assert_eq!(cfg.lookback, Duration::from_secs(86_400));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = ReconcilerConfig {
            interval: Duration::ZERO,
            ..ReconcilerConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, AppError::Config(m) if m.contains("RECONCILE_INTERVAL_SECS")));
        assert!(ReconcilerConfig::default().validate().is_ok());
    }

    #[test]
    fn out_of_range_batch_and_timeout_are_rejected() {
        for cfg in [
            ReconcilerConfig {
                batch_size: 0,
                ..ReconcilerConfig::default()
            },
            ReconcilerConfig {
                provider_timeout: Duration::from_secs(10),
                ..ReconcilerConfig::default()
            },
        ] {
            assert!(matches!(cfg.validate(), Err(AppError::Config(_))));
        }
    }

    #[test]
    fn huge_lookback_is_a_config_error() {
        assert_eq!(lookback_hours(24).unwrap(), Duration::from_secs(86_400));
        assert!(matches!(lookback_hours(u64::MAX), Err(AppError::Config(_))));
    }
}
