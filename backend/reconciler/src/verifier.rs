//! Payment reconciliation — periodically re-checks pending ledger
//! transactions with the payment provider and settles the ones it reports
//! as paid.
//!
//! Webhooks from the provider are not guaranteed to arrive, so the
//! reconciler polls instead of trusting them:
//!
//! 1. select `pending` transactions created inside the look-back window,
//!    oldest first, at most `batch_size` of them;
//! 2. verify each one in turn (each call bounded by `provider_timeout`);
//! 3. for a paid charge, complete the transaction, then mark the order paid
//!    and release stock, then record partner commissions.
//!
//! Before that, each pass resumes completed transactions from the same
//! window whose order or commission step never ran, without asking the
//! provider again.
//!
//! Every write is conditional on the prior state, so a pass that overlaps a
//! webhook or a manual verify converges on the same final state. A record
//! whose provider call fails stays `pending` and is picked up next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::commission::CommissionLedger;
use crate::config::ReconcilerConfig;
use crate::db;
use crate::errors::{AppError, Result};
use crate::models::{Transaction, TransactionStatus};
use crate::provider::{PaymentProvider, Verification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    /// This call moved the transaction `pending → completed`.
    Completed,
    /// The transaction had already been completed; dependent records were
    /// re-checked.
    AlreadyCompleted,
    /// This call moved the transaction `pending → failed`.
    Failed,
    /// Left `pending` for a later pass.
    Pending,
    /// The transaction is terminal and the provider gave no reason to act.
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationOutcome {
    pub reference: String,
    pub settlement: Settlement,
    pub transaction_status: TransactionStatus,
    pub order_id: String,
    /// This call moved the order to paid.
    pub order_marked_paid: bool,
    pub commissions_created: usize,
    pub verification: Verification,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub started_at: Option<DateTime<Utc>>,
    /// Another pass was already running; nothing was done.
    pub skipped: bool,
    pub examined: usize,
    /// Completed transactions whose order or commission step was re-run.
    pub resumed: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
    pub elapsed_ms: u128,
}

/// Clears the in-flight flag when the pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PaymentVerifier {
    pool: SqlitePool,
    provider: Arc<dyn PaymentProvider>,
    ledger: CommissionLedger,
    config: ReconcilerConfig,
    in_flight: AtomicBool,
    last_pass: RwLock<Option<PassReport>>,
}

impl PaymentVerifier {
    pub fn new(
        pool: SqlitePool,
        provider: Arc<dyn PaymentProvider>,
        ledger: CommissionLedger,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            pool,
            provider,
            ledger,
            config,
            in_flight: AtomicBool::new(false),
            last_pass: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    pub fn pass_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub async fn last_pass(&self) -> Option<PassReport> {
        self.last_pass.read().await.clone()
    }

    /// Ask the provider about `reference`, giving up after the configured
    /// timeout. Never fails.
    pub async fn verify_with_provider(&self, reference: &str) -> Verification {
        match tokio::time::timeout(self.config.provider_timeout, self.provider.verify(reference))
            .await
        {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    "Provider verification for {reference} timed out after {:?}",
                    self.config.provider_timeout
                );
                Verification::unavailable(format!(
                    "provider timed out after {}ms",
                    self.config.provider_timeout.as_millis()
                ))
            }
        }
    }

    /// One reconciliation pass. Returns a skipped report when another pass
    /// is still running.
    pub async fn run_reconciliation_pass(&self) -> PassReport {
        let Some(_guard) = PassGuard::acquire(&self.in_flight) else {
            info!("Reconciliation pass already in flight; skipping");
            return PassReport {
                started_at: Some(Utc::now()),
                skipped: true,
                ..PassReport::default()
            };
        };

        let started = Instant::now();
        let now = Utc::now();
        let mut report = PassReport {
            started_at: Some(now),
            ..PassReport::default()
        };

        let lookback =
            chrono::Duration::from_std(self.config.lookback).unwrap_or(chrono::Duration::hours(24));
        let since = now
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match db::transactions::unsettled_since(&self.pool, since, self.config.batch_size).await {
            Ok(rows) => {
                for tx in &rows {
                    match self.finish_settlement(tx, now).await {
                        Ok(_) => {
                            info!("Resumed settlement of {}", tx.reference);
                            report.resumed += 1;
                        }
                        Err(e) => {
                            warn!("Resuming {} failed, will retry next pass: {e}", tx.reference);
                            report.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Reconciliation pass could not load unsettled transactions: {e}");
                report.errors += 1;
            }
        }

        let candidates =
            match db::transactions::pending_since(&self.pool, since, self.config.batch_size).await
            {
                Ok(rows) => rows,
                Err(e) => {
                    error!("Reconciliation pass could not load pending transactions: {e}");
                    report.errors += 1;
                    report.elapsed_ms = started.elapsed().as_millis();
                    *self.last_pass.write().await = Some(report.clone());
                    return report;
                }
            };

        for tx in &candidates {
            report.examined += 1;
            match self.reconcile(tx).await {
                Ok(outcome) => match outcome.settlement {
                    Settlement::Completed | Settlement::AlreadyCompleted => report.completed += 1,
                    Settlement::Failed => report.failed += 1,
                    Settlement::Pending | Settlement::Unchanged => report.still_pending += 1,
                },
                Err(e) => {
                    warn!("Reconciliation of {} failed, will retry next pass: {e}", tx.reference);
                    report.errors += 1;
                }
            }
        }

        report.elapsed_ms = started.elapsed().as_millis();
        info!(
            "Reconciliation pass: examined={} resumed={} completed={} failed={} pending={} errors={} ({}ms)",
            report.examined,
            report.resumed,
            report.completed,
            report.failed,
            report.still_pending,
            report.errors,
            report.elapsed_ms
        );
        *self.last_pass.write().await = Some(report.clone());
        report
    }

    /// Operator-triggered check of a single reference.
    pub async fn verify_reference(&self, reference: &str) -> Result<VerificationOutcome> {
        let tx = db::transactions::get_by_reference(&self.pool, reference)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {reference} not found")))?;
        self.reconcile(&tx).await
    }

    async fn reconcile(&self, tx: &Transaction) -> Result<VerificationOutcome> {
        let verification = self.verify_with_provider(&tx.reference).await;
        self.apply(tx, verification).await
    }

    async fn apply(&self, tx: &Transaction, v: Verification) -> Result<VerificationOutcome> {
        let now = Utc::now();
        let mut order_marked_paid = false;
        let mut commissions_created = 0;

        let settlement = if v.success && v.paid {
            let metadata = self.verification_metadata(tx, &v, now);
            let newly = db::transactions::finish_pending(
                &self.pool,
                &tx.reference,
                TransactionStatus::Completed,
                &metadata,
                now,
            )
            .await?;

            let current = self.current_status(&tx.reference).await?;
            if current == TransactionStatus::Completed {
                // Runs on every call so an interrupted settlement converges.
                (order_marked_paid, commissions_created) =
                    self.finish_settlement(tx, now).await?;
                if newly {
                    info!("Transaction {} completed", tx.reference);
                    Settlement::Completed
                } else {
                    Settlement::AlreadyCompleted
                }
            } else {
                warn!(
                    "Provider reports {} paid but the ledger has it {:?}; leaving it alone",
                    tx.reference, current
                );
                Settlement::Unchanged
            }
        } else if v.is_failed() {
            let metadata = self.verification_metadata(tx, &v, now);
            let newly = db::transactions::finish_pending(
                &self.pool,
                &tx.reference,
                TransactionStatus::Failed,
                &metadata,
                now,
            )
            .await?;
            if newly {
                db::orders::mark_payment_failed(&self.pool, &tx.order_id, now).await?;
                info!("Transaction {} failed at the provider", tx.reference);
                Settlement::Failed
            } else {
                Settlement::Unchanged
            }
        } else if tx.status == TransactionStatus::Pending {
            if !v.success {
                warn!(
                    "Could not verify {}: {}",
                    tx.reference,
                    v.message.as_deref().unwrap_or("unknown error")
                );
            }
            Settlement::Pending
        } else {
            Settlement::Unchanged
        };

        Ok(VerificationOutcome {
            reference: tx.reference.clone(),
            settlement,
            transaction_status: self.current_status(&tx.reference).await?,
            order_id: tx.order_id.clone(),
            order_marked_paid,
            commissions_created,
            verification: v,
        })
    }

    /// Order and commission steps of a settlement. Both are conditional on
    /// prior state, so re-running them is safe.
    async fn finish_settlement(&self, tx: &Transaction, now: DateTime<Utc>) -> Result<(bool, usize)> {
        let order_marked_paid =
            db::orders::mark_paid_and_release_stock(&self.pool, &tx.order_id, &tx.reference, now)
                .await?;
        let commissions_created = self.record_commissions(tx).await?;
        Ok((order_marked_paid, commissions_created))
    }

    /// One commission per verifying partner, only when this transaction is
    /// the one that paid the order.
    async fn record_commissions(&self, tx: &Transaction) -> Result<usize> {
        let Some(order) = db::orders::get_order(&self.pool, &tx.order_id).await? else {
            return Ok(0);
        };
        if order.payment_reference.as_deref() != Some(tx.reference.as_str()) {
            warn!(
                "Transaction {} completed but order {} was paid by {:?}; no commission",
                tx.reference, order.id, order.payment_reference
            );
            return Ok(0);
        }

        let mut created = 0;
        for (partner_id, share) in db::orders::partner_shares(&self.pool, &order.id).await? {
            if self.ledger.record_sale(&partner_id, tx, share).await?.is_some() {
                created += 1;
            }
        }
        Ok(created)
    }

    async fn current_status(&self, reference: &str) -> Result<TransactionStatus> {
        db::transactions::get_by_reference(&self.pool, reference)
            .await?
            .map(|t| t.status)
            .ok_or_else(|| AppError::NotFound(format!("transaction {reference} not found")))
    }

    fn verification_metadata(
        &self,
        tx: &Transaction,
        v: &Verification,
        now: DateTime<Utc>,
    ) -> serde_json::Value {
        // Both sides are kobo: the ledger stores minor units and Paystack
        // reports `data.amount` in the currency's subunit, so a ₦500.00 order
        // matches a provider amount of 50000.
        let amount_mismatch = v.amount.is_some_and(|a| a != tx.amount.minor());
        if amount_mismatch {
            warn!(
                "Amount mismatch on {}: ledger {} kobo, provider {:?} kobo",
                tx.reference,
                tx.amount.minor(),
                v.amount
            );
        }
        json!({
            "verification": {
                "provider": self.provider.name(),
                "provider_status": v.provider_status,
                "amount": v.amount,
                "amount_mismatch": amount_mismatch,
                "verified_at": now,
                "data": v.payload,
            }
        })
    }
}

// ─────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────

struct RunningTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcilerStatus {
    pub scheduled: bool,
    pub pass_in_flight: bool,
    pub interval_secs: u64,
    pub lookback_secs: u64,
    pub batch_size: u32,
    pub provider_timeout_ms: u128,
    pub last_pass: Option<PassReport>,
}

/// Owns the periodic reconciliation task. Created once by `main` and shared
/// with the admin API.
pub struct Reconciler {
    verifier: Arc<PaymentVerifier>,
    task: Mutex<Option<RunningTask>>,
}

impl Reconciler {
    pub fn new(verifier: Arc<PaymentVerifier>) -> Self {
        Self {
            verifier,
            task: Mutex::new(None),
        }
    }

    pub fn verifier(&self) -> &Arc<PaymentVerifier> {
        &self.verifier
    }

    /// Schedule passes every `interval`, the first one immediately.
    /// Returns `false` when already scheduled, and an error when the
    /// configuration cannot be scheduled.
    pub async fn start(&self) -> Result<bool> {
        self.verifier.config().validate()?;
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Ok(false);
        }

        let token = CancellationToken::new();
        let verifier = Arc::clone(&self.verifier);
        let interval = verifier.config().interval;
        info!("Reconciler starting — every {interval:?}");
        let handle = tokio::spawn(run_loop(verifier, interval, token.clone()));
        *task = Some(RunningTask { token, handle });
        Ok(true)
    }

    /// Stop scheduling passes and wait for the loop to exit. An in-flight
    /// pass finishes first; its provider calls are bounded by the timeout.
    /// Returns `false` when nothing was scheduled.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.task.lock().await.take() else {
            return false;
        };
        running.token.cancel();
        if let Err(e) = running.handle.await {
            error!("Reconciler task ended abnormally: {e}");
        }
        info!("Reconciler stopped");
        true
    }

    pub async fn status(&self) -> ReconcilerStatus {
        let scheduled = self
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished());
        let cfg = self.verifier.config();
        ReconcilerStatus {
            scheduled,
            pass_in_flight: self.verifier.pass_in_flight(),
            interval_secs: cfg.interval.as_secs(),
            lookback_secs: cfg.lookback.as_secs(),
            batch_size: cfg.batch_size,
            provider_timeout_ms: cfg.provider_timeout.as_millis(),
            last_pass: self.verifier.last_pass().await,
        }
    }
}

async fn run_loop(verifier: Arc<PaymentVerifier>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                verifier.run_reconciliation_pass().await;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────
