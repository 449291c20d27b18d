//! GroChain reconciler — entry point.
//!
//! Runs the harvest-to-market service: a background task that polls Paystack
//! to settle pending payments, and an Axum REST API for the harvest approval
//! gate, listings, checkout and partner commissions.

mod api;
mod approval;
mod auth;
mod checkout;
mod commission;
mod config;
mod db;
mod errors;
mod listings;
mod models;
mod money;
mod provider;
mod validation;
mod verifier;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use provider::{PaymentProvider, Paystack};
use verifier::{PaymentVerifier, Reconciler};

#[derive(Parser)]
#[command(name = "reconciler")]
#[command(about = "GroChain harvest-to-market service and payment reconciler")]
#[command(
    after_help = "Environment:\n  DATABASE_URL          SQLite database (default sqlite:./grochain.db)\n  PAYSTACK_SECRET_KEY   Paystack secret key (required for start/verify)\n  RUST_LOG              Log verbosity"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciler and the REST API until Ctrl-C.
    Start {
        /// Only run the reconciler, without the REST API.
        #[arg(long, default_value_t = false)]
        no_api: bool,
    },
    /// Ask a running service to stop its reconciler.
    Stop {
        #[arg(long, env = "RECONCILER_URL", default_value = "http://127.0.0.1:3001")]
        url: String,
        #[arg(long, env = "RECONCILER_ADMIN_ID", default_value = "cli")]
        admin_id: String,
    },
    /// Verify one payment reference now and print the outcome.
    Verify { reference: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    match Cli::parse().command {
        Command::Start { no_api } => start(no_api).await,
        Command::Stop { url, admin_id } => stop(&url, &admin_id).await,
        Command::Verify { reference } => verify(&reference).await,
    }
}

struct Services {
    config: Config,
    pool: SqlitePool,
    provider: Arc<dyn PaymentProvider>,
    ledger: commission::CommissionLedger,
    verifier: Arc<PaymentVerifier>,
}

async fn services() -> anyhow::Result<Services> {
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    let provider: Arc<dyn PaymentProvider> = Arc::new(Paystack::new(
        &config.paystack_base_url,
        &config.paystack_secret_key,
        config.reconciler.provider_timeout,
    )?);
    let ledger = commission::CommissionLedger::new(
        pool.clone(),
        Arc::new(config.commission_tiers.clone()),
        config.commission_due_days,
    );
    let verifier = Arc::new(PaymentVerifier::new(
        pool.clone(),
        provider.clone(),
        ledger.clone(),
        config.reconciler.clone(),
    ));

    Ok(Services {
        config,
        pool,
        provider,
        ledger,
        verifier,
    })
}

async fn start(no_api: bool) -> anyhow::Result<()> {
    let Services {
        config,
        pool,
        provider,
        ledger,
        verifier,
    } = services().await?;

    // ─── Background reconciler ────────────────────────────
    let reconciler = Arc::new(Reconciler::new(verifier.clone()));
    reconciler.start().await?;

    if no_api {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested");
        reconciler.stop().await;
        return Ok(());
    }

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        pool: pool.clone(),
        approvals: approval::ApprovalGate::new(pool.clone()),
        listings: listings::ListingPublisher::new(pool.clone()),
        checkout: checkout::Checkout::new(
            pool,
            provider,
            verifier,
            config.paystack_secret_key.clone(),
            config.callback_url.clone(),
        ),
        commissions: ledger,
        reconciler: reconciler.clone(),
    });

    let app = api::router(api_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    reconciler.stop().await;
    Ok(())
}

async fn stop(url: &str, admin_id: &str) -> anyhow::Result<()> {
    let endpoint = format!("{}/admin/reconciler/stop", url.trim_end_matches('/'));
    let response = reqwest::Client::new()
        .post(&endpoint)
        .header(auth::USER_ID_HEADER, admin_id)
        .header(auth::USER_ROLE_HEADER, "admin")
        .send()
        .await?;

    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    if !status.is_success() {
        anyhow::bail!("{endpoint} answered {status}: {body}");
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn verify(reference: &str) -> anyhow::Result<()> {
    let services = services().await?;
    let outcome = services.verifier.verify_reference(reference).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
