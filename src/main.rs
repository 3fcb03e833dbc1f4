//! OpenSASE Fulfillment - order pricing and fulfillment service

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use opensase_fulfillment::adapters::{InMemoryOrderStore, NatsNotifier, PgOrderStore, SandboxPaymentGateway, TracingNotifier};
use opensase_fulfillment::config::{AppConfig, Collaborators, FulfillmentConfig};
use opensase_fulfillment::fulfillment::sweeper;
use opensase_fulfillment::ports::{Notifier, OrderStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let fulfillment = match &config.fulfillment_config {
        Some(path) => FulfillmentConfig::load(path)?,
        None => FulfillmentConfig::builtin()?,
    };
    tracing::info!(
        products = fulfillment.products.len(),
        warehouses = fulfillment.warehouses.len(),
        currency = %fulfillment.currency,
        "fulfillment config loaded"
    );

    let store: Arc<dyn OrderStore> = match &config.database_url {
        Some(url) => Arc::new(PgOrderStore::connect(url, config.db_max_connections).await.context("connecting to postgres")?),
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory");
            Arc::new(InMemoryOrderStore::new())
        }
    };
    let notifier: Arc<dyn Notifier> = match &config.nats_url {
        Some(url) => match NatsNotifier::connect(url, config.nats_subject_prefix.clone()).await {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                tracing::warn!(error = %e, "NATS unavailable, events will only be logged");
                Arc::new(TracingNotifier)
            }
        },
        None => Arc::new(TracingNotifier),
    };

    let manager = fulfillment.assemble(
        &config,
        Collaborators { payments: Arc::new(SandboxPaymentGateway::new()), store, notifier },
    )?;
    let restored = manager.restore_commitments().await.context("restoring committed stock")?;
    tracing::info!(restored, "inventory rebuilt from confirmed orders");
    let sweeper = sweeper::spawn(manager.clone(), config.sweep_interval);
    let app = opensase_fulfillment::api::router(manager);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("🚀 OpenSASE Fulfillment listening on {}", addr);
    axum::serve(tokio::net::TcpListener::bind(&addr).await?, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown requested");
        })
        .await?;

    sweeper.shutdown().await;
    Ok(())
}
