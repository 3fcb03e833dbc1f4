//! Runtime configuration.
//!
//! ## Environment Variables
//! - `PORT`: HTTP port (default: 8083)
//! - `DATABASE_URL`: Postgres connection string; orders are kept in memory when unset
//! - `DB_MAX_CONNECTIONS`: Postgres pool size (default: 10)
//! - `NATS_URL`: NATS server for event notifications; events are logged when unset
//! - `NATS_SUBJECT_PREFIX`: subject prefix for published events (default: "fulfillment")
//! - `RESERVATION_TTL_SECS`: how long stock is held for an unconfirmed order (default: 900)
//! - `SWEEP_INTERVAL_SECS`: how often expired holds are released (default: 30)
//! - `PAYMENT_TIMEOUT_MS`: bound on a single charge call (default: 5000)
//! - `FULFILLMENT_CONFIG`: JSON file with catalog, warehouses, tiers and rates;
//!   the bundled `config/fulfillment.json` is used when unset

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use crate::adapters::InMemoryCatalog;
use crate::domain::aggregates::{Product, Warehouse};
use crate::domain::value_objects::{ProductId, WarehouseId};
use crate::fulfillment::inventory::InventoryReservationCoordinator;
use crate::fulfillment::manager::{ManagerDeps, ManagerPolicies, OrderTransactionManager};
use crate::fulfillment::pricing::{PricingEngine, PricingTier, TierTable};
use crate::fulfillment::retry::{RetryPolicy, RetrySettings};
use crate::fulfillment::routing::{SplitPolicy, WarehouseRouter};
use crate::fulfillment::tax_shipping::{RegionRates, TaxShippingCalculator};
use crate::ports::{Notifier, OrderStore, PaymentGateway};

const BUILTIN_CONFIG: &str = include_str!("../config/fulfillment.json");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    Env { name: &'static str, value: String },
    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("malformed fulfillment config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid fulfillment config: {0}")]
    Invalid(String),
}

// =============================================================================
// Process configuration
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub nats_url: Option<String>,
    pub nats_subject_prefix: String,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub payment_timeout: Duration,
    pub fulfillment_config: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8083,
            database_url: None,
            db_max_connections: 10,
            nats_url: None,
            nats_subject_prefix: "fulfillment".into(),
            reservation_ttl: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(30),
            payment_timeout: Duration::from_millis(5_000),
            fulfillment_config: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> { Self::from_lookup(|name| std::env::var(name).ok()) }

    /// Builds the configuration from any variable source; unset or blank values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();
        Ok(Self {
            port: parse(&get, "PORT")?.unwrap_or(defaults.port),
            database_url: get("DATABASE_URL"),
            db_max_connections: parse(&get, "DB_MAX_CONNECTIONS")?.unwrap_or(defaults.db_max_connections),
            nats_url: get("NATS_URL"),
            nats_subject_prefix: get("NATS_SUBJECT_PREFIX").unwrap_or(defaults.nats_subject_prefix),
            reservation_ttl: parse(&get, "RESERVATION_TTL_SECS")?.map(Duration::from_secs).unwrap_or(defaults.reservation_ttl),
            sweep_interval: parse(&get, "SWEEP_INTERVAL_SECS")?.map(Duration::from_secs).unwrap_or(defaults.sweep_interval),
            payment_timeout: parse(&get, "PAYMENT_TIMEOUT_MS")?.map(Duration::from_millis).unwrap_or(defaults.payment_timeout),
            fulfillment_config: get("FULFILLMENT_CONFIG").map(PathBuf::from),
        })
    }

    pub fn reservation_ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.reservation_ttl).unwrap_or_else(|_| chrono::Duration::minutes(15))
    }
}

fn parse<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    match get(name) {
        None => Ok(None),
        Some(value) => value.parse().map(Some).map_err(|_| ConfigError::Env { name, value }),
    }
}

// =============================================================================
// Business configuration
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockEntry {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub on_hand: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub payment: RetrySettings,
    pub persistence: RetrySettings,
    pub refund: RetrySettings,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            payment: RetrySettings::new(3, 200, 2_000),
            persistence: RetrySettings::new(3, 100, 1_000),
            refund: RetrySettings::new(5, 500, 10_000),
        }
    }
}

fn default_split() -> bool { true }

/// Catalog, warehouses, tiers and regional rates. The tier table here is the
/// only one the service uses, for both previews and orders.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentConfig {
    pub currency: String,
    pub products: Vec<Product>,
    pub warehouses: Vec<Warehouse>,
    #[serde(default)]
    pub stock: Vec<StockEntry>,
    pub pricing_tiers: Vec<PricingTier>,
    pub regions: Vec<RegionRates>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_split")]
    pub split_shipments: bool,
}

impl FulfillmentConfig {
    /// The bundled configuration.
    pub fn builtin() -> Result<Self, ConfigError> { Self::parse(BUILTIN_CONFIG) }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return invalid(format!("currency {:?} is not an ISO 4217 code", self.currency));
        }

        let mut products = HashSet::new();
        for product in &self.products {
            if !products.insert(product.id()) {
                return invalid(format!("product {} listed twice", product.id()));
            }
            if product.unit_price() <= 0 {
                return invalid(format!("product {} has a non-positive price", product.id()));
            }
        }

        let tax_shipping = self.tax_shipping()?;
        let mut warehouses = HashSet::new();
        for warehouse in &self.warehouses {
            if !warehouses.insert(warehouse.id()) {
                return invalid(format!("warehouse {} listed twice", warehouse.id()));
            }
            if warehouse.currency() != self.currency {
                return invalid(format!("warehouse {} trades in {}, not {}", warehouse.id(), warehouse.currency(), self.currency));
            }
            if let Some(region) = warehouse.serviceable_regions().iter().find(|r| !tax_shipping.supports(r)) {
                return invalid(format!("warehouse {} serves {region}, which has no tax or shipping rates", warehouse.id()));
            }
        }

        for entry in &self.stock {
            if !products.contains(&entry.product_id) || !warehouses.contains(&entry.warehouse_id) {
                return invalid(format!("stock entry {}@{} references an unknown product or warehouse", entry.product_id, entry.warehouse_id));
            }
        }

        self.tier_table()?;
        Ok(())
    }

    pub fn tier_table(&self) -> Result<TierTable, ConfigError> {
        TierTable::new(self.pricing_tiers.clone()).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn tax_shipping(&self) -> Result<TaxShippingCalculator, ConfigError> {
        TaxShippingCalculator::new(self.regions.clone()).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn pricing(&self) -> Result<PricingEngine, ConfigError> { Ok(PricingEngine::new(self.tier_table()?)) }

    pub fn catalog(&self) -> InMemoryCatalog { InMemoryCatalog::new(&self.currency, self.products.clone()) }

    pub fn router(&self) -> WarehouseRouter { WarehouseRouter::new(self.warehouses.clone()) }

    /// Loads opening stock into the coordinator.
    pub fn seed(&self, inventory: &InventoryReservationCoordinator) -> Result<(), ConfigError> {
        for entry in &self.stock {
            inventory
                .restock(&entry.product_id, &entry.warehouse_id, entry.on_hand)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    pub fn policies(&self, payment_timeout: Duration) -> ManagerPolicies {
        ManagerPolicies {
            payment_retry: RetryPolicy::from(&self.retry.payment),
            persistence_retry: RetryPolicy::from(&self.retry.persistence),
            refund_retry: RetryPolicy::from(&self.retry.refund),
            payment_timeout,
            split_policy: if self.split_shipments { SplitPolicy::AllowSplit } else { SplitPolicy::SingleWarehouse },
        }
    }

    /// Wires a manager from this configuration and the chosen collaborators,
    /// with opening stock loaded.
    pub fn assemble(&self, app: &AppConfig, collaborators: Collaborators) -> Result<OrderTransactionManager, ConfigError> {
        let inventory = Arc::new(InventoryReservationCoordinator::new(app.reservation_ttl()));
        self.seed(&inventory)?;
        Ok(OrderTransactionManager::new(ManagerDeps {
            catalog: Arc::new(self.catalog()),
            router: self.router(),
            inventory,
            pricing: self.pricing()?,
            tax_shipping: self.tax_shipping()?,
            payments: collaborators.payments,
            store: collaborators.store,
            notifier: collaborators.notifier,
            policies: self.policies(app.payment_timeout),
        }))
    }
}

pub struct Collaborators {
    pub payments: Arc<dyn PaymentGateway>,
    pub store: Arc<dyn OrderStore>,
    pub notifier: Arc<dyn Notifier>,
}
