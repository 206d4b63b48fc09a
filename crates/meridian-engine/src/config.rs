//! # Engine Configuration
//!
//! Configuration for checkout pricing, reservation expiry, and the
//! notification relay.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                            │
//! │     MERIDIAN_STORE_ID=store-east                                        │
//! │     MERIDIAN_TAX_RATE_BPS=825                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                    │
//! │     Path passed by the caller, or $MERIDIAN_CONFIG                      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                    │
//! │     15% tax, $10 flat shipping free over $100, 24h holds                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # meridian.toml
//! [store]
//! id = "00000000-0000-0000-0000-000000000001"
//! name = "Main Store"
//! manager_id = "admin"
//!
//! [checkout]
//! tax_rate_bps = 1500
//! shipping_flat_cents = 1000
//! free_shipping_threshold_cents = 10000
//!
//! [reservations]
//! ttl_minutes = 1440
//! sweep_interval_secs = 60
//! sweep_batch_size = 100
//!
//! [notifications]
//! poll_interval_secs = 5
//! batch_size = 100
//! max_attempts = 10
//! purge_after_days = 30
//! ```

use meridian_core::{Money, TaxRate, DEFAULT_STORE_ID};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Store Settings
// =============================================================================

/// The store this engine instance serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Store identifier used for inventory rows and reservations.
    #[serde(default = "default_store_id")]
    pub id: String,

    /// Human-readable store name.
    #[serde(default = "default_store_name")]
    pub name: String,

    /// Recipient of stock alerts and other operational notifications.
    #[serde(default = "default_manager_id")]
    pub manager_id: String,
}

fn default_store_id() -> String {
    DEFAULT_STORE_ID.to_string()
}

fn default_store_name() -> String {
    "Main Store".to_string()
}

fn default_manager_id() -> String {
    "admin".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        StoreSettings {
            id: default_store_id(),
            name: default_store_name(),
            manager_id: default_manager_id(),
        }
    }
}

// =============================================================================
// Checkout Settings
// =============================================================================

/// Pricing knobs applied at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSettings {
    /// Tax rate in basis points, charged on the undiscounted items total.
    #[serde(default = "default_tax_rate_bps")]
    pub tax_rate_bps: u32,

    /// Flat shipping charge in cents.
    #[serde(default = "default_shipping_flat")]
    pub shipping_flat_cents: i64,

    /// Items totals strictly above this ship free.
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold_cents: i64,
}

fn default_tax_rate_bps() -> u32 {
    1500
}

fn default_shipping_flat() -> i64 {
    1000
}

fn default_free_shipping_threshold() -> i64 {
    10_000
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        CheckoutSettings {
            tax_rate_bps: default_tax_rate_bps(),
            shipping_flat_cents: default_shipping_flat(),
            free_shipping_threshold_cents: default_free_shipping_threshold(),
        }
    }
}

impl CheckoutSettings {
    /// Shipping charge for an items total.
    ///
    /// Free shipping kicks in strictly above the threshold: an order of
    /// exactly the threshold amount still pays the flat rate.
    pub fn shipping_cost(&self, items: Money) -> Money {
        if items.cents() > self.free_shipping_threshold_cents {
            Money::zero()
        } else {
            Money::from_cents(self.shipping_flat_cents)
        }
    }
}

// =============================================================================
// Reservation Settings
// =============================================================================

/// Stock hold expiry and sweeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationSettings {
    /// How long a hold survives before the sweeper reclaims it.
    ///
    /// Holds live from order placement until the order is accepted for
    /// processing, so this covers payment time plus operator lag. Too
    /// short and paid orders lose their stock; 24 hours is the floor
    /// most deployments want.
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,

    /// Interval between sweep cycles (seconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Maximum holds reclaimed per sweep cycle.
    #[serde(default = "default_sweep_batch")]
    pub sweep_batch_size: u32,
}

fn default_ttl_minutes() -> i64 {
    1440
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_sweep_batch() -> u32 {
    100
}

impl Default for ReservationSettings {
    fn default() -> Self {
        ReservationSettings {
            ttl_minutes: default_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_batch_size: default_sweep_batch(),
        }
    }
}

// =============================================================================
// Notification Settings
// =============================================================================

/// Notification relay behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Interval between relay poll cycles (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Number of pending notifications drained per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// Delivery attempts before a notification is parked.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i64,

    /// Dispatched notifications older than this are purged.
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: i64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_batch_size() -> u32 {
    100
}

fn default_max_attempts() -> i64 {
    10
}

fn default_purge_after_days() -> i64 {
    30
}

impl Default for NotificationSettings {
    fn default() -> Self {
        NotificationSettings {
            poll_interval_secs: default_poll_interval(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            purge_after_days: default_purge_after_days(),
        }
    }
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store identity.
    #[serde(default)]
    pub store: StoreSettings,

    /// Checkout pricing.
    #[serde(default)]
    pub checkout: CheckoutSettings,

    /// Reservation expiry and sweeping.
    #[serde(default)]
    pub reservations: ReservationSettings,

    /// Notification relay.
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (explicit path, or `$MERIDIAN_CONFIG`)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> EngineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| EngineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)
            .map_err(|e| EngineError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.store.id.is_empty() {
            return Err(EngineError::InvalidConfig("store.id must be set".into()));
        }

        // TaxRate refuses anything over 100%.
        TaxRate::from_bps(self.checkout.tax_rate_bps)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        if self.checkout.shipping_flat_cents < 0 {
            return Err(EngineError::InvalidConfig(
                "shipping_flat_cents must not be negative".into(),
            ));
        }

        if self.reservations.ttl_minutes <= 0 {
            return Err(EngineError::InvalidConfig(
                "reservations.ttl_minutes must be greater than 0".into(),
            ));
        }

        if self.reservations.sweep_batch_size == 0 || self.notifications.batch_size == 0 {
            return Err(EngineError::InvalidConfig(
                "batch sizes must be greater than 0".into(),
            ));
        }

        if self.notifications.max_attempts <= 0 {
            return Err(EngineError::InvalidConfig(
                "notifications.max_attempts must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("MERIDIAN_STORE_ID") {
            debug!(store_id = %id, "Overriding store ID from environment");
            self.store.id = id;
        }

        if let Ok(id) = std::env::var("MERIDIAN_MANAGER_ID") {
            self.store.manager_id = id;
        }

        if let Ok(bps) = std::env::var("MERIDIAN_TAX_RATE_BPS") {
            if let Ok(parsed) = bps.parse::<u32>() {
                debug!(tax_rate_bps = parsed, "Overriding tax rate from environment");
                self.checkout.tax_rate_bps = parsed;
            }
        }

        if let Ok(cents) = std::env::var("MERIDIAN_SHIPPING_FLAT_CENTS") {
            if let Ok(parsed) = cents.parse::<i64>() {
                self.checkout.shipping_flat_cents = parsed;
            }
        }

        if let Ok(minutes) = std::env::var("MERIDIAN_RESERVATION_TTL_MINUTES") {
            if let Ok(parsed) = minutes.parse::<i64>() {
                debug!(ttl_minutes = parsed, "Overriding hold TTL from environment");
                self.reservations.ttl_minutes = parsed;
            }
        }

        if let Ok(secs) = std::env::var("MERIDIAN_SWEEP_INTERVAL_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                self.reservations.sweep_interval_secs = parsed;
            }
        }

        if let Ok(secs) = std::env::var("MERIDIAN_NOTIFY_POLL_SECS") {
            if let Ok(parsed) = secs.parse::<u64>() {
                self.notifications.poll_interval_secs = parsed;
            }
        }
    }

    /// Default config file path, taken from `$MERIDIAN_CONFIG`.
    fn default_config_path() -> Option<PathBuf> {
        std::env::var("MERIDIAN_CONFIG").ok().map(PathBuf::from)
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the store ID.
    pub fn store_id(&self) -> &str {
        &self.store.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.store.id, DEFAULT_STORE_ID);
        assert_eq!(config.checkout.tax_rate_bps, 1500);
        assert_eq!(config.reservations.ttl_minutes, 1440);
        assert_eq!(config.notifications.batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [checkout]
            tax_rate_bps = 825

            [store]
            id = "store-east"
            "#,
        )
        .unwrap();

        assert_eq!(config.checkout.tax_rate_bps, 825);
        assert_eq!(config.store.id, "store-east");
        // Untouched sections keep their defaults.
        assert_eq!(config.checkout.shipping_flat_cents, 1000);
        assert_eq!(config.reservations.sweep_interval_secs, 60);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.checkout.tax_rate_bps = 10_001;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.reservations.ttl_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.notifications.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.store.id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipping_cost_threshold_is_strict() {
        let checkout = CheckoutSettings::default();

        // Exactly $100.00 still pays shipping; one cent more ships free.
        assert_eq!(
            checkout.shipping_cost(Money::from_cents(10_000)),
            Money::from_cents(1000)
        );
        assert_eq!(
            checkout.shipping_cost(Money::from_cents(10_001)),
            Money::zero()
        );
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[store]"));
        assert!(toml_str.contains("[checkout]"));
        assert!(toml_str.contains("[reservations]"));
        assert!(toml_str.contains("[notifications]"));

        let back: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.checkout.tax_rate_bps, config.checkout.tax_rate_bps);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let config = EngineConfig::load_or_default(Some(PathBuf::from(
            "/nonexistent/meridian.toml",
        )));
        assert_eq!(config.checkout.tax_rate_bps, 1500);
    }
}
