//! # Cache Configuration
//!
//! Named stores, each bound to a driver, plus the settings shared by every
//! repository the manager builds.
//!
//! ```yaml
//! default: redis
//! prefix: myapp
//! stores:
//!   redis:
//!     driver: redis
//!     url: redis://127.0.0.1:6379
//!     connection: primary
//!   sessions:
//!     driver: redis
//!     url: redis://127.0.0.1:6379
//!     connection: primary
//!     prefix: sessions
//!   local:
//!     driver: memory
//!     max_capacity: 10000
//! stampede_guard:
//!   enabled: true
//!   wait_timeout_ms: 5000
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cachet_core::config::CacheConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CacheConfig::load_from_file("config/cache.yaml")?;
//! let default_store = config.default_store_config()?;
//! # Ok(())
//! # }
//! ```

pub mod loader;

pub use loader::ConfigLoader;

use crate::error::{CacheError, CacheResult};
use crate::lock::LockOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Store used by `CacheManager::default_store`
    pub default: String,

    /// Prefix applied to every store, ahead of the store's own prefix
    pub prefix: String,

    pub stores: HashMap<String, StoreConfig>,

    pub stampede_guard: StampedeGuardConfig,

    /// Buffer size of the broadcast event channel
    pub event_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let mut stores = HashMap::new();
        stores.insert("memory".to_string(), StoreConfig::new("memory"));
        Self {
            default: "memory".to_string(),
            prefix: String::new(),
            stores,
            stampede_guard: StampedeGuardConfig::default(),
            event_capacity: 1000,
        }
    }
}

/// One named store
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Driver name as registered with the manager (`memory`, `file`, `redis`, ...)
    pub driver: String,

    /// Per-store key prefix
    pub prefix: Option<String>,

    /// Stores naming the same connection share one physical backend
    pub connection: Option<String>,

    /// Directory for the file driver
    pub path: Option<String>,

    /// Connection URL for network drivers
    pub url: Option<String>,

    /// Table for the database driver
    pub table: Option<String>,

    /// Entry bound for the memory driver
    pub max_capacity: Option<usize>,

    /// Connect/command timeout for network drivers
    pub timeout_ms: Option<u64>,

    /// Free-form settings for custom drivers
    pub options: HashMap<String, String>,
}

impl StoreConfig {
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(5000))
    }

    /// Required setting, reported as a configuration error when absent
    pub fn require<'a>(&self, value: &'a Option<String>, field: &str) -> CacheResult<&'a str> {
        value.as_deref().filter(|v| !v.is_empty()).ok_or_else(|| {
            CacheError::Configuration(format!(
                "Driver '{}' requires '{}' to be set",
                self.driver, field
            ))
        })
    }

    /// Identity of the physical backend this store talks to
    pub fn connection_key(&self, store_name: &str) -> String {
        match &self.connection {
            Some(connection) => format!("{}:{}", self.driver, connection),
            None => format!("{}:@{}", self.driver, store_name),
        }
    }
}

/// Timing of the lock-assisted `remember`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StampedeGuardConfig {
    pub enabled: bool,
    pub lock_ttl_ms: u64,
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
}

impl Default for StampedeGuardConfig {
    fn default() -> Self {
        let options = LockOptions::default();
        Self {
            enabled: true,
            lock_ttl_ms: options.lock_ttl.as_millis() as u64,
            wait_timeout_ms: options.wait_timeout.as_millis() as u64,
            poll_interval_ms: options.poll_interval.as_millis() as u64,
            max_poll_interval_ms: options.max_poll_interval.as_millis() as u64,
        }
    }
}

impl StampedeGuardConfig {
    /// Lock options, or `None` when the guard is disabled
    pub fn to_lock_options(&self) -> Option<LockOptions> {
        self.enabled.then(|| LockOptions {
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            wait_timeout: Duration::from_millis(self.wait_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_interval: Duration::from_millis(self.max_poll_interval_ms),
        })
    }
}

impl CacheConfig {
    pub fn store_config(&self, name: &str) -> CacheResult<&StoreConfig> {
        self.stores
            .get(name)
            .ok_or_else(|| CacheError::UnknownStore(name.to_string()))
    }

    pub fn default_store_config(&self) -> CacheResult<&StoreConfig> {
        self.store_config(&self.default)
    }

    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> CacheResult<()> {
        if self.default.is_empty() {
            return Err(CacheError::Configuration(
                "'default' must name a store".to_string(),
            ));
        }

        if !self.stores.contains_key(&self.default) {
            return Err(CacheError::Configuration(format!(
                "Default store '{}' is not defined in 'stores'",
                self.default
            )));
        }

        for (name, store) in &self.stores {
            if store.driver.is_empty() {
                return Err(CacheError::Configuration(format!(
                    "Store '{name}' has no driver"
                )));
            }
            if store.timeout_ms == Some(0) {
                return Err(CacheError::Configuration(format!(
                    "Store '{name}': timeout_ms must be greater than 0"
                )));
            }
            if store.max_capacity == Some(0) {
                return Err(CacheError::Configuration(format!(
                    "Store '{name}': max_capacity must be greater than 0"
                )));
            }
        }

        // Stores sharing a connection must agree on how to reach it
        let mut connections: HashMap<String, (&str, &StoreConfig)> = HashMap::new();
        for (name, store) in &self.stores {
            let Some(connection) = &store.connection else {
                continue;
            };
            if let Some((other_name, other)) = connections.get(connection) {
                if other.driver != store.driver || other.url != store.url || other.path != store.path {
                    return Err(CacheError::Configuration(format!(
                        "Stores '{other_name}' and '{name}' share connection '{connection}' with different settings"
                    )));
                }
            } else {
                connections.insert(connection.clone(), (name.as_str(), store));
            }
        }

        let guard = &self.stampede_guard;
        if guard.enabled {
            if guard.lock_ttl_ms == 0 {
                return Err(CacheError::Configuration(
                    "stampede_guard.lock_ttl_ms must be greater than 0".to_string(),
                ));
            }
            if guard.poll_interval_ms == 0 {
                return Err(CacheError::Configuration(
                    "stampede_guard.poll_interval_ms must be greater than 0".to_string(),
                ));
            }
            if guard.max_poll_interval_ms < guard.poll_interval_ms {
                return Err(CacheError::Configuration(
                    "stampede_guard.max_poll_interval_ms must not be below poll_interval_ms"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}
