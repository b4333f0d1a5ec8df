//! # Cache Manager
//!
//! Registry of driver factories and resolver of named stores.
//!
//! ## Overview
//!
//! Every store in [`CacheConfig`] names a driver. On first use the manager
//! runs that driver's factory, wraps the result in a [`PrefixedStore`] when a
//! prefix applies, and caches the finished [`Repository`]. Stores naming the
//! same `connection` reuse one physical backend and are told apart only by
//! their prefixes.
//!
//! Built-in drivers: `memory` (aliases `array`, `in-memory`), `file`, `null`, plus `redis`
//! (alias `dragonfly`) with the `store-redis` feature and `database` (alias
//! `postgres`) with the `store-postgres` feature. Anything else is added with
//! [`CacheManager::register_driver`].
//!
//! ## Usage
//!
//! ```rust
//! use cachet_core::{CacheConfig, CacheError, CacheManager, MemoryStore, Store};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = CacheManager::new(CacheConfig::default())?;
//! manager.register_driver("custom", |_config| async {
//!     Ok::<_, CacheError>(Arc::new(MemoryStore::new()) as Arc<dyn Store>)
//! });
//!
//! let cache = manager.default_store().await?;
//! cache.put("greeting", &"hello", std::time::Duration::from_secs(60)).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{CacheConfig, StoreConfig};
use crate::error::{CacheError, CacheResult};
use crate::events::EventDispatcher;
use crate::logging::log_store_operation;
use crate::repository::Repository;
use crate::store::{FileStore, MemoryStore, NullStore, PrefixedStore, Store};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Future produced by a driver factory
pub type DriverFuture = BoxFuture<'static, CacheResult<Arc<dyn Store>>>;

/// Constructor of a physical store from its configuration
pub type DriverFactory = Arc<dyn Fn(StoreConfig) -> DriverFuture + Send + Sync>;

#[derive(Clone)]
struct ResolvedStore {
    repository: Repository,
    connection: String,
}

/// Named stores built from configuration and registered drivers
pub struct CacheManager {
    config: RwLock<CacheConfig>,
    drivers: RwLock<HashMap<String, DriverFactory>>,
    repositories: RwLock<HashMap<String, ResolvedStore>>,
    /// Physical backends by connection identity; held across factory awaits
    connections: tokio::sync::Mutex<HashMap<String, Arc<dyn Store>>>,
    events: EventDispatcher,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut drivers: Vec<String> = self.drivers.read().keys().cloned().collect();
        drivers.sort();
        f.debug_struct("CacheManager")
            .field("default", &self.config.read().default)
            .field("drivers", &drivers)
            .field("resolved", &self.repositories.read().len())
            .finish()
    }
}

impl CacheManager {
    /// Create a manager with the built-in drivers registered
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let events = EventDispatcher::new(config.event_capacity);

        let manager = Self {
            config: RwLock::new(config),
            drivers: RwLock::new(HashMap::new()),
            repositories: RwLock::new(HashMap::new()),
            connections: tokio::sync::Mutex::new(HashMap::new()),
            events,
        };
        manager.register_builtin_drivers();
        Ok(manager)
    }

    fn register_builtin_drivers(&self) {
        for name in ["memory", "array", "in-memory"] {
            self.register_driver(name, |config: StoreConfig| async move {
                let store = match config.max_capacity {
                    Some(limit) => MemoryStore::with_capacity_limit(limit),
                    None => MemoryStore::new(),
                };
                Ok::<_, CacheError>(Arc::new(store) as Arc<dyn Store>)
            });
        }

        self.register_driver("file", |config: StoreConfig| async move {
            let path = config.require(&config.path, "path")?;
            let store = FileStore::new(path);
            store.health_check().await?;
            Ok::<_, CacheError>(Arc::new(store) as Arc<dyn Store>)
        });

        self.register_driver("null", |_config: StoreConfig| async move {
            Ok::<_, CacheError>(Arc::new(NullStore::new()) as Arc<dyn Store>)
        });

        #[cfg(feature = "store-redis")]
        for name in ["redis", "dragonfly"] {
            self.register_driver(name, |config: StoreConfig| async move {
                let url = config.require(&config.url, "url")?;
                let store = crate::store::RedisStore::connect(url, config.timeout()).await?;
                Ok::<_, CacheError>(Arc::new(store) as Arc<dyn Store>)
            });
        }

        #[cfg(feature = "store-postgres")]
        for name in ["database", "postgres"] {
            self.register_driver(name, |config: StoreConfig| async move {
                let url = config.require(&config.url, "url")?;
                let table = config.table.as_deref().unwrap_or("cache");
                let store =
                    crate::store::DatabaseStore::connect(url, table, config.timeout()).await?;
                store.ensure_table().await?;
                Ok::<_, CacheError>(Arc::new(store) as Arc<dyn Store>)
            });
        }
    }

    /// Register (or replace) the factory for a driver name
    ///
    /// Already resolved stores keep their backend until purged.
    pub fn register_driver<F, Fut>(&self, name: &str, factory: F)
    where
        F: Fn(StoreConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CacheResult<Arc<dyn Store>>> + Send + 'static,
    {
        let factory: DriverFactory = Arc::new(move |config| Box::pin(factory(config)));
        self.drivers.write().insert(name.to_string(), factory);
        debug!(driver = name, "Cache driver registered");
    }

    pub fn has_driver(&self, name: &str) -> bool {
        self.drivers.read().contains_key(name)
    }

    /// Repository for the named store, building it on first use
    pub async fn store(&self, name: &str) -> CacheResult<Repository> {
        if let Some(resolved) = self.repositories.read().get(name) {
            return Ok(resolved.repository.clone());
        }

        let (store_config, global_prefix, guard) = {
            let config = self.config.read();
            let store_config = config.store_config(name)?.clone();
            (store_config, config.prefix.clone(), config.stampede_guard.to_lock_options())
        };
        let connection = store_config.connection_key(name);

        let backend = {
            let mut connections = self.connections.lock().await;

            // Another caller may have finished resolving while we waited
            if let Some(resolved) = self.repositories.read().get(name) {
                return Ok(resolved.repository.clone());
            }

            match connections.get(&connection).cloned() {
                Some(backend) => backend,
                None => {
                    let factory = self
                        .drivers
                        .read()
                        .get(&store_config.driver)
                        .cloned()
                        .ok_or_else(|| CacheError::UnsupportedDriver(store_config.driver.clone()))?;
                    let backend = factory(store_config.clone()).await?;
                    connections.insert(connection.clone(), backend.clone());
                    log_store_operation("connect", name, &store_config.driver, Some(&connection));
                    backend
                }
            }
        };

        let prefix = combine_prefixes(&global_prefix, store_config.prefix.as_deref());
        let store: Arc<dyn Store> = if prefix.is_empty() {
            backend
        } else {
            Arc::new(PrefixedStore::new(backend, prefix.clone()))
        };

        let mut repository = Repository::new(store).with_events(self.events.clone());
        repository = match guard {
            Some(options) => repository.with_stampede_guard(options),
            None => repository.without_stampede_guard(),
        };

        self.repositories.write().insert(
            name.to_string(),
            ResolvedStore {
                repository: repository.clone(),
                connection,
            },
        );
        info!(
            store = name,
            driver = %store_config.driver,
            prefix = %prefix,
            "Cache store resolved"
        );
        Ok(repository)
    }

    pub async fn default_store(&self) -> CacheResult<Repository> {
        let name = self.default_store_name();
        self.store(&name).await
    }

    pub fn default_store_name(&self) -> String {
        self.config.read().default.clone()
    }

    /// Make another configured store the default
    pub fn set_default_driver(&self, name: &str) -> CacheResult<()> {
        let mut config = self.config.write();
        if !config.stores.contains_key(name) {
            return Err(CacheError::UnknownStore(name.to_string()));
        }
        config.default = name.to_string();
        info!(store = name, "Default cache store changed");
        Ok(())
    }

    /// Forget the resolved repository so the next `store` call rebuilds it
    ///
    /// The physical backend is dropped too once no other resolved store
    /// shares its connection. Returns whether anything was resolved.
    pub async fn purge(&self, name: &str) -> bool {
        let mut connections = self.connections.lock().await;
        let removed = self.repositories.write().remove(name);
        let Some(removed) = removed else {
            return false;
        };

        let still_shared = self
            .repositories
            .read()
            .values()
            .any(|resolved| resolved.connection == removed.connection);
        if !still_shared {
            connections.remove(&removed.connection);
        }

        log_store_operation("purge", name, removed.repository.store().provider_name(), None);
        true
    }

    /// Configured store names, sorted
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.config.read().stores.keys().cloned().collect();
        names.sort();
        names
    }

    /// Dispatcher shared by every repository this manager builds
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    pub fn config(&self) -> CacheConfig {
        self.config.read().clone()
    }
}

fn combine_prefixes(global: &str, store: Option<&str>) -> String {
    [global, store.unwrap_or_default()]
        .iter()
        .map(|p| p.trim_end_matches(':'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}
