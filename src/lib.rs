#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, Redis in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Cachet Core
//!
//! Backend-agnostic caching with tag-based invalidation.
//!
//! ## Overview
//!
//! Application code talks to a [`Repository`]; the repository talks to a
//! [`Store`]. Stores are deliberately small: opaque bytes under string keys,
//! with atomic `add` and `increment`. Everything richer is built on top of
//! that contract and therefore works on every backend:
//!
//! - **Typed values**: `serde_json` serialization at the repository layer
//! - **Deferred defaults**: closures evaluated only on a miss
//! - **Tags**: versioned namespaces, see [`tags`]
//! - **Stampede guard**: lock-assisted `remember`, see [`lock`]
//! - **Events**: hit, miss, write and delete observers, see [`events`]
//!
//! ## Module Organization
//!
//! - [`store`] - Store contract and backends
//! - [`repository`] - Caller-facing cache operations
//! - [`tags`] - Tag sets and tagged repositories
//! - [`lock`] - Advisory locks over `add`
//! - [`manager`] - Driver registry and named stores
//! - [`events`] - Cache events and listeners
//! - [`config`] - Configuration loading and validation
//! - [`ttl`] - TTL normalization
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust
//! use cachet_core::{CacheConfig, CacheManager};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = CacheManager::new(CacheConfig::default())?;
//! let cache = manager.default_store().await?;
//!
//! let user: String = cache
//!     .remember("user:1", Duration::from_secs(300), || async { "alice".to_string() })
//!     .await?;
//!
//! let posts = cache.tags(["posts"])?;
//! posts.put("feed", &vec![1, 2, 3], Duration::from_secs(60)).await?;
//! posts.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod repository;
pub mod store;
pub mod tags;
pub mod ttl;

pub use config::{CacheConfig, StampedeGuardConfig, StoreConfig};
pub use error::{CacheError, CacheResult};
pub use events::{CacheEvent, CacheListener, EventDispatcher, ListenerError};
pub use lock::{CacheLock, LockGuard, LockOptions};
pub use manager::{CacheManager, DriverFactory};
pub use repository::Repository;
pub use store::{FileStore, MemoryStore, NullStore, PrefixedStore, Store};
pub use tags::{TagSet, TagVersion, TaggedCache};
pub use ttl::{Expiry, Ttl};

#[cfg(feature = "store-redis")]
pub use store::RedisStore;

#[cfg(feature = "store-postgres")]
pub use store::DatabaseStore;
