//! Response caching layer.
//!
//! [`ResponseCache`] hands out [`CacheMiddleware`] for individual routes. On
//! a miss the middleware lets the request through and stores the response
//! under the request URL; on a hit it replays the stored response without
//! calling downstream. Entries can be tagged with groups and invalidated by
//! key, by group, or all at once.
//!
//! ## Headers
//!
//! - `x-apicache-bypass` on a request skips both lookup and storage.
//! - `x-apicache: hit` or `x-apicache: miss` marks every response the cache
//!   handled.
//!
//! ## Backends
//!
//! [`MemoryStore`] (default) or [`RedisStore`], chosen through
//! [`CacheOptions::backend`]. A Redis backend may be shared: the cache only
//! ever touches keys under its own prefix.
//!
//! ## Failure policy
//!
//! The cache fails open. A backend error during lookup serves the live
//! response; an error while storing is logged and the response is still sent.

mod capture;
mod config;
mod controller;
mod duration;
mod entry;
mod error;
mod keys;
mod lock;
mod middleware;
pub mod store;


pub use capture::{CacheGroup, CacheTags, tag};
pub use config::{
    AppendKey, Backend, BackendKind, CacheConfig, CacheOptions, DEFAULT_DURATION_MS,
    DEFAULT_PREFIX, ResolvedOptions, StatusFilter, UrlCallback,
};
pub use controller::ResponseCache;
pub use duration::DurationSpec;
pub use entry::CachedResponse;
pub use error::{CacheError, CacheResult};
pub use keys::{GroupIndex, KeySpace};
pub use middleware::{CacheMiddleware, Toggle};
pub use store::{CacheIndex, CacheStore, GroupDeletion, MemoryStore, RedisOptions, RedisStore};

/// Request header that disables the cache for one request.
pub const BYPASS_HEADER: &str = "x-apicache-bypass";

/// Response header carrying [`HIT`] or [`MISS`].
pub const CACHE_HEADER: &str = "x-apicache";

pub const HIT: &str = "hit";
pub const MISS: &str = "miss";

/// `Content-Type` given to captured responses that did not set one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json; charset=utf-8";
