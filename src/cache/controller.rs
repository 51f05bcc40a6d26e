use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::info;

use super::config::{Backend, CacheOptions, ResolvedOptions};
use super::duration::DurationSpec;
use super::error::CacheResult;
use super::keys::KeySpace;
use super::lock::{rw_read, rw_write};
use super::middleware::{CacheMiddleware, Toggle};
use super::store::{CacheIndex, CacheStore, GroupDeletion, MemoryStore, RedisStore};
use crate::http::Request;
use crate::middleware::{MiddlewareHandler, from_middleware};

/// Everything a request needs, swapped as a unit on reconfiguration.
pub(crate) struct Runtime {
    pub(crate) options: ResolvedOptions,
    pub(crate) keys: KeySpace,
    pub(crate) store: Arc<dyn CacheStore>,
}

impl Runtime {
    pub(crate) fn new(options: ResolvedOptions, store: Arc<dyn CacheStore>) -> Self {
        let keys = KeySpace::new(options.prefix.clone());
        Self {
            options,
            keys,
            store,
        }
    }

    pub(crate) fn key_for(&self, request: &Request) -> String {
        let url = request.url();
        match &self.options.append_key {
            Some(append) => self.keys.entry_key_with(&url, &append(request)),
            None => self.keys.entry_key(&url),
        }
    }

    /// A storage key passes through unchanged; anything else is treated as a URL.
    fn resolve_key(&self, target: &str) -> String {
        let prefix = self.keys.prefix();
        let is_storage_key = !prefix.is_empty()
            && target
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with(':'));
        if is_storage_key {
            target.to_owned()
        } else {
            self.keys.entry_key(target)
        }
    }
}

pub(crate) struct Shared {
    runtime: RwLock<Arc<Runtime>>,
    // Held across merge, store rebuild and swap.
    reconfigure: Mutex<()>,
}

impl Shared {
    pub(crate) fn snapshot(&self) -> Arc<Runtime> {
        Arc::clone(&rw_read(&self.runtime, "runtime.snapshot"))
    }

    fn replace(&self, runtime: Runtime) {
        *rw_write(&self.runtime, "runtime.replace") = Arc::new(runtime);
    }
}

/// The response cache: configuration, middleware factory, and invalidation.
///
/// Cloning is cheap; clones share configuration and storage.
///
/// # Examples
///
/// ```rust,no_run
/// use rttp_cache::cache::{CacheOptions, ResponseCache};
///
/// # async fn example() -> Result<(), rttp_cache::cache::CacheError> {
/// let cache = ResponseCache::with_options(
///     CacheOptions::new().redis("redis://127.0.0.1/").prefix("shop"),
/// )
/// .await?;
///
/// let products = cache.handler("10 minutes");
/// // ...after a write:
/// cache.clear_group("products").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ResponseCache {
    shared: Arc<Shared>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache {
    /// Creates a cache with default options and an in-process backend.
    pub fn new() -> Self {
        let runtime = Runtime::new(ResolvedOptions::default(), Arc::new(MemoryStore::new()));
        Self {
            shared: Arc::new(Shared {
                runtime: RwLock::new(Arc::new(runtime)),
                reconfigure: Mutex::new(()),
            }),
        }
    }

    /// Creates a cache and applies `options` on top of the defaults.
    ///
    /// # Errors
    ///
    /// Same as [`configure`](Self::configure).
    pub async fn with_options(options: CacheOptions) -> CacheResult<Self> {
        let cache = Self::new();
        cache.configure(options).await?;
        Ok(cache)
    }

    /// Merges `patch` into the current options and returns the result.
    ///
    /// The store is rebuilt when a backend is given, or when the prefix of a
    /// Redis backend changes; otherwise existing entries are kept. Passing an
    /// empty patch changes nothing.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Config`](super::CacheError::Config): invalid Redis
    ///   URL, or a Redis backend with an empty prefix.
    /// - [`CacheError::Backend`](super::CacheError::Backend): Redis is
    ///   unreachable.
    ///
    /// On error the previous configuration stays in effect. Concurrent calls
    /// are applied one after another, each on top of the last.
    pub async fn configure(&self, patch: CacheOptions) -> CacheResult<ResolvedOptions> {
        let _serial = self.shared.reconfigure.lock().await;
        let current = self.shared.snapshot();
        let backend_given = patch.backend.is_some();
        let options = current.options.merge(patch);

        let prefix_changed = options.prefix != current.options.prefix;
        let rebuild = backend_given || (prefix_changed && matches!(options.backend, Backend::Redis(_)));
        let store = if rebuild {
            build_store(&options.backend, KeySpace::new(options.prefix.clone())).await?
        } else {
            Arc::clone(&current.store)
        };

        info!(
            backend = options.backend.kind(),
            prefix = %options.prefix,
            enabled = options.enabled,
            default_duration_ms = options.default_duration_ms,
            store_rebuilt = rebuild,
            "response cache configured"
        );
        self.shared.replace(Runtime::new(options.clone(), store));
        Ok(options)
    }

    /// The options currently in effect.
    pub fn options(&self) -> ResolvedOptions {
        self.shared.snapshot().options.clone()
    }

    /// Resolves `duration` against the current default.
    pub fn duration(&self, duration: impl Into<DurationSpec>) -> u64 {
        duration
            .into()
            .resolve(self.shared.snapshot().options.default_duration_ms)
    }

    /// Caching middleware that stores responses for `duration`.
    pub fn middleware(&self, duration: impl Into<DurationSpec>) -> CacheMiddleware {
        CacheMiddleware::new(Arc::clone(&self.shared), self.duration(duration), None)
    }

    /// Like [`middleware`](Self::middleware), but only caches requests for
    /// which `toggle` returns `true`.
    pub fn middleware_with(
        &self,
        duration: impl Into<DurationSpec>,
        toggle: impl Fn(&Request) -> bool + Send + Sync + 'static,
    ) -> CacheMiddleware {
        let toggle: Toggle = Arc::new(toggle);
        CacheMiddleware::new(Arc::clone(&self.shared), self.duration(duration), Some(toggle))
    }

    /// [`middleware`](Self::middleware) as a chain entry.
    pub fn handler(&self, duration: impl Into<DurationSpec>) -> MiddlewareHandler {
        from_middleware(Arc::new(self.middleware(duration)))
    }

    /// Removes one entry.
    ///
    /// `target` is a request URL (`/users?page=2`) or a storage key as listed
    /// by [`index`](Self::index).
    pub async fn clear_key(&self, target: &str) -> CacheResult<()> {
        let runtime = self.shared.snapshot();
        let key = runtime.resolve_key(target);
        runtime.store.delete(&key).await?;
        info!(key = %key, "cleared cache entry");
        Ok(())
    }

    /// Removes every entry tagged with `group`.
    pub async fn clear_group(&self, group: &str) -> CacheResult<GroupDeletion> {
        let outcome = self.shared.snapshot().store.delete_group(group).await?;
        info!(
            group,
            removed = outcome.removed,
            failed = outcome.failed,
            "cleared cache group"
        );
        Ok(outcome)
    }

    /// Removes every entry the cache owns.
    pub async fn clear_all(&self) -> CacheResult<usize> {
        let removed = self.shared.snapshot().store.clear_all().await?;
        info!(removed, "cleared response cache");
        Ok(removed)
    }

    /// Lists stored keys and group memberships.
    pub async fn index(&self) -> CacheResult<CacheIndex> {
        self.shared.snapshot().store.index().await
    }
}

async fn build_store(backend: &Backend, keys: KeySpace) -> CacheResult<Arc<dyn CacheStore>> {
    Ok(match backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::Redis(options) => Arc::new(RedisStore::connect(options, keys).await?),
        Backend::Custom(store) => Arc::clone(store),
    })
}
