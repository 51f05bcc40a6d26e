//! The per-route caching middleware.
//!
//! Each request walks one path through the engine:
//!
//! ```text
//! entry ──bypass──────────────────────────────▶ passthrough
//!   │
//!   ▼
//! lookup ──backend error──────────────────────▶ passthrough
//!   │ hit                     │ miss
//!   ▼                         ▼
//! replay (x-apicache: hit)  capture ─▶ downstream ─▶ intercepted emission (x-apicache: miss)
//! ```
//!
//! Replayed responses never reach the interceptor, so they are never stored
//! again.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::capture::{CacheTags, Interceptor, StorePlan};
use super::controller::{Runtime, Shared};
use super::{BYPASS_HEADER, CACHE_HEADER, HIT};
use crate::context::Context;
use crate::http::{Request, Response};
use crate::middleware::{BoxResponse, Middleware, Next};

/// Per-route predicate; returning `false` skips the cache for that request.
pub type Toggle = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Caching middleware for one route, created by
/// [`ResponseCache::middleware`](super::ResponseCache::middleware).
///
/// The duration is resolved when the middleware is created, against the
/// default duration in effect at that moment.
#[derive(Clone)]
pub struct CacheMiddleware {
    shared: Arc<Shared>,
    duration_ms: u64,
    toggle: Option<Toggle>,
}

impl CacheMiddleware {
    pub(crate) fn new(shared: Arc<Shared>, duration_ms: u64, toggle: Option<Toggle>) -> Self {
        Self {
            shared,
            duration_ms,
            toggle,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    async fn run(&self, mut ctx: Context, next: Next) -> Response {
        let runtime = self.shared.snapshot();

        if let Some(reason) = bypass_reason(&runtime, self.toggle.as_ref(), ctx.request()) {
            debug!(url = %ctx.request().url(), reason, "cache bypassed");
            return next.run(ctx).await;
        }

        let url = ctx.request().url();
        let key = runtime.key_for(ctx.request());

        let cached = match runtime.store.get(&key).await {
            Ok(cached) => cached,
            Err(err) => {
                warn!(key = %key, error = %err, "cache lookup failed, serving live response");
                return next.run(ctx).await;
            }
        };

        if let Some(cached) = cached {
            debug!(key = %key, "cache hit");
            let mut response = cached.to_response();
            response.headers_mut().set(CACHE_HEADER, HIT);
            if let Some(on_hit) = &runtime.options.on_hit {
                on_hit(&url);
            }
            return response;
        }

        debug!(key = %key, "cache miss");
        if let Some(on_miss) = &runtime.options.on_miss {
            on_miss(&url);
        }

        let tags = match ctx.extensions().get::<CacheTags>() {
            Some(tags) => tags.clone(),
            None => {
                let tags = CacheTags::new();
                ctx.extensions_mut().insert(tags.clone());
                tags
            }
        };
        let bypass = ctx.request().headers().contains(BYPASS_HEADER);
        let plan = StorePlan {
            runtime,
            key,
            duration_ms: self.duration_ms,
            tags,
            bypass,
        };

        let downstream = next.run(ctx).await;
        Interceptor::new(downstream, plan).emit().await
    }
}

fn bypass_reason(runtime: &Runtime, toggle: Option<&Toggle>, request: &Request) -> Option<&'static str> {
    if !runtime.options.enabled {
        return Some("disabled");
    }
    if request.headers().contains(BYPASS_HEADER) {
        return Some("bypass header");
    }
    if runtime.options.respect_cache_control
        && request
            .headers()
            .get_all("cache-control")
            .any(|v| v.split(',').any(|d| d.trim().eq_ignore_ascii_case("no-cache")))
    {
        return Some("no-cache");
    }
    if toggle.is_some_and(|allow| !allow(request)) {
        return Some("toggle");
    }
    None
}

impl Middleware for CacheMiddleware {
    fn handle(&self, ctx: Context, next: Next) -> BoxResponse {
        let this = self.clone();
        Box::pin(async move { this.run(ctx, next).await })
    }
}

impl fmt::Debug for CacheMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheMiddleware")
            .field("duration_ms", &self.duration_ms)
            .field("toggle", &self.toggle.is_some())
            .finish()
    }
}
