//! Capturing a downstream response on a cache miss.
//!
//! The [`Interceptor`] owns the response the downstream handler produced.
//! [`Interceptor::emit`] takes `self` by value, so the response leaves the
//! cache layer exactly once, after it has been persisted (when cacheable).

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tracing::{debug, warn};

use super::controller::Runtime;
use super::entry::CachedResponse;
use super::lock::mutex_lock;
use super::{CACHE_HEADER, DEFAULT_CONTENT_TYPE, MISS};
use crate::context::Context;
use crate::http::{Headers, Response, StatusCode};

/// Response headers copied into the cached entry besides `Content-Type`.
const CAPTURED_HEADERS: [&str; 2] = ["Cache-Control", "Expires"];

/// One group name or an ordered list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheGroup {
    One(String),
    Many(Vec<String>),
}

impl CacheGroup {
    pub fn into_names(self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name],
            Self::Many(names) => names,
        }
    }
}

impl From<&str> for CacheGroup {
    fn from(name: &str) -> Self {
        Self::One(name.to_owned())
    }
}

impl From<String> for CacheGroup {
    fn from(name: String) -> Self {
        Self::One(name)
    }
}

impl From<Vec<String>> for CacheGroup {
    fn from(names: Vec<String>) -> Self {
        Self::Many(names)
    }
}

impl From<Vec<&str>> for CacheGroup {
    fn from(names: Vec<&str>) -> Self {
        Self::Many(names.into_iter().map(str::to_owned).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CacheGroup {
    fn from(names: [&str; N]) -> Self {
        Self::Many(names.into_iter().map(str::to_owned).collect())
    }
}

/// Per-request handle naming the groups a response will be cached under.
///
/// The cache middleware installs one in the [`Context`] before calling
/// downstream; any layer below it can tag the request, see [`tag`].
/// Clones share the same underlying list.
#[derive(Debug, Clone, Default)]
pub struct CacheTags {
    names: Arc<Mutex<Vec<String>>>,
}

impl CacheTags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current tags.
    pub fn set(&self, group: impl Into<CacheGroup>) {
        *mutex_lock(&self.names, "tags.set") = group.into().into_names();
    }

    /// Adds one group, keeping existing tags.
    pub fn add(&self, name: impl Into<String>) {
        mutex_lock(&self.names, "tags.add").push(name.into());
    }

    /// Tags in first-seen order, without empties or duplicates.
    pub fn names(&self) -> Vec<String> {
        let names = mutex_lock(&self.names, "tags.names");
        let mut out: Vec<String> = Vec::with_capacity(names.len());
        for name in names.iter() {
            if !name.is_empty() && !out.contains(name) {
                out.push(name.clone());
            }
        }
        out
    }
}

/// Tags the current request's eventual cache entry with `group`.
///
/// Returns `false` when no cache middleware sits above this layer.
///
/// ```
/// use rttp_cache::{Request, cache::{self, CacheTags}, context::Context};
///
/// let mut ctx = Context::new(Request::get("/users"));
/// ctx.extensions_mut().insert(CacheTags::new());
/// assert!(cache::tag(&ctx, ["users", "admin"]));
/// ```
pub fn tag(ctx: &Context, group: impl Into<CacheGroup>) -> bool {
    match ctx.extensions().get::<CacheTags>() {
        Some(tags) => {
            tags.set(group);
            true
        }
        None => false,
    }
}

/// Where and how long a cacheable response is persisted.
pub(crate) struct StorePlan {
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) key: String,
    pub(crate) duration_ms: u64,
    pub(crate) tags: CacheTags,
    pub(crate) bypass: bool,
}

impl StorePlan {
    fn is_cacheable(&self, status: StatusCode) -> bool {
        !self.bypass && !status.is_error() && self.runtime.options.status_codes.allows(status)
    }

    async fn persist(self, candidate: CachedResponse) {
        let store = &self.runtime.store;
        let groups = self.tags.names();
        let register = join_all(groups.iter().map(|group| store.add_member(group, &self.key)));
        let (registered, stored) = tokio::join!(
            register,
            store.set(&self.key, candidate, self.duration_ms)
        );

        for (group, result) in groups.iter().zip(registered) {
            if let Err(err) = result {
                warn!(key = %self.key, group = %group, error = %err, "failed to register cache group");
            }
        }
        match stored {
            Ok(()) => debug!(key = %self.key, duration_ms = self.duration_ms, ?groups, "response cached"),
            Err(err) => warn!(key = %self.key, error = %err, "failed to store response"),
        }
    }
}

/// Holds the downstream response until it is emitted.
///
/// The response carries the status the handler chose, so a handler that only
/// produced a body and one that set an explicit status reach the store the
/// same way.
pub(crate) struct Interceptor {
    original: Response,
    plan: StorePlan,
}

impl Interceptor {
    pub(crate) fn new(original: Response, plan: StorePlan) -> Self {
        Self { original, plan }
    }

    /// Persists the response if cacheable and returns the one response that
    /// goes back up the chain, marked as a miss.
    pub(crate) async fn emit(self) -> Response {
        let Self { mut original, plan } = self;
        let status = original.status();
        if !original.headers().contains("content-type") {
            original.add_header("Content-Type", DEFAULT_CONTENT_TYPE);
        }

        if plan.is_cacheable(status) {
            let body = original.payload().clone();
            let candidate = CachedResponse::new(status, captured_headers(original.headers()), body);
            plan.persist(candidate).await;
        } else {
            debug!(key = %plan.key, status = status.as_u16(), "response not cacheable");
        }

        original.headers_mut().set(CACHE_HEADER, MISS);
        original
    }
}

fn captured_headers(headers: &Headers) -> Headers {
    let mut captured = Headers::with_capacity(1 + CAPTURED_HEADERS.len());
    for (name, value) in headers.entries("content-type") {
        captured.insert(name, value);
    }
    for wanted in CAPTURED_HEADERS {
        for (name, value) in headers.entries(wanted) {
            captured.insert(name, value);
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryStore, ResolvedOptions, StatusFilter};

    #[test]
    fn group_shapes() {
        assert_eq!(CacheGroup::from("a").into_names(), vec!["a"]);
        assert_eq!(CacheGroup::from(["a", "b"]).into_names(), vec!["a", "b"]);
        assert_eq!(
            CacheGroup::from(vec!["x".to_owned()]).into_names(),
            vec!["x"]
        );
    }

    #[test]
    fn tags_dedup_in_order() {
        let tags = CacheTags::new();
        tags.set(["b", "a", "b", ""]);
        tags.add("c");
        tags.add("a");
        assert_eq!(tags.names(), vec!["b", "a", "c"]);
        tags.set("only");
        assert_eq!(tags.clone().names(), vec!["only"]);
    }

    #[test]
    fn tag_without_cache_layer_is_noop() {
        let ctx = Context::new(crate::Request::get("/"));
        assert!(!tag(&ctx, "users"));
    }

    #[test]
    fn captures_only_type_and_freshness_headers() {
        let headers: Headers = [
            ("content-type", "text/html"),
            ("Set-Cookie", "s=1"),
            ("Cache-Control", "max-age=60"),
            ("Expires", "Thu, 01 Jan 2037 00:00:00 GMT"),
        ]
        .into_iter()
        .collect();
        let captured = captured_headers(&headers);
        let names: Vec<_> = captured.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["content-type", "Cache-Control", "Expires"]);
    }

    fn plan(runtime: &Arc<Runtime>, key: &str, tags: CacheTags) -> StorePlan {
        StorePlan {
            runtime: Arc::clone(runtime),
            key: key.to_owned(),
            duration_ms: 60_000,
            tags,
            bypass: false,
        }
    }

    fn memory_runtime(options: ResolvedOptions) -> Arc<Runtime> {
        Arc::new(Runtime::new(options, Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn emit_stores_normalized_response_and_marks_miss() {
        let runtime = memory_runtime(ResolvedOptions::default());
        let tags = CacheTags::new();
        tags.set(["users", "admin"]);
        let original = Response::new(StatusCode::ACCEPTED)
            .header("X-Trace", "1")
            .header("Expires", "0")
            .body("{}");

        let res = Interceptor::new(original, plan(&runtime, "apicache:/u", tags))
            .emit()
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(res.headers().get("content-type"), Some(DEFAULT_CONTENT_TYPE));
        assert_eq!(res.headers().get(CACHE_HEADER), Some(MISS));
        assert_eq!(res.headers().get("x-trace"), Some("1"));
        assert_eq!(&res.payload()[..], b"{}");

        let stored = runtime.store.get("apicache:/u").await.unwrap().unwrap();
        assert_eq!(stored.status, 202);
        let names: Vec<_> = stored.headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["Content-Type", "Expires"]);
        let index = runtime.store.index().await.unwrap();
        assert_eq!(index.groups.len(), 2);
    }

    #[tokio::test]
    async fn uncacheable_statuses_are_emitted_but_not_stored() {
        let options = ResolvedOptions {
            status_codes: StatusFilter {
                include: Vec::new(),
                exclude: vec![204],
            },
            ..ResolvedOptions::default()
        };
        let runtime = memory_runtime(options);
        for (key, status) in [("k:err", StatusCode::NOT_FOUND), ("k:204", StatusCode::NO_CONTENT)] {
            let res = Interceptor::new(Response::new(status), plan(&runtime, key, CacheTags::new()))
                .emit()
                .await;
            assert_eq!(res.status(), status);
            assert_eq!(res.headers().get(CACHE_HEADER), Some(MISS));
        }

        let mut bypassed = plan(&runtime, "k:bypass", CacheTags::new());
        bypassed.bypass = true;
        Interceptor::new(Response::new(StatusCode::OK), bypassed).emit().await;

        assert!(runtime.store.index().await.unwrap().all.is_empty());
    }
}
