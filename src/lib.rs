//! # rttp-cache
//!
//! URL-keyed response caching middleware for the rttp HTTP stack.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rttp_cache::cache::{self, ResponseCache};
//! use rttp_cache::context::Context;
//! use rttp_cache::middleware::{Next, endpoint};
//! use rttp_cache::{Request, Response, StatusCode};
//!
//! # async fn example() {
//! let cache = ResponseCache::new();
//!
//! let chain = vec![
//!     cache.handler("5 minutes"),
//!     endpoint(|ctx: Context| async move {
//!         cache::tag(&ctx, "users");
//!         Response::new(StatusCode::OK).body(r#"[{"id":1}]"#)
//!     }),
//! ];
//!
//! let first = Next::new(chain.clone()).run(Context::new(Request::get("/users"))).await;
//! let second = Next::new(chain).run(Context::new(Request::get("/users"))).await;
//! assert_eq!(first.headers().get("x-apicache"), Some("miss"));
//! assert_eq!(second.headers().get("x-apicache"), Some("hit"));
//!
//! cache.clear_group("users").await.ok();
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;

pub use cache::ResponseCache;
pub use http::{Headers, Method, Request, Response, StatusCode};
