//! Per-request context: the request plus type-erased extensions.
//!
//! Middleware uses extensions to hand state to the layers below it. The
//! response cache, for example, installs a [`CacheTags`](crate::cache::CacheTags)
//! handle so downstream handlers can name the groups their response belongs to.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::Request;

/// Type-erased request extensions map: used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

/// Per-request context handed down the middleware chain.
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

impl From<Request> for Context {
    fn from(request: Request) -> Self {
        Self::new(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u8);

    #[test]
    fn insert_replaces_same_type() {
        let mut ext = Extensions::new();
        ext.insert(Marker(1));
        ext.insert(Marker(2));
        assert_eq!(ext.get::<Marker>(), Some(&Marker(2)));
    }

    #[test]
    fn context_exposes_request() {
        let ctx = Context::from(Request::get("/a?b=1"));
        assert_eq!(ctx.request().url(), "/a?b=1");
        assert!(ctx.extensions().get::<Marker>().is_none());
    }
}
