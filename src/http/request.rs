//! The request side of a cached exchange.

use super::{Headers, Method};

/// An HTTP/1.1 request as the host server hands it to the middleware chain.
///
/// The raw request target is kept as-is: [`url`](Self::url) returns the path
/// and query string exactly as the client sent them, which is what the
/// response cache keys on.
///
/// # Examples
///
/// ```
/// use rttp_cache::http::Request;
///
/// let request = Request::get("/hello?name=world").header("Host", "localhost");
///
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_string(), Some("name=world"));
/// assert_eq!(request.url(), "/hello?name=world");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: Headers,
}

impl Request {
    /// Builds a request for `target` (path plus optional `?query`) with no
    /// headers.
    pub fn new(method: Method, target: impl AsRef<str>) -> Self {
        let (path, query) = split_target(target.as_ref());
        Self {
            method,
            path,
            query,
            headers: Headers::new(),
        }
    }

    /// Shorthand for a `GET` request to `target`.
    pub fn get(target: impl AsRef<str>) -> Self {
        Self::new(Method::Get, target)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the path with the raw query string reattached.
    ///
    /// A target sent as `/a?` keeps its trailing `?`, so it stays distinct
    /// from `/a`.
    pub fn url(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }
}

fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_keeps_raw_query() {
        let req = Request::get("/search?q=a+b&page=2");
        assert_eq!(req.path(), "/search");
        assert_eq!(req.query_string(), Some("q=a+b&page=2"));
        assert_eq!(req.url(), "/search?q=a+b&page=2");
    }

    #[test]
    fn trailing_question_mark_is_distinct() {
        assert_eq!(Request::get("/a?").url(), "/a?");
        assert_eq!(Request::get("/a").url(), "/a");
        assert_eq!(Request::get("/a?").query_string(), Some(""));
    }

    #[test]
    fn builder_headers() {
        let req = Request::new(Method::Post, "/users").header("X-Apicache-Bypass", "true");
        assert!(req.headers().contains("x-apicache-bypass"));
        assert_eq!(req.method(), &Method::Post);
    }
}
