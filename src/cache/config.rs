//! Cache configuration.
//!
//! [`CacheOptions`] is a patch: every field is optional, and
//! [`ResponseCache::configure`](super::ResponseCache::configure) merges the
//! fields that are set over the current [`ResolvedOptions`]. [`CacheConfig`]
//! is the same patch in a serde-friendly shape for hosts that load settings
//! from a file or the environment.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;

use super::duration::DurationSpec;
use super::error::CacheError;
use super::store::{CacheStore, RedisOptions};
use crate::http::{Request, StatusCode};

pub const DEFAULT_PREFIX: &str = "apicache";
pub const DEFAULT_DURATION_MS: u64 = 3_600_000;

/// Invoked with the request URL on a hit or a miss.
pub type UrlCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Derives an extra key discriminator from the request.
pub type AppendKey = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Which backend to build at configure time.
#[derive(Clone)]
pub enum Backend {
    Memory,
    Redis(RedisOptions),
    /// A caller-supplied store, used verbatim.
    Custom(Arc<dyn CacheStore>),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis(_) => "redis",
            Self::Custom(_) => "custom",
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis(opts) => f.debug_tuple("Redis").field(opts).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// Backend selector as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum BackendKind {
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "local" => Ok(Self::Memory),
            "redis" | "remote" => Ok(Self::Redis),
            other => Err(CacheError::config(format!("unknown cache backend {other:?}"))),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = CacheError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Extra status-code restrictions on top of the `< 400` rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StatusFilter {
    /// When non-empty, only these codes are cached.
    pub include: Vec<u16>,
    /// These codes are never cached.
    pub exclude: Vec<u16>,
}

impl StatusFilter {
    pub fn allows(&self, status: StatusCode) -> bool {
        let code = status.as_u16();
        (self.include.is_empty() || self.include.contains(&code)) && !self.exclude.contains(&code)
    }
}

/// A partial update to the cache options.
///
/// ```
/// use rttp_cache::cache::CacheOptions;
///
/// let patch = CacheOptions::new()
///     .default_duration("5 minutes")
///     .prefix("shop")
///     .on_hit(|url| println!("hit {url}"));
/// ```
#[derive(Clone, Default)]
pub struct CacheOptions {
    pub enabled: Option<bool>,
    pub default_duration: Option<DurationSpec>,
    pub backend: Option<Backend>,
    pub prefix: Option<String>,
    pub on_hit: Option<UrlCallback>,
    pub on_miss: Option<UrlCallback>,
    pub status_codes: Option<StatusFilter>,
    pub respect_cache_control: Option<bool>,
    pub append_key: Option<AppendKey>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn default_duration(mut self, duration: impl Into<DurationSpec>) -> Self {
        self.default_duration = Some(duration.into());
        self
    }

    #[must_use]
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    #[must_use]
    pub fn redis(self, url: impl Into<String>) -> Self {
        self.backend(Backend::Redis(RedisOptions::new(url)))
    }

    #[must_use]
    pub fn store(self, store: Arc<dyn CacheStore>) -> Self {
        self.backend(Backend::Custom(store))
    }

    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn on_hit(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_hit = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn on_miss(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_miss = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn status_codes(mut self, filter: StatusFilter) -> Self {
        self.status_codes = Some(filter);
        self
    }

    #[must_use]
    pub fn respect_cache_control(mut self, respect: bool) -> Self {
        self.respect_cache_control = Some(respect);
        self
    }

    #[must_use]
    pub fn append_key(mut self, f: impl Fn(&Request) -> String + Send + Sync + 'static) -> Self {
        self.append_key = Some(Arc::new(f));
        self
    }
}

/// The full, current option set.
#[derive(Clone)]
pub struct ResolvedOptions {
    pub enabled: bool,
    pub default_duration_ms: u64,
    pub backend: Backend,
    pub prefix: String,
    pub on_hit: Option<UrlCallback>,
    pub on_miss: Option<UrlCallback>,
    pub status_codes: StatusFilter,
    pub respect_cache_control: bool,
    pub append_key: Option<AppendKey>,
}

impl Default for ResolvedOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            default_duration_ms: DEFAULT_DURATION_MS,
            backend: Backend::Memory,
            prefix: DEFAULT_PREFIX.to_owned(),
            on_hit: None,
            on_miss: None,
            status_codes: StatusFilter::default(),
            respect_cache_control: false,
            append_key: None,
        }
    }
}

impl ResolvedOptions {
    /// Shallow merge: fields set in `patch` win, the rest stay as they are.
    ///
    /// A default duration that fails to parse leaves the current default in
    /// place.
    pub(crate) fn merge(&self, patch: CacheOptions) -> Self {
        let default_duration_ms = patch
            .default_duration
            .map_or(self.default_duration_ms, |d| d.resolve(self.default_duration_ms));
        Self {
            enabled: patch.enabled.unwrap_or(self.enabled),
            default_duration_ms,
            backend: patch.backend.unwrap_or_else(|| self.backend.clone()),
            prefix: patch.prefix.unwrap_or_else(|| self.prefix.clone()),
            on_hit: patch.on_hit.or_else(|| self.on_hit.clone()),
            on_miss: patch.on_miss.or_else(|| self.on_miss.clone()),
            status_codes: patch.status_codes.unwrap_or_else(|| self.status_codes.clone()),
            respect_cache_control: patch
                .respect_cache_control
                .unwrap_or(self.respect_cache_control),
            append_key: patch.append_key.or_else(|| self.append_key.clone()),
        }
    }
}

impl fmt::Debug for ResolvedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedOptions")
            .field("enabled", &self.enabled)
            .field("default_duration_ms", &self.default_duration_ms)
            .field("backend", &self.backend)
            .field("prefix", &self.prefix)
            .field("on_hit", &self.on_hit.is_some())
            .field("on_miss", &self.on_miss.is_some())
            .field("status_codes", &self.status_codes)
            .field("respect_cache_control", &self.respect_cache_control)
            .field("append_key", &self.append_key.is_some())
            .finish()
    }
}

/// Declarative configuration, e.g. a `[cache]` table in the host's settings.
///
/// ```
/// use rttp_cache::cache::{CacheConfig, CacheOptions};
///
/// let config: CacheConfig = serde_json::from_str(r#"{
///     "default_duration": "10 minutes",
///     "backend": "redis",
///     "redis_url": "redis://127.0.0.1/",
///     "status_codes": { "exclude": [204] }
/// }"#).unwrap();
/// let options = CacheOptions::try_from(config).unwrap();
/// assert!(options.backend.is_some());
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: Option<bool>,
    pub default_duration: Option<DurationSpec>,
    pub backend: Option<BackendKind>,
    pub redis_url: Option<String>,
    pub prefix: Option<String>,
    pub respect_cache_control: Option<bool>,
    pub status_codes: Option<StatusFilter>,
}

impl TryFrom<CacheConfig> for CacheOptions {
    type Error = CacheError;

    fn try_from(config: CacheConfig) -> Result<Self, Self::Error> {
        let backend = match (config.backend, config.redis_url) {
            (Some(BackendKind::Redis), Some(url)) => Some(Backend::Redis(RedisOptions::new(url))),
            (Some(BackendKind::Redis), None) => {
                return Err(CacheError::config("backend \"redis\" requires redis_url"));
            }
            (Some(BackendKind::Memory), _) => Some(Backend::Memory),
            (None, Some(_)) => {
                return Err(CacheError::config("redis_url is set but backend is not \"redis\""));
            }
            (None, None) => None,
        };
        Ok(Self {
            enabled: config.enabled,
            default_duration: config.default_duration,
            backend,
            prefix: config.prefix,
            status_codes: config.status_codes,
            respect_cache_control: config.respect_cache_control,
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_omitted_fields() {
        let base = ResolvedOptions::default().merge(CacheOptions::new().prefix("shop").enabled(false));
        let next = base.merge(CacheOptions::new().default_duration("2 minutes"));
        assert_eq!(next.prefix, "shop");
        assert!(!next.enabled);
        assert_eq!(next.default_duration_ms, 120_000);
        assert_eq!(next.backend.kind(), "memory");
    }

    #[test]
    fn bad_default_duration_keeps_previous() {
        let base = ResolvedOptions::default().merge(CacheOptions::new().default_duration(5_000));
        let next = base.merge(CacheOptions::new().default_duration("whenever"));
        assert_eq!(next.default_duration_ms, 5_000);
    }

    #[test]
    fn status_filter_include_and_exclude() {
        let filter = StatusFilter {
            include: vec![200, 203],
            exclude: vec![203],
        };
        assert!(filter.allows(StatusCode::OK));
        assert!(!filter.allows(StatusCode::from_u16(203).unwrap()));
        assert!(!filter.allows(StatusCode::CREATED));
        assert!(StatusFilter::default().allows(StatusCode::CREATED));
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!("Local".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert!(matches!(
            "memcached".parse::<BackendKind>(),
            Err(CacheError::Config { .. })
        ));
    }

    #[test]
    fn config_rejects_unknown_backend() {
        let err = serde_json::from_str::<CacheConfig>(r#"{"backend":"memcached"}"#).unwrap_err();
        assert!(err.to_string().contains("memcached"), "{err}");
    }

    #[test]
    fn config_redis_requires_url() {
        let config: CacheConfig = serde_json::from_str(r#"{"backend":"redis"}"#).unwrap();
        assert!(CacheOptions::try_from(config).is_err());
    }

    #[test]
    fn config_maps_fields() {
        let config: CacheConfig =
            serde_json::from_str(r#"{"enabled":false,"default_duration":500,"prefix":"p"}"#).unwrap();
        let options = CacheOptions::try_from(config).unwrap();
        assert_eq!(options.enabled, Some(false));
        assert_eq!(options.default_duration, Some(DurationSpec::Millis(500)));
        assert_eq!(options.prefix.as_deref(), Some("p"));
        assert!(options.backend.is_none());
    }
}
