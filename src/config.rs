//! Gateway configuration.
//!
//! Settings come from an optional TOML file, then environment variables,
//! then CLI flags (applied by the binary). Every section and key is
//! optional; unknown keys are rejected.
//!
//! ```toml
//! [server]
//! port = 3000
//!
//! [render]
//! max_requests = 100
//! render_timeout = "10s"
//! viewport = "1280x800"
//!
//! [cache]
//! max_entries = 3000
//! max_age = "3days"
//! store_url = "redis://127.0.0.1:6379"
//! ```

use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::level_filters::LevelFilter;

use crate::blocklist::BlockList;
use crate::browser::{NetworkIdle, RequestBudget, SessionPolicy};
use crate::cache::{CacheStore, MemoryStore, RedisStore};
use crate::engine::LaunchConfig;
use crate::{GatewayError, Result, Viewport};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub render: RenderConfig,
    pub cache: CacheConfig,
    pub browser: BrowserConfig,
    pub blocklist: BlockListConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Sub-requests a single page may send.
    pub max_requests: usize,
    /// Window after which every further sub-request is aborted.
    #[serde(with = "humantime_serde")]
    pub request_window: Duration,
    #[serde(with = "humantime_serde")]
    pub render_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub navigation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_quiet: Duration,
    pub idle_max_inflight: usize,
    pub probe: bool,
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
    #[serde(
        serialize_with = "serialize_viewport",
        deserialize_with = "deserialize_viewport"
    )]
    pub viewport: Viewport,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            request_window: Duration::from_secs(30),
            render_timeout: Duration::from_secs(10),
            navigation_timeout: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(15),
            idle_quiet: Duration::from_millis(500),
            idle_max_inflight: 2,
            probe: true,
            probe_timeout: Duration::from_secs(10),
            viewport: Viewport::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    pub max_entries: usize,
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// Redis address. Snapshots stay in process memory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 3000,
            max_age: Duration::from_secs(3 * 24 * 60 * 60),
            store_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    pub executable: Option<PathBuf>,
    pub headful: bool,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockListConfig {
    /// Regexes matched against sub-request URLs in addition to the built-in list.
    pub extra_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level.parse::<LevelFilter>().map_err(|_| {
            GatewayError::Config(format!(
                "logging.level '{}' is not one of off, error, warn, info, debug, trace",
                self.level
            ))
        })
    }
}

fn serialize_viewport<S: Serializer>(
    viewport: &Viewport,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(viewport)
}

fn deserialize_viewport<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Viewport, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

impl Config {
    /// Reads `path` when given, otherwise starts from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = fs::read_to_string(path)?;
                Self::from_toml_str(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| GatewayError::Config(err.to_string()))
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// Timeouts are given in milliseconds except `REQUESTS_TIMEOUT`, which is
    /// in seconds.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = parse_env("PORT", &port)?;
        }
        if let Some(value) = get("MAX_REQUESTS") {
            self.render.max_requests = parse_env("MAX_REQUESTS", &value)?;
        }
        if let Some(value) = get("REQUESTS_TIMEOUT") {
            self.render.request_window =
                Duration::from_secs(parse_env("REQUESTS_TIMEOUT", &value)?);
        }
        if let Some(value) = get("RENDER_TIMEOUT") {
            self.render.render_timeout =
                Duration::from_millis(parse_env("RENDER_TIMEOUT", &value)?);
        }
        if let Some(value) = get("NAVIGATION_TIMEOUT") {
            self.render.navigation_timeout =
                Duration::from_millis(parse_env("NAVIGATION_TIMEOUT", &value)?);
        }
        if let Some(value) = get("WAIT_TIMEOUT") {
            self.render.wait_timeout =
                Duration::from_millis(parse_env("WAIT_TIMEOUT", &value)?);
        }
        if let Some(value) = get("PROBE") {
            self.render.probe = parse_flag(&value);
        }
        if let Some(value) = get("MAX_CACHE_SIZE") {
            self.cache.max_entries = parse_env("MAX_CACHE_SIZE", &value)?;
        }
        if let Some(value) = get("MAX_CACHE_TTL") {
            self.cache.max_age = Duration::from_millis(parse_env("MAX_CACHE_TTL", &value)?);
        }
        if let Some(url) = get("REDIS_URL") {
            self.cache.store_url = Some(url);
        }
        if let Some(path) = get("CHROME_BIN") {
            self.browser.executable = Some(PathBuf::from(path));
        }
        if let Some(value) = get("HEADFUL") {
            self.browser.headful = parse_flag(&value);
        }
        if get("DEBUG").is_some_and(|value| parse_flag(&value)) {
            self.logging.level = "debug".to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(GatewayError::Config("server.host must not be empty".into()));
        }
        if self.render.max_requests == 0 {
            return Err(GatewayError::Config(
                "render.max_requests must be greater than 0".into(),
            ));
        }
        for (name, value) in [
            ("render.request_window", self.render.request_window),
            ("render.render_timeout", self.render.render_timeout),
            ("render.navigation_timeout", self.render.navigation_timeout),
            ("render.wait_timeout", self.render.wait_timeout),
            ("render.probe_timeout", self.render.probe_timeout),
            ("cache.max_age", self.cache.max_age),
        ] {
            if value.is_zero() {
                return Err(GatewayError::Config(format!("{name} must be greater than 0")));
            }
        }
        if self.cache.max_entries == 0 {
            return Err(GatewayError::Config(
                "cache.max_entries must be greater than 0".into(),
            ));
        }
        if let Some(url) = &self.cache.store_url {
            redis::Client::open(url.as_str()).map_err(|err| {
                GatewayError::Config(format!(
                    "cache.store_url '{url}' is not a Redis address: {err}"
                ))
            })?;
        }
        self.logging.level_filter()?;
        self.block_list()?;
        Ok(())
    }

    pub fn block_list(&self) -> Result<BlockList> {
        BlockList::with_patterns(&self.blocklist.extra_patterns)
    }

    pub fn session_policy(&self) -> Result<SessionPolicy> {
        Ok(SessionPolicy {
            budget: RequestBudget {
                max_requests: self.render.max_requests,
                window: self.render.request_window,
            },
            navigation_timeout: self.render.navigation_timeout,
            render_timeout: self.render.render_timeout,
            idle: NetworkIdle {
                quiet: self.render.idle_quiet,
                max_inflight: self.render.idle_max_inflight,
            },
            blocklist: Arc::new(self.block_list()?),
        })
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            executable: self.browser.executable.clone(),
            headful: self.browser.headful,
            args: self.browser.args.clone(),
        }
    }

    pub fn memory_store(&self) -> Result<MemoryStore> {
        Ok(MemoryStore::new(self.cache_capacity()?, self.cache.max_age))
    }

    /// Connects to Redis when `cache.store_url` is set, otherwise builds the
    /// in-process store.
    pub async fn cache_store(&self) -> Result<Arc<dyn CacheStore>> {
        match &self.cache.store_url {
            Some(url) => {
                let store =
                    RedisStore::connect(url, self.cache_capacity()?, self.cache.max_age).await?;
                Ok(Arc::new(store))
            }
            None => Ok(Arc::new(self.memory_store()?)),
        }
    }

    fn cache_capacity(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.cache.max_entries).ok_or_else(|| {
            GatewayError::Config("cache.max_entries must be greater than 0".into())
        })
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GatewayError::Config(format!("{name}={value} is not a valid number")))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
