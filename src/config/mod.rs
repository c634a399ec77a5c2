//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::search::SearchMode;
use crate::cache::CacheBackend;

mod cli;

pub use cli::{
    CachePurgeArgs, CliArgs, Command, DatabaseOverride, MigrateArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tenderscope";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_CACHE_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_CACHE_OPERATION_TIMEOUT_MS: u64 = 1_000;
const DEFAULT_CACHE_RETRY_BACKOFF_MS: u64 = 5_000;
const DEFAULT_CACHE_MEMORY_CAPACITY: u64 = 10_000;
const DEFAULT_MONITOR_SAMPLE_SIZE: u64 = 500;
const DEFAULT_MONITOR_LOG_INTERVAL_SECS: u64 = 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub search: SearchSettings,
    pub monitoring: MonitoringSettings,
    pub cors: CorsSettings,
    pub environment: DeploymentEnvironment,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub warming: bool,
    pub backend: CacheBackend,
    pub url: Option<String>,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub retry_backoff: Duration,
    pub memory_capacity: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchSettings {
    pub mode: SearchMode,
}

#[derive(Debug, Clone)]
pub struct MonitoringSettings {
    pub enabled: bool,
    pub sample_size: usize,
    pub log_interval: Duration,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct CorsSettings {
    /// Empty means any origin.
    pub allowed_origins: Vec<String>,
}

/// Controls whether internal error details reach clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentEnvironment {
    #[default]
    Development,
    Production,
}

impl DeploymentEnvironment {
    pub fn exposes_error_details(self) -> bool {
        self != DeploymentEnvironment::Production
    }
}

impl FromStr for DeploymentEnvironment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!(
                "unknown environment `{other}` (expected development|production)"
            )),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("TENDERSCOPE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cors.allowed_origins")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(args)) => raw.apply_database_override(&args.database),
        Some(Command::CachePurge(args)) => raw.apply_cache_purge_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    search: RawSearchSettings,
    monitoring: RawMonitoringSettings,
    cors: RawCorsSettings,
    environment: Option<String>,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(warming) = overrides.cache_warming {
            self.cache.warming = Some(warming);
        }
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
        if let Some(mode) = overrides.search_mode.as_ref() {
            self.search.mode = Some(mode.clone());
        }
        if let Some(enabled) = overrides.monitoring_enabled {
            self.monitoring.enabled = Some(enabled);
        }
        if let Some(environment) = overrides.environment.as_ref() {
            self.environment = Some(environment.clone());
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_cache_purge_overrides(&mut self, args: &CachePurgeArgs) {
        if let Some(url) = args.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            search,
            monitoring,
            cors,
            environment,
        } = raw;

        let environment = match environment {
            Some(value) => DeploymentEnvironment::from_str(&value)
                .map_err(|reason| LoadError::invalid("environment", reason))?,
            None => DeploymentEnvironment::default(),
        };

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            search: build_search_settings(search)?,
            monitoring: build_monitoring_settings(monitoring)?,
            cors: build_cors_settings(cors),
            environment,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let max = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);

    Ok(DatabaseSettings {
        url: non_blank(database.url),
        max_connections: non_zero_u32(max.into(), "database.max_connections")?,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend.as_deref().map(str::trim) {
        None | Some("") => CacheBackend::Redis,
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "redis" => CacheBackend::Redis,
            "memory" => CacheBackend::Memory,
            other => {
                return Err(LoadError::invalid(
                    "cache.backend",
                    format!("unknown backend `{other}` (expected redis|memory)"),
                ));
            }
        },
    };

    let connect = positive_millis(
        cache.connect_timeout_ms,
        DEFAULT_CACHE_CONNECT_TIMEOUT_MS,
        "cache.connect_timeout_ms",
    )?;
    let operation = positive_millis(
        cache.operation_timeout_ms,
        DEFAULT_CACHE_OPERATION_TIMEOUT_MS,
        "cache.operation_timeout_ms",
    )?;
    let backoff = Duration::from_millis(
        cache
            .retry_backoff_ms
            .unwrap_or(DEFAULT_CACHE_RETRY_BACKOFF_MS),
    );

    let capacity = non_zero_u32(
        cache
            .memory_capacity
            .unwrap_or(DEFAULT_CACHE_MEMORY_CAPACITY),
        "cache.memory_capacity",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        warming: cache.warming.unwrap_or(true),
        backend,
        url: non_blank(cache.url),
        connect_timeout: connect,
        operation_timeout: operation,
        retry_backoff: backoff,
        memory_capacity: capacity.get() as usize,
    })
}

fn build_search_settings(search: RawSearchSettings) -> Result<SearchSettings, LoadError> {
    let mode = match search.mode {
        Some(value) => {
            SearchMode::from_str(&value).map_err(|reason| LoadError::invalid("search.mode", reason))?
        }
        None => SearchMode::default(),
    };
    Ok(SearchSettings { mode })
}

fn build_monitoring_settings(
    monitoring: RawMonitoringSettings,
) -> Result<MonitoringSettings, LoadError> {
    let sample_size = monitoring
        .sample_size
        .unwrap_or(DEFAULT_MONITOR_SAMPLE_SIZE);
    let sample_size = non_zero_u32(sample_size, "monitoring.sample_size")?;

    let interval = monitoring
        .log_interval_secs
        .unwrap_or(DEFAULT_MONITOR_LOG_INTERVAL_SECS);
    if interval == 0 {
        return Err(LoadError::invalid(
            "monitoring.log_interval_secs",
            "must be greater than zero",
        ));
    }

    Ok(MonitoringSettings {
        enabled: monitoring.enabled.unwrap_or(true),
        sample_size: sample_size.get() as usize,
        log_interval: Duration::from_secs(interval),
        log_file: monitoring
            .log_file
            .filter(|path| !path.as_os_str().is_empty()),
    })
}

fn build_cors_settings(cors: RawCorsSettings) -> CorsSettings {
    let allowed_origins = match cors.allowed_origins {
        Some(RawOrigins::List(items)) => items,
        Some(RawOrigins::Csv(value)) => value.split(',').map(str::to_string).collect(),
        None => Vec::new(),
    }
    .into_iter()
    .map(|origin| origin.trim().to_string())
    .filter(|origin| !origin.is_empty())
    .collect();

    CorsSettings { allowed_origins }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    warming: Option<bool>,
    backend: Option<String>,
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    operation_timeout_ms: Option<u64>,
    retry_backoff_ms: Option<u64>,
    memory_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSearchSettings {
    mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMonitoringSettings {
    enabled: Option<bool>,
    sample_size: Option<u64>,
    log_interval_secs: Option<u64>,
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCorsSettings {
    allowed_origins: Option<RawOrigins>,
}

/// Origins may be configured as a list or as a comma-separated string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawOrigins {
    List(Vec<String>),
    Csv(String),
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn positive_millis(value: Option<u64>, default: u64, key: &'static str) -> Result<Duration, LoadError> {
    let millis = value.unwrap_or(default);
    if millis == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(millis))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
