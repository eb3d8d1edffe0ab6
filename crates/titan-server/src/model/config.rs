//! Configuration management for the Titan server
//!
//! Values come from `conf/application.yml`, then `TITAN_`-prefixed
//! environment variables, then command line overrides. Keys are dotted
//! (`titan.auth.secret`) so `TITAN_AUTH_SECRET` maps onto them directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment};

use titan_auth::model::{
    DEFAULT_DENIED_PATH, DEFAULT_EXPIRATION_SECONDS, DEFAULT_ROLE_CLAIM, TITAN_AUTH_AUDIENCE,
    TITAN_AUTH_CLOCK_SKEW_SECONDS, TITAN_AUTH_DENIED_PATH, TITAN_AUTH_EXPIRATION_SECONDS,
    TITAN_AUTH_ISSUER, TITAN_AUTH_PATH_CASE_SENSITIVE, TITAN_AUTH_PERMISSION_RELOAD_INTERVAL_MS,
    TITAN_AUTH_PERMISSION_SOURCE, TITAN_AUTH_ROLE_CLAIM, TITAN_AUTH_SECRET,
    TITAN_AUTH_UNMAPPED_POLICY,
};
use titan_auth::service::permission::PermissionStore;
use titan_auth::{PermissionRequirement, UnmappedPolicy};
use titan_cache::{CacheMode, CacheSettings};
use titan_common::TitanError;

use crate::startup::logging::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/application.yml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;

const SERVER_ADDRESS: &str = "server.address";
const SERVER_PORT: &str = "server.port";

const TITAN_CACHE_ENABLED: &str = "titan.cache.enabled";
const TITAN_CACHE_TTL_SECONDS: &str = "titan.cache.ttl.seconds";
const TITAN_CACHE_MAX_CAPACITY: &str = "titan.cache.max.capacity";
const TITAN_CACHE_WAIT_TIMEOUT_MS: &str = "titan.cache.wait.timeout.ms";
const TITAN_CACHE_MODE: &str = "titan.cache.mode";

const TITAN_LOGS_PATH: &str = "titan.logs.path";
const TITAN_LOGS_LEVEL: &str = "titan.logs.level";
const TITAN_LOGS_CONSOLE: &str = "titan.logs.console";
const TITAN_LOGS_FILE: &str = "titan.logs.file";

/// Command line arguments for the server
#[derive(Debug, Parser)]
#[command(version, about = "Titan blog API server")]
struct Cli {
    /// Path of the application configuration file
    #[arg(short = 'c', long = "config", env = "TITAN_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    /// HTTP port to listen on
    #[arg(short = 'p', long = "port")]
    port: Option<u16>,
    /// Permission table file (YAML or JSON)
    #[arg(long = "permissions")]
    permissions: Option<String>,
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process command line
    pub fn new() -> anyhow::Result<Self> {
        let args = Cli::parse();

        let mut builder = Self::builder(&args.config);
        if let Some(port) = args.port {
            builder = builder.set_override(SERVER_PORT, port as i64)?;
        }
        if let Some(permissions) = args.permissions {
            builder = builder.set_override(TITAN_AUTH_PERMISSION_SOURCE, permissions)?;
        }

        Ok(Self {
            config: builder.build()?,
        })
    }

    /// Load configuration from a file plus the environment, without reading
    /// the command line
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        Ok(Self {
            config: Self::builder(path).build()?,
        })
    }

    fn builder(path: &str) -> config::ConfigBuilder<config::builder::DefaultState> {
        Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("TITAN")
                    .keep_prefix(true)
                    .separator("_")
                    .try_parsing(true),
            )
    }

    // ========================================================================
    // Server Configuration
    // ========================================================================

    pub fn server_address(&self) -> String {
        self.config
            .get_string(SERVER_ADDRESS)
            .unwrap_or("0.0.0.0".to_string())
    }

    pub fn server_port(&self) -> u16 {
        self.config
            .get_int(SERVER_PORT)
            .ok()
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    // ========================================================================
    // Auth Configuration
    // ========================================================================

    pub fn auth_issuer(&self) -> String {
        self.config
            .get_string(TITAN_AUTH_ISSUER)
            .unwrap_or("titan".to_string())
    }

    pub fn auth_audience(&self) -> String {
        self.config
            .get_string(TITAN_AUTH_AUDIENCE)
            .unwrap_or("titan-blog".to_string())
    }

    /// Signing secret; startup fails without one
    pub fn auth_secret(&self) -> Result<String, TitanError> {
        match self.config.get_string(TITAN_AUTH_SECRET) {
            Ok(secret) if !secret.trim().is_empty() => Ok(secret),
            _ => Err(TitanError::ConfigError(format!(
                "'{}' must be set",
                TITAN_AUTH_SECRET
            ))),
        }
    }

    pub fn auth_expiration(&self) -> Duration {
        Duration::from_secs(self.get_u64(TITAN_AUTH_EXPIRATION_SECONDS, DEFAULT_EXPIRATION_SECONDS))
    }

    pub fn auth_clock_skew(&self) -> Duration {
        Duration::from_secs(self.get_u64(TITAN_AUTH_CLOCK_SKEW_SECONDS, 0))
    }

    pub fn auth_role_claim(&self) -> String {
        self.config
            .get_string(TITAN_AUTH_ROLE_CLAIM)
            .unwrap_or(DEFAULT_ROLE_CLAIM.to_string())
    }

    pub fn auth_denied_path(&self) -> String {
        self.config
            .get_string(TITAN_AUTH_DENIED_PATH)
            .unwrap_or(DEFAULT_DENIED_PATH.to_string())
    }

    pub fn auth_unmapped_policy(&self) -> Result<UnmappedPolicy, TitanError> {
        match self.config.get_string(TITAN_AUTH_UNMAPPED_POLICY) {
            Ok(value) => value.parse().map_err(TitanError::ConfigError),
            Err(_) => Ok(UnmappedPolicy::default()),
        }
    }

    pub fn auth_path_case_sensitive(&self) -> bool {
        self.config
            .get_bool(TITAN_AUTH_PATH_CASE_SENSITIVE)
            .unwrap_or(true)
    }

    pub fn permission_source(&self) -> Option<PathBuf> {
        self.config
            .get_string(TITAN_AUTH_PERMISSION_SOURCE)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    }

    /// Periodic reload interval; zero disables the reload task
    pub fn permission_reload_interval(&self) -> Option<Duration> {
        match self.get_u64(TITAN_AUTH_PERMISSION_RELOAD_INTERVAL_MS, 0) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn permission_requirement(
        &self,
        permissions: Arc<PermissionStore>,
    ) -> Result<PermissionRequirement, TitanError> {
        Ok(PermissionRequirement::new(
            self.auth_denied_path(),
            permissions,
            self.auth_role_claim(),
            self.auth_issuer(),
            self.auth_audience(),
            self.auth_secret()?.into_bytes(),
            self.auth_expiration(),
        )
        .with_clock_skew(self.auth_clock_skew())
        .with_unmapped_policy(self.auth_unmapped_policy()?))
    }

    // ========================================================================
    // Cache Configuration
    // ========================================================================

    pub fn cache_settings(&self) -> Result<CacheSettings, TitanError> {
        let defaults = CacheSettings::default();

        let mode = match self.config.get_string(TITAN_CACHE_MODE) {
            Ok(value) => value
                .parse::<CacheMode>()
                .map_err(TitanError::ConfigError)?,
            Err(_) => defaults.mode,
        };

        Ok(CacheSettings {
            enabled: self
                .config
                .get_bool(TITAN_CACHE_ENABLED)
                .unwrap_or(defaults.enabled),
            default_ttl: Duration::from_secs(
                self.get_u64(TITAN_CACHE_TTL_SECONDS, defaults.default_ttl.as_secs()),
            ),
            max_capacity: self.get_u64(TITAN_CACHE_MAX_CAPACITY, defaults.max_capacity),
            wait_timeout: Duration::from_millis(self.get_u64(
                TITAN_CACHE_WAIT_TIMEOUT_MS,
                defaults.wait_timeout.as_millis() as u64,
            )),
            mode,
        })
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        let env = LoggingConfig::from_env();
        LoggingConfig::from_config(
            self.config
                .get_string(TITAN_LOGS_PATH)
                .ok()
                .or_else(|| Some(env.log_dir.display().to_string())),
            self.config
                .get_bool(TITAN_LOGS_CONSOLE)
                .unwrap_or(env.console_output),
            self.config
                .get_bool(TITAN_LOGS_FILE)
                .unwrap_or(env.file_logging),
            self.config
                .get_string(TITAN_LOGS_LEVEL)
                .unwrap_or(env.console_level.to_string()),
        )
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }
}
