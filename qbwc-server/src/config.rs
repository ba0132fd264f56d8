//! Configuration for the connector service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use qbwc_core::DispatchConfig;

/// Environment variable overriding `auth.secret`.
pub const ENV_SECRET: &str = "QBWC_SECRET";
/// Environment variable overriding `auth.company_file_path`.
pub const ENV_COMPANY_FILE_PATH: &str = "QBWC_COMPANY_FILE_PATH";

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// Credentials and company file.
    pub auth: AuthConfig,
    /// Request payload sources.
    pub catalog: CatalogConfig,
    /// Background handler limits.
    pub dispatch: DispatchSettings,
    /// Session lifetime.
    pub session: SessionConfig,
    /// Data handler tuning.
    pub handlers: HandlerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Socket address to bind.
    pub listen_addr: String,
    /// Path the Web Connector posts SOAP envelopes to.
    pub endpoint_path: String,
    /// Largest accepted request body. qbXML query responses run to tens
    /// of megabytes.
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// `<hashedPassword>||<hashedUsername>`; see `qbwc-server --hash`.
    pub secret: String,
    /// Company file returned on successful login. Empty = whichever
    /// file is open in QuickBooks.
    pub company_file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Directory holding the request files. Relative paths resolve
    /// against the config file's directory.
    pub directory: PathBuf,
    /// Request files in protocol order.
    pub requests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub queue_depth: usize,
    pub max_concurrent: usize,
    pub handler_timeout_secs: u64,
    /// How long shutdown waits for queued and running handlers.
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions unused for this long are dropped. 0 disables reaping.
    pub idle_timeout_secs: u64,
    /// How often to look for idle sessions.
    pub reap_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Maximum records a handler processes from one response.
    pub parse_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            endpoint_path: "/QuickBookConnector".into(),
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("RequestQbXmlFiles"),
            requests: vec!["ItemInventoryQueryRq.xml".into()],
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            max_concurrent: 4,
            handler_timeout_secs: 120,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            reap_interval_secs: 60,
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self { parse_limit: 500 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Where a loaded configuration came from.
///
/// [`ServerConfig::load`] runs before logging is set up, so the outcome
/// is returned for the caller to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    /// No readable file; defaults used.
    Missing,
    /// The file did not parse; defaults used.
    Invalid(String),
}

impl ConfigSource {
    /// Log the outcome for `path`.
    pub fn log(&self, path: &Path) {
        match self {
            Self::File => tracing::info!("loaded config from {}", path.display()),
            Self::Missing => tracing::info!("no config at {}; using defaults", path.display()),
            Self::Invalid(e) => {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display())
            }
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Relative catalog directories are resolved against the file's
    /// directory, and environment overrides are applied last.
    pub fn load(path: &Path) -> (Self, ConfigSource) {
        let (mut cfg, source) = match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(cfg) => (cfg, ConfigSource::File),
                Err(e) => (Self::default(), ConfigSource::Invalid(e.to_string())),
            },
            Err(_) => (Self::default(), ConfigSource::Missing),
        };

        if cfg.catalog.directory.is_relative() {
            if let Some(base) = path.parent() {
                cfg.catalog.directory = base.join(&cfg.catalog.directory);
            }
        }
        cfg.apply_overrides(|key| std::env::var(key).ok());
        (cfg, source)
    }

    /// Apply `QBWC_*` overrides from `lookup` (normally the process
    /// environment). Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(ENV_SECRET).filter(|v| !v.is_empty()) {
            self.auth.secret = secret;
        }
        if let Some(path) = lookup(ENV_COMPANY_FILE_PATH).filter(|v| !v.is_empty()) {
            self.auth.company_file_path = path;
        }
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Convert dispatch settings into a [`DispatchConfig`].
    pub fn to_dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            queue_depth: self.dispatch.queue_depth.max(1),
            max_concurrent: self.dispatch.max_concurrent.max(1),
            handler_timeout: Duration::from_secs(self.dispatch.handler_timeout_secs.max(1)),
        }
    }

    /// The configured secret, if any.
    pub fn secret(&self) -> Option<String> {
        Some(self.auth.secret.clone()).filter(|s| !s.trim().is_empty())
    }

    /// Idle timeout, or `None` when reaping is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        match self.session.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.session.reap_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.dispatch.shutdown_grace_secs)
    }
}

// ── Tests ────────────────────────────────────────────────────────
