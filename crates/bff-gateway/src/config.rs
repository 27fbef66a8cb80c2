use crate::route::QueryMode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid BFF_PORT value {0:?}")]
    Port(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_admin_addr")]
    pub admin_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_freshness")]
    pub freshness_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// 0 disables the timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub query_mode: QueryMode,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `BFF_PORT` from the given lookup on top of the file values.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("BFF_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Port(port.clone()))?;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("0.0.0.0:{}", self.server.port)
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_secs(self.cache.freshness_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_seconds.max(1))
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        match self.upstream.timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            admin_addr: default_admin_addr(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            freshness_seconds: default_freshness(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            query_mode: QueryMode::default(),
        }
    }
}

fn default_port() -> u16 {
    80
}
fn default_admin_addr() -> String {
    "0.0.0.0:9090".to_string()
}
fn default_freshness() -> u64 {
    bff_cache::DEFAULT_FRESHNESS_WINDOW.as_secs()
}
fn default_sweep_interval() -> u64 {
    bff_cache::DEFAULT_SWEEP_INTERVAL.as_secs()
}
fn default_timeout_ms() -> u64 {
    30_000
}
