use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub chain: ChainConfig,
    pub ens: EnsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Secrets never come from the config file.
    #[serde(skip)]
    pub secrets: Secrets,
}

impl RelayConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("TAP_RELAY_CONFIG").unwrap_or_else(|_| "config/relay.toml".to_string());
        assert!(
            !configured_path.is_empty(),
            "Configuration path must be non-empty"
        );
        assert!(
            configured_path.len() < 4096,
            "Configuration path length exceeds hard limit"
        );

        let mut builder = Config::builder()
            .add_source(File::new(&configured_path, FileFormat::Toml).required(true));

        if let Ok(env_override) = std::env::var("TAP_RELAY_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/relay.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize relay configuration")?;

        config.secrets = Secrets::from_env();
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        assert!(!self.chain.rpc_url.is_empty(), "Chain RPC URL must be set");
        assert!(!self.ens.rpc_url.is_empty(), "ENS RPC URL must be set");
        assert!(self.chain.chain_id > 0, "Chain id must be positive");
        self.limits.ensure_bounds()?;
        self.cache.ensure_bounds()?;
        if let Some(db) = &self.store.database_url {
            assert!(!db.is_empty(), "Database URL cannot be empty when set");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Option<IpAddr>,
    pub port: u16,
}

impl ServerConfig {
    pub fn address(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(self.port != 0, "HTTP port cannot be zero");
        SocketAddr::new(host, self.port)
    }
}

/// Where cross-request state lives. No database URL means the process-local
/// fallback store; startup logs a warning because that mode cannot back a
/// multi-instance deployment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    #[serde(default = "StoreConfig::default_max_connections")]
    pub max_connections: u32,
    pub min_connections: Option<u32>,
}

impl StoreConfig {
    const fn default_max_connections() -> u32 {
        8
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Drop contract address; mint and lookup return 500 while unset.
    pub contract_address: Option<String>,
    /// First block the minted-lookup scans when the query gives none.
    #[serde(default)]
    pub deploy_block: u64,
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "ChainConfig::default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    #[serde(default = "ChainConfig::default_receipt_poll_ms")]
    pub receipt_poll_ms: u64,
    #[serde(default = "ChainConfig::default_gas_limit")]
    pub gas_limit: u64,
}

impl ChainConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(5_000);
        assert!(millis >= 100, "RPC timeout must be at least 100ms");
        assert!(millis <= 60_000, "RPC timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    /// Bound on the receipt wait; a stuck transaction becomes a distinct
    /// timeout error instead of hanging the request.
    pub fn confirm_timeout(&self) -> Duration {
        assert!(
            self.confirm_timeout_ms >= 1_000,
            "Confirmation timeout must be at least 1 second"
        );
        assert!(
            self.confirm_timeout_ms <= 300_000,
            "Confirmation timeout cannot exceed 5 minutes"
        );
        Duration::from_millis(self.confirm_timeout_ms)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        assert!(
            self.receipt_poll_ms >= 100,
            "Receipt poll interval must be >= 100ms"
        );
        Duration::from_millis(self.receipt_poll_ms)
    }

    const fn default_confirm_timeout_ms() -> u64 {
        60_000
    }

    const fn default_receipt_poll_ms() -> u64 {
        1_000
    }

    const fn default_gas_limit() -> u64 {
        300_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnsConfig {
    /// Ethereum mainnet RPC endpoint used only for name resolution.
    pub rpc_url: String,
    /// Registry override for test networks; defaults to the mainnet
    /// singleton.
    pub registry_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "LimitsConfig::default_max_mints")]
    pub max_mints_per_address: u32,
    #[serde(default = "LimitsConfig::default_rate_window_ms")]
    pub rate_window_ms: i64,
    #[serde(default = "LimitsConfig::default_rate_max")]
    pub rate_max: u32,
}

impl LimitsConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(self.max_mints_per_address > 0, "Mint cap must be positive");
        assert!(
            self.max_mints_per_address <= 100,
            "Mint cap exceeds defensive limit"
        );
        assert!(self.rate_window_ms >= 1_000, "Rate window below 1 second");
        assert!(self.rate_max > 0, "Rate limit must be positive");
        Ok(())
    }

    const fn default_max_mints() -> u32 {
        crate::relay::MAX_MINTS_PER_ADDRESS
    }

    // 120 requests per 10 minutes per IP.
    const fn default_rate_window_ms() -> i64 {
        600_000
    }

    const fn default_rate_max() -> u32 {
        120
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_mints_per_address: Self::default_max_mints(),
            rate_window_ms: Self::default_rate_window_ms(),
            rate_max: Self::default_rate_max(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_resolve_capacity")]
    pub resolve_max_capacity: u64,
    #[serde(default = "CacheConfig::default_resolve_ttl")]
    pub resolve_ttl_seconds: u64,
}

impl CacheConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.resolve_max_capacity >= 16,
            "Resolve cache capacity must be at least 16"
        );
        assert!(
            self.resolve_ttl_seconds <= 86_400,
            "Resolve cache TTL cannot exceed one day"
        );
        Ok(())
    }

    const fn default_resolve_capacity() -> u64 {
        10_000
    }

    const fn default_resolve_ttl() -> u64 {
        300
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            resolve_max_capacity: Self::default_resolve_capacity(),
            resolve_ttl_seconds: Self::default_resolve_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "CorsConfig::default_origins")]
    pub allowed_origins: Vec<String>,
}

impl CorsConfig {
    fn default_origins() -> Vec<String> {
        vec![
            "https://phift.github.io".to_string(),
            "http://localhost:5173".to_string(),
        ]
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Self::default_origins(),
        }
    }
}

/// Secrets sourced from the environment at startup. Both may be absent: the
/// health endpoint reports presence and the mint endpoint fails closed.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub tap_key: Option<String>,
    pub relayer_key: Option<String>,
}

impl Secrets {
    fn from_env() -> Self {
        Self {
            tap_key: non_empty_env("TAP_KEY"),
            relayer_key: non_empty_env("RELAYER_PRIVATE_KEY"),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}
