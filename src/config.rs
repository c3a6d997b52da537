use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level service configuration.
///
/// Loaded from an optional TOML file and overridable by CLI flags (see
/// [`crate::main`]). Every field has a default so the service can start with
/// no configuration file at all, matching the reference service's
/// fallback-to-defaults behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Bind address for the HTTPS listener.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Base directory under which `stores/` and session temp directories live.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Session idle-expiry TTL, in seconds.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Nonce TTL, in seconds.
    #[serde(default = "default_nonce_ttl_secs")]
    pub nonce_ttl_secs: u64,

    /// Owner-permission cache TTL, in seconds.
    #[serde(default = "default_owner_cache_ttl_secs")]
    pub owner_cache_ttl_secs: u64,

    /// How often the background sweeper scans for expired sessions.
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,

    /// How often the background sweeper scans for expired nonces and owner entries.
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: u64,

    /// Minimum interval between TTL bumps caused by streamed chunks, to
    /// bound "reset TTL per chunk" to something coarser than per-byte.
    #[serde(default = "default_bump_min_interval_ms")]
    pub bump_min_interval_ms: u64,

    /// Maximum size, in bytes, accepted for a root-commitment `.dat` upload.
    #[serde(default = "default_max_dat_body_bytes")]
    pub max_dat_body_bytes: usize,

    /// Rate limit applied to `POST /upload/{storeId}`.
    #[serde(default)]
    pub upload_start_rate_limit: RateLimitConfig,

    /// Rate limit applied to the fetch surface, keyed by `(ip, storeId, path)`.
    #[serde(default)]
    pub fetch_rate_limit: RateLimitConfig,

    /// Basic-auth credentials required to create a store that does not yet exist.
    pub store_owner_credentials: BasicAuthConfig,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8443".parse().expect("valid default listen addr")
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}

fn default_session_ttl_secs() -> u64 {
    5 * 60
}

fn default_nonce_ttl_secs() -> u64 {
    10 * 60
}

fn default_owner_cache_ttl_secs() -> u64 {
    3 * 60
}

fn default_session_sweep_interval_secs() -> u64 {
    30
}

fn default_cache_sweep_interval_secs() -> u64 {
    60
}

fn default_bump_min_interval_ms() -> u64 {
    1_000
}

fn default_max_dat_body_bytes() -> usize {
    16 * 1024 * 1024
}

/// A sliding-window rate limit: `limit` requests per `window_secs` seconds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allow_all_origins: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_all_origins: false,
            allowed_origins: Vec::new(),
        }
    }
}

impl Config {
    /// A usable default configuration for local development: in-memory
    /// credentials, a relative storage root, and conservative default
    /// TTLs and rate limits.
    pub fn development_default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            storage_root: default_storage_root(),
            session_ttl_secs: default_session_ttl_secs(),
            nonce_ttl_secs: default_nonce_ttl_secs(),
            owner_cache_ttl_secs: default_owner_cache_ttl_secs(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
            cache_sweep_interval_secs: default_cache_sweep_interval_secs(),
            bump_min_interval_ms: default_bump_min_interval_ms(),
            max_dat_body_bytes: default_max_dat_body_bytes(),
            upload_start_rate_limit: RateLimitConfig {
                limit: 10,
                window_secs: 15 * 60,
            },
            fetch_rate_limit: RateLimitConfig {
                limit: 100,
                window_secs: 15 * 60,
            },
            store_owner_credentials: BasicAuthConfig {
                username: "admin".to_string(),
                password: "admin".to_string(),
            },
            cors: CorsConfig::default(),
        }
    }
}

/// Load configuration from a TOML file at `path`.
///
/// Mirrors the reference service's `load_config`: callers are expected to
/// fall back to [`Config::development_default`] and log a warning if this
/// fails, rather than treating a missing/invalid config file as fatal.
pub fn load_config(path: &std::path::Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&text)?;
    Ok(config)
}
