use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::FeedError;
use crate::router::DropPolicy;

/// Environment variable that overrides `upstream.token`. Production deploys
/// are expected to use this rather than writing the secret into the file.
pub const TOKEN_ENV_VAR: &str = "TICKFAND_UPSTREAM_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub frame: FrameConfig,
    #[serde(default)]
    pub router: RouterConfig,
    pub ws: WsConfig,
    #[serde(default)]
    pub stats: Option<StatsConfig>,
}

#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
    /// Credential token written to the socket on connect. Never logged.
    /// May be left empty in the file and supplied via TICKFAND_UPSTREAM_TOKEN.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
}

// Manual Debug keeps the token out of logs and panic messages.
impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"<redacted>")
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("backoff_initial_secs", &self.backoff_initial_secs)
            .field("backoff_max_secs", &self.backoff_max_secs)
            .finish()
    }
}

impl UpstreamConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrameConfig {
    #[serde(default = "default_buffer_cap_bytes")]
    pub buffer_cap_bytes: usize,
    /// Market prefixes recognised as record anchors. `BJ` can be added here
    /// if the token tier carries Beijing Exchange symbols.
    #[serde(default = "default_market_prefixes")]
    pub market_prefixes: Vec<String>,
    /// Symbol prefixes filtered out as exchange composites/indices.
    #[serde(default = "crate::parser::default_index_prefixes")]
    pub index_prefixes: Vec<String>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            buffer_cap_bytes: default_buffer_cap_bytes(),
            market_prefixes: default_market_prefixes(),
            index_prefixes: crate::parser::default_index_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    #[serde(default)]
    pub drop_policy: DropPolicy,
    #[serde(default = "default_lag_eviction_timeout_secs")]
    pub lag_eviction_timeout_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: default_outbox_capacity(),
            drop_policy: DropPolicy::default(),
            lag_eviction_timeout_secs: default_lag_eviction_timeout_secs(),
        }
    }
}

impl RouterConfig {
    pub fn lag_eviction_timeout(&self) -> Duration {
        Duration::from_secs(self.lag_eviction_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    pub listen_addr: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    pub listen_addr: String,
}

fn default_idle_timeout_secs() -> u64 {
    20
}

fn default_backoff_initial_secs() -> u64 {
    1
}

fn default_backoff_max_secs() -> u64 {
    30
}

fn default_buffer_cap_bytes() -> usize {
    1024 * 1024
}

fn default_market_prefixes() -> Vec<String> {
    vec!["SH".to_string(), "SZ".to_string()]
}

fn default_outbox_capacity() -> usize {
    1024
}

fn default_lag_eviction_timeout_secs() -> u64 {
    30
}

fn default_ping_interval_secs() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, FeedError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|e| FeedError::Config(e.to_string()))?;
        config.resolve_token()?;
        Ok(config)
    }

    /// Fill the token from the environment when the file leaves it empty,
    /// then reject a configuration with no token at all.
    fn resolve_token(&mut self) -> Result<(), FeedError> {
        if self.upstream.token.is_empty() {
            if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
                self.upstream.token = token;
            }
        }
        if self.upstream.token.is_empty() {
            return Err(FeedError::Config(format!(
                "upstream.token is required (set it in the config file or via {})",
                TOKEN_ENV_VAR
            )));
        }
        Ok(())
    }
}
