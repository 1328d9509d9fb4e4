use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub drafts: DraftConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

impl BotConfig {
    pub fn load() -> Result<Self> {
        let configured_path =
            std::env::var("POLL_BOT_CONFIG").unwrap_or_else(|_| "config/bot.toml".to_string());
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

        if let Ok(env_override) = std::env::var("POLL_BOT_ENV") {
            if !env_override.is_empty() {
                let env_file = format!("config/bot.{}.toml", env_override);
                if Path::new(&env_file).exists() {
                    builder = builder.add_source(File::new(&env_file, FileFormat::Toml));
                }
            }
        }

        // POLL_BOT__TELEGRAM__TOKEN and friends
        builder = builder.add_source(
            Environment::with_prefix("POLL_BOT")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|err| map_config_error(err, &configured_path))?;
        let mut config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize bot configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        assert!(
            self.server.port > 0,
            "Server port must be greater than zero"
        );
        assert!(
            !self.telegram.token.is_empty(),
            "Telegram bot token must be specified"
        );
        assert!(
            !self.backend.url.is_empty(),
            "Backend URL must be specified"
        );
        assert!(
            !self.backend.platform.is_empty(),
            "Backend platform name must be specified"
        );
        self.telegram.ensure_bounds()?;
        self.backend.ensure_bounds()?;
        self.drafts.ensure_bounds()?;
        self.sync.ensure_bounds()?;
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
        assert!(self.port < 65535, "HTTP port must be below 65535");
        SocketAddr::new(host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "TelegramConfig::default_api_url")]
    pub api_url: String,
    pub token: String,
    #[serde(default = "TelegramConfig::default_long_poll_seconds")]
    pub long_poll_seconds: u64,
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "TelegramConfig::default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl TelegramConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(10_000);
        assert!(millis >= 100, "Telegram timeout must be at least 100ms");
        assert!(millis <= 60_000, "Telegram timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    pub fn long_poll(&self) -> Duration {
        Duration::from_secs(self.long_poll_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// A poller that has not completed a cycle within this window is stale.
    pub fn staleness_threshold(&self) -> Duration {
        self.long_poll() + self.request_timeout() + self.retry_delay() * 2
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            !self.api_url.is_empty(),
            "Telegram API url must be specified"
        );
        assert!(
            self.long_poll_seconds <= 50,
            "Long poll window cannot exceed 50 seconds"
        );
        assert!(
            self.retry_delay_ms >= 100,
            "Retry delay must be at least 100ms"
        );
        assert!(
            self.retry_delay_ms <= 60_000,
            "Retry delay cannot exceed 60 seconds"
        );
        Ok(())
    }

    fn default_api_url() -> String {
        "https://api.telegram.org".to_string()
    }

    const fn default_long_poll_seconds() -> u64 {
        30
    }

    const fn default_retry_delay_ms() -> u64 {
        3_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default = "BackendConfig::default_platform")]
    pub platform: String,
    pub request_timeout_ms: Option<u64>,
    #[serde(default = "BackendConfig::default_poll_creation_timeout_ms")]
    pub poll_creation_timeout_ms: u64,
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        let millis = self.request_timeout_ms.unwrap_or(10_000);
        assert!(millis >= 100, "Backend timeout must be at least 100ms");
        assert!(millis <= 60_000, "Backend timeout cannot exceed 60 seconds");
        Duration::from_millis(millis)
    }

    /// Poll creation waits for weighted balances to be computed.
    pub fn poll_creation_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_creation_timeout_ms)
    }

    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.poll_creation_timeout_ms >= self.request_timeout_ms.unwrap_or(10_000),
            "Poll creation timeout must be >= the default request timeout"
        );
        assert!(
            self.poll_creation_timeout_ms <= 600_000,
            "Poll creation timeout cannot exceed 10 minutes"
        );
        Ok(())
    }

    fn default_platform() -> String {
        "TELEGRAM".to_string()
    }

    const fn default_poll_creation_timeout_ms() -> u64 {
        150_000
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftConfig {
    pub max_capacity: u64,
    /// Drafts untouched for this long are dropped.
    pub idle_ttl_seconds: u64,
}

impl Default for DraftConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            idle_ttl_seconds: 86_400,
        }
    }
}

impl DraftConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.max_capacity >= 10,
            "Draft store capacity must be at least 10"
        );
        assert!(
            self.idle_ttl_seconds >= 60,
            "Draft idle TTL must be at least one minute"
        );
        assert!(
            self.idle_ttl_seconds <= 604_800,
            "Draft idle TTL cannot exceed one week"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    pub max_capacity: u64,
    pub ttl_seconds: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_capacity: 50_000,
            ttl_seconds: 3_600,
        }
    }
}

impl SyncConfig {
    fn ensure_bounds(&self) -> Result<()> {
        assert!(
            self.max_capacity >= 100,
            "Sync ledger capacity must be at least 100"
        );
        assert!(
            self.ttl_seconds <= 86_400,
            "Sync ledger TTL cannot exceed one day"
        );
        Ok(())
    }
}

fn map_config_error(err: ConfigError, path: &str) -> ConfigError {
    match err {
        ConfigError::NotFound(_) => ConfigError::NotFound(path.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [server]
        port = 8080

        [telegram]
        token = "123:abc"

        [backend]
        url = "http://localhost:8989/api"
        request_timeout_ms = 5000
    "#;

    fn parse(raw: &str) -> BotConfig {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .expect("valid configuration")
    }

    #[test]
    fn defaults_fill_optional_sections() {
        let mut config = parse(SAMPLE);
        config.validate().expect("valid bounds");

        assert_eq!(config.telegram.api_url, "https://api.telegram.org");
        assert_eq!(config.telegram.long_poll(), Duration::from_secs(30));
        assert_eq!(config.backend.platform, "TELEGRAM");
        assert_eq!(config.backend.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.backend.poll_creation_timeout(), Duration::from_secs(150));
        assert_eq!(config.drafts.idle_ttl_seconds, 86_400);
        assert_eq!(config.sync.max_capacity, 50_000);
        assert_eq!(
            config.server.address(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080)
        );
    }

    #[test]
    fn staleness_covers_a_full_poll_cycle() {
        let config = parse(SAMPLE);
        assert!(config.telegram.staleness_threshold() > config.telegram.long_poll());
    }

    #[test]
    #[should_panic(expected = "Telegram bot token must be specified")]
    fn empty_token_is_rejected() {
        let mut config = parse(&SAMPLE.replace("123:abc", ""));
        let _ = config.validate();
    }
}
