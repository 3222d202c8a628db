//! Configuration types and loading.
//!
//! Config is loaded from a YAML file (default `smart48bot.yaml` in the working directory)
//! and environment. Key names match the legacy deployment files so existing configs keep working.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "smart48bot.yaml";

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bot API token. Overridden by TELEGRAM_BOT_TOKEN env.
    #[serde(default)]
    pub telegram_token: Option<String>,

    /// Public host (optionally host:port) Telegram calls back on. When unset, long-poll getUpdates is used.
    #[serde(default)]
    pub bot_addr: Option<String>,

    /// Port for the HTTP server (relay endpoints and webhook).
    #[serde(default = "default_bot_port")]
    pub bot_port: u16,

    /// Bind address for the HTTP server (default "127.0.0.1"; TLS is terminated by the front proxy).
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Self-signed certificate uploaded with setWebhook. Optional.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,

    /// Private key matching cert_path. Only read by the front proxy; kept so legacy files parse.
    #[serde(default)]
    pub key_path: Option<PathBuf>,

    /// Path (without leading slash) of the webhook route on this server.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,

    /// Optional secret Telegram echoes in X-Telegram-Bot-Api-Secret-Token.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[serde(default)]
    pub log: LogConfig,

    /// Reply templates.
    #[serde(default)]
    pub text: TextConfig,

    /// Chat ids notified when a new user sends /start.
    #[serde(default = "default_admins")]
    pub admins: Vec<i64>,

    /// Labels of the reply keyboard attached to every bot reply.
    #[serde(default = "default_keyboard")]
    pub keyboard: Vec<String>,

    /// Value the legacy combined endpoint expects in its `bot` field.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,

    /// Largest accepted upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Marker file that requests a restart when it appears.
    #[serde(default = "default_restart_marker")]
    pub restart_marker: Option<PathBuf>,

    /// How often the restart marker is checked, in seconds.
    #[serde(default = "default_restart_poll_secs")]
    pub restart_poll_secs: u64,
}

/// Log level and optional output file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// env_logger filter used when RUST_LOG is unset (e.g. "error", "info", "lib=debug").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Append log output to this file instead of stderr.
    #[serde(default)]
    pub file_name: Option<PathBuf>,
}

/// Reply template texts. All are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextConfig {
    #[serde(default)]
    pub help: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub start_admin: String,
    #[serde(default)]
    pub you_id: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub integration: String,
}

fn default_bot_port() -> u16 {
    8443
}

fn default_api_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_webhook_path() -> String {
    "telegram/webhook".to_string()
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_admins() -> Vec<i64> {
    vec![96500923, 131858248]
}

fn default_keyboard() -> Vec<String> {
    vec![
        "Мой ID".to_string(),
        "Помощь".to_string(),
        "Интеграция".to_string(),
    ]
}

fn default_bot_name() -> String {
    "smart48".to_string()
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

fn default_restart_marker() -> Option<PathBuf> {
    Some(PathBuf::from("restart.fl"))
}

fn default_restart_poll_secs() -> u64 {
    30
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_name: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: None,
            bot_addr: None,
            bot_port: default_bot_port(),
            api_addr: default_api_addr(),
            cert_path: None,
            key_path: None,
            webhook_path: default_webhook_path(),
            webhook_secret: None,
            log: LogConfig::default(),
            text: TextConfig::default(),
            admins: default_admins(),
            keyboard: default_keyboard(),
            bot_name: default_bot_name(),
            max_upload_bytes: default_max_upload_bytes(),
            restart_marker: default_restart_marker(),
            restart_poll_secs: default_restart_poll_secs(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    non_empty(std::env::var("TELEGRAM_BOT_TOKEN").ok().as_deref())
        .or_else(|| non_empty(config.telegram_token.as_deref()))
}

/// Public webhook URL (`https://<bot_addr>/<webhook_path>`), or None for long-poll mode.
pub fn webhook_url(config: &Config) -> Option<String> {
    let addr = non_empty(config.bot_addr.as_deref())?;
    let addr = addr
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    Some(format!("https://{}/{}", addr, config.webhook_path.trim_matches('/')))
}

impl Config {
    /// Check everything the relay needs before it touches the network.
    pub fn validate(&self) -> Result<()> {
        if resolve_telegram_token(self).is_none() {
            anyhow::bail!("telegram_token is not set (config file or TELEGRAM_BOT_TOKEN)");
        }
        if self.bot_port == 0 {
            anyhow::bail!("bot_port is not set");
        }
        if self.api_addr.trim().is_empty() {
            anyhow::bail!("api_addr is not set");
        }
        let t = &self.text;
        for (key, value) in [
            ("text.help", &t.help),
            ("text.start", &t.start),
            ("text.start_admin", &t.start_admin),
            ("text.you_id", &t.you_id),
            ("text.error", &t.error),
            ("text.integration", &t.integration),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} is not set", key);
            }
        }
        if self.admins.is_empty() {
            anyhow::bail!("admins must list at least one chat id");
        }
        if self.keyboard.is_empty() {
            anyhow::bail!("keyboard must have at least one button");
        }
        if crate::gateway::is_reserved_route(&self.webhook_path) {
            anyhow::bail!(
                "webhook_path {:?} collides with a relay or health route",
                self.webhook_path
            );
        }
        if let Some(cert) = &self.cert_path {
            if !cert.exists() {
                anyhow::bail!("cert_path {} does not exist", cert.display());
            }
        }
        Ok(())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("SMART48_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load and validate config from the given path (or SMART48_CONFIG_PATH / default).
/// A missing file is an error; `init` writes an example to start from.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = read_config(&path)?;
    config
        .validate()
        .with_context(|| format!("invalid config in {}", path.display()))?;
    Ok((config, path))
}

fn read_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!(
            "config file not found: {} (run `smart48bot init` to write an example)",
            path.display()
        );
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    parse_config(&s).with_context(|| format!("parsing config from {}", path.display()))
}

/// Parse a YAML config document.
pub fn parse_config(s: &str) -> Result<Config> {
    Ok(serde_yaml::from_str(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
telegram_token: "123:abc"
bot_addr: "bot.example.org"
bot_port: 8443
api_addr: "0.0.0.0"
log:
  level: "debug"
text:
  help: "help text"
  start: "welcome"
  start_admin: "new user. ID: "
  you_id: "Your ID: "
  error: "unknown command"
  integration: "integration notes"
"#;

    #[test]
    fn parses_legacy_keys_and_fills_defaults() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.bot_port, 8443);
        assert_eq!(config.api_addr, "0.0.0.0");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.text.you_id, "Your ID: ");
        assert_eq!(config.admins, vec![96500923, 131858248]);
        assert_eq!(config.keyboard.len(), 3);
        assert_eq!(config.bot_name, "smart48");
        assert_eq!(config.restart_marker, Some(PathBuf::from("restart.fl")));
    }

    #[test]
    fn validate_requires_every_template() {
        let mut config = parse_config(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
        config.text.integration = " ".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("text.integration"), "{}", err);
    }

    #[test]
    fn validate_rejects_empty_roster() {
        let mut config = parse_config(SAMPLE).unwrap();
        config.admins.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_webhook_path_on_relay_route() {
        let mut config = parse_config(SAMPLE).unwrap();
        for path in ["api", "tg_send.php", "/api/smart48/msg/"] {
            config.webhook_path = path.to_string();
            let err = config.validate().unwrap_err().to_string();
            assert!(err.contains("webhook_path"), "{}", err);
        }
    }

    #[test]
    fn webhook_url_joins_host_and_path() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(
            webhook_url(&config).as_deref(),
            Some("https://bot.example.org/telegram/webhook")
        );
        let mut config = config;
        config.bot_addr = Some("https://bot.example.org:8443/".to_string());
        config.webhook_path = "/hook/".to_string();
        assert_eq!(
            webhook_url(&config).as_deref(),
            Some("https://bot.example.org:8443/hook")
        );
    }

    #[test]
    fn no_bot_addr_means_long_poll() {
        let mut config = parse_config(SAMPLE).unwrap();
        config.bot_addr = None;
        assert!(webhook_url(&config).is_none());
    }
}
