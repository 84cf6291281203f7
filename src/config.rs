use crate::types::Channel;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

const CONFIG_ENV: &str = "CHANNEL_INBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "~/.channel-inbox/channel-inbox.json";
const DEFAULT_SQLITE_PATH: &str = "~/.channel-inbox/inbox.sqlite";
const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub database: DatabaseConfig,
    pub webhook: WebhookConfig,
    pub query: QueryConfig,
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8091,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub sqlite_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: DEFAULT_SQLITE_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Upper bound on processing one delivery, signature check included.
    pub timeout_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub page_size: i64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub whatsapp: ChannelConfig,
    pub messenger: ChannelConfig,
    pub instagram: ChannelConfig,
}

impl ChannelsConfig {
    pub fn get(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::WhatsApp => &self.whatsapp,
            Channel::Messenger => &self.messenger,
            Channel::Instagram => &self.instagram,
        }
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut ChannelConfig {
        match channel {
            Channel::WhatsApp => &mut self.whatsapp,
            Channel::Messenger => &mut self.messenger,
            Channel::Instagram => &mut self.instagram,
        }
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            whatsapp: ChannelConfig::for_channel(Channel::WhatsApp),
            messenger: ChannelConfig::for_channel(Channel::Messenger),
            instagram: ChannelConfig::for_channel(Channel::Instagram),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Key for `x-hub-signature-256`.
    pub app_secret: Option<String>,
    /// Token expected in the `hub.verify_token` handshake.
    pub verify_token: Option<String>,
    pub access_token: Option<String>,
    /// Phone number id, page id or Instagram account id used when sending.
    pub business_id: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Empty means `/v1/webhooks/<channel>`.
    #[serde(default)]
    pub webhook_path: String,
}

fn default_api_base() -> String {
    DEFAULT_GRAPH_API_BASE.to_string()
}

impl ChannelConfig {
    pub fn for_channel(channel: Channel) -> Self {
        Self {
            enabled: false,
            app_secret: None,
            verify_token: None,
            access_token: None,
            business_id: None,
            api_base: default_api_base(),
            webhook_path: default_webhook_path(channel),
        }
    }

    pub fn route_path(&self, channel: Channel) -> String {
        if self.webhook_path.trim().is_empty() {
            default_webhook_path(channel)
        } else {
            self.webhook_path.clone()
        }
    }
}

fn default_webhook_path(channel: Channel) -> String {
    format!("/v1/webhooks/{}", channel.as_str())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            database: DatabaseConfig::default(),
            webhook: WebhookConfig::default(),
            query: QueryConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn env_value(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub fn load_config() -> Config {
    let config_path = resolve_config_path();
    let mut cfg = Config::default();

    if config_path.exists() {
        match fs::read_to_string(&config_path) {
            Ok(raw) => match serde_json::from_str::<Config>(&raw) {
                Ok(file_cfg) => cfg = file_cfg,
                Err(err) => tracing::warn!(
                    path = %config_path.display(),
                    "ignoring unparsable config file: {err}"
                ),
            },
            Err(err) => tracing::warn!(path = %config_path.display(), "cannot read config: {err}"),
        }
    }

    apply_env_overrides(&mut cfg);
    cfg
}

pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(token) = env_value("CHANNEL_INBOX_TOKEN") {
        cfg.auth.token = Some(token);
    }
    if let Some(url) = env_value("CHANNEL_INBOX_DATABASE_URL") {
        cfg.database.url = Some(url);
    }
    if let Some(path) = env_value("CHANNEL_INBOX_SQLITE_PATH") {
        cfg.database.sqlite_path = path;
    }
    if let Some(ms) = env_value("CHANNEL_INBOX_WEBHOOK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        cfg.webhook.timeout_ms = ms;
    }

    for channel in Channel::ALL {
        let prefix = format!("CHANNEL_INBOX_{}", channel.as_str().to_uppercase());
        let channel_cfg = cfg.channels.get_mut(channel);
        if let Some(secret) = env_value(&format!("{prefix}_APP_SECRET")) {
            channel_cfg.app_secret = Some(secret);
            channel_cfg.enabled = true;
        }
        if let Some(token) = env_value(&format!("{prefix}_VERIFY_TOKEN")) {
            channel_cfg.verify_token = Some(token);
        }
        if let Some(token) = env_value(&format!("{prefix}_ACCESS_TOKEN")) {
            channel_cfg.access_token = Some(token);
        }
        if let Some(id) = env_value(&format!("{prefix}_BUSINESS_ID")) {
            channel_cfg.business_id = Some(id);
        }
    }
}

pub fn resolve_config_path() -> PathBuf {
    env::var(CONFIG_ENV)
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| expand_tilde(DEFAULT_CONFIG_PATH))
}

pub fn resolve_database_url(cfg: &Config) -> String {
    if let Some(url) = cfg.database.url.as_ref() {
        return url.to_string();
    }

    let path = expand_tilde(&cfg.database.sqlite_path);
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    format!("sqlite://{}?mode=rwc", path.to_string_lossy())
}
