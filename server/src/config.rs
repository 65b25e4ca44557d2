use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ws::actor::KeepAlive;

/// Command-line flags. Only flags actually given are serialized, so an
/// absent flag never masks a value from the TOML file or the environment.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(
    name = "social-net-server",
    version,
    about = "Real-time messaging, presence and notification server"
)]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "SOCIAL_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "SOCIAL_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./social.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "SOCIAL_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for the SQLite database [default: ./data]
    #[arg(long, env = "SOCIAL_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Origins allowed to open WebSocket connections (comma separated).
    /// Empty allows any origin.
    #[arg(long, env = "SOCIAL_ALLOWED_ORIGINS", value_delimiter = ',')]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Chat limits (loaded from [chat] section in TOML)
    #[serde(default)]
    pub chat: Option<ChatConfig>,
}

/// Limits applied by the chat endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatConfig {
    /// Number of recent messages sent when a group chat connection opens (default: 50)
    #[serde(default = "default_group_history_limit")]
    pub group_history_limit: u32,

    /// Maximum group message length in characters (default: 500)
    #[serde(default = "default_max_group_message_len")]
    pub max_group_message_len: usize,

    /// Maximum direct message length in characters (default: 2000)
    #[serde(default = "default_max_direct_message_len")]
    pub max_direct_message_len: usize,

    /// Seconds between keep-alive pings (default: 30)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the connection (default: 10)
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            group_history_limit: 50,
            max_group_message_len: 500,
            max_direct_message_len: 2000,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl ChatConfig {
    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }
}

fn default_group_history_limit() -> u32 {
    50
}

fn default_max_group_message_len() -> usize {
    500
}

fn default_max_direct_message_len() -> usize {
    2000
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_pong_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./social.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            allowed_origins: Vec::new(),
            chat: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (SOCIAL_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self, figment::Error> {
        let config_path = cli.config.clone();

        Self::figment(&config_path)
            .merge(Serialized::defaults(cli))
            .extract()
    }

    fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SOCIAL_").split("__"))
    }

    pub fn chat_config(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Social network messaging server configuration
# Place this file at ./social.toml or specify with --config <path>
# All settings can be overridden via environment variables (SOCIAL_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# Origins allowed to open WebSocket connections. Empty allows any origin.
# allowed_origins = ["http://localhost:3000"]

# ---- Chat ----
# [chat]

# Recent messages replayed when a group chat connection opens (default: 50)
# group_history_limit = 50

# Maximum group message length in characters (default: 500)
# max_group_message_len = 500

# Maximum direct message length in characters (default: 2000)
# max_direct_message_len = 2000

# Seconds between keep-alive pings (default: 30)
# ping_interval_secs = 30

# Seconds to wait for a pong before dropping the connection (default: 10)
# pong_timeout_secs = 10
"#
    .to_string()
}
