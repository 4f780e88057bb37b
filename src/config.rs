//! Process configuration from the environment and command line

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://api.siliconflow.cn/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_PORT: u16 = 8000;

/// Configuration for the chat endpoint and the socket server
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    /// Ceiling on receiving the response head; streaming is unbounded
    pub response_timeout: Duration,
    pub host: IpAddr,
    pub port: u16,
    pub static_dir: PathBuf,
    pub index_file: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            static_dir: PathBuf::from("static"),
            index_file: PathBuf::from("index.html"),
        }
    }
}

impl ChatConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            api_key: var("SILICONFLOW_API_KEY")
                .or_else(|| var("CHAT_API_KEY"))
                .filter(|k| !k.is_empty()),
            api_url: var("CHAT_API_URL").unwrap_or(defaults.api_url),
            model: var("CHAT_MODEL").unwrap_or(defaults.model),
            temperature: parsed(&var, "CHAT_TEMPERATURE").unwrap_or(defaults.temperature),
            response_timeout: parsed(&var, "CHAT_RESPONSE_TIMEOUT_SECS")
                .map_or(defaults.response_timeout, Duration::from_secs),
            host: parsed(&var, "TOOLSTREAM_HOST").unwrap_or(defaults.host),
            port: parsed(&var, "TOOLSTREAM_PORT").unwrap_or(defaults.port),
            static_dir: var("TOOLSTREAM_STATIC_DIR").map_or(defaults.static_dir, PathBuf::from),
            index_file: var("TOOLSTREAM_INDEX").map_or(defaults.index_file, PathBuf::from),
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

/// What the binary was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive terminal loop
    Chat { servers: Vec<PathBuf> },
    /// Push-socket server
    Serve { servers: Vec<PathBuf> },
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("usage: toolstream [chat|serve] <server-script>...")]
pub struct UsageError;

impl Command {
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Result<Self, UsageError> {
        let mut args = args.into_iter().peekable();
        let serve = match args.peek().map(String::as_str) {
            Some("serve") => {
                args.next();
                true
            }
            Some("chat") => {
                args.next();
                false
            }
            _ => false,
        };

        let servers: Vec<PathBuf> = args.map(PathBuf::from).collect();
        if servers.is_empty() {
            return Err(UsageError);
        }

        Ok(if serve {
            Command::Serve { servers }
        } else {
            Command::Chat { servers }
        })
    }
}
