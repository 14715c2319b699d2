use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::auth::Credentials;
use crate::error::{EventSearchError, Result};

pub const DEFAULT_BASE_URL: &str = "https://cloudinfra-gw.portal.checkpoint.com";

pub const ENV_BASE_URL: &str = "INFINITY_BASE_URL";
pub const ENV_CLIENT_ID: &str = "INFINITY_CLIENT_ID";
pub const ENV_ACCESS_KEY: &str = "INFINITY_ACCESS_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub mode: ServerMode,
    pub http_addr: String,
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::Stdio,
            http_addr: "0.0.0.0".to_string(),
            http_port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub access_key: Option<String>,
    /// 每次远程调用的固定超时（秒）。
    pub request_timeout_secs: u64,
    /// `save_locally` 工件的输出目录。
    pub output_dir: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            client_id: None,
            access_key: None,
            request_timeout_secs: 30,
            output_dir: ".".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub api: ApiConfig,
}

impl Config {
    /// 从 YAML 或 JSON 文件加载配置（JSON 是 YAML 的子集，统一走 YAML 解析）。
    pub fn load_from_path(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&raw).map_err(|e| {
            EventSearchError::ConfigError(format!("parse {}: {e}", path.display()))
        })
    }

    /// Environment variables win over file values; credentials are commonly
    /// supplied this way when no config file exists.
    pub fn with_env_overrides(mut self) -> Config {
        if let Ok(v) = env::var(ENV_BASE_URL) {
            if !v.is_empty() {
                self.api.base_url = v;
            }
        }
        if let Ok(v) = env::var(ENV_CLIENT_ID) {
            if !v.is_empty() {
                self.api.client_id = Some(v);
            }
        }
        if let Ok(v) = env::var(ENV_ACCESS_KEY) {
            if !v.is_empty() {
                self.api.access_key = Some(v);
            }
        }
        self
    }

    /// Both halves present or nothing; a lone client id is not usable.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.api.client_id, &self.api.access_key) {
            (Some(client_id), Some(access_key)) => Some(Credentials {
                client_id: client_id.clone(),
                access_key: access_key.clone(),
            }),
            _ => None,
        }
    }
}
