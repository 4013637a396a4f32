//! Echo demo configuration loading.
//!
//! TOML is the sole config source. Default path: `./echo.toml` in the
//! current directory; both binaries fall back to built-in defaults when the
//! file is absent, so the demo runs with zero setup.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
}

#[derive(Debug, Deserialize, Default)]
struct RawServerConfig {
    bind: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawClientConfig {
    server_url: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ConfigError::Io(format!("reading '{}': {e}", path.display()))),
    }
}

pub fn load_server_config() -> Result<ServerConfig, ConfigError> {
    let raw: RawServerConfig = match read_optional(Path::new("echo.toml"))? {
        Some(toml_str) => toml::from_str(&toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?,
        None => RawServerConfig::default(),
    };
    Ok(ServerConfig {
        bind: raw.bind.unwrap_or_else(|| "127.0.0.1:7890".to_owned()),
    })
}

pub fn load_client_config() -> Result<ClientConfig, ConfigError> {
    let raw: RawClientConfig = match read_optional(Path::new("echo.toml"))? {
        Some(toml_str) => toml::from_str(&toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?,
        None => RawClientConfig::default(),
    };
    Ok(ClientConfig {
        server_url: raw.server_url.unwrap_or_else(|| "ws://127.0.0.1:7890".to_owned()),
    })
}
