use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use shared::domain::IceServer;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "peer_client.toml";
pub const ENV_PREFIX: &str = "PEER_CLIENT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub address: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".into(),
            port: 8888,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub ice_servers: Vec<IceServer>,
    pub settings_path: PathBuf,
    pub command_capacity: usize,
    pub notice_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".into()],
                username: None,
                credential: None,
            }],
            settings_path: PathBuf::from("./data/settings.toml"),
            command_capacity: 64,
            notice_capacity: 32,
        }
    }
}

/// Defaults, then the TOML file, then `PEER_CLIENT__*` environment variables.
///
/// An explicitly named file must exist; the default file is optional.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).format(FileFormat::Toml).required(true),
        None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
    };

    let config: AppConfig = Config::builder()
        .add_source(file)
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.address.trim().is_empty() {
        return Err(ConfigError::Invalid("server.address must not be empty".into()));
    }
    if config.command_capacity == 0 || config.notice_capacity == 0 {
        return Err(ConfigError::Invalid(
            "command_capacity and notice_capacity must be positive".into(),
        ));
    }
    if let Some(server) = config.ice_servers.iter().find(|s| s.urls.is_empty()) {
        return Err(ConfigError::Invalid(format!(
            "ice server entry without urls (username: {:?})",
            server.username
        )));
    }
    Ok(())
}
