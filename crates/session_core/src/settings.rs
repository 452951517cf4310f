//! Persisted user choices: last server and preferred capture format.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use shared::domain::CaptureFormat;

use crate::error::SettingsError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSettings {
    pub server_address: Option<String>,
    pub server_port: Option<u16>,
    pub capture_width: Option<u32>,
    pub capture_height: Option<u32>,
    pub frame_rate: Option<u32>,
}

impl PersistedSettings {
    pub fn preferred_resolution(&self) -> Option<(u32, u32)> {
        Some((self.capture_width?, self.capture_height?))
    }

    pub fn remember_capture_format(&mut self, format: CaptureFormat) {
        self.capture_width = Some(format.width);
        self.capture_height = Some(format.height);
        self.frame_rate = Some(format.frame_rate);
    }
}

pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<PersistedSettings, SettingsError>;
    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError>;
}

/// Settings kept in a TOML file. A missing file reads as defaults.
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        if !self.path.exists() {
            return Ok(PersistedSettings::default());
        }

        let raw = fs::read_to_string(&self.path).map_err(|source| SettingsError::Read {
            path: self.path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        let encoded = toml::to_string_pretty(settings)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&self.path, encoded).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Process-local store for runs that should not touch the disk.
#[derive(Default)]
pub struct MemorySettingsStore {
    inner: Mutex<PersistedSettings>,
}

impl MemorySettingsStore {
    pub fn new(settings: PersistedSettings) -> Self {
        Self {
            inner: Mutex::new(settings),
        }
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<PersistedSettings, SettingsError> {
        let guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.clone())
    }

    fn save(&self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = settings.clone();
        Ok(())
    }
}
