use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use lang_organizer_core::Options;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const SETTINGS_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_SETTINGS_PATH: &str = ".lang-organizer/settings.json";

/// Last-used target directory and policy, kept between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedSettings {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub target_dir: Option<PathBuf>,
    #[serde(default)]
    pub options: Options,
}

fn default_schema_version() -> u32 {
    SETTINGS_SCHEMA_VERSION
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            schema_version: SETTINGS_SCHEMA_VERSION,
            target_dir: None,
            options: Options::default(),
        }
    }
}

impl PersistedSettings {
    /// Missing or unreadable settings fall back to defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }

        match Self::load(path) {
            Ok(settings) => settings,
            Err(err) => {
                warn!("ignoring settings file: {err:#}");
                Self::default()
            }
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create settings directory {}", parent.display())
                })?;
            }
        }
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings payload")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings to {}", path.display()))
    }
}
