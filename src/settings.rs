use crate::layout::LayoutSpec;
use crate::layouts::find_builtin;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },
    #[error("parse {}: {source}", path.display())]
    Parse { path: PathBuf, source: toml::de::Error },
}

/// User settings from `config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Font used for key labels.
    pub font: Option<PathBuf>,
    /// Layout used when none is given on the command line.
    pub layout: Option<String>,
    #[serde(default)]
    pub layouts: Vec<NamedLayout>,
}

/// A user-defined layout.
#[derive(Debug, Clone, Deserialize)]
pub struct NamedLayout {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub spec: LayoutSpec,
}

impl Settings {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io { path: path.to_path_buf(), source })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse { path: path.to_path_buf(), source })
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kbdscr")
            .join("config.toml")
    }

    /// Resolve a layout by name. User layouts shadow built-ins.
    pub fn find_layout(&self, name: &str) -> Option<LayoutSpec> {
        self.layouts
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.spec.clone())
            .or_else(|| find_builtin(name))
    }
}
