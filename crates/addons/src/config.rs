// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Addon-updater configuration.
//!
//! Persisted as a TOML document with one `[addon-updater]` table. The
//! banlists keep the original comma-separated string form so hand-edited
//! files stay valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AddonConfigError {
    #[error("failed to read addon config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse addon config {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },

    #[error("failed to write addon config {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

pub const DEFAULT_ASSETS_URL: &str =
    "https://online.supertuxkart.net/downloads/xml/online_assets.xml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonConfig {
    pub online_assets_url: String,
    pub fetch_karts: bool,
    pub autoupdate: bool,
    /// Seconds between autoupdate passes.
    pub autoupdate_interval: f64,
    /// Comma-separated ids never auto-updated.
    pub autoupdate_banlist: String,
    pub autoinstall: bool,
    pub autoinstall_karts: bool,
    pub autoinstall_minrating: f64,
    pub autoinstall_requirements: String,
    /// Comma-separated ids never auto-installed.
    pub autoinstall_banlist: String,
    pub downloadpath: PathBuf,
    pub addonpath: PathBuf,
}

impl Default for AddonConfig {
    fn default() -> Self {
        let addonpath = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local/share/supertuxkart/addons");
        Self {
            online_assets_url: DEFAULT_ASSETS_URL.to_string(),
            fetch_karts: false,
            autoupdate: true,
            autoupdate_interval: 3600.0 * 6.0,
            autoupdate_banlist: String::new(),
            autoinstall: true,
            autoinstall_karts: false,
            autoinstall_minrating: 1.0,
            autoinstall_requirements: "+APPROVED,+DFSG,-ALPHA".to_string(),
            autoinstall_banlist: String::new(),
            downloadpath: PathBuf::from("downloads"),
            addonpath,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AddonConfigDoc {
    #[serde(rename = "addon-updater", default)]
    addon_updater: AddonConfig,
}

impl AddonConfig {
    pub fn load(path: &Path) -> Result<Self, AddonConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|source| AddonConfigError::Read { path: path.to_path_buf(), source })?;
        let doc: AddonConfigDoc = toml::from_str(&data)
            .map_err(|source| AddonConfigError::Parse { path: path.to_path_buf(), source })?;
        Ok(doc.addon_updater)
    }

    /// Load the document, seeding the defaults on a missing file.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            let config = Self::default();
            if let Err(err) = config.save(path) {
                tracing::warn!(error = %err, "could not seed default addon config");
            }
            return config;
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "addon config unusable, recovering with defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), AddonConfigError> {
        let doc = AddonConfigDoc { addon_updater: self.clone() };
        let data = toml::to_string_pretty(&doc).map_err(|source| AddonConfigError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::other(source),
        })?;
        std::fs::write(path, data)
            .map_err(|source| AddonConfigError::Write { path: path.to_path_buf(), source })
    }
}

/// Split a comma-separated banlist into ids.
pub fn split_banlist(list: &str) -> Vec<String> {
    list.split([',', '.', '/', ';', ':', ' '])
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Join ids back into the persisted banlist form.
pub fn join_banlist(ids: &[String]) -> String {
    ids.join(", ")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
