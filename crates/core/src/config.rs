// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet configuration document.
//!
//! One JSON file holds the fleet-wide defaults, the global log-ignore
//! table, and a per-server entry for every registered instance. Per-server
//! entries only persist the attributes that differ from the fleet defaults;
//! [`FleetConfig::resolve`] merges an entry back over the defaults.

use crate::log::IgnoreConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to parse config {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },

    #[error("failed to write config {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
}

/// Re-exported alias for the persisted log-ignore shape.
pub type LogIgnoreConfig = IgnoreConfig;

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub stk_version: String,
    pub logpath: PathBuf,
    pub datapath: PathBuf,
    pub executable_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    pub autostart: bool,
    pub autorestart: bool,
    pub autorestart_pause: f64,
    pub timed_autorestart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_autorestart_interval: Option<f64>,
    pub startup_timeout: Option<f64>,
    pub shutdown_timeout: Option<f64>,
    /// Default timeout for operator-issued stops; negative disables it.
    pub server_shutdown_timeout: Option<f64>,
    pub server_startup_timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_env: Option<BTreeMap<String, String>>,
    pub extra_args: Vec<String>,
    pub global_logignores: IgnoreConfig,
    pub servers: BTreeMap<String, ServerEntry>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            stk_version: "1.3.0".to_string(),
            logpath: PathBuf::from("logs"),
            datapath: PathBuf::from("stk-code"),
            executable_path: PathBuf::from("supertuxkart"),
            cwd: None,
            autostart: false,
            autorestart: true,
            autorestart_pause: 10.0,
            timed_autorestart: false,
            timed_autorestart_interval: None,
            startup_timeout: Some(120.0),
            shutdown_timeout: Some(120.0),
            server_shutdown_timeout: Some(60.0),
            server_startup_timeout: Some(120.0),
            extra_env: None,
            extra_args: Vec::new(),
            global_logignores: IgnoreConfig::new(),
            servers: BTreeMap::new(),
        }
    }
}

/// Per-server overrides; `None` means "use the fleet default".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEntry {
    pub cfgpath: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datapath: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autostart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorestart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorestart_pause: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_autorestart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_autorestart_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown_timeout: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_env: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_args: Option<Vec<String>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub log_ignores: IgnoreConfig,
}

/// Fully resolved launch parameters for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSettings {
    pub cfgpath: PathBuf,
    pub cwd: PathBuf,
    pub datapath: PathBuf,
    pub executable_path: PathBuf,
    pub autostart: bool,
    pub autorestart: bool,
    pub autorestart_pause: Duration,
    pub timed_autorestart: bool,
    pub timed_autorestart_interval: Option<Duration>,
    pub startup_timeout: Option<Duration>,
    pub shutdown_timeout: Option<Duration>,
    pub extra_env: BTreeMap<String, String>,
    pub extra_args: Vec<String>,
}

fn default_cwd() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

fn to_secs(duration: Duration) -> f64 {
    duration.as_secs_f64()
}

impl FleetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let mut config: FleetConfig = serde_json::from_str(&data)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.normalize();
        Ok(config)
    }

    /// Load the document; a missing file seeds the defaults on disk, a
    /// malformed one is reported and replaced in memory with the defaults
    /// (the broken file is left untouched).
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            let config = Self::default();
            if let Err(err) = config.save(path) {
                tracing::warn!(error = %err, "could not seed default config");
            }
            return config;
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(error = %err, "config unusable, recovering with defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        std::fs::write(path, data)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }

    /// Negative timeouts mean "wait forever".
    fn normalize(&mut self) {
        for field in [
            &mut self.startup_timeout,
            &mut self.shutdown_timeout,
            &mut self.server_shutdown_timeout,
            &mut self.server_startup_timeout,
        ] {
            if field.is_some_and(|v| v < 0.0) {
                *field = None;
            }
        }
    }

    /// Merge a per-server entry over the fleet defaults.
    pub fn resolve(&self, entry: &ServerEntry) -> InstanceSettings {
        InstanceSettings {
            cfgpath: entry.cfgpath.clone(),
            cwd: entry.cwd.clone().or_else(|| self.cwd.clone()).unwrap_or_else(default_cwd),
            datapath: entry.datapath.clone().unwrap_or_else(|| self.datapath.clone()),
            executable_path: entry
                .executable_path
                .clone()
                .unwrap_or_else(|| self.executable_path.clone()),
            autostart: entry.autostart.unwrap_or(self.autostart),
            autorestart: entry.autorestart.unwrap_or(self.autorestart),
            autorestart_pause: secs(entry.autorestart_pause.unwrap_or(self.autorestart_pause)),
            timed_autorestart: entry.timed_autorestart.unwrap_or(self.timed_autorestart),
            timed_autorestart_interval: entry
                .timed_autorestart_interval
                .or(self.timed_autorestart_interval)
                .map(secs),
            startup_timeout: entry.startup_timeout.or(self.startup_timeout).map(secs),
            shutdown_timeout: entry.shutdown_timeout.or(self.shutdown_timeout).map(secs),
            extra_env: entry
                .extra_env
                .clone()
                .or_else(|| self.extra_env.clone())
                .unwrap_or_default(),
            extra_args: entry.extra_args.clone().unwrap_or_else(|| self.extra_args.clone()),
        }
    }

    /// Build the persisted entry for an instance, omitting every attribute
    /// equal to the fleet default.
    pub fn entry_for(&self, settings: &InstanceSettings, log_ignores: IgnoreConfig) -> ServerEntry {
        fn diff<T: PartialEq>(value: T, default: T) -> Option<T> {
            (value != default).then_some(value)
        }

        ServerEntry {
            cfgpath: settings.cfgpath.clone(),
            cwd: diff(
                settings.cwd.clone(),
                self.cwd.clone().unwrap_or_else(default_cwd),
            ),
            datapath: diff(settings.datapath.clone(), self.datapath.clone()),
            executable_path: diff(settings.executable_path.clone(), self.executable_path.clone()),
            autostart: diff(settings.autostart, self.autostart),
            autorestart: diff(settings.autorestart, self.autorestart),
            autorestart_pause: diff(to_secs(settings.autorestart_pause), self.autorestart_pause),
            timed_autorestart: diff(settings.timed_autorestart, self.timed_autorestart),
            timed_autorestart_interval: diff(
                settings.timed_autorestart_interval.map(to_secs),
                self.timed_autorestart_interval,
            )
            .flatten(),
            startup_timeout: diff(settings.startup_timeout.map(to_secs), self.startup_timeout)
                .flatten(),
            shutdown_timeout: diff(settings.shutdown_timeout.map(to_secs), self.shutdown_timeout)
                .flatten(),
            extra_env: diff(
                Some(settings.extra_env.clone()).filter(|env| !env.is_empty()),
                self.extra_env.clone(),
            )
            .flatten(),
            extra_args: diff(settings.extra_args.clone(), self.extra_args.clone()),
            log_ignores,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
