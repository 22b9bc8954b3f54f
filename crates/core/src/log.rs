// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log model: severity levels, parsed log records, and suppression tables.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Severity of a line reported by the supervised server.
///
/// The numeric values are the on-disk keys of the log-ignore configuration
/// (`{"ServerLobby": {"20": [...]}}`), so they are part of the persisted
/// format and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] =
        [LogLevel::Debug, LogLevel::Info, LogLevel::Warning, LogLevel::Error, LogLevel::Fatal];

    /// Numeric value used as the persisted level key.
    pub fn value(self) -> u32 {
        match self {
            LogLevel::Debug => 10,
            LogLevel::Info => 20,
            LogLevel::Warning => 30,
            LogLevel::Error => 40,
            LogLevel::Fatal => 50,
        }
    }

    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            10 => Some(LogLevel::Debug),
            20 => Some(LogLevel::Info),
            30 => Some(LogLevel::Warning),
            40 => Some(LogLevel::Error),
            50 => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Case-insensitive name lookup. `warn` and `critical` are accepted
    /// aliases, matching the server's own level vocabulary.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "FATAL" | "CRITICAL" => Some(LogLevel::Fatal),
            _ => None,
        }
    }

    /// Level for a parsed header name; unknown names (e.g. `verbose`)
    /// default to `Debug`.
    pub fn from_name_or_debug(name: &str) -> Self {
        Self::from_name(name).unwrap_or(LogLevel::Debug)
    }

    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
        }
    }
}

/// A structured log record recovered from one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: LogLevel,
    /// Level name exactly as it appeared in the header (e.g. `verbose`).
    pub level_name: String,
    /// Short identifier from the log header (e.g. `ServerLobby`).
    pub object: String,
    /// Remainder of the line after the header.
    pub message: String,
}

#[derive(Debug, Error)]
pub enum IgnoreError {
    #[error("invalid log-ignore pattern \"{pattern}\": {source}")]
    InvalidPattern { pattern: String, source: regex::Error },
}

/// A suppression pattern: matched against the whole message.
#[derive(Debug, Clone)]
pub struct IgnorePattern {
    raw: String,
    regex: Regex,
}

impl IgnorePattern {
    pub fn new(pattern: &str) -> Result<Self, IgnoreError> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
            IgnoreError::InvalidPattern { pattern: pattern.to_string(), source }
        })?;
        Ok(Self { raw: pattern.to_string(), regex })
    }

    /// The pattern string as originally supplied (persisted form).
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, message: &str) -> bool {
        self.regex.is_match(message)
    }
}

/// Serialized shape of an ignore table: `object -> levelValue(string) -> patterns`.
pub type IgnoreConfig = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Ordered suppression patterns keyed by `(object, level)`.
///
/// Two tiers exist at runtime (fleet-global and per-instance); a full match
/// at either tier drops the line before it reaches any handler.
#[derive(Debug, Default, Clone)]
pub struct LogIgnoreTable {
    map: BTreeMap<String, BTreeMap<LogLevel, Vec<IgnorePattern>>>,
}

impl LogIgnoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pattern; returns `false` when the exact pattern is already
    /// present for that `(object, level)` bucket.
    pub fn add(&mut self, object: &str, level: LogLevel, pattern: &str) -> Result<bool, IgnoreError> {
        let bucket = self.map.entry(object.to_string()).or_default().entry(level).or_default();
        if bucket.iter().any(|p| p.raw() == pattern) {
            return Ok(false);
        }
        bucket.push(IgnorePattern::new(pattern)?);
        Ok(true)
    }

    /// Remove the pattern at `index`; returns its raw string when removed.
    pub fn remove(&mut self, object: &str, level: LogLevel, index: usize) -> Option<String> {
        let bucket = self.map.get_mut(object)?.get_mut(&level)?;
        if index >= bucket.len() {
            return None;
        }
        Some(bucket.remove(index).raw)
    }

    pub fn remove_level(&mut self, object: &str, level: LogLevel) -> bool {
        self.map.get_mut(object).map(|levels| levels.remove(&level).is_some()).unwrap_or(false)
    }

    pub fn remove_object(&mut self, object: &str) -> bool {
        self.map.remove(object).is_some()
    }

    pub fn patterns(&self, object: &str, level: LogLevel) -> Vec<String> {
        self.map
            .get(object)
            .and_then(|levels| levels.get(&level))
            .map(|bucket| bucket.iter().map(|p| p.raw().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn levels(&self, object: &str) -> Vec<LogLevel> {
        self.map.get(object).map(|levels| levels.keys().copied().collect()).unwrap_or_default()
    }

    pub fn objects(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether any pattern in the `(object, level)` bucket fully matches.
    pub fn is_ignored(&self, object: &str, level: LogLevel, message: &str) -> bool {
        self.map
            .get(object)
            .and_then(|levels| levels.get(&level))
            .map(|bucket| bucket.iter().any(|p| p.matches(message)))
            .unwrap_or(false)
    }

    /// Persisted form, keyed by stringified level value.
    pub fn to_config(&self) -> IgnoreConfig {
        self.map
            .iter()
            .map(|(object, levels)| {
                let levels = levels
                    .iter()
                    .map(|(level, bucket)| {
                        let patterns = bucket.iter().map(|p| p.raw().to_string()).collect();
                        (level.value().to_string(), patterns)
                    })
                    .collect();
                (object.clone(), levels)
            })
            .collect()
    }

    /// Rebuild from the persisted form. Unknown level keys and invalid
    /// patterns are reported, not silently dropped.
    pub fn from_config(config: &IgnoreConfig) -> Result<Self, LogIgnoreLoadError> {
        let mut table = Self::new();
        for (object, levels) in config {
            for (level_key, patterns) in levels {
                let level = level_key
                    .parse::<u32>()
                    .ok()
                    .and_then(LogLevel::from_value)
                    .ok_or_else(|| LogIgnoreLoadError::InvalidLevel(level_key.clone()))?;
                for pattern in patterns {
                    table.add(object, level, pattern)?;
                }
            }
        }
        Ok(table)
    }
}

#[derive(Debug, Error)]
pub enum LogIgnoreLoadError {
    #[error("invalid log level key \"{0}\"")]
    InvalidLevel(String),

    #[error(transparent)]
    Pattern(#[from] IgnoreError),
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
