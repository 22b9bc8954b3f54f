// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The server's own configuration file.
//!
//! STK server configs are a flat XML document: a `<server-config>` root
//! whose children each carry a single `value` attribute:
//!
//! ```xml
//! <server-config version="6">
//!     <server-name value="my server" />
//!     <server-mode value="6" />
//! </server-config>
//! ```
//!
//! This module keeps it as an ordered key/value list so enhancers can read
//! and rewrite individual values without understanding the schema. The
//! parser performs no entity resolution; the file may have been produced by
//! an older server build and is treated as untrusted input.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("malformed XML{}: {message}", path_suffix(.path))]
    Parse { path: Option<PathBuf>, message: String },
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default()
}

const DEFAULT_ROOT: &str = "server-config";

/// Ordered `key -> value` view of a server config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfigDoc {
    root: String,
    root_attributes: Vec<(String, String)>,
    entries: Vec<(String, String)>,
}

impl Default for ServerConfigDoc {
    fn default() -> Self {
        Self { root: DEFAULT_ROOT.to_string(), root_attributes: Vec::new(), entries: Vec::new() }
    }
}

impl ServerConfigDoc {
    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(xml);
        let parse_err = |message: String| XmlError::Parse { path: None, message };

        let mut root: Option<String> = None;
        let mut root_attributes = Vec::new();
        let mut entries = Vec::new();
        let mut depth = 0usize;
        loop {
            match reader.read_event().map_err(|e| parse_err(e.to_string()))? {
                Event::Start(element) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    if depth == 0 {
                        root = Some(name);
                        root_attributes = all_attributes(&element)?;
                    } else if depth == 1 {
                        if let Some(value) = value_attribute(&element)? {
                            entries.push((name, value));
                        }
                    }
                    depth += 1;
                }
                Event::Empty(element) => {
                    if depth == 1 {
                        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                        if let Some(value) = value_attribute(&element)? {
                            entries.push((name, value));
                        }
                    }
                }
                Event::End(_) => depth = depth.saturating_sub(1),
                Event::Eof => break,
                _ => {}
            }
        }
        let root = root.ok_or_else(|| parse_err("document has no root element".to_string()))?;
        Ok(Self { root, root_attributes, entries })
    }

    /// Load from disk; a missing file yields the default empty document.
    pub fn load(path: &Path) -> Result<Self, XmlError> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .map_err(|source| XmlError::Read { path: path.to_path_buf(), source })?;
        Self::parse(&data).map_err(|err| match err {
            XmlError::Parse { message, .. } => {
                XmlError::Parse { path: Some(path.to_path_buf()), message }
            }
            other => other,
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Set a value, appending a new element for an unknown key.
    pub fn set(&mut self, key: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, current)) => *current = value.to_string(),
            None => self.entries.push((key.to_string(), value.to_string())),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn to_xml(&self) -> String {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 4);
        // Writing into an in-memory cursor cannot fail.
        let _ = writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)));
        let mut root = BytesStart::new(self.root.as_str());
        for (key, value) in &self.root_attributes {
            root.push_attribute((key.as_str(), value.as_str()));
        }
        let _ = writer.write_event(Event::Start(root));
        for (key, value) in &self.entries {
            let mut element = BytesStart::new(key.as_str());
            element.push_attribute(("value", value.as_str()));
            let _ = writer.write_event(Event::Empty(element));
        }
        let _ = writer.write_event(Event::End(BytesEnd::new(self.root.as_str())));
        let mut xml = String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned();
        xml.push('\n');
        xml
    }

    pub fn save(&self, path: &Path) -> Result<(), XmlError> {
        std::fs::write(path, self.to_xml())
            .map_err(|source| XmlError::Write { path: path.to_path_buf(), source })
    }
}

fn all_attributes(element: &BytesStart<'_>) -> Result<Vec<(String, String)>, XmlError> {
    let mut attributes = Vec::new();
    for attribute in element.attributes() {
        let attribute =
            attribute.map_err(|e| XmlError::Parse { path: None, message: e.to_string() })?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| XmlError::Parse { path: None, message: e.to_string() })?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

fn value_attribute(element: &BytesStart<'_>) -> Result<Option<String>, XmlError> {
    for attribute in element.attributes() {
        let attribute = attribute
            .map_err(|e| XmlError::Parse { path: None, message: e.to_string() })?;
        if attribute.key.as_ref() == b"value" {
            let value = attribute
                .unescape_value()
                .map_err(|e| XmlError::Parse { path: None, message: e.to_string() })?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

#[cfg(test)]
#[path = "servercfg_tests.rs"]
mod tests;
