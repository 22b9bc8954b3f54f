// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The remote addon catalog.
//!
//! `online_assets.xml` is a flat document whose children describe one addon
//! each (`<track .../>`, `<kart .../>`, ...). The document is untrusted:
//! parsing performs no entity resolution, and a malformed or incompatible
//! entry is skipped with a warning rather than failing the fetch.

use crate::installed::InstalledSet;
use crate::status::AddonStatus;
use quick_xml::events::Event;
use quick_xml::Reader;
use semver::Version;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("malformed catalog XML: {0}")]
    Parse(String),

    #[error("invalid version \"{0}\"")]
    Version(String),
}

/// One catalog entry, deduplicated by id keeping the highest revision.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    /// Element tag: `track`, `kart`, `arena`, ...
    pub tag: String,
    pub name: String,
    pub designer: String,
    pub uploader: String,
    pub rating: f64,
    pub revision: u32,
    pub version: Option<String>,
    /// Download URL of the addon zip.
    pub file: String,
    pub min_include_version: Option<String>,
    pub max_include_version: Option<String>,
    pub status: AddonStatus,
}

impl CatalogEntry {
    /// Subdirectory under the addon tree; arenas live with the tracks.
    pub fn subdir(&self) -> String {
        addon_subdir(&self.tag)
    }
}

/// `tracks` for track-shaped addons (arenas included), `<tag>s` otherwise.
pub fn addon_subdir(tag: &str) -> String {
    if tag == "arena" {
        "tracks".to_string()
    } else {
        format!("{tag}s")
    }
}

/// Raw element before filtering: tag plus its attributes.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
}

/// Parse the catalog document into raw entries, in document order.
pub fn parse_catalog(xml: &str) -> Result<Vec<RawEntry>, CatalogError> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(|e| CatalogError::Parse(e.to_string()))? {
            Event::Start(element) => {
                if depth == 1 {
                    entries.push(raw_entry(&element)?);
                }
                depth += 1;
            }
            Event::Empty(element) => {
                if depth == 1 {
                    entries.push(raw_entry(&element)?);
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(entries)
}

fn raw_entry(element: &quick_xml::events::BytesStart<'_>) -> Result<RawEntry, CatalogError> {
    let tag = String::from_utf8_lossy(element.name().as_ref()).into_owned();
    let mut attributes = BTreeMap::new();
    for attribute in element.attributes() {
        let attribute = attribute.map_err(|e| CatalogError::Parse(e.to_string()))?;
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| CatalogError::Parse(e.to_string()))?
            .into_owned();
        attributes.insert(key, value);
    }
    Ok(RawEntry { tag, attributes })
}

/// Parse an STK-style version, padding missing components (`"1.4"` parses
/// as `1.4.0`).
pub fn parse_stk_version(input: &str) -> Result<Version, CatalogError> {
    let trimmed = input.trim();
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }
    let dots = trimmed.chars().filter(|c| *c == '.').count();
    let padded = match dots {
        0 => format!("{trimmed}.0.0"),
        1 => format!("{trimmed}.0"),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).map_err(|_| CatalogError::Version(input.to_string()))
}

/// The filtered, deduplicated catalog.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    pub entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Filter raw entries against the running version and the kart gate, then
/// deduplicate by id keeping the highest revision.
pub fn build_catalog(raw: &[RawEntry], current: &Version, fetch_karts: bool) -> Catalog {
    let mut catalog = Catalog::default();
    for entry in raw {
        match convert_entry(entry, current, fetch_karts) {
            Ok(Some(converted)) => {
                let keep = catalog
                    .entries
                    .get(&converted.id)
                    .map(|existing| converted.revision >= existing.revision)
                    .unwrap_or(true);
                if keep {
                    catalog.entries.insert(converted.id.clone(), converted);
                }
            }
            Ok(None) => {}
            Err(err) => {
                let name = entry.attributes.get("name").map(String::as_str).unwrap_or("?");
                tracing::warn!(addon = name, error = %err, "skipping catalog entry");
            }
        }
    }
    catalog
}

fn convert_entry(
    raw: &RawEntry,
    current: &Version,
    fetch_karts: bool,
) -> Result<Option<CatalogEntry>, CatalogError> {
    let attr = |key: &str| raw.attributes.get(key).cloned();
    let id = match attr("id") {
        Some(id) => id,
        None => return Err(CatalogError::Parse("entry without id".to_string())),
    };

    if raw.tag == "kart" && !fetch_karts {
        tracing::debug!(addon = %id, "skipping kart");
        return Ok(None);
    }

    // Version gate: an empty bound is treated as compatible.
    let raw_min = attr("min-include-version").unwrap_or_default();
    let raw_max = attr("max-include-version").unwrap_or_default();
    if !raw_min.is_empty() && parse_stk_version(&raw_min)? > *current {
        tracing::debug!(addon = %id, min = %raw_min, "incompatible addon (too new)");
        return Ok(None);
    }
    if !raw_max.is_empty() && *current > parse_stk_version(&raw_max)? {
        tracing::debug!(addon = %id, max = %raw_max, "incompatible addon (too old)");
        return Ok(None);
    }

    let revision = attr("revision").and_then(|v| v.parse().ok()).unwrap_or(0);
    let status = attr("status")
        .and_then(|v| v.parse::<u32>().ok())
        .map(AddonStatus::from_raw)
        .unwrap_or_else(AddonStatus::empty);

    Ok(Some(CatalogEntry {
        id,
        tag: raw.tag.clone(),
        name: attr("name").unwrap_or_default(),
        designer: attr("designer").unwrap_or_default(),
        uploader: attr("uploader").unwrap_or_default(),
        rating: attr("rating").and_then(|v| v.parse().ok()).unwrap_or(0.0),
        revision,
        version: attr("version"),
        file: attr("file").unwrap_or_default(),
        min_include_version: Some(raw_min).filter(|v| !v.is_empty()),
        max_include_version: Some(raw_max).filter(|v| !v.is_empty()),
        status,
    }))
}

/// Catalog entries strictly newer than their installed counterpart.
pub fn compute_updates(catalog: &Catalog, installed: &InstalledSet) -> Vec<CatalogEntry> {
    let mut updates = Vec::new();
    for entry in catalog.entries.values() {
        if let Some(local) = installed.get(&entry.id) {
            if entry.revision > local.revision {
                tracing::info!(
                    addon = %entry.id,
                    from = local.revision,
                    to = entry.revision,
                    "update available"
                );
                updates.push(entry.clone());
            }
        }
    }
    updates
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
