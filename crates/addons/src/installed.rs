// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The locally installed addon set.
//!
//! An addon is installed iff `<addonpath>/<type>s/<id>/` contains a
//! well-formed `<type>.xml`. Arenas and CTF arenas live under `tracks/`;
//! classification comes from the manifest's `soccer`/`arena`/`ctf`
//! attributes. An installed addon with no catalog counterpart (removed
//! upstream) is perfectly normal and kept.

use crate::catalog::CatalogError;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Gameplay classification of an installed addon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddonClass {
    Track,
    Soccer,
    Arena,
    Ctf,
    Kart,
}

/// One installed addon, backed by its manifest on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledAddon {
    pub id: String,
    /// Manifest root tag: `track` or `kart`.
    pub kind: String,
    pub name: String,
    pub designer: String,
    pub version: Option<String>,
    pub revision: u32,
    pub default_lap_count: Option<u32>,
    pub soccer: bool,
    pub arena: bool,
    pub ctf: bool,
    pub path: PathBuf,
}

impl InstalledAddon {
    /// Which per-category tables this addon belongs to.
    pub fn classes(&self) -> Vec<AddonClass> {
        if self.kind == "track" {
            let mut classes = Vec::new();
            if self.soccer {
                classes.push(AddonClass::Soccer);
            }
            if self.arena {
                classes.push(AddonClass::Arena);
                if self.ctf {
                    classes.push(AddonClass::Ctf);
                }
            }
            if classes.is_empty() {
                classes.push(AddonClass::Track);
            }
            return classes;
        }
        let mut classes = vec![AddonClass::Kart];
        if self.ctf {
            classes.push(AddonClass::Ctf);
        }
        classes
    }
}

/// Parse a `track.xml` / `kart.xml` manifest.
pub fn parse_manifest(xml: &str, id: &str, path: &Path) -> Result<InstalledAddon, CatalogError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().map_err(|e| CatalogError::Parse(e.to_string()))? {
            Event::Start(element) | Event::Empty(element) => {
                let kind = String::from_utf8_lossy(element.name().as_ref()).into_owned();
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
                let attr = |key: &str| attributes.get(key).cloned();
                let flag = |key: &str| attr(key).as_deref() == Some("Y");
                return Ok(InstalledAddon {
                    id: id.to_string(),
                    kind,
                    name: attr("name").unwrap_or_else(|| id.to_string()),
                    designer: attr("designer").unwrap_or_default(),
                    version: attr("version"),
                    revision: attr("revision").and_then(|v| v.parse().ok()).unwrap_or(0),
                    default_lap_count: attr("default-lap-count").and_then(|v| v.parse().ok()),
                    soccer: flag("soccer"),
                    arena: flag("arena"),
                    ctf: flag("ctf"),
                    path: path.to_path_buf(),
                });
            }
            Event::Eof => {
                return Err(CatalogError::Parse("manifest has no root element".to_string()))
            }
            _ => {}
        }
    }
}

/// Master map plus per-category id tables.
#[derive(Debug, Default, Clone)]
pub struct InstalledSet {
    addons: BTreeMap<String, InstalledAddon>,
    categories: BTreeMap<AddonClass, BTreeSet<String>>,
}

impl InstalledSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&InstalledAddon> {
        self.addons.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.addons.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.addons.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledAddon> {
        self.addons.values()
    }

    pub fn in_class(&self, class: AddonClass) -> Vec<&InstalledAddon> {
        self.categories
            .get(&class)
            .map(|ids| ids.iter().filter_map(|id| self.addons.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn insert(&mut self, addon: InstalledAddon) {
        self.remove(&addon.id);
        for class in addon.classes() {
            self.categories.entry(class).or_default().insert(addon.id.clone());
        }
        self.addons.insert(addon.id.clone(), addon);
    }

    pub fn remove(&mut self, id: &str) -> Option<InstalledAddon> {
        let addon = self.addons.remove(id)?;
        for ids in self.categories.values_mut() {
            ids.remove(id);
        }
        Some(addon)
    }

    pub fn set_revision(&mut self, id: &str, revision: u32) {
        if let Some(addon) = self.addons.get_mut(id) {
            addon.revision = revision;
        }
    }
}

/// Scan the on-disk addon tree. Directories without a usable manifest are
/// reported and skipped.
pub fn scan(addonpath: &Path, fetch_karts: bool) -> InstalledSet {
    let mut set = InstalledSet::new();
    let kinds: &[&str] = if fetch_karts { &["track", "kart"] } else { &["track"] };
    for kind in kinds {
        let dir = addonpath.join(format!("{kind}s"));
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(path = %dir.display(), error = %err, "no addon directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            let manifest_path = path.join(format!("{kind}.xml"));
            let data = match std::fs::read_to_string(&manifest_path) {
                Ok(data) => data,
                Err(err) => {
                    tracing::error!(
                        addon = %id,
                        manifest = %manifest_path.display(),
                        error = %err,
                        "addon has no manifest, not loading"
                    );
                    continue;
                }
            };
            match parse_manifest(&data, &id, &path) {
                Ok(addon) => set.insert(addon),
                Err(err) => {
                    tracing::debug!(addon = %id, error = %err, "cannot load addon manifest");
                }
            }
        }
    }
    tracing::info!(count = set.len(), "local addons retrieved");
    set
}

#[cfg(test)]
#[path = "installed_tests.rs"]
mod tests;
