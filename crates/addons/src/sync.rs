// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Addon synchronization: download, unpack, install, update, uninstall,
//! and the autoupdate loop.
//!
//! Observers attach to the `addon_*` chains; install and uninstall use
//! deferred emissions so a veto aborts the operation and a mid-flight
//! failure (bad manifest, filesystem error) rejects it. Any completed
//! modification raises the mod flag; whoever drains it (the autoupdate
//! loop, or a command that asked for a restart) broadcasts the fleet
//! restart condition so servers pick up the new content once empty.

use crate::catalog::{
    addon_subdir, build_catalog, compute_updates, parse_catalog, Catalog, CatalogEntry,
    CatalogError,
};
use crate::config::{join_banlist, split_banlist, AddonConfig, AddonConfigError};
use crate::installed::{self, parse_manifest, InstalledAddon, InstalledSet};
use crate::status::Requirements;
use futures_util::StreamExt;
use parking_lot::Mutex;
use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stkw_core::{HandlerChain, RestartCondition, TaskRegistry};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Registry name guarding the autoupdate singleton.
pub const AUTOUPDATE_TASK: &str = "addon-autoupdate";

#[derive(Debug, Error)]
pub enum AddonError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("addon \"{0}\" is not in the catalog")]
    NotFound(String),

    #[error("addon \"{0}\" is not installed")]
    NotInstalled(String),

    #[error("no update available for \"{0}\"")]
    NoUpdate(String),

    #[error("operation vetoed by an observer")]
    Vetoed,

    #[error("addon \"{id}\" has no usable manifest: {reason}")]
    BadManifest { id: String, reason: String },

    #[error("archive error for \"{id}\": {source}")]
    Archive { id: String, source: zip::result::ZipError },

    #[error("filesystem error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Config(#[from] AddonConfigError),
}

fn io_error(path: &Path, source: std::io::Error) -> AddonError {
    AddonError::Io { path: path.to_path_buf(), source }
}

#[derive(Default)]
struct SyncState {
    catalog: Catalog,
    updates: Vec<CatalogEntry>,
    installed: InstalledSet,
}

pub struct AddonSync {
    config_path: PathBuf,
    config: Mutex<AddonConfig>,
    stk_version: Version,
    http: reqwest::Client,
    state: Mutex<SyncState>,
    mod_flag: AtomicBool,
    restart: Arc<RestartCondition>,

    /// Deferred emission around each install; veto aborts it.
    pub addon_installed: HandlerChain<CatalogEntry>,
    pub addon_updated: HandlerChain<CatalogEntry>,
    /// Deferred emission around each uninstall; veto aborts it.
    pub addon_uninstalled: HandlerChain<InstalledAddon>,
    /// Fired after a bulk pass that modified anything.
    pub addon_bulk_modified: HandlerChain<()>,
}

impl AddonSync {
    pub fn new(
        config: AddonConfig,
        config_path: impl Into<PathBuf>,
        stk_version: Version,
        restart: Arc<RestartCondition>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config_path: config_path.into(),
            config: Mutex::new(config),
            stk_version,
            http: reqwest::Client::new(),
            state: Mutex::new(SyncState::default()),
            mod_flag: AtomicBool::new(false),
            restart,
            addon_installed: HandlerChain::new(),
            addon_updated: HandlerChain::non_cancellable(),
            addon_uninstalled: HandlerChain::new(),
            addon_bulk_modified: HandlerChain::non_cancellable(),
        })
    }

    pub fn config(&self) -> AddonConfig {
        self.config.lock().clone()
    }

    pub fn update_config(&self, update: impl FnOnce(&mut AddonConfig)) {
        update(&mut self.config.lock());
    }

    pub fn save_config(&self) -> Result<(), AddonError> {
        Ok(self.config.lock().save(&self.config_path)?)
    }

    pub fn catalog_entry(&self, id: &str) -> Option<CatalogEntry> {
        self.state.lock().catalog.get(id).cloned()
    }

    pub fn catalog_snapshot(&self) -> Catalog {
        self.state.lock().catalog.clone()
    }

    pub fn installed_snapshot(&self) -> InstalledSet {
        self.state.lock().installed.clone()
    }

    pub fn updates_available(&self) -> Vec<CatalogEntry> {
        self.state.lock().updates.clone()
    }

    /// Rebuild the installed set from the on-disk addon tree.
    pub fn scan_installed(&self) {
        let (addonpath, fetch_karts) = {
            let config = self.config.lock();
            (config.addonpath.clone(), config.fetch_karts)
        };
        let set = installed::scan(&addonpath, fetch_karts);
        self.state.lock().installed = set;
    }

    /// Fetch and rebuild the catalog, then recompute available updates.
    pub async fn fetch(&self) -> Result<usize, AddonError> {
        let (url, fetch_karts) = {
            let config = self.config.lock();
            (config.online_assets_url.clone(), config.fetch_karts)
        };
        tracing::info!(url = %url, "fetching online addon catalog");
        let body = self.http.get(&url).send().await?.error_for_status()?.text().await?;
        let raw = parse_catalog(&body)?;
        tracing::info!(bytes = body.len(), entries = raw.len(), "catalog fetched");

        let catalog = build_catalog(&raw, &self.stk_version, fetch_karts);
        let mut state = self.state.lock();
        state.updates = compute_updates(&catalog, &state.installed);
        state.catalog = catalog;
        Ok(state.catalog.len())
    }

    /// Download one addon zip into the downloads directory, logging
    /// progress every 16th chunk and at completion.
    pub async fn download(&self, id: &str, url: &str) -> Result<PathBuf, AddonError> {
        let download_dir = self.config.lock().downloadpath.clone();
        tokio::fs::create_dir_all(&download_dir)
            .await
            .map_err(|e| io_error(&download_dir, e))?;
        let filepath = download_dir.join(format!("{id}.zip"));
        if filepath.is_file() {
            tracing::info!(addon = %id, "replacing previously downloaded archive");
        }
        tracing::info!(addon = %id, url = %url, path = %filepath.display(), "downloading");

        let response = self.http.get(url).send().await?.error_for_status()?;
        let total = response.content_length().filter(|length| *length > 0);
        if let Some(total) = total {
            tracing::info!(addon = %id, kib = total / 1024, "archive size known");
        }
        let mut file =
            tokio::fs::File::create(&filepath).await.map_err(|e| io_error(&filepath, e))?;
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut chunk_index: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(|e| io_error(&filepath, e))?;
            downloaded += chunk.len() as u64;
            match total {
                Some(total) => {
                    let progress = downloaded * 100 / total;
                    if progress == 100 || chunk_index % 16 == 0 {
                        tracing::info!(addon = %id, progress, "download progress");
                    }
                }
                None => {
                    if chunk_index % 16 == 0 {
                        tracing::info!(addon = %id, downloaded, "download progress");
                    }
                }
            }
            chunk_index += 1;
        }
        file.flush().await.map_err(|e| io_error(&filepath, e))?;
        tracing::info!(addon = %id, "download complete");
        Ok(filepath)
    }

    /// Extract a downloaded archive into the addon tree, replacing any
    /// previous contents of the target directory.
    pub fn unpack(&self, id: &str, tag: &str, archive_path: &Path) -> Result<PathBuf, AddonError> {
        let target = self.config.lock().addonpath.join(addon_subdir(tag)).join(id);
        tracing::info!(
            addon = %id,
            archive = %archive_path.display(),
            target = %target.display(),
            "unpacking"
        );
        if target.is_dir() {
            clear_directory(&target)?;
        } else {
            std::fs::create_dir_all(&target).map_err(|e| io_error(&target, e))?;
        }
        let file = std::fs::File::open(archive_path).map_err(|e| io_error(archive_path, e))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|source| AddonError::Archive { id: id.to_string(), source })?;
        archive
            .extract(&target)
            .map_err(|source| AddonError::Archive { id: id.to_string(), source })?;
        tracing::info!(addon = %id, "extracted into the addon tree");
        Ok(target)
    }

    /// Download, unpack, classify, and register one catalog addon.
    pub async fn install(&self, entry: &CatalogEntry) -> Result<(), AddonError> {
        let emission = self.addon_installed.emit_deferred(entry).await;
        if !emission.accepted() {
            emission.resolve(false);
            return Err(AddonError::Vetoed);
        }
        match self.fetch_and_register(entry).await {
            Ok(addon) => {
                self.state.lock().installed.insert(addon);
                self.mod_flag.store(true, Ordering::SeqCst);
                tracing::info!(addon = %entry.id, "addon installed");
                emission.resolve(true);
                Ok(())
            }
            Err(err) => {
                // A failed manifest read leaves the partially extracted
                // directory behind; the addon is not registered anywhere.
                tracing::error!(addon = %entry.id, error = %err, "install failed");
                emission.resolve(false);
                Err(err)
            }
        }
    }

    async fn fetch_and_register(&self, entry: &CatalogEntry) -> Result<InstalledAddon, AddonError> {
        let archive = self.download(&entry.id, &entry.file).await?;
        let target = self.unpack(&entry.id, &entry.tag, &archive)?;
        let kind = if entry.tag == "arena" { "track" } else { entry.tag.as_str() };
        let manifest_path = target.join(format!("{kind}.xml"));
        let data = std::fs::read_to_string(&manifest_path).map_err(|_| {
            AddonError::BadManifest {
                id: entry.id.clone(),
                reason: format!("{kind}.xml missing after extraction"),
            }
        })?;
        parse_manifest(&data, &entry.id, &target)
            .map_err(|e| AddonError::BadManifest { id: entry.id.clone(), reason: e.to_string() })
    }

    /// Install the newer revision of an already installed addon.
    pub async fn update(&self, entry: &CatalogEntry) -> Result<(), AddonError> {
        if !self.state.lock().installed.contains(&entry.id) {
            return Err(AddonError::NotInstalled(entry.id.clone()));
        }
        let archive = self.download(&entry.id, &entry.file).await?;
        self.unpack(&entry.id, &entry.tag, &archive)?;
        {
            let mut state = self.state.lock();
            state.installed.set_revision(&entry.id, entry.revision);
            state.updates.retain(|update| update.id != entry.id);
        }
        self.mod_flag.store(true, Ordering::SeqCst);
        tracing::info!(addon = %entry.id, revision = entry.revision, "addon updated");
        self.addon_updated.emit(entry).await;
        Ok(())
    }

    /// Remove an installed addon from disk and the tables; optionally ban
    /// it from auto-reinstall.
    pub async fn uninstall(&self, id: &str, ban: bool) -> Result<(), AddonError> {
        let addon = self
            .state
            .lock()
            .installed
            .get(id)
            .cloned()
            .ok_or_else(|| AddonError::NotInstalled(id.to_string()))?;
        let emission = self.addon_uninstalled.emit_deferred(&addon).await;
        if !emission.accepted() {
            emission.resolve(false);
            return Err(AddonError::Vetoed);
        }

        let target = self.config.lock().addonpath.join(format!("{}s", addon.kind)).join(id);
        if !target.is_dir() {
            tracing::error!(addon = %id, path = %target.display(), "addon directory not found");
            emission.resolve(false);
            return Err(io_error(
                &target,
                std::io::Error::new(std::io::ErrorKind::NotFound, "addon directory missing"),
            ));
        }
        tracing::info!(addon = %id, path = %target.display(), "removing addon directory");
        if let Err(err) = std::fs::remove_dir_all(&target) {
            emission.resolve(false);
            return Err(io_error(&target, err));
        }
        self.state.lock().installed.remove(id);
        if ban {
            self.ban(id);
        }
        self.mod_flag.store(true, Ordering::SeqCst);
        tracing::info!(addon = %id, "addon uninstalled");
        emission.resolve(true);
        Ok(())
    }

    /// Add an id to the autoinstall banlist; returns whether it was new.
    pub fn ban(&self, id: &str) -> bool {
        let changed = {
            let mut config = self.config.lock();
            let mut list = split_banlist(&config.autoinstall_banlist);
            if list.iter().any(|banned| banned == id) {
                false
            } else {
                tracing::info!(addon = %id, "adding to the autoinstall ban list");
                list.push(id.to_string());
                config.autoinstall_banlist = join_banlist(&list);
                true
            }
        };
        if changed {
            if let Err(err) = self.save_config() {
                tracing::warn!(error = %err, "could not persist ban list");
            }
        }
        changed
    }

    /// Remove an id from the autoinstall banlist; returns whether it was
    /// present.
    pub fn unban(&self, id: &str) -> bool {
        let changed = {
            let mut config = self.config.lock();
            let mut list = split_banlist(&config.autoinstall_banlist);
            let before = list.len();
            list.retain(|banned| banned != id);
            if list.len() == before {
                false
            } else {
                tracing::info!(addon = %id, "removing from the autoinstall ban list");
                config.autoinstall_banlist = join_banlist(&list);
                true
            }
        };
        if changed {
            if let Err(err) = self.save_config() {
                tracing::warn!(error = %err, "could not persist ban list");
            }
        }
        changed
    }

    /// Apply every available update, skipping the autoupdate banlist.
    /// Per-addon failures are logged; the pass continues.
    pub async fn update_all(&self) -> usize {
        let updates = self.updates_available();
        let banned = split_banlist(&self.config.lock().autoupdate_banlist);
        tracing::info!(available = updates.len(), "updating all addons");
        let mut updated = 0;
        for entry in updates {
            if banned.iter().any(|id| *id == entry.id) {
                tracing::debug!(addon = %entry.id, "skipping frozen addon");
                continue;
            }
            match self.update(&entry).await {
                Ok(()) => updated += 1,
                Err(err) => {
                    tracing::error!(addon = %entry.id, error = %err, "update failed");
                }
            }
        }
        updated
    }

    /// Catalog addons that are not yet installed and pass the rating
    /// floor, the requirements mask, the banlist, and the kart gate.
    pub fn autoinstall_candidates(&self) -> Vec<CatalogEntry> {
        let config = self.config.lock().clone();
        let requirements = match Requirements::parse(&config.autoinstall_requirements) {
            Ok(requirements) => requirements,
            Err(err) => {
                tracing::warn!(error = %err, "autoinstall requirements unusable");
                return Vec::new();
            }
        };
        let banned = split_banlist(&config.autoinstall_banlist);
        let state = self.state.lock();
        state
            .catalog
            .entries
            .values()
            .filter(|entry| !state.installed.contains(&entry.id))
            .filter(|entry| entry.rating >= config.autoinstall_minrating)
            .filter(|entry| !banned.iter().any(|id| *id == entry.id))
            .filter(|entry| entry.tag != "kart" || config.autoinstall_karts)
            .filter(|entry| requirements.passes(entry.status))
            .cloned()
            .collect()
    }

    /// Install every autoinstall candidate.
    pub async fn install_new(&self) -> usize {
        let candidates = self.autoinstall_candidates();
        tracing::info!(available = candidates.len(), "downloading new addons");
        let mut installed = 0;
        for entry in candidates {
            match self.install(&entry).await {
                Ok(()) => installed += 1,
                Err(err) => {
                    tracing::error!(addon = %entry.id, error = %err, "autoinstall failed");
                }
            }
        }
        installed
    }

    /// Remove everything from the downloads directory.
    pub fn clear_downloads(&self) -> Result<(), AddonError> {
        let download_dir = self.config.lock().downloadpath.clone();
        if download_dir.is_dir() {
            clear_directory(&download_dir)?;
        }
        Ok(())
    }

    /// Drain the modification flag; broadcast the fleet restart and the
    /// bulk-modified chain when it was set.
    pub async fn broadcast_if_modified(&self) -> bool {
        if !self.mod_flag.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.restart.broadcast();
        self.addon_bulk_modified.emit(&()).await;
        true
    }

    /// Run `update_all` (and optionally `install_new`) as one bulk pass,
    /// broadcasting the restart once at the end if anything changed.
    pub async fn update_all_and_install(&self, install_more: bool) {
        self.update_all().await;
        if install_more {
            self.install_new().await;
        }
        self.broadcast_if_modified().await;
    }

    /// Start the autoupdate singleton. Refused (with an error log) when a
    /// previous loop is still registered.
    pub fn spawn_autoupdate(self: &Arc<Self>, tasks: &TaskRegistry) -> bool {
        if !self.config.lock().autoupdate {
            return false;
        }
        let this = self.clone();
        let spawned = tasks.spawn(AUTOUPDATE_TASK, async move { this.autoupdate_loop().await });
        if !spawned {
            tracing::error!("another autoupdate task is already running");
        }
        spawned
    }

    async fn autoupdate_loop(self: Arc<Self>) {
        tracing::info!(
            interval_secs = self.config.lock().autoupdate_interval,
            "addon autoupdater enabled"
        );
        loop {
            let (enabled, interval, autoinstall) = {
                let config = self.config.lock();
                (config.autoupdate, config.autoupdate_interval, config.autoinstall)
            };
            if !enabled {
                break;
            }
            tokio::time::sleep(Duration::from_secs_f64(interval.max(1.0))).await;
            if let Err(err) = self.fetch().await {
                tracing::error!(error = %err, "autoupdate fetch failed, retrying next cycle");
                continue;
            }
            self.update_all().await;
            if autoinstall {
                self.install_new().await;
            }
            tracing::info!("cleaning downloads directory");
            if let Err(err) = self.clear_downloads() {
                tracing::warn!(error = %err, "could not clean downloads directory");
            }
            self.broadcast_if_modified().await;
        }
    }
}

fn clear_directory(path: &Path) -> Result<(), AddonError> {
    for entry in std::fs::read_dir(path).map_err(|e| io_error(path, e))? {
        let entry = entry.map_err(|e| io_error(path, e))?;
        let entry_path = entry.path();
        let removed = if entry_path.is_dir() {
            std::fs::remove_dir_all(&entry_path)
        } else {
            std::fs::remove_file(&entry_path)
        };
        removed.map_err(|e| io_error(&entry_path, e))?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "sync_tests.rs"]
mod tests;
