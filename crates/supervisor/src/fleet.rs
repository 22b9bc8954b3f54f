// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The named collection of supervised instances and everything fleet-wide:
//! the start/stop mutex, the restart broadcast, the global suppression
//! table, the live configuration snapshot, and the background-task
//! registry.

use crate::instance::{InstanceError, ServerInstance};
use crate::process::SpawnError;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stkw_core::{
    ConfigError, FleetConfig, LogIgnoreTable, RestartCondition, ServerEntry, TaskRegistry,
};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

/// Stop deadline applied during a hard reload or final cleanup.
const CLEANUP_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("server \"{0}\" already exists")]
    AlreadyExists(String),

    #[error("server \"{0}\" doesn't exist")]
    NotFound(String),

    #[error("server \"{0}\" is already running")]
    AlreadyRunning(String),

    #[error("server \"{0}\" is not running")]
    NotRunning(String),

    #[error("server \"{0}\" currently has players")]
    Occupied(String),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub struct SupervisorFleet {
    config_path: PathBuf,
    config: Mutex<FleetConfig>,
    servers: Mutex<BTreeMap<String, Arc<ServerInstance>>>,
    start_stop: Arc<AsyncMutex<()>>,
    restart_cond: Arc<RestartCondition>,
    global_ignores: Arc<RwLock<LogIgnoreTable>>,
    pub tasks: TaskRegistry,
}

impl SupervisorFleet {
    /// Build the fleet from a loaded configuration document. Broken pieces
    /// of the document (bad ignore patterns) are reported and skipped.
    pub fn new(config_path: impl Into<PathBuf>, config: FleetConfig) -> Arc<Self> {
        let global_ignores = match LogIgnoreTable::from_config(&config.global_logignores) {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(error = %err, "global log-ignores unusable, starting empty");
                LogIgnoreTable::new()
            }
        };
        let fleet = Arc::new(Self {
            config_path: config_path.into(),
            config: Mutex::new(config),
            servers: Mutex::new(BTreeMap::new()),
            start_stop: Arc::new(AsyncMutex::new(())),
            restart_cond: Arc::new(RestartCondition::new()),
            global_ignores: Arc::new(RwLock::new(global_ignores)),
            tasks: TaskRegistry::new(),
        });

        let entries: Vec<(String, ServerEntry)> = {
            let config = fleet.config.lock();
            config.servers.iter().map(|(name, entry)| (name.clone(), entry.clone())).collect()
        };
        for (name, entry) in entries {
            let instance = fleet.build_instance(&name, &entry);
            fleet.servers.lock().insert(name, instance);
        }
        fleet
    }

    fn build_instance(&self, name: &str, entry: &ServerEntry) -> Arc<ServerInstance> {
        let config = self.config.lock();
        let settings = config.resolve(entry);
        let ignores = match LogIgnoreTable::from_config(&entry.log_ignores) {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(server = name, error = %err, "log-ignores unusable, starting empty");
                LogIgnoreTable::new()
            }
        };
        ServerInstance::new(
            name,
            settings,
            ignores,
            self.global_ignores.clone(),
            self.start_stop.clone(),
            self.restart_cond.clone(),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServerInstance>> {
        self.servers.lock().get(name).cloned()
    }

    fn require(&self, name: &str) -> Result<Arc<ServerInstance>, FleetError> {
        self.get(name).ok_or_else(|| FleetError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.servers.lock().keys().cloned().collect()
    }

    /// One page of `(name, pid)` rows plus the page count.
    pub fn list_page(&self, page: usize, per_page: usize) -> (Vec<(String, Option<u32>)>, usize) {
        let servers = self.servers.lock();
        let (max_page, start, end) = paginate(servers.len(), per_page, page);
        let rows = servers
            .iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .map(|(name, instance)| (name.clone(), instance.pid()))
            .collect();
        (rows, max_page)
    }

    /// Register a new instance and persist it. The spawn preconditions are
    /// checked up front so a typo'd path surfaces here, not at start time.
    pub fn create_server(
        &self,
        name: &str,
        entry: ServerEntry,
    ) -> Result<Arc<ServerInstance>, FleetError> {
        if self.servers.lock().contains_key(name) {
            return Err(FleetError::AlreadyExists(name.to_string()));
        }
        let settings = self.config.lock().resolve(&entry);
        ServerInstance::validate(&settings)?;

        let instance = self.build_instance(name, &entry);
        self.servers.lock().insert(name.to_string(), instance.clone());
        self.config.lock().servers.insert(name.to_string(), entry);
        self.save()?;
        Ok(instance)
    }

    /// Replace an instance's stored attributes and live settings.
    pub fn edit_server(&self, name: &str, entry: ServerEntry) -> Result<(), FleetError> {
        let instance = self.require(name)?;
        let settings = self.config.lock().resolve(&entry);
        instance.update_settings(|current| *current = settings);
        self.config.lock().servers.insert(name.to_string(), entry);
        self.save()?;
        Ok(())
    }

    /// Drop a stopped instance from the fleet and the document.
    pub fn remove_server(&self, name: &str) -> Result<(), FleetError> {
        let instance = self.require(name)?;
        if instance.is_active() {
            return Err(FleetError::AlreadyRunning(name.to_string()));
        }
        instance.abort_tasks();
        self.servers.lock().remove(name);
        self.config.lock().servers.remove(name);
        self.save()?;
        Ok(())
    }

    pub async fn start_server(&self, name: &str) -> Result<(), FleetError> {
        let instance = self.require(name)?;
        if instance.is_active() {
            return Err(FleetError::AlreadyRunning(name.to_string()));
        }
        instance.launch().await?;
        Ok(())
    }

    /// Stop a server. Refused while players are connected unless `force`.
    pub async fn stop_server(
        &self,
        name: &str,
        force: bool,
        timeout: Option<Duration>,
    ) -> Result<bool, FleetError> {
        let instance = self.require(name)?;
        if !instance.is_active() {
            return Err(FleetError::NotRunning(name.to_string()));
        }
        if !instance.empty_server().is_set() && !force {
            return Err(FleetError::Occupied(name.to_string()));
        }
        let timeout = timeout.or_else(|| {
            self.config.lock().server_shutdown_timeout.map(Duration::from_secs_f64)
        });
        instance.set_restart(false);
        Ok(instance.stop(timeout).await?)
    }

    /// Stop with restart intent; the instance relaunches after exit.
    pub async fn restart_server(&self, name: &str, force: bool) -> Result<(), FleetError> {
        let instance = self.require(name)?;
        if !instance.is_active() {
            return Err(FleetError::NotRunning(name.to_string()));
        }
        if !instance.empty_server().is_set() && !force {
            return Err(FleetError::Occupied(name.to_string()));
        }
        instance.set_restart(true);
        instance.stop(Some(Duration::from_secs(60))).await?;
        Ok(())
    }

    /// Stop every active server concurrently.
    pub async fn stop_all(&self, timeout: Option<Duration>) {
        let active: Vec<Arc<ServerInstance>> =
            self.servers.lock().values().filter(|i| i.is_active()).cloned().collect();
        let stops = active.iter().map(|instance| {
            instance.set_restart(false);
            instance.stop(timeout)
        });
        for (instance, outcome) in active.iter().zip(join_all(stops).await) {
            if let Err(err) = outcome {
                tracing::debug!(server = %instance.name(), error = %err, "stop-all skipped server");
            }
        }
    }

    /// Wake every instance's condition restarter; each one stops (and then
    /// relaunches, per its autorestart) once its own server is empty.
    pub fn broadcast_restart(&self) {
        tracing::info!("broadcasting fleet restart");
        self.restart_cond.broadcast();
    }

    pub fn restart_condition(&self) -> Arc<RestartCondition> {
        self.restart_cond.clone()
    }

    pub fn global_ignores(&self) -> Arc<RwLock<LogIgnoreTable>> {
        self.global_ignores.clone()
    }

    pub fn config(&self) -> FleetConfig {
        self.config.lock().clone()
    }

    pub fn update_config(&self, update: impl FnOnce(&mut FleetConfig)) {
        update(&mut self.config.lock());
    }

    /// Names flagged for launch at supervisor startup.
    pub fn autostart_names(&self) -> Vec<String> {
        self.servers
            .lock()
            .iter()
            .filter(|(_, instance)| instance.settings().autostart)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Re-read the document. A soft reload updates live attributes and
    /// creates servers added on disk; a hard reload stops everything first
    /// and rebuilds the collection from scratch.
    pub async fn reload(&self, hard: bool) -> Result<(), FleetError> {
        if hard {
            self.stop_all(Some(CLEANUP_STOP_TIMEOUT)).await;
            for instance in self.servers.lock().values() {
                instance.abort_tasks();
            }
            self.servers.lock().clear();
        }
        let fresh = FleetConfig::load(&self.config_path)?;
        *self.global_ignores.write() = match LogIgnoreTable::from_config(&fresh.global_logignores)
        {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(error = %err, "global log-ignores unusable, keeping none");
                LogIgnoreTable::new()
            }
        };
        *self.config.lock() = fresh.clone();

        for (name, entry) in &fresh.servers {
            if let Some(instance) = self.get(name) {
                let settings = self.config.lock().resolve(entry);
                instance.update_settings(|current| *current = settings);
                let ignores = LogIgnoreTable::from_config(&entry.log_ignores).unwrap_or_default();
                instance.with_ignores(|table| *table = ignores.clone());
            } else {
                let instance = self.build_instance(name, entry);
                self.servers.lock().insert(name.clone(), instance);
            }
        }
        Ok(())
    }

    /// Persist the live fleet: every instance's current settings (with
    /// default-equal attributes elided) and both suppression tiers.
    pub fn save(&self) -> Result<(), ConfigError> {
        let mut config = self.config.lock().clone();
        config.global_logignores = self.global_ignores.read().to_config();
        for (name, instance) in self.servers.lock().iter() {
            let entry =
                config.entry_for(&instance.settings(), instance.ignores_snapshot().to_config());
            config.servers.insert(name.clone(), entry);
        }
        config.save(&self.config_path)?;
        *self.config.lock() = config;
        Ok(())
    }

    /// Stop everything and cancel every background task.
    pub async fn cleanup(&self) {
        self.stop_all(Some(CLEANUP_STOP_TIMEOUT)).await;
        for instance in self.servers.lock().values() {
            instance.abort_tasks();
        }
        self.tasks.cancel_all();
    }
}

/// `(max_page, start, end)` for a 1-based page over `len` items.
pub fn paginate(len: usize, per_page: usize, page: usize) -> (usize, usize, usize) {
    let max_page = len.div_ceil(per_page).max(1);
    let page = page.clamp(1, max_page);
    let start = (page - 1) * per_page;
    let end = (start + per_page).min(len);
    (max_page, start, end)
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;
