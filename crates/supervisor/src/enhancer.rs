// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-instance observers.
//!
//! An [`Enhancer`] attaches to one running (or stopped) instance and layers
//! operator conveniences on top: the server's own XML configuration
//! (read/edit/save), a deferred save that waits for the server to empty
//! before restarting it with the new config, an expiry timer, and chat
//! helpers. The enhancer holds only a weak reference to its instance so an
//! observer can never keep a deleted server alive.
//!
//! [`SoccerEnhancer`] additionally enables goal tracking on the instance
//! and carries the two scoreline easter eggs.

use crate::events::Goal;
use crate::instance::{InstanceError, ServerInstance};
use crate::servercfg::{ServerConfigDoc, XmlError};
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use stkw_core::{HandlerError, HandlerId};
use thiserror::Error;
use tokio::task::JoinHandle;

pub const GAMEMODE_NAMES: [&str; 9] = [
    "normal grand prix",
    "time-trial grand prix",
    "follow the leader",
    "normal race",
    "time-trial",
    "easter egg hunt",
    "soccer",
    "free-for-all",
    "capture the flag",
];

pub const DIFFICULTY_NAMES: [&str; 4] = ["novice", "intermediate", "expert", "supertux"];

#[derive(Debug, Error)]
pub enum EnhancerError {
    #[error("server is running, cannot modify config")]
    ServerRunning,

    #[error("a deferred save is already pending")]
    SavePending,

    #[error("the server is gone")]
    ServerGone,

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error(transparent)]
    Instance(#[from] InstanceError),
}

impl From<InstanceError> for HandlerError {
    fn from(err: InstanceError) -> Self {
        HandlerError::new(err.to_string())
    }
}

struct EnhancerInner {
    server: Weak<ServerInstance>,
    name: String,
    cfgpath: PathBuf,
    servercfg: Mutex<ServerConfigDoc>,
    expiry_task: Mutex<Option<JoinHandle<()>>>,
    save_task: Mutex<Option<JoinHandle<()>>>,
}

impl EnhancerInner {
    fn server(&self) -> Result<Arc<ServerInstance>, EnhancerError> {
        self.server.upgrade().ok_or(EnhancerError::ServerGone)
    }

    fn write_config(&self) -> Result<(), XmlError> {
        self.servercfg.lock().save(&self.cfgpath)
    }
}

pub struct Enhancer {
    inner: Arc<EnhancerInner>,
}

impl Enhancer {
    /// Attach to an instance, loading its server config (a missing file
    /// yields an empty document which is written back for a stopped
    /// server).
    pub fn attach(server: &Arc<ServerInstance>) -> Result<Self, EnhancerError> {
        if !server.empty_server().is_set() {
            tracing::warn!(
                server = %server.name(),
                "enhancer attached to a non-empty server; player list is not synchronized"
            );
        }
        let settings = server.settings();
        let cfgpath = settings.cwd.join(&settings.cfgpath);
        let existed = cfgpath.is_file();
        let servercfg = ServerConfigDoc::load(&cfgpath)?;
        if !existed && !server.is_active() {
            servercfg.save(&cfgpath)?;
        }

        seed_from_config(server, &servercfg);
        tracing::info!(server = %server.name(), config = %cfgpath.display(), "enhancer attached");
        Ok(Self {
            inner: Arc::new(EnhancerInner {
                server: Arc::downgrade(server),
                name: server.name().to_string(),
                cfgpath,
                servercfg: Mutex::new(servercfg),
                expiry_task: Mutex::new(None),
                save_task: Mutex::new(None),
            }),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.inner.name
    }

    pub fn server(&self) -> Option<Arc<ServerInstance>> {
        self.inner.server.upgrade()
    }

    pub fn get_cfg(&self, key: &str) -> Option<String> {
        self.inner.servercfg.lock().get(key).map(str::to_string)
    }

    pub fn cfg_keys(&self) -> Vec<String> {
        self.inner.servercfg.lock().keys().map(str::to_string).collect()
    }

    /// Update a value in the in-memory document. Persisting is a separate
    /// step: [`save_config`](Self::save_config) or
    /// [`save_config_on_empty`](Self::save_config_on_empty).
    pub fn set_cfg(&self, key: &str, value: &str) {
        self.inner.servercfg.lock().set(key, value);
    }

    /// Re-read the document from disk, discarding in-memory edits.
    pub fn reload_config(&self) -> Result<(), EnhancerError> {
        let doc = ServerConfigDoc::load(&self.inner.cfgpath)?;
        if let Ok(server) = self.inner.server() {
            seed_from_config(&server, &doc);
        }
        *self.inner.servercfg.lock() = doc;
        Ok(())
    }

    /// Write the document now. Refused while the server runs — the server
    /// would overwrite it on shutdown.
    pub fn save_config(&self) -> Result<(), EnhancerError> {
        let server = self.inner.server()?;
        if server.is_active() {
            return Err(EnhancerError::ServerRunning);
        }
        Ok(self.inner.write_config()?)
    }

    /// Defer the save: once the server is empty, stop it without restart
    /// intent, write the config, and launch it again. At most one such
    /// save may be in flight.
    pub fn save_config_on_empty(&self) -> Result<(), EnhancerError> {
        let mut slot = self.inner.save_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(EnhancerError::SavePending);
        }
        *slot = Some(tokio::spawn(save_on_empty(self.inner.clone())));
        Ok(())
    }

    /// Persist now if the server is stopped, otherwise defer.
    pub fn save_config_auto(&self) -> Result<(), EnhancerError> {
        match self.inner.server() {
            Ok(server) if server.is_active() => self.save_config_on_empty(),
            _ => self.save_config(),
        }
    }

    pub fn has_pending_save(&self) -> bool {
        self.inner.save_task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// One-shot shutdown `duration` from now.
    pub fn expire_in(&self, duration: Duration) {
        tracing::info!(
            server = %self.inner.name,
            minutes = duration.as_secs_f64() / 60.0,
            "server expiry armed"
        );
        let mut slot = self.inner.expiry_task.lock();
        if let Some(task) = slot.take() {
            task.abort();
        }
        *slot = Some(tokio::spawn(expiry(self.inner.clone(), duration)));
    }

    /// One-shot shutdown at a wall-clock deadline; a past deadline fires
    /// immediately.
    pub fn expire_at(&self, deadline: DateTime<Local>) {
        let remaining = (deadline - Local::now()).to_std().unwrap_or(Duration::ZERO);
        self.expire_in(remaining);
    }

    pub async fn chat(&self, message: &str, allow_cmd: bool) -> Result<(), EnhancerError> {
        Ok(self.inner.server()?.chat(message, allow_cmd).await?)
    }

    pub async fn kick(&self, username: &str) -> Result<(), EnhancerError> {
        Ok(self.inner.server()?.kick(username).await?)
    }

    pub fn gamemode_name(&self) -> Option<&'static str> {
        let server = self.server()?;
        GAMEMODE_NAMES.get(server.game_state().gamemode as usize).copied()
    }

    pub fn difficulty_name(&self) -> Option<&'static str> {
        let server = self.server()?;
        DIFFICULTY_NAMES.get(server.game_state().difficulty as usize).copied()
    }

    /// Abort the enhancer's tasks. A pending deferred save is cancelled.
    pub fn cleanup(&self) {
        for slot in [&self.inner.expiry_task, &self.inner.save_task] {
            if let Some(task) = slot.lock().take() {
                task.abort();
            }
        }
        tracing::info!(server = %self.inner.name, "enhancer detached");
    }
}

fn seed_from_config(server: &Arc<ServerInstance>, doc: &ServerConfigDoc) {
    let mode = doc.get("server-mode").and_then(|v| v.parse().ok()).unwrap_or(3);
    let difficulty = doc.get("server-difficulty").and_then(|v| v.parse().ok()).unwrap_or(3);
    server.seed_mode_difficulty(mode, difficulty);
}

async fn save_on_empty(inner: Arc<EnhancerInner>) {
    let Some(server) = inner.server.upgrade() else { return };
    server.empty_server().wait_set().await;
    server.set_restart(false);
    if let Err(err) = server.stop(None).await {
        tracing::debug!(server = %inner.name, error = %err, "deferred save: server already down");
    }
    if let Err(err) = inner.write_config() {
        tracing::error!(server = %inner.name, error = %err, "deferred save failed");
        return;
    }
    tracing::info!(server = %inner.name, "config modified, relaunching");
    if let Err(err) = server.launch().await {
        tracing::error!(server = %inner.name, error = %err, "relaunch after config save failed");
    }
}

async fn expiry(inner: Arc<EnhancerInner>, duration: Duration) {
    tokio::time::sleep(duration).await;
    let Some(server) = inner.server.upgrade() else { return };
    tracing::info!(server = %inner.name, "server expired, shutting down");
    server.set_restart(false);
    if let Err(err) = server.stop(None).await {
        tracing::debug!(server = %inner.name, error = %err, "expiry stop skipped");
    }
}

struct SoccerFlags {
    no_nice: AtomicBool,
    no_brde: AtomicBool,
}

/// Soccer-aware enhancer: goal tracking plus the scoreline easter eggs.
pub struct SoccerEnhancer {
    base: Enhancer,
    flags: Arc<SoccerFlags>,
    goal_handler: HandlerId,
}

impl SoccerEnhancer {
    pub fn attach(
        server: &Arc<ServerInstance>,
        no_nice: bool,
        no_brde: bool,
    ) -> Result<Self, EnhancerError> {
        let base = Enhancer::attach(server)?;
        server.set_soccer_tracking(true);

        let flags =
            Arc::new(SoccerFlags { no_nice: AtomicBool::new(no_nice), no_brde: AtomicBool::new(no_brde) });
        let weak = Arc::downgrade(server);
        let handler_flags = flags.clone();
        let goal_handler = server.goal.add_handler(move |goal: Goal| {
            let weak = weak.clone();
            let flags = handler_flags.clone();
            async move {
                let Some(server) = weak.upgrade() else { return Ok(true) };
                // Handlers run before the score is applied; account for the
                // incoming goal to see the score the board is about to show.
                let (mut red, mut blue) = server.soccer_score();
                if goal.blue {
                    blue += 1;
                } else {
                    red += 1;
                }
                if !flags.no_nice.load(Ordering::Relaxed) && red == 6 && blue == 9 {
                    tracing::info!(server = %server.name(), "6-9, nice");
                    server.chat("nice", false).await?;
                }
                if !flags.no_brde.load(Ordering::Relaxed)
                    && ((red == 1 && blue == 7) || (red == 7 && blue == 1))
                {
                    tracing::info!(server = %server.name(), red, blue, "that scoreline");
                    server.chat("\u{1F1E7}\u{1F1F7} \u{1F1E9}\u{1F1EA}", false).await?;
                }
                Ok(true)
            }
        });

        Ok(Self { base, flags, goal_handler })
    }

    pub fn base(&self) -> &Enhancer {
        &self.base
    }

    pub fn score(&self) -> Option<(u32, u32)> {
        self.base.server().map(|server| server.soccer_score())
    }

    pub fn nice_enabled(&self) -> bool {
        !self.flags.no_nice.load(Ordering::Relaxed)
    }

    pub fn set_nice_enabled(&self, enabled: bool) {
        self.flags.no_nice.store(!enabled, Ordering::Relaxed);
    }

    pub fn set_brde_enabled(&self, enabled: bool) {
        self.flags.no_brde.store(!enabled, Ordering::Relaxed);
    }

    pub fn cleanup(&self) {
        if let Some(server) = self.base.server() {
            server.set_soccer_tracking(false);
            server.goal.remove_handler(self.goal_handler);
        }
        self.base.cleanup();
    }
}

#[cfg(test)]
#[path = "enhancer_tests.rs"]
mod tests;
