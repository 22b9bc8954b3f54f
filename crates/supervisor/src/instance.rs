// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One supervised server instance.
//!
//! Lifecycle: `stopped → starting` on [`ServerInstance::launch`];
//! `starting → running` when the lobby reports itself online (the ready
//! event); `starting → stopped` when the ready wait times out (kill);
//! `running → stopping` on [`ServerInstance::stop`] (orderly `quit`, kill on
//! timeout); `stopping → stopped` on process exit; and `stopped → starting`
//! again when the autorestart rule applies.
//!
//! The fleet start/stop mutex is held from `launch()` until the instance is
//! ready (or the ready wait gives up) and for the whole of `stop()` — the
//! supervised binary has a known race on concurrent startup.

use crate::events::{self, Extract, Goal, PlayerJoin};
use crate::parser::{self, Parsed};
use crate::process::{ProcessDriver, SpawnError, SpawnSpec};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use stkw_core::{
    Flag, HandlerChain, InstanceSettings, LogEvent, LogIgnoreTable, LogLevel, RestartCondition,
};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// Command that asks the server for an orderly shutdown.
pub const STOP_COMMAND: &str = "quit";

/// Stop deadline used by the restart machinery (timed and broadcast).
const RESTART_STOP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("the server is already running")]
    AlreadyRunning,

    #[error("the server is not running")]
    NotRunning,

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("failed to write to server stdin: {0}")]
    Stdin(#[from] std::io::Error),
}

/// Derived game state maintained by the extraction rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameState {
    pub players: BTreeSet<String>,
    pub valid_players: BTreeSet<String>,
    pub game_running: bool,
    pub game_stopped: bool,
    pub gamemode: u32,
    pub difficulty: u32,
    pub score_red: u32,
    pub score_blue: u32,
}

#[derive(Default)]
struct RuntimeState {
    driver: Option<Arc<ProcessDriver>>,
    active: bool,
    /// Restart intent: consulted together with `autorestart` on exit.
    restart: bool,
    show_plain: bool,
    show_stderr: bool,
    soccer_tracking: bool,
    game: GameState,
}

#[derive(Default)]
struct Tasks {
    reader: Option<JoinHandle<()>>,
    stderr_reader: Option<JoinHandle<()>>,
    ready_wait: Option<JoinHandle<()>>,
    timed_restarter: Option<JoinHandle<()>>,
    cond_restarter: Option<JoinHandle<()>>,
}

/// Which path initiated a stop; the initiating task must not abort itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopSource {
    Operator,
    Timer,
    Restarter,
}

pub struct ServerInstance {
    name: String,
    settings: Mutex<InstanceSettings>,
    state: Mutex<RuntimeState>,
    tasks: Mutex<Tasks>,
    empty_server: Flag,
    start_stop: Arc<AsyncMutex<()>>,
    restart_cond: Arc<RestartCondition>,
    global_ignores: Arc<RwLock<LogIgnoreTable>>,
    ignores: RwLock<LogIgnoreTable>,

    /// Every structured, non-suppressed line. Cancellable: a veto drops the
    /// line before extraction and console relay.
    pub log_event: HandlerChain<LogEvent>,
    /// The lobby announced it is online; payload is the reported port.
    pub ready_event: HandlerChain<u32>,
    /// Cancellable: a veto kicks the joining player.
    pub player_join: HandlerChain<PlayerJoin>,
    pub player_leave: HandlerChain<String>,
    pub game_start: HandlerChain<()>,
    pub game_end: HandlerChain<()>,
    pub game_stop: HandlerChain<()>,
    pub game_resume: HandlerChain<()>,
    /// Cancellable: a veto discards the goal (no score change).
    pub goal: HandlerChain<Goal>,
}

impl fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerInstance").field("name", &self.name).finish_non_exhaustive()
    }
}

impl ServerInstance {
    pub fn new(
        name: impl Into<String>,
        settings: InstanceSettings,
        ignores: LogIgnoreTable,
        global_ignores: Arc<RwLock<LogIgnoreTable>>,
        start_stop: Arc<AsyncMutex<()>>,
        restart_cond: Arc<RestartCondition>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            settings: Mutex::new(settings),
            state: Mutex::new(RuntimeState::default()),
            tasks: Mutex::new(Tasks::default()),
            empty_server: Flag::new(true),
            start_stop,
            restart_cond,
            global_ignores,
            ignores: RwLock::new(ignores),
            log_event: HandlerChain::new(),
            ready_event: HandlerChain::non_cancellable(),
            player_join: HandlerChain::new(),
            player_leave: HandlerChain::non_cancellable(),
            game_start: HandlerChain::non_cancellable(),
            game_end: HandlerChain::non_cancellable(),
            game_stop: HandlerChain::non_cancellable(),
            game_resume: HandlerChain::non_cancellable(),
            goal: HandlerChain::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn pid(&self) -> Option<u32> {
        self.state.lock().driver.as_ref().and_then(|driver| driver.pid())
    }

    /// Level-triggered: set while the last observed peer count was zero or
    /// the server is not active.
    pub fn empty_server(&self) -> &Flag {
        &self.empty_server
    }

    pub fn settings(&self) -> InstanceSettings {
        self.settings.lock().clone()
    }

    pub fn update_settings(&self, update: impl FnOnce(&mut InstanceSettings)) {
        update(&mut self.settings.lock());
    }

    pub fn game_state(&self) -> GameState {
        self.state.lock().game.clone()
    }

    pub fn soccer_score(&self) -> (u32, u32) {
        let state = self.state.lock();
        (state.game.score_red, state.game.score_blue)
    }

    pub fn set_restart(&self, restart: bool) {
        self.state.lock().restart = restart;
    }

    pub fn set_show_plain(&self, show: bool) {
        self.state.lock().show_plain = show;
    }

    pub fn set_show_stderr(&self, show: bool) {
        self.state.lock().show_stderr = show;
    }

    pub fn set_soccer_tracking(&self, enabled: bool) {
        self.state.lock().soccer_tracking = enabled;
    }

    /// Seed the last-known mode/difficulty (read from the server config by
    /// an enhancer before the first announcement arrives).
    pub fn seed_mode_difficulty(&self, mode: u32, difficulty: u32) {
        let mut state = self.state.lock();
        state.game.gamemode = mode;
        state.game.difficulty = difficulty;
    }

    /// Access the per-instance suppression table.
    pub fn with_ignores<R>(&self, access: impl FnOnce(&mut LogIgnoreTable) -> R) -> R {
        access(&mut self.ignores.write())
    }

    pub fn ignores_snapshot(&self) -> LogIgnoreTable {
        self.ignores.read().clone()
    }

    /// Check spawn preconditions without launching.
    pub fn validate(settings: &InstanceSettings) -> Result<(), SpawnError> {
        if !settings.executable_path.is_file() {
            return Err(SpawnError::MissingExecutable(settings.executable_path.clone()));
        }
        if !settings.cwd.is_dir() {
            return Err(SpawnError::MissingWorkdir(settings.cwd.clone()));
        }
        if !settings.datapath.is_dir() {
            return Err(SpawnError::MissingData(settings.datapath.clone()));
        }
        Ok(())
    }

    fn spawn_spec(settings: &InstanceSettings) -> SpawnSpec {
        let mut args = vec![format!("--server-config={}", settings.cfgpath.display())];
        args.extend(settings.extra_args.iter().cloned());
        args.push("--network-console".to_string());

        let mut env: Vec<(String, String)> =
            settings.extra_env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        env.push((
            "SUPERTUXKART_DATADIR".to_string(),
            settings.datapath.display().to_string(),
        ));

        SpawnSpec {
            executable: settings.executable_path.clone(),
            args,
            env,
            cwd: settings.cwd.clone(),
        }
    }

    /// Spawn the server process and its attendant tasks.
    ///
    /// Takes the fleet start/stop mutex; the guard travels into the
    /// ready-wait task and is released once the server is ready or the
    /// ready wait gives up.
    pub fn launch(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), InstanceError>> + Send + '_>>
    {
        Box::pin(async move {
            if self.is_active() {
                return Err(InstanceError::AlreadyRunning);
            }
            let (spec, settings) = {
                let settings = self.settings.lock();
                Self::validate(&settings)?;
                (Self::spawn_spec(&settings), settings.clone())
            };

            let guard = self.start_stop.clone().lock_owned().await;
            let driver = match ProcessDriver::spawn(&spec) {
                Ok(driver) => Arc::new(driver),
                Err(err) => {
                    drop(guard);
                    return Err(err.into());
                }
            };
            tracing::info!(server = %self.name, pid = driver.pid(), "server process launched");

            {
                let mut state = self.state.lock();
                state.driver = Some(driver.clone());
                state.active = true;
                state.restart = settings.autorestart;
                state.game = GameState::default();
            }

            let mut tasks = self.tasks.lock();
            tasks.ready_wait = Some(tokio::spawn(Self::ready_wait(
                self.clone(),
                driver.clone(),
                guard,
                settings.startup_timeout,
            )));
            tasks.reader = Some(tokio::spawn(Self::reader(self.clone(), driver.clone())));
            tasks.stderr_reader =
                Some(tokio::spawn(Self::stderr_reader(self.clone(), driver.clone())));
            if settings.timed_autorestart {
                if let Some(interval) = settings.timed_autorestart_interval {
                    tasks.timed_restarter =
                        Some(tokio::spawn(Self::timed_restarter(self.clone(), interval)));
                }
            }
            tasks.cond_restarter = Some(tokio::spawn(Self::cond_restarter(self.clone())));
            Ok(())
        })
    }

    /// Re-arm the timed restarter with a new interval.
    pub fn arm_timed_restart(self: &Arc<Self>, interval: Duration) {
        {
            let mut settings = self.settings.lock();
            settings.timed_autorestart = true;
            settings.timed_autorestart_interval = Some(interval);
        }
        let mut tasks = self.tasks.lock();
        if let Some(handle) = tasks.timed_restarter.take() {
            handle.abort();
        }
        if self.is_active() {
            tasks.timed_restarter =
                Some(tokio::spawn(Self::timed_restarter(self.clone(), interval)));
        }
    }

    /// Cancel a pending timed restart without touching the setting.
    pub fn disarm_timed_restart(&self) {
        if let Some(handle) = self.tasks.lock().timed_restarter.take() {
            handle.abort();
        }
    }

    /// Orderly shutdown: write `quit`, await exit within the deadline, kill
    /// on overrun. `timeout` of `None` falls back to the configured
    /// shutdown timeout; a zero timeout kills immediately.
    ///
    /// Returns `true` for a clean exit, `false` when the process had to be
    /// killed. Whether the instance comes back is decided by the restart
    /// intent together with `autorestart` (see [`Self::set_restart`]).
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<bool, InstanceError> {
        self.stop_inner(timeout, StopSource::Operator).await
    }

    async fn stop_inner(
        &self,
        timeout_override: Option<Duration>,
        source: StopSource,
    ) -> Result<bool, InstanceError> {
        let _guard = self.start_stop.clone().lock_owned().await;
        let driver = {
            let state = self.state.lock();
            if !state.active {
                return Err(InstanceError::NotRunning);
            }
            state.driver.clone().ok_or(InstanceError::NotRunning)?
        };
        {
            let mut tasks = self.tasks.lock();
            if source != StopSource::Restarter {
                if let Some(handle) = tasks.cond_restarter.take() {
                    handle.abort();
                }
            }
            if source != StopSource::Timer {
                if let Some(handle) = tasks.timed_restarter.take() {
                    handle.abort();
                }
            }
        }

        let timeout = timeout_override.or_else(|| self.settings.lock().shutdown_timeout);
        if timeout == Some(Duration::ZERO) {
            tracing::warn!(server = %self.name, "forcefully shutting down");
            driver.kill();
            driver.wait().await;
            self.clear_runtime();
            return Ok(false);
        }

        if let Err(err) = driver.write_line(STOP_COMMAND).await {
            // Most likely the process is already on its way out.
            tracing::debug!(server = %self.name, error = %err, "quit command not delivered");
        }
        let clean = match timeout {
            None => {
                driver.wait().await;
                true
            }
            Some(limit) => match tokio::time::timeout(limit, driver.wait()).await {
                Ok(_) => true,
                Err(_) => {
                    tracing::warn!(server = %self.name, "shutdown timed out, killing");
                    driver.kill();
                    driver.wait().await;
                    false
                }
            },
        };
        self.clear_runtime();
        Ok(clean)
    }

    fn clear_runtime(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.driver = None;
        drop(state);
        self.empty_server.set();
    }

    /// Write a raw command line to the server's stdin.
    pub async fn stuff(&self, line: &str) -> Result<(), InstanceError> {
        let driver = self.driver()?;
        driver.write_line(line).await.map_err(InstanceError::Stdin)
    }

    /// Send a chat message. A leading `/` is disarmed with a space unless
    /// `allow_cmd` is set, so chat text cannot trigger lobby commands.
    pub async fn chat(&self, message: &str, allow_cmd: bool) -> Result<(), InstanceError> {
        let guard = if message.starts_with('/') && !allow_cmd { " " } else { "" };
        self.stuff(&format!("chat {guard}{message}")).await
    }

    pub async fn kick(&self, username: &str) -> Result<(), InstanceError> {
        self.chat(&format!("/kick {username}"), true).await
    }

    fn driver(&self) -> Result<Arc<ProcessDriver>, InstanceError> {
        self.state.lock().driver.clone().ok_or(InstanceError::NotRunning)
    }

    /// Abort every task this instance spawned. Used on fleet teardown.
    pub fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock();
        for handle in [
            tasks.reader.take(),
            tasks.stderr_reader.take(),
            tasks.ready_wait.take(),
            tasks.timed_restarter.take(),
            tasks.cond_restarter.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    async fn ready_wait(
        this: Arc<Self>,
        driver: Arc<ProcessDriver>,
        guard: OwnedMutexGuard<()>,
        startup_timeout: Option<Duration>,
    ) {
        let ready = this.ready_event.wait_for_successful();
        match startup_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, ready).await.is_err() {
                    tracing::warn!(
                        server = %this.name,
                        timeout_secs = limit.as_secs_f64(),
                        "server not ready in time, killing"
                    );
                    driver.kill();
                }
            }
            None => ready.await,
        }
        drop(guard);
    }

    async fn reader(this: Arc<Self>, driver: Arc<ProcessDriver>) {
        loop {
            match driver.read_stdout_line().await {
                Ok(Some(line)) => {
                    let line = parser::strip_ansi(&line);
                    this.handle_stdout(&line).await;
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(server = %this.name, error = %err, "stdout read failed");
                    break;
                }
            }
        }
        let code = driver.wait().await;
        if code == 0 {
            tracing::info!(server = %this.name, "server exited");
        } else {
            tracing::error!(server = %this.name, code, "server exited with failure");
        }

        {
            let mut tasks = this.tasks.lock();
            // Aborting a still-pending ready wait releases the fleet mutex.
            for handle in
                [tasks.ready_wait.take(), tasks.timed_restarter.take(), tasks.cond_restarter.take()]
                    .into_iter()
                    .flatten()
            {
                handle.abort();
            }
        }
        this.clear_runtime();

        let (restart, pause) = {
            let state = this.state.lock();
            let settings = this.settings.lock();
            (settings.autorestart && state.restart, settings.autorestart_pause)
        };
        if restart {
            if code != 0 {
                tracing::info!(
                    server = %this.name,
                    pause_secs = pause.as_secs_f64(),
                    "non-zero exit, delaying restart"
                );
                tokio::time::sleep(pause).await;
            }
            // launch() already returns a boxed future, so the relaunch
            // future cannot be inlined into the reader's own state.
            if let Err(err) = this.launch().await {
                tracing::error!(server = %this.name, error = %err, "automatic restart failed");
            }
        }
    }

    async fn stderr_reader(this: Arc<Self>, driver: Arc<ProcessDriver>) {
        loop {
            match driver.read_stderr_line().await {
                Ok(Some(line)) => {
                    if this.state.lock().show_stderr {
                        tracing::error!(server = %this.name, "stderr: {}", line);
                    }
                }
                _ => break,
            }
        }
    }

    async fn timed_restarter(this: Arc<Self>, interval: Duration) {
        tracing::info!(
            server = %this.name,
            interval_secs = interval.as_secs_f64(),
            "timed autorestarter armed"
        );
        tokio::time::sleep(interval).await;
        tracing::info!(server = %this.name, "timed autorestarter triggering restart");
        if let Err(err) = this.stop_inner(Some(RESTART_STOP_TIMEOUT), StopSource::Timer).await {
            tracing::debug!(server = %this.name, error = %err, "timed restart skipped");
        }
    }

    async fn cond_restarter(this: Arc<Self>) {
        loop {
            this.restart_cond.wait().await;
            if !this.is_active() {
                break;
            }
            tracing::debug!(server = %this.name, "restart broadcast received, awaiting empty server");
            this.empty_server.wait_set().await;
            tracing::info!(server = %this.name, "restart broadcast honored");
            if let Err(err) =
                this.stop_inner(Some(RESTART_STOP_TIMEOUT), StopSource::Restarter).await
            {
                tracing::debug!(server = %this.name, error = %err, "broadcast restart skipped");
            }
            // The exit path respawns this task if the server relaunches.
            break;
        }
    }

    pub(crate) async fn handle_stdout(&self, line: &str) {
        match parser::parse_line(line) {
            Parsed::Dropped => {}
            Parsed::Plain(text) => {
                if self.state.lock().show_plain {
                    tracing::info!(server = %self.name, "{}", text);
                }
            }
            Parsed::Structured(event) => self.handle_event(event).await,
        }
    }

    async fn handle_event(&self, event: LogEvent) {
        // Suppression first: an ignored line reaches no handler at all.
        if self.global_ignores.read().is_ignored(&event.object, event.level, &event.message) {
            return;
        }
        if self.ignores.read().is_ignored(&event.object, event.level, &event.message) {
            return;
        }
        if !self.log_event.emit(&event).await {
            return;
        }
        if let Some(extracted) = events::extract(&event) {
            self.apply_extract(extracted).await;
        }
        self.relay(&event);
    }

    async fn apply_extract(&self, extracted: Extract) {
        match extracted {
            Extract::Ready { port } => {
                self.ready_event.emit(&port).await;
            }
            Extract::PeerCount(count) => {
                if count == 0 {
                    self.empty_server.set();
                } else {
                    self.empty_server.clear();
                }
            }
            Extract::PlayerJoin(join) => self.on_player_join(join).await,
            Extract::PlayerValidated { username } => {
                let mut state = self.state.lock();
                // A kicked or vetoed peer may still get a validation line;
                // the validated set stays a subset of the player set.
                if state.game.players.contains(&username) {
                    state.game.valid_players.insert(username);
                }
            }
            Extract::PlayerLeave { username } => self.on_player_leave(username).await,
            Extract::GameStart => {
                let fresh = !self.state.lock().game.game_running;
                if fresh {
                    self.game_start.emit(&()).await;
                    let mut state = self.state.lock();
                    state.game.game_running = true;
                    state.game.game_stopped = false;
                    if state.soccer_tracking {
                        state.game.score_red = 0;
                        state.game.score_blue = 0;
                    }
                }
            }
            Extract::GameEnd => {
                self.game_end.emit(&()).await;
                let mut state = self.state.lock();
                state.game.game_running = false;
                state.game.game_stopped = false;
            }
            Extract::GameStop => {
                self.game_stop.emit(&()).await;
                self.state.lock().game.game_stopped = true;
            }
            Extract::GameResume => {
                self.game_resume.emit(&()).await;
                self.state.lock().game.game_stopped = false;
            }
            Extract::ModeDifficulty { mode, difficulty } => {
                let mut state = self.state.lock();
                state.game.gamemode = mode;
                state.game.difficulty = difficulty;
            }
            Extract::Goal(goal) => {
                let tracking = {
                    let state = self.state.lock();
                    state.soccer_tracking && !state.game.game_stopped
                };
                if tracking && self.goal.emit(&goal).await {
                    let mut state = self.state.lock();
                    if goal.blue {
                        state.game.score_blue += 1;
                    } else {
                        state.game.score_red += 1;
                    }
                }
            }
        }
    }

    async fn on_player_join(&self, join: PlayerJoin) {
        if self.state.lock().game.players.contains(&join.username) {
            return;
        }
        if self.player_join.emit(&join).await {
            self.state.lock().game.players.insert(join.username);
        } else if let Err(err) = self.kick(&join.username).await {
            tracing::error!(
                server = %self.name,
                player = %join.username,
                error = %err,
                "could not kick rejected player"
            );
        }
    }

    async fn on_player_leave(&self, username: String) {
        if !self.state.lock().game.players.contains(&username) {
            return;
        }
        if self.player_leave.emit(&username).await {
            let mut state = self.state.lock();
            state.game.players.remove(&username);
            state.game.valid_players.remove(&username);
        }
    }

    /// Relay a surviving line into the supervisor's own log.
    fn relay(&self, event: &LogEvent) {
        match event.level {
            LogLevel::Debug => {
                tracing::debug!(server = %self.name, object = %event.object, "{}", event.message);
            }
            LogLevel::Info => {
                tracing::info!(server = %self.name, object = %event.object, "{}", event.message);
            }
            LogLevel::Warning => {
                tracing::warn!(server = %self.name, object = %event.object, "{}", event.message);
            }
            LogLevel::Error | LogLevel::Fatal => {
                tracing::error!(server = %self.name, object = %event.object, "{}", event.message);
            }
        }
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        let mut tasks = self.tasks.lock();
        for handle in [
            tasks.reader.take(),
            tasks.stderr_reader.take(),
            tasks.ready_wait.take(),
            tasks.timed_restarter.take(),
            tasks.cond_restarter.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
