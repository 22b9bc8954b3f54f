// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named background-task registry.
//!
//! Every long-lived task the supervisor spawns outside an instance's own
//! lifecycle (autoupdate loop, expiry timers, deferred saves) is registered
//! here under a unique name, so leaks are visible and cleanup can cancel
//! everything in one sweep. Spawning under an already-live name is refused;
//! that is how singletons like the autoupdate loop are enforced.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` under `name`. Returns `false` (without spawning) when
    /// a task with that name is still running.
    pub fn spawn<F>(&self, name: &str, future: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(name) {
            return false;
        }
        tasks.insert(name.to_string(), tokio::spawn(future));
        true
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.lock().get(name).is_some_and(|handle| !handle.is_finished())
    }

    /// Abort the named task. Returns whether a live task was cancelled.
    pub fn cancel(&self, name: &str) -> bool {
        match self.tasks.lock().remove(name) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Abort every registered task.
    pub fn cancel_all(&self) {
        for (_, handle) in self.tasks.lock().drain() {
            handle.abort();
        }
    }

    /// Names of tasks that are still running.
    pub fn running(&self) -> Vec<String> {
        self.tasks
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
