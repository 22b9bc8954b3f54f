// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Level-triggered flag.
//!
//! Unlike a notification, a `Flag` carries state: waiters of `wait_set`
//! return immediately while the flag is set. The supervisor uses one per
//! instance for the empty-server signal.

use tokio::sync::watch;

#[derive(Debug)]
pub struct Flag {
    tx: watch::Sender<bool>,
}

impl Flag {
    pub fn new(initial: bool) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self) {
        self.tx.send_replace(true);
    }

    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the flag is set; returns immediately if it already is.
    pub async fn wait_set(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so wait_for cannot fail here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Flag {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Broadcast-only restart condition.
///
/// Carries no state: a broadcast wakes every task currently waiting, and
/// each waiter re-checks its own empty-server flag before acting.
#[derive(Debug, Default)]
pub struct RestartCondition {
    notify: tokio::sync::Notify,
}

impl RestartCondition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every current waiter.
    pub fn broadcast(&self) {
        self.notify.notify_waiters();
    }

    /// Suspend until the next broadcast.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
#[path = "flag_tests.rs"]
mod tests;
