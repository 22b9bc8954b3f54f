// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered async handler chains.
//!
//! A `HandlerChain<T>` is the observer seam of the supervisor: log lines,
//! ready announcements, player joins, goals and addon installs are all
//! emitted through one. Handlers run sequentially in registration order,
//! never concurrently within a single emit, so observers see a stable
//! ordering. A cancellable chain lets any handler veto the emission;
//! handler failures are isolated and routed to an error hook.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;

/// Error raised by a chain handler.
///
/// Never propagates out of `emit`: the chain reports it to the error hook
/// and continues with the remaining handlers.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// Identity token for a registered handler.
///
/// Closures have no inherent identity, so registration hands one out; it is
/// what `remove_handler` keys on (observers keep it for cleanup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = Result<bool, HandlerError>> + Send>>;
type BoxedHandler<T> = Arc<dyn Fn(T) -> BoxedHandlerFuture + Send + Sync>;
type ErrorHook = Arc<dyn Fn(HandlerId, &HandlerError) + Send + Sync>;

/// Ordered list of async handlers with veto and error-isolation semantics.
pub struct HandlerChain<T> {
    cancellable: bool,
    handlers: Mutex<Vec<(HandlerId, BoxedHandler<T>)>>,
    next_id: AtomicU64,
    on_handler_error: Mutex<ErrorHook>,
    success: Notify,
}

impl<T: Clone + Send + 'static> HandlerChain<T> {
    /// A cancellable chain: any handler returning `false` vetoes the emit.
    pub fn new() -> Self {
        Self::with_cancellable(true)
    }

    /// A non-cancellable chain: handler verdicts are ignored and `emit`
    /// always reports acceptance.
    pub fn non_cancellable() -> Self {
        Self::with_cancellable(false)
    }

    fn with_cancellable(cancellable: bool) -> Self {
        Self {
            cancellable,
            handlers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            on_handler_error: Mutex::new(Arc::new(|id, err| {
                tracing::error!(handler = ?id, error = %err, "handler raised during emit");
            })),
            success: Notify::new(),
        }
    }

    /// Register a handler at the end of the chain.
    pub fn add_handler<F, Fut>(&self, handler: F) -> HandlerId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let boxed: BoxedHandler<T> = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers.lock().push((id, boxed));
        id
    }

    /// Remove a previously registered handler. Idempotent.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _)| *hid != id);
        handlers.len() != before
    }

    /// Replace the hook consulted when a handler returns an error.
    ///
    /// The default logs the failure and moves on to the next handler.
    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(HandlerId, &HandlerError) + Send + Sync + 'static,
    {
        *self.on_handler_error.lock() = Arc::new(hook);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Invoke all handlers in registration order and report acceptance.
    ///
    /// On a cancellable chain the first `false` verdict stops the run and no
    /// further handler is invoked. Accepted emissions wake
    /// [`wait_for_successful`](Self::wait_for_successful) waiters.
    pub async fn emit(&self, payload: &T) -> bool {
        let accepted = self.run_handlers(payload).await;
        if accepted {
            self.success.notify_waiters();
        }
        accepted
    }

    /// Invoke all handlers now, but let the caller decide the final verdict
    /// after performing the guarded side effect.
    ///
    /// The returned [`Emission`] reports the handlers' acceptance; the caller
    /// commits or rejects via [`Emission::resolve`]. Dropping the handle
    /// commits the handlers' verdict. Success waiters are only woken by a
    /// final accept.
    pub async fn emit_deferred(&self, payload: &T) -> Emission<'_, T> {
        let accepted = self.run_handlers(payload).await;
        Emission { chain: self, accepted, resolved: false }
    }

    /// Suspend until the next emission that ends up accepted.
    pub async fn wait_for_successful(&self) {
        self.success.notified().await;
    }

    async fn run_handlers(&self, payload: &T) -> bool {
        let handlers: Vec<(HandlerId, BoxedHandler<T>)> = self.handlers.lock().clone();
        for (id, handler) in handlers {
            match handler(payload.clone()).await {
                Ok(true) => {}
                Ok(false) => {
                    if self.cancellable {
                        return false;
                    }
                }
                Err(err) => {
                    let hook = self.on_handler_error.lock().clone();
                    hook(id, &err);
                }
            }
        }
        true
    }
}

impl<T: Clone + Send + 'static> Default for HandlerChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending verdict of [`HandlerChain::emit_deferred`].
pub struct Emission<'a, T> {
    chain: &'a HandlerChain<T>,
    accepted: bool,
    resolved: bool,
}

impl<T> Emission<'_, T> {
    /// Whether the handlers accepted the emission.
    pub fn accepted(&self) -> bool {
        self.accepted
    }

    /// Conclude the emission with a final verdict, overriding the handlers'.
    pub fn resolve(mut self, accepted: bool) {
        self.resolved = true;
        if accepted {
            self.chain.success.notify_waiters();
        }
    }
}

impl<T> Drop for Emission<'_, T> {
    fn drop(&mut self) {
        if !self.resolved && self.accepted {
            self.chain.success.notify_waiters();
        }
    }
}

#[cfg(test)]
#[path = "chain_tests.rs"]
mod tests;
