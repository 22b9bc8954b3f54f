// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for handler chain ordering, veto, and error isolation.

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

fn order_log() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test]
async fn handlers_run_in_registration_order() {
    let chain: HandlerChain<u32> = HandlerChain::new();
    let log = order_log();

    let l1 = log.clone();
    chain.add_handler(move |_| {
        let l1 = l1.clone();
        async move {
            l1.lock().push("first");
            Ok(true)
        }
    });
    let l2 = log.clone();
    chain.add_handler(move |_| {
        let l2 = l2.clone();
        async move {
            l2.lock().push("second");
            Ok(true)
        }
    });

    assert!(chain.emit(&1).await);
    assert_eq!(*log.lock(), vec!["first", "second"]);
}

#[tokio::test]
async fn cancellable_veto_stops_remaining_handlers() {
    let chain: HandlerChain<u32> = HandlerChain::new();
    let later = Arc::new(AtomicUsize::new(0));

    chain.add_handler(|_| async { Ok(false) });
    let later2 = later.clone();
    chain.add_handler(move |_| {
        let later2 = later2.clone();
        async move {
            later2.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(true)
        }
    });

    assert!(!chain.emit(&1).await);
    assert_eq!(later.load(AtomicOrdering::SeqCst), 0, "vetoed emit must not reach later handlers");
}

#[tokio::test]
async fn non_cancellable_ignores_false_verdicts() {
    let chain: HandlerChain<u32> = HandlerChain::non_cancellable();
    let seen = Arc::new(AtomicUsize::new(0));

    chain.add_handler(|_| async { Ok(false) });
    let seen2 = seen.clone();
    chain.add_handler(move |_| {
        let seen2 = seen2.clone();
        async move {
            seen2.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(true)
        }
    });

    assert!(chain.emit(&1).await);
    assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
}

#[tokio::test]
async fn handler_error_is_isolated() {
    let chain: HandlerChain<u32> = HandlerChain::new();
    let errors = Arc::new(AtomicUsize::new(0));
    let survivors = Arc::new(AtomicUsize::new(0));

    let errs = errors.clone();
    chain.set_error_hook(move |_, _| {
        errs.fetch_add(1, AtomicOrdering::SeqCst);
    });
    chain.add_handler(|_| async { Err(HandlerError::new("boom")) });
    let s = survivors.clone();
    chain.add_handler(move |_| {
        let s = s.clone();
        async move {
            s.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(true)
        }
    });

    assert!(chain.emit(&1).await, "a raising handler must not veto the emit");
    assert_eq!(errors.load(AtomicOrdering::SeqCst), 1);
    assert_eq!(survivors.load(AtomicOrdering::SeqCst), 1);
}

#[tokio::test]
async fn remove_handler_is_idempotent() {
    let chain: HandlerChain<u32> = HandlerChain::new();
    let id = chain.add_handler(|_| async { Ok(true) });
    assert_eq!(chain.handler_count(), 1);
    assert!(chain.remove_handler(id));
    assert!(!chain.remove_handler(id));
    assert_eq!(chain.handler_count(), 0);
}

#[tokio::test]
async fn wait_for_successful_wakes_on_accepted_emit() {
    let chain: Arc<HandlerChain<u32>> = Arc::new(HandlerChain::new());
    let waiter = {
        let chain = chain.clone();
        tokio::spawn(async move {
            chain.wait_for_successful().await;
        })
    };
    // Give the waiter a chance to register interest.
    tokio::time::sleep(Duration::from_millis(20)).await;

    chain.emit(&7).await;
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should wake after an accepted emit")
        .unwrap();
}

#[tokio::test]
async fn wait_for_successful_ignores_vetoed_emit() {
    let chain: Arc<HandlerChain<u32>> = Arc::new(HandlerChain::new());
    chain.add_handler(|_| async { Ok(false) });
    let waiter = {
        let chain = chain.clone();
        tokio::spawn(async move {
            chain.wait_for_successful().await;
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    chain.emit(&7).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "vetoed emit must not wake waiters");
    waiter.abort();
}

#[tokio::test]
async fn deferred_emission_reports_handler_verdict() {
    let chain: HandlerChain<u32> = HandlerChain::new();
    chain.add_handler(|_| async { Ok(false) });
    let emission = chain.emit_deferred(&1).await;
    assert!(!emission.accepted());
    emission.resolve(false);
}

#[tokio::test]
async fn deferred_rejection_suppresses_success() {
    let chain: Arc<HandlerChain<u32>> = Arc::new(HandlerChain::new());
    let waiter = {
        let chain = chain.clone();
        tokio::spawn(async move {
            chain.wait_for_successful().await;
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let emission = chain.emit_deferred(&1).await;
    assert!(emission.accepted());
    emission.resolve(false);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished(), "rejected deferred emit must not wake waiters");
    waiter.abort();
}

#[tokio::test]
async fn deferred_drop_commits_handler_verdict() {
    let chain: Arc<HandlerChain<u32>> = Arc::new(HandlerChain::new());
    let waiter = {
        let chain = chain.clone();
        tokio::spawn(async move {
            chain.wait_for_successful().await;
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    {
        let _emission = chain.emit_deferred(&1).await;
    }
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("dropped accepted emission should commit")
        .unwrap();
}
