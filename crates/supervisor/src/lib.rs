// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! stkw-supervisor: process supervision and event extraction for a fleet of
//! SuperTuxKart server instances.
//!
//! The flow, bottom up: a [`process::ProcessDriver`] owns one child process
//! and its pipes; [`parser`] turns its stdout into structured log events;
//! [`events`] recognizes the game-specific lines; a
//! [`instance::ServerInstance`] drives the lifecycle state machine and emits
//! typed handler chains; a [`fleet::SupervisorFleet`] holds the named
//! instances and everything fleet-wide; [`enhancer`] attaches per-instance
//! observers on top.

pub mod enhancer;
pub mod events;
pub mod fleet;
pub mod instance;
pub mod parser;
pub mod process;
pub mod servercfg;

pub use enhancer::{Enhancer, EnhancerError, SoccerEnhancer};
pub use events::{Extract, Goal, PlayerJoin};
pub use fleet::{FleetError, SupervisorFleet};
pub use instance::{GameState, InstanceError, ServerInstance};
pub use process::{ProcessDriver, SpawnError, SpawnSpec};
pub use servercfg::{ServerConfigDoc, XmlError};
