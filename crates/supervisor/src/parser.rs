// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-to-event extraction for the server's stdout.
//!
//! Lines come in two shapes. A structured line carries a header, optionally
//! preceded by a timestamp:
//!
//! ```text
//! Mon Jan  3 10:01:02 2022 [info   ] ServerLobby: Server 2759 is now online.
//! ```
//!
//! Everything else is plain output (the network console echoes commands
//! here) and is only surfaced when the instance asks for it.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use stkw_core::{LogEvent, LogLevel};

/// The probe command the wrapper may write to keep the console alive; its
/// echo is dropped before any other handling.
pub const IDLE_COMMAND: &str = "\x01";

#[allow(clippy::expect_used)]
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\x9B|\x1B\[)[0-?]*[ -/]*[@-~]").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static LOG_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\w+ +\w+ +\d+ +\d+:\d+:\d+ +\d+ )?\[(\w+) *\] +([^:]+)?: (.*)$")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static IDLE_ECHO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new("^Unknown command: \x01$").expect("constant regex pattern is valid")
});

/// Outcome of parsing one (already ANSI-stripped) line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Structured(LogEvent),
    Plain(String),
    /// Idle-probe echo; never surfaced.
    Dropped,
}

/// Remove terminal escape sequences the server colors its output with.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

pub fn parse_line(line: &str) -> Parsed {
    if IDLE_ECHO.is_match(line) {
        return Parsed::Dropped;
    }
    let Some(captures) = LOG_HEADER.captures(line) else {
        return Parsed::Plain(line.to_string());
    };
    let level_name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let object = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
    let message = captures.get(3).map(|m| m.as_str()).unwrap_or_default();
    Parsed::Structured(LogEvent {
        level: LogLevel::from_name_or_debug(level_name),
        level_name: level_name.to_string(),
        object: object.to_string(),
        message: message.to_string(),
    })
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
