// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hard-coded recognition rules for game-relevant log lines.
//!
//! Each rule is keyed on the header's object name (and, where the server is
//! consistent about it, the level) and full-matches the message. The
//! instance applies these after suppression and feeds the result to its
//! typed handler chains.

use regex::Regex;
use std::sync::LazyLock;
use stkw_core::{LogEvent, LogLevel};

#[allow(clippy::expect_used)]
static READY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Server (\d+) is now online.$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static PEER_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-f0-9.:]+ has just (?:dis)?connected. There are now (\d+) peers.$")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static PLAYER_JOIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^New player (?P<username>\S+) with online id (?P<online_id>\d+) from (?P<ipv4_addr>[\d.]+)?(?P<ipv6_addr>[0-9a-fA-F:]+)?(?::(?P<port>\d+))? with (?P<version>.*)\..*$",
    )
    .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static PLAYER_VALIDATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<username>\S+) validated$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static PLAYER_LEAVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<username>\S+) disconnected$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static GAME_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Max ping from peers: \d+, jitter tolerance: \d+$")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static GAME_END: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^A \d+GameProtocol protocol has been terminated.$")
        .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static MODE_DIFFICULTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^Updating server info with new difficulty: (?P<difficulty>\d+), game mode: (?P<mode>\d+) to stk-addons\.$",
    )
    .expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static GOAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(own_)?goal (\S*) (red|blue)\.?$").expect("constant regex pattern is valid")
});

const GAME_STOPPED: &str = "The game is stopped.";
const GAME_RESUMED: &str = "The game is resumed.";

/// A new peer announced by the lobby.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerJoin {
    pub username: String,
    pub online_id: u64,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub version: String,
}

/// A scored goal (soccer servers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goal {
    pub scorer: String,
    pub blue: bool,
    pub own: bool,
}

/// Recognized game event, extracted from one structured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extract {
    /// The server finished startup and accepts connections.
    Ready { port: u32 },
    /// Peer count after a connect/disconnect.
    PeerCount(u32),
    PlayerJoin(PlayerJoin),
    PlayerValidated { username: String },
    PlayerLeave { username: String },
    GameStart,
    GameEnd,
    GameStop,
    GameResume,
    ModeDifficulty { mode: u32, difficulty: u32 },
    Goal(Goal),
}

/// Match one structured line against the rule table.
pub fn extract(event: &LogEvent) -> Option<Extract> {
    match (event.object.as_str(), event.level) {
        ("ServerLobby", LogLevel::Info) => extract_lobby(&event.message),
        ("STKHost", level) => extract_host(&event.message, level),
        ("ProtocolManager", LogLevel::Info) => {
            GAME_END.is_match(&event.message).then_some(Extract::GameEnd)
        }
        ("GoalLog", LogLevel::Info) => extract_goal(&event.message),
        _ => None,
    }
}

fn extract_lobby(message: &str) -> Option<Extract> {
    if let Some(captures) = READY.captures(message) {
        return Some(Extract::Ready { port: captures.get(1)?.as_str().parse().ok()? });
    }
    if let Some(captures) = MODE_DIFFICULTY.captures(message) {
        return Some(Extract::ModeDifficulty {
            mode: captures.name("mode")?.as_str().parse().ok()?,
            difficulty: captures.name("difficulty")?.as_str().parse().ok()?,
        });
    }
    if GAME_START.is_match(message) {
        return Some(Extract::GameStart);
    }
    match message {
        GAME_STOPPED => Some(Extract::GameStop),
        GAME_RESUMED => Some(Extract::GameResume),
        _ => None,
    }
}

fn extract_host(message: &str, level: LogLevel) -> Option<Extract> {
    // The peer-count announcement is INFO; the player lines vary by build.
    if level == LogLevel::Info {
        if let Some(captures) = PEER_COUNT.captures(message) {
            return Some(Extract::PeerCount(captures.get(1)?.as_str().parse().ok()?));
        }
    }
    if let Some(captures) = PLAYER_JOIN.captures(message) {
        let address = captures
            .name("ipv4_addr")
            .or_else(|| captures.name("ipv6_addr"))
            .map(|m| m.as_str().to_string());
        return Some(Extract::PlayerJoin(PlayerJoin {
            username: captures.name("username")?.as_str().to_string(),
            online_id: captures.name("online_id")?.as_str().parse().ok()?,
            address,
            port: captures.name("port").and_then(|m| m.as_str().parse().ok()),
            version: captures.name("version")?.as_str().to_string(),
        }));
    }
    if let Some(captures) = PLAYER_VALIDATED.captures(message) {
        return Some(Extract::PlayerValidated {
            username: captures.name("username")?.as_str().to_string(),
        });
    }
    if let Some(captures) = PLAYER_LEAVE.captures(message) {
        return Some(Extract::PlayerLeave {
            username: captures.name("username")?.as_str().to_string(),
        });
    }
    None
}

fn extract_goal(message: &str) -> Option<Extract> {
    let captures = GOAL.captures(message)?;
    Some(Extract::Goal(Goal {
        scorer: captures.get(2)?.as_str().to_string(),
        blue: captures.get(3)?.as_str() == "blue",
        own: captures.get(1).is_some(),
    }))
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
