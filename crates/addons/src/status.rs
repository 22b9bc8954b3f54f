// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Addon status bits and the install-requirements predicate.

use bitflags::bitflags;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

bitflags! {
    /// Status bits an addon carries in the catalog.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AddonStatus: u32 {
        const APPROVED  = 0x0001;
        const ALPHA     = 0x0002;
        const BETA      = 0x0004;
        const RC        = 0x0008;
        const INVISIBLE = 0x0010;
        const HQ        = 0x0020;
        const DFSG      = 0x0040;
        const FEATURED  = 0x0080;
        const LATEST    = 0x0100;
        const BAD_DIM   = 0x0200;
    }
}

impl AddonStatus {
    /// Bits from the catalog's decimal attribute; unknown bits are dropped.
    pub fn from_raw(value: u32) -> Self {
        Self::from_bits_truncate(value)
    }

    pub fn from_status_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "APPROVED" => Some(Self::APPROVED),
            "ALPHA" => Some(Self::ALPHA),
            "BETA" => Some(Self::BETA),
            "RC" => Some(Self::RC),
            "INVISIBLE" => Some(Self::INVISIBLE),
            "HQ" => Some(Self::HQ),
            "DFSG" => Some(Self::DFSG),
            "FEATURED" => Some(Self::FEATURED),
            "LATEST" => Some(Self::LATEST),
            "BAD_DIM" => Some(Self::BAD_DIM),
            _ => None,
        }
    }

    fn names(self) -> Vec<&'static str> {
        const TABLE: [(AddonStatus, &str); 10] = [
            (AddonStatus::APPROVED, "APPROVED"),
            (AddonStatus::ALPHA, "ALPHA"),
            (AddonStatus::BETA, "BETA"),
            (AddonStatus::RC, "RC"),
            (AddonStatus::INVISIBLE, "INVISIBLE"),
            (AddonStatus::HQ, "HQ"),
            (AddonStatus::DFSG, "DFSG"),
            (AddonStatus::FEATURED, "FEATURED"),
            (AddonStatus::LATEST, "LATEST"),
            (AddonStatus::BAD_DIM, "BAD_DIM"),
        ];
        TABLE.iter().filter(|(bit, _)| self.contains(*bit)).map(|(_, name)| *name).collect()
    }

    /// Human-readable list, e.g. `Approved, Dfsg`.
    pub fn describe(self) -> String {
        self.names()
            .iter()
            .map(|name| {
                let lower = name.to_ascii_lowercase();
                let mut chars = lower.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Error)]
pub enum RequirementsError {
    #[error("unknown status flag \"{0}\"")]
    UnknownFlag(String),
}

#[allow(clippy::expect_used)]
static TOKEN_DELIMITER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,./;: ]+").expect("constant regex pattern is valid"));

/// Parsed requirements string such as `"+APPROVED,+DFSG,-ALPHA"`.
///
/// Unprefixed or `+` tokens contribute to the allow mask, `-` to deny.
/// An empty allow set means "any". An addon passes when no denied bit is
/// set and at least one allowed bit is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirements {
    pub allow: AddonStatus,
    pub deny: AddonStatus,
}

impl Requirements {
    pub fn parse(input: &str) -> Result<Self, RequirementsError> {
        let mut allow = AddonStatus::empty();
        let mut deny = AddonStatus::empty();
        for token in TOKEN_DELIMITER.split(input) {
            if token.is_empty() {
                continue;
            }
            let (denied, name) = if let Some(rest) = token.strip_prefix('-') {
                (true, rest)
            } else if let Some(rest) = token.strip_prefix('+') {
                (false, rest)
            } else {
                (false, token)
            };
            let bit = AddonStatus::from_status_name(name)
                .ok_or_else(|| RequirementsError::UnknownFlag(name.to_string()))?;
            if denied {
                deny |= bit;
            } else {
                allow |= bit;
            }
        }
        if allow.is_empty() {
            allow = AddonStatus::all();
        }
        Ok(Self { allow, deny })
    }

    pub fn passes(&self, status: AddonStatus) -> bool {
        (status & self.deny).is_empty() && status.intersects(self.allow)
    }
}

impl fmt::Display for Requirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.allow != AddonStatus::all() {
            parts.extend(self.allow.names().iter().map(|name| format!("+{name}")));
        }
        parts.extend(self.deny.names().iter().map(|name| format!("-{name}")));
        write!(f, "{}", parts.join(","))
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
