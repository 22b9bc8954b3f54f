// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn structured(line: &str) -> LogEvent {
    match parse_line(line) {
        Parsed::Structured(event) => event,
        other => panic!("expected structured line, got {other:?}"),
    }
}

#[test]
fn header_without_timestamp() {
    let event = structured("[info   ] ServerLobby: Server 2759 is now online.");
    assert_eq!(event.level, LogLevel::Info);
    assert_eq!(event.level_name, "info");
    assert_eq!(event.object, "ServerLobby");
    assert_eq!(event.message, "Server 2759 is now online.");
}

#[test]
fn header_with_timestamp_prefix() {
    let event = structured("Mon Jan  3 10:01:02 2022 [warn ] STKHost: something odd");
    assert_eq!(event.level, LogLevel::Warning);
    assert_eq!(event.object, "STKHost");
    assert_eq!(event.message, "something odd");
}

#[parameterized(
    verbose = { "[verbose] FileManager: loading" },
    unknown = { "[loud  ] FileManager: loading" },
)]
fn unknown_levels_default_to_debug(line: &str) {
    assert_eq!(structured(line).level, LogLevel::Debug);
}

#[test]
fn message_may_contain_colons() {
    let event = structured("[info   ] GoalLog: goal player:one red.");
    assert_eq!(event.message, "goal player:one red.");
}

#[test]
fn non_header_lines_are_plain() {
    assert_eq!(
        parse_line("Lobby initialized"),
        Parsed::Plain("Lobby initialized".to_string())
    );
}

#[test]
fn idle_probe_echo_is_dropped() {
    assert_eq!(parse_line(&format!("Unknown command: {IDLE_COMMAND}")), Parsed::Dropped);
}

#[test]
fn ansi_escapes_are_stripped() {
    let colored = "\x1b[32m[info   ] ServerLobby: ready\x1b[0m";
    assert_eq!(strip_ansi(colored), "[info   ] ServerLobby: ready");
}

#[test]
fn csi_sequence_is_stripped() {
    assert_eq!(strip_ansi("\u{9b}2Jclear"), "clear");
}
