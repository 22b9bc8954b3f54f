// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the fleet configuration document.

use super::*;
use std::time::Duration;

fn sample_entry() -> ServerEntry {
    ServerEntry {
        cfgpath: PathBuf::from("soccer1/server_config.xml"),
        cwd: Some(PathBuf::from("/srv/stk/soccer1")),
        autorestart: Some(false),
        startup_timeout: Some(30.0),
        extra_args: Some(vec!["--log=1".to_string()]),
        ..Default::default()
    }
}

#[test]
fn defaults_match_the_documented_values() {
    let config = FleetConfig::default();
    assert_eq!(config.stk_version, "1.3.0");
    assert_eq!(config.executable_path, PathBuf::from("supertuxkart"));
    assert!(!config.autostart);
    assert!(config.autorestart);
    assert_eq!(config.autorestart_pause, 10.0);
    assert_eq!(config.server_shutdown_timeout, Some(60.0));
    assert_eq!(config.startup_timeout, Some(120.0));
}

#[test]
fn resolve_merges_entry_over_defaults() {
    let config = FleetConfig::default();
    let settings = config.resolve(&sample_entry());

    assert_eq!(settings.cwd, PathBuf::from("/srv/stk/soccer1"));
    assert!(!settings.autorestart, "entry override wins");
    assert!(settings.autostart == config.autostart, "unset attribute falls back");
    assert_eq!(settings.startup_timeout, Some(Duration::from_secs(30)));
    assert_eq!(settings.datapath, config.datapath);
    assert_eq!(settings.extra_args, vec!["--log=1".to_string()]);
}

#[test]
fn entry_for_omits_attributes_equal_to_defaults() {
    let config = FleetConfig::default();
    let settings = config.resolve(&sample_entry());
    let entry = config.entry_for(&settings, IgnoreConfig::new());

    assert_eq!(entry.datapath, None);
    assert_eq!(entry.executable_path, None);
    assert_eq!(entry.autostart, None);
    assert_eq!(entry.autorestart, Some(false));
    assert_eq!(entry.startup_timeout, Some(30.0));
    assert_eq!(entry.extra_args, Some(vec!["--log=1".to_string()]));
}

#[test]
fn save_then_load_round_trips_semantically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut config = FleetConfig::default();
    config.stk_version = "1.4.0".to_string();
    let settings = config.resolve(&sample_entry());
    config
        .servers
        .insert("soccer1".to_string(), config.entry_for(&settings, IgnoreConfig::new()));
    config.save(&path).unwrap();

    let reloaded = FleetConfig::load(&path).unwrap();
    assert_eq!(reloaded, config);
    let resolved = reloaded.resolve(&reloaded.servers["soccer1"]);
    assert_eq!(resolved, settings, "instance attributes equal after round-trip");
}

#[test]
fn omitted_attributes_do_not_appear_in_the_document() {
    let config = FleetConfig::default();
    let settings = config.resolve(&sample_entry());
    let entry = config.entry_for(&settings, IgnoreConfig::new());
    let json = serde_json::to_string(&entry).unwrap();

    assert!(json.contains("cfgpath"));
    assert!(!json.contains("datapath"), "default-equal attribute must be omitted: {json}");
    assert!(!json.contains("log_ignores"), "empty ignore table must be omitted: {json}");
}

#[test]
fn negative_timeouts_normalize_to_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{"server_shutdown_timeout": -1.0}"#).unwrap();

    let config = FleetConfig::load(&path).unwrap();
    assert_eq!(config.server_shutdown_timeout, None);
}

#[test]
fn load_or_default_seeds_a_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let config = FleetConfig::load_or_default(&path);
    assert_eq!(config, FleetConfig::default());
    assert!(path.exists(), "defaults should be written for a missing file");
}

#[test]
fn load_or_default_recovers_from_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{not json").unwrap();

    let config = FleetConfig::load_or_default(&path);
    assert_eq!(config, FleetConfig::default());
    let kept = std::fs::read_to_string(&path).unwrap();
    assert_eq!(kept, "{not json", "broken file must be left untouched");
}
