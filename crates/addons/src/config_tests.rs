// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn defaults_match_the_documented_values() {
    let config = AddonConfig::default();
    assert_eq!(config.online_assets_url, DEFAULT_ASSETS_URL);
    assert!(!config.fetch_karts);
    assert!(config.autoupdate);
    assert_eq!(config.autoupdate_interval, 3600.0 * 6.0);
    assert!(config.autoinstall);
    assert_eq!(config.autoinstall_minrating, 1.0);
    assert_eq!(config.autoinstall_requirements, "+APPROVED,+DFSG,-ALPHA");
    assert_eq!(config.downloadpath, PathBuf::from("downloads"));
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stkswrapper.toml");

    let mut config = AddonConfig::default();
    config.fetch_karts = true;
    config.autoinstall_banlist = "beach, field".to_string();
    config.save(&path).unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains("[addon-updater]"), "got: {written}");

    let reloaded = AddonConfig::load(&path).unwrap();
    assert_eq!(reloaded, config);
}

#[test]
fn load_or_default_seeds_a_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stkswrapper.toml");
    let config = AddonConfig::load_or_default(&path);
    assert_eq!(config, AddonConfig::default());
    assert!(path.exists());
}

#[test]
fn load_or_default_recovers_from_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stkswrapper.toml");
    std::fs::write(&path, "[[[[not toml").unwrap();
    assert_eq!(AddonConfig::load_or_default(&path), AddonConfig::default());
}

#[parameterized(
    commas = { "a, b, c" },
    tight_commas = { "a,b,c" },
    spaces = { "a b c" },
    semicolons = { "a; b;c" },
)]
fn banlists_split_on_any_delimiter(input: &str) {
    assert_eq!(split_banlist(input), vec!["a", "b", "c"]);
}

#[test]
fn empty_banlist_is_empty() {
    assert!(split_banlist("").is_empty());
    assert!(split_banlist("  ").is_empty());
}

#[test]
fn banlist_round_trips_through_join() {
    let ids = vec!["beach".to_string(), "field".to_string()];
    assert_eq!(split_banlist(&join_banlist(&ids)), ids);
}
