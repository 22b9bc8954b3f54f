// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Offline tests for the sync engine: unpacking, registration, banlists,
//! and the autoinstall filter. Network paths are covered by the catalog
//! and download units they compose.

use super::*;
use crate::status::AddonStatus;
use std::io::Write;
use std::path::Path;

fn make_sync(dir: &Path) -> Arc<AddonSync> {
    let config = AddonConfig {
        addonpath: dir.join("addons"),
        downloadpath: dir.join("downloads"),
        ..AddonConfig::default()
    };
    AddonSync::new(
        config,
        dir.join("stkswrapper.toml"),
        Version::new(1, 3, 0),
        Arc::new(RestartCondition::new()),
    )
}

fn write_zip(path: &Path, files: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut archive = zip::ZipWriter::new(file);
    for (name, contents) in files {
        archive.start_file(*name, zip::write::FileOptions::default()).unwrap();
        archive.write_all(contents.as_bytes()).unwrap();
    }
    archive.finish().unwrap();
}

fn entry(id: &str, tag: &str, rating: f64, status: AddonStatus) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        tag: tag.to_string(),
        name: id.to_string(),
        designer: String::new(),
        uploader: String::new(),
        rating,
        revision: 1,
        version: None,
        file: format!("http://dl/{id}.zip"),
        min_include_version: None,
        max_include_version: None,
        status,
    }
}

fn seed_installed(sync: &AddonSync, kind: &str, id: &str, manifest: &str) {
    let dir = sync.config().addonpath.join(format!("{kind}s")).join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{kind}.xml")), manifest).unwrap();
    sync.scan_installed();
}

#[tokio::test]
async fn unpack_extracts_into_the_addon_tree() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    let archive = dir.path().join("beach.zip");
    write_zip(&archive, &[("track.xml", r#"<track name="Beach"/>"#), ("data.txt", "x")]);

    let target = sync.unpack("beach", "track", &archive).unwrap();
    assert_eq!(target, dir.path().join("addons/tracks/beach"));
    assert!(target.join("track.xml").is_file());
    assert!(target.join("data.txt").is_file());
}

#[tokio::test]
async fn unpack_replaces_previous_contents() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    let target = dir.path().join("addons/tracks/beach");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("stale.txt"), "old").unwrap();

    let archive = dir.path().join("beach.zip");
    write_zip(&archive, &[("track.xml", "<track/>")]);
    sync.unpack("beach", "track", &archive).unwrap();
    assert!(!target.join("stale.txt").exists(), "old contents must be removed");
    assert!(target.join("track.xml").is_file());
}

#[tokio::test]
async fn unpack_routes_arenas_under_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    let archive = dir.path().join("battle.zip");
    write_zip(&archive, &[("track.xml", r#"<track arena="Y"/>"#)]);

    let target = sync.unpack("battle", "arena", &archive).unwrap();
    assert_eq!(target, dir.path().join("addons/tracks/battle"));
}

#[tokio::test]
async fn uninstall_removes_directory_and_bans() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    seed_installed(&sync, "track", "beach", r#"<track name="Beach" revision="1"/>"#);
    assert!(sync.installed_snapshot().contains("beach"));

    sync.uninstall("beach", true).await.unwrap();
    assert!(!sync.installed_snapshot().contains("beach"));
    assert!(!dir.path().join("addons/tracks/beach").exists());
    assert!(split_banlist(&sync.config().autoinstall_banlist).contains(&"beach".to_string()));
}

#[tokio::test]
async fn uninstall_can_be_vetoed() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    seed_installed(&sync, "track", "beach", r#"<track name="Beach"/>"#);
    sync.addon_uninstalled.add_handler(|_| async { Ok(false) });

    match sync.uninstall("beach", false).await {
        Err(AddonError::Vetoed) => {}
        other => panic!("expected veto, got {other:?}"),
    }
    assert!(sync.installed_snapshot().contains("beach"));
    assert!(dir.path().join("addons/tracks/beach").exists());
}

#[tokio::test]
async fn uninstall_of_unknown_addon_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    match sync.uninstall("ghost", false).await {
        Err(AddonError::NotInstalled(_)) => {}
        other => panic!("expected NotInstalled, got {other:?}"),
    }
}

#[tokio::test]
async fn ban_and_unban_round_trip_through_the_config() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());

    assert!(sync.ban("beach"));
    assert!(!sync.ban("beach"), "second ban is a no-op");
    assert!(sync.ban("field"));
    assert_eq!(sync.config().autoinstall_banlist, "beach, field");

    let persisted = AddonConfig::load(&dir.path().join("stkswrapper.toml")).unwrap();
    assert_eq!(persisted.autoinstall_banlist, "beach, field");

    assert!(sync.unban("beach"));
    assert!(!sync.unban("beach"));
    assert_eq!(sync.config().autoinstall_banlist, "field");
}

#[tokio::test]
async fn autoinstall_filter_applies_all_gates() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    sync.update_config(|config| {
        config.autoinstall_minrating = 2.0;
        config.autoinstall_requirements = "+APPROVED,-ALPHA".to_string();
        config.autoinstall_banlist = "banned_track".to_string();
        config.autoinstall_karts = false;
    });
    seed_installed(&sync, "track", "already_here", r#"<track name="X"/>"#);

    let approved = AddonStatus::APPROVED;
    {
        let mut state = sync.state.lock();
        for candidate in [
            entry("good", "track", 3.0, approved),
            entry("already_here", "track", 3.0, approved),
            entry("low_rating", "track", 1.0, approved),
            entry("banned_track", "track", 3.0, approved),
            entry("some_kart", "kart", 3.0, approved),
            entry("alpha_quality", "track", 3.0, approved | AddonStatus::ALPHA),
            entry("unapproved", "track", 3.0, AddonStatus::DFSG),
        ] {
            state.catalog.entries.insert(candidate.id.clone(), candidate);
        }
    }

    let ids: Vec<String> =
        sync.autoinstall_candidates().into_iter().map(|entry| entry.id).collect();
    assert_eq!(ids, vec!["good".to_string()]);
}

#[tokio::test]
async fn requirements_rejection_is_independent_of_allow_bits() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    sync.update_config(|config| {
        config.autoinstall_requirements = "+APPROVED,-ALPHA".to_string();
        config.autoinstall_minrating = 0.0;
    });
    {
        let mut state = sync.state.lock();
        let candidate =
            entry("alpha", "track", 3.0, AddonStatus::APPROVED | AddonStatus::ALPHA);
        state.catalog.entries.insert(candidate.id.clone(), candidate);
    }
    assert!(sync.autoinstall_candidates().is_empty());
}

#[tokio::test]
async fn clear_downloads_empties_the_directory() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    let downloads = sync.config().downloadpath.clone();
    std::fs::create_dir_all(downloads.join("nested")).unwrap();
    std::fs::write(downloads.join("beach.zip"), "zip").unwrap();
    std::fs::write(downloads.join("nested/file"), "x").unwrap();

    sync.clear_downloads().unwrap();
    assert!(downloads.is_dir(), "the directory itself survives");
    assert_eq!(std::fs::read_dir(&downloads).unwrap().count(), 0);
}

#[tokio::test]
async fn broadcast_if_modified_drains_the_flag() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    seed_installed(&sync, "track", "beach", r#"<track name="Beach"/>"#);

    assert!(!sync.broadcast_if_modified().await, "nothing modified yet");
    sync.uninstall("beach", false).await.unwrap();
    assert!(sync.broadcast_if_modified().await);
    assert!(!sync.broadcast_if_modified().await, "flag drains on read");
}

#[tokio::test]
async fn autoupdate_singleton_is_guarded() {
    let dir = tempfile::tempdir().unwrap();
    let sync = make_sync(dir.path());
    let tasks = TaskRegistry::new();

    assert!(sync.spawn_autoupdate(&tasks));
    assert!(!sync.spawn_autoupdate(&tasks), "second autoupdate loop is refused");
    tasks.cancel_all();

    sync.update_config(|config| config.autoupdate = false);
    assert!(!sync.spawn_autoupdate(&tasks), "disabled autoupdate does not spawn");
}
