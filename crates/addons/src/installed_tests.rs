// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

fn manifest(attrs: &str) -> String {
    format!(r#"<?xml version="1.0"?><track name="X" designer="D" revision="2" {attrs}/>"#)
}

#[parameterized(
    plain_track = { "", &[AddonClass::Track] },
    soccer = { r#"soccer="Y""#, &[AddonClass::Soccer] },
    arena = { r#"arena="Y""#, &[AddonClass::Arena] },
    ctf_arena = { r#"arena="Y" ctf="Y""#, &[AddonClass::Arena, AddonClass::Ctf] },
    ctf_without_arena = { r#"ctf="Y""#, &[AddonClass::Track] },
    soccer_and_arena = { r#"soccer="Y" arena="Y""#, &[AddonClass::Soccer, AddonClass::Arena] },
)]
fn track_classification(attrs: &str, expected: &[AddonClass]) {
    let addon = parse_manifest(&manifest(attrs), "x", Path::new("/tmp/x")).unwrap();
    assert_eq!(addon.classes(), expected);
}

#[test]
fn kart_classification() {
    let addon =
        parse_manifest(r#"<kart name="Speedy" revision="1"/>"#, "speedy", Path::new("/tmp/k"))
            .unwrap();
    assert_eq!(addon.classes(), vec![AddonClass::Kart]);
}

#[test]
fn manifest_fields_are_parsed() {
    let xml = r#"<track name="Beach" designer="A" revision="4" version="7"
                 default-lap-count="3" soccer="N"/>"#;
    let addon = parse_manifest(xml, "beach", Path::new("/addons/tracks/beach")).unwrap();
    assert_eq!(addon.name, "Beach");
    assert_eq!(addon.designer, "A");
    assert_eq!(addon.revision, 4);
    assert_eq!(addon.version.as_deref(), Some("7"));
    assert_eq!(addon.default_lap_count, Some(3));
    assert!(!addon.soccer);
}

#[test]
fn empty_manifest_is_an_error() {
    assert!(parse_manifest("", "x", Path::new("/tmp/x")).is_err());
}

fn seed_addon(root: &Path, kind: &str, id: &str, manifest_xml: &str) {
    let dir = root.join(format!("{kind}s")).join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(format!("{kind}.xml")), manifest_xml).unwrap();
}

#[test]
fn scan_collects_addons_by_category() {
    let dir = tempfile::tempdir().unwrap();
    seed_addon(dir.path(), "track", "beach", r#"<track name="Beach" revision="3"/>"#);
    seed_addon(dir.path(), "track", "field", r#"<track name="Field" soccer="Y" revision="1"/>"#);
    seed_addon(dir.path(), "kart", "speedy", r#"<kart name="Speedy" revision="1"/>"#);

    let set = scan(dir.path(), true);
    assert_eq!(set.len(), 3);
    assert!(set.contains("beach"));
    assert_eq!(set.in_class(AddonClass::Soccer).len(), 1);
    assert_eq!(set.in_class(AddonClass::Kart).len(), 1);
    assert_eq!(set.get("beach").unwrap().revision, 3);
}

#[test]
fn scan_skips_karts_unless_requested() {
    let dir = tempfile::tempdir().unwrap();
    seed_addon(dir.path(), "track", "beach", r#"<track name="Beach"/>"#);
    seed_addon(dir.path(), "kart", "speedy", r#"<kart name="Speedy"/>"#);

    let set = scan(dir.path(), false);
    assert_eq!(set.len(), 1);
    assert!(!set.contains("speedy"));
}

#[test]
fn scan_tolerates_broken_and_missing_manifests() {
    let dir = tempfile::tempdir().unwrap();
    seed_addon(dir.path(), "track", "good", r#"<track name="Good"/>"#);
    seed_addon(dir.path(), "track", "broken", "<track name=");
    std::fs::create_dir_all(dir.path().join("tracks/empty")).unwrap();

    let set = scan(dir.path(), false);
    assert_eq!(set.len(), 1);
    assert!(set.contains("good"));
}

#[test]
fn insert_replaces_and_remove_clears_categories() {
    let mut set = InstalledSet::new();
    let soccer =
        parse_manifest(r#"<track name="F" soccer="Y"/>"#, "field", Path::new("/x")).unwrap();
    set.insert(soccer);
    assert_eq!(set.in_class(AddonClass::Soccer).len(), 1);

    // Reclassified on reinstall: soccer flag dropped.
    let plain = parse_manifest(r#"<track name="F"/>"#, "field", Path::new("/x")).unwrap();
    set.insert(plain);
    assert!(set.in_class(AddonClass::Soccer).is_empty());
    assert_eq!(set.in_class(AddonClass::Track).len(), 1);

    set.remove("field");
    assert!(set.is_empty());
    assert!(set.in_class(AddonClass::Track).is_empty());
}
