// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::installed::{parse_manifest, InstalledSet};
use yare::parameterized;

const CATALOG: &str = r#"<?xml version="1.0"?>
<assets version="2">
  <track id="beach" name="Beach" designer="A" uploader="a" rating="2.5"
         revision="3" file="http://dl/beach.zip" status="65"
         min-include-version="0.8.1" max-include-version=""/>
  <track id="beach" name="Beach" designer="A" uploader="a" rating="2.5"
         revision="5" file="http://dl/beach5.zip" status="65"
         min-include-version="0.8.1" max-include-version=""/>
  <kart id="speedy" name="Speedy" designer="B" uploader="b" rating="3.0"
        revision="1" file="http://dl/speedy.zip" status="1"
        min-include-version="" max-include-version=""/>
  <track id="futuristic" name="Too New" designer="C" uploader="c" rating="3.0"
         revision="1" file="http://dl/new.zip" status="1"
         min-include-version="99.0.0" max-include-version=""/>
  <track id="ancient" name="Too Old" designer="C" uploader="c" rating="3.0"
         revision="1" file="http://dl/old.zip" status="1"
         min-include-version="" max-include-version="0.7"/>
  <track id="broken" name="Bad Version" designer="C" uploader="c" rating="3.0"
         revision="1" file="http://dl/broken.zip" status="1"
         min-include-version="latest-and-greatest" max-include-version=""/>
</assets>
"#;

fn current() -> semver::Version {
    parse_stk_version("1.3.0").unwrap()
}

#[test]
fn dedup_keeps_the_highest_revision() {
    let raw = parse_catalog(CATALOG).unwrap();
    let catalog = build_catalog(&raw, &current(), true);

    let beach = catalog.get("beach").unwrap();
    assert_eq!(beach.revision, 5);
    assert_eq!(beach.file, "http://dl/beach5.zip");
    // beach appears twice in the document but once in the catalog.
    assert_eq!(catalog.entries.keys().filter(|id| *id == "beach").count(), 1);
}

#[test]
fn dedup_keeps_the_highest_revision_regardless_of_order() {
    let reversed = r#"<assets>
      <track id="foo" revision="5" file="a" rating="0" status="1"
             min-include-version="" max-include-version=""/>
      <track id="foo" revision="3" file="b" rating="0" status="1"
             min-include-version="" max-include-version=""/>
    </assets>"#;
    let raw = parse_catalog(reversed).unwrap();
    let catalog = build_catalog(&raw, &current(), true);
    assert_eq!(catalog.get("foo").unwrap().revision, 5);
}

#[test]
fn version_gates_filter_incompatible_entries() {
    let raw = parse_catalog(CATALOG).unwrap();
    let catalog = build_catalog(&raw, &current(), true);
    assert!(catalog.get("futuristic").is_none(), "min above current must be dropped");
    assert!(catalog.get("ancient").is_none(), "max below current must be dropped");
}

#[test]
fn invalid_versions_skip_the_entry_only() {
    let raw = parse_catalog(CATALOG).unwrap();
    let catalog = build_catalog(&raw, &current(), true);
    assert!(catalog.get("broken").is_none());
    assert!(catalog.get("beach").is_some(), "other entries are unaffected");
}

#[parameterized(
    with_karts = { true, true },
    without_karts = { false, false },
)]
fn kart_gate(fetch_karts: bool, expect_kart: bool) {
    let raw = parse_catalog(CATALOG).unwrap();
    let catalog = build_catalog(&raw, &current(), fetch_karts);
    assert_eq!(catalog.get("speedy").is_some(), expect_kart);
}

#[test]
fn status_bits_are_decoded() {
    let raw = parse_catalog(CATALOG).unwrap();
    let catalog = build_catalog(&raw, &current(), true);
    let beach = catalog.get("beach").unwrap();
    assert_eq!(beach.status, AddonStatus::APPROVED | AddonStatus::DFSG);
}

#[parameterized(
    full = { "1.3.0", semver::Version::new(1, 3, 0) },
    two_part = { "1.4", semver::Version::new(1, 4, 0) },
    one_part = { "2", semver::Version::new(2, 0, 0) },
)]
fn stk_versions_are_padded(input: &str, expected: semver::Version) {
    assert_eq!(parse_stk_version(input).unwrap(), expected);
}

#[test]
fn junk_version_is_an_error() {
    assert!(parse_stk_version("git").is_err());
}

#[test]
fn updates_require_a_newer_catalog_revision() {
    let raw = parse_catalog(CATALOG).unwrap();
    let catalog = build_catalog(&raw, &current(), true);

    let mut installed = InstalledSet::new();
    let manifest = r#"<track name="Beach" designer="A" revision="3" version="1"/>"#;
    installed.insert(parse_manifest(manifest, "beach", std::path::Path::new("/tmp/beach")).unwrap());

    let updates = compute_updates(&catalog, &installed);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, "beach");

    // Same revision installed: nothing to update.
    installed.set_revision("beach", 5);
    assert!(compute_updates(&catalog, &installed).is_empty());
}

#[test]
fn installed_without_catalog_entry_is_tolerated() {
    let raw = parse_catalog(CATALOG).unwrap();
    let catalog = build_catalog(&raw, &current(), true);

    let mut installed = InstalledSet::new();
    let manifest = r#"<track name="Gone" revision="9"/>"#;
    installed
        .insert(parse_manifest(manifest, "removed-upstream", std::path::Path::new("/tmp/x")).unwrap());
    assert!(compute_updates(&catalog, &installed).is_empty());
}

#[test]
fn arena_addons_unpack_under_tracks() {
    assert_eq!(addon_subdir("arena"), "tracks");
    assert_eq!(addon_subdir("track"), "tracks");
    assert_eq!(addon_subdir("kart"), "karts");
}

#[test]
fn malformed_catalog_is_an_error() {
    assert!(parse_catalog("<assets><track id=broken").is_err());
}
