extern crate hamcrest;
extern crate packd;
extern crate tempdir;

use std::fs::{self, File};
use std::io::prelude::*;

use hamcrest::{assert_that, existing_dir, equal_to};
use tempdir::TempDir;

use packd::bus::MemoryBus;
use packd::package::{Package, locate_package_dir, package_name_valid};

#[test]
fn name_validation() {
    assert!(package_name_valid("GuiMods"));
    assert!(package_name_valid("ExtTemp2"));

    // reserved names
    for name in &["conf", "db", "etc", "home", "keys", "log", "lost+found", "setupOptions", "themes", "tmp",
                  "var", "venus", "vrmfilescache"] {
        assert!(!package_name_valid(name), "{} should be rejected", name);
    }

    // reject substrings
    assert!(!package_name_valid("GuiMods-backup1"));
    assert!(!package_name_valid("GuiMods-current"));
    assert!(!package_name_valid("GuiMods-3"));
    assert!(!package_name_valid("some ccgx thing"));
    assert!(!package_name_valid("two words"));

    assert!(!package_name_valid(""));
    assert!(!package_name_valid(".hidden"));
}

fn package_with_versions(branch: &str, remote: &str, stored: &str) -> Package {
    let bus = MemoryBus::new();
    let mut package = Package::new(0, "sample", "someone", branch);
    package.set_remote_version(&bus, remote);
    package.set_stored_version(&bus, stored);
    package
}

#[test]
fn download_required_on_named_stream() {
    // a named stream only downloads when the remote is newer
    assert!(package_with_versions("latest", "v1.1.0", "v1.0.0").download_required());
    assert!(!package_with_versions("latest", "v1.0.0", "v1.0.0").download_required());
    assert!(!package_with_versions("latest", "v0.9.0", "v1.0.0").download_required());
}

#[test]
fn download_required_on_pinned_branch() {
    // a pinned version downloads on any difference, including a downgrade
    assert!(package_with_versions("v2.0.0", "v2.0.0", "v2.1.0").download_required());
    assert!(package_with_versions("v2.0.0", "v2.2.0", "v2.1.0").download_required());
    assert!(!package_with_versions("v2.0.0", "v2.1.0", "v2.1.0").download_required());
}

#[test]
fn download_not_required_with_unknown_versions() {
    assert!(!package_with_versions("latest", "", "v1.0.0").download_required());
    assert!(!package_with_versions("latest", "beta", "v1.0.0").download_required());
    assert!(!package_with_versions("latest", "v1.1.0", "").download_required());
    assert!(!package_with_versions("latest", "v1.1.0", "?").download_required());
}

#[test]
fn finds_package_dir_in_archive_tree() {
    let root = TempDir::new("pkg-archive").unwrap();
    let nested = root.path().join("sample-main").join("inner");
    fs::create_dir_all(&nested).unwrap();
    File::create(nested.join("version")).unwrap().write_all(b"v1.0.0\n").unwrap();

    let found = locate_package_dir(root.path()).unwrap();
    assert_that(&found, existing_dir());
    assert_that(found, equal_to(nested));
}

#[test]
fn no_package_dir_without_version_file() {
    let root = TempDir::new("pkg-archive").unwrap();
    fs::create_dir_all(root.path().join("sample-main").join("FileSets")).unwrap();

    assert!(locate_package_dir(root.path()).is_none());
}
