extern crate flate2;
extern crate packd;
extern crate tar;
extern crate tempdir;

use std::fs::{self, File};
use std::io::prelude::*;

use flate2::Compression;
use flate2::write::GzEncoder;
use tar::Builder;
use tempdir::TempDir;

use packd::package::locate_package_dir;
use packd::workers::downloader::extract_archive;

/// Build a `<name>-<branch>.tar.gz` the way the remote source serves them:
/// one top-level directory wrapping the package content.
fn build_archive(root: &TempDir, dir_name: &str, version: &str) -> ::std::path::PathBuf {
    let content = root.path().join("content").join(dir_name);
    fs::create_dir_all(&content).unwrap();
    File::create(content.join("version")).unwrap().write_all(version.as_bytes()).unwrap();
    File::create(content.join("setup")).unwrap().write_all(b"#!/bin/sh\nexit 0\n").unwrap();

    let archive_path = root.path().join(format!("{}.tar.gz", dir_name));
    let file = File::create(&archive_path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.append_dir_all(dir_name, &content).unwrap();
    let encoder = builder.into_inner().unwrap();
    encoder.finish().unwrap();
    archive_path
}

#[test]
fn extract_and_locate_package() {
    let root = TempDir::new("archive").unwrap();
    let archive = build_archive(&root, "alpha-main", "v1.2.3\n");

    let dest = root.path().join("unpacked");
    fs::create_dir_all(&dest).unwrap();
    extract_archive(&archive, &dest).unwrap();

    let package_dir = locate_package_dir(&dest).unwrap();
    assert!(package_dir.ends_with("alpha-main"));
    let mut version = String::new();
    File::open(package_dir.join("version")).unwrap().read_to_string(&mut version).unwrap();
    assert_eq!(version.trim(), "v1.2.3");
}

#[test]
fn extract_rejects_garbage() {
    let root = TempDir::new("archive").unwrap();
    let bogus = root.path().join("bogus.tar.gz");
    File::create(&bogus).unwrap().write_all(b"this is not an archive").unwrap();

    let dest = root.path().join("unpacked");
    fs::create_dir_all(&dest).unwrap();
    assert!(extract_archive(&bogus, &dest).is_err());
}
