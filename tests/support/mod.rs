//! Shared scaffolding for the integration tests: a daemon wired to an
//! in-memory bus inside a scratch directory tree.

use std::fs::{self, File};
use std::io::prelude::*;
use std::path::Path;
use std::sync::Arc;

use packd::bus::MemoryBus;
use packd::daemon::{Daemon, WorkerChannels};
use packd::util::Config;

pub fn test_config(root: &Path) -> Config {
    let machine = root.join("machine");
    let firmware = root.join("firmware");
    File::create(&machine).unwrap().write_all(b"einstein\n").unwrap();
    File::create(&firmware).unwrap().write_all(b"v3.10\n").unwrap();
    let config = Config::new(&root.join("data"),
                             &root.join("venus"),
                             &root.join("media"),
                             &machine,
                             &firmware);
    fs::create_dir_all(config.data_dir()).unwrap();
    fs::create_dir_all(config.installed_version_file("x").parent().unwrap()).unwrap();
    fs::create_dir_all(config.media_root()).unwrap();
    config
}

pub fn test_daemon(root: &Path) -> (Arc<Daemon>, WorkerChannels) {
    let config = test_config(root);
    let (daemon, channels) = Daemon::new(config, Box::new(MemoryBus::new())).unwrap();
    (Arc::new(daemon), channels)
}

/// Lay down `<data>/<name>` with a version file and an executable setup
/// program, the minimum for a directory to count as a package.
pub fn make_package_dir(config: &Config, name: &str, version: &str) {
    let dir = config.package_dir(name);
    fs::create_dir_all(&dir).unwrap();
    File::create(dir.join("version")).unwrap().write_all(version.as_bytes()).unwrap();
    let setup = dir.join("setup");
    File::create(&setup).unwrap().write_all(b"#!/bin/sh\nexit 0\n").unwrap();
    make_executable(&setup);
}

/// Like `make_package_dir`, but the setup program reports a fixed exit
/// code instead of succeeding.
pub fn make_package_with_setup(config: &Config, name: &str, version: &str, exit_code: i32) {
    let dir = config.package_dir(name);
    fs::create_dir_all(&dir).unwrap();
    File::create(dir.join("version")).unwrap().write_all(version.as_bytes()).unwrap();
    let setup = dir.join("setup");
    File::create(&setup)
        .unwrap()
        .write_all(format!("#!/bin/sh\nexit {}\n", exit_code).as_bytes())
        .unwrap();
    make_executable(&setup);
}

pub fn mark_installed(config: &Config, name: &str, version: &str) {
    let marker = config.installed_version_file(name);
    fs::create_dir_all(marker.parent().unwrap()).unwrap();
    File::create(&marker).unwrap().write_all(version.as_bytes()).unwrap();
}

#[cfg(unix)]
pub fn make_executable(path: &Path) {
    use std::os::unix::prelude::*;

    let mut perms = fs::metadata(path).unwrap().permissions();
    let mode = perms.mode();
    perms.set_mode(mode | 0o111);
    fs::set_permissions(path, perms).unwrap();
}

#[cfg(windows)]
pub fn make_executable(_: &Path) {}
