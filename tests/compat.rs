extern crate packd;
extern crate tempdir;

mod support;

use std::fs::{self, File};
use std::io::prelude::*;

use tempdir::TempDir;

use packd::bus::{MemoryBus, StoredSettings};
use packd::compat::update_versions_and_flags;
use packd::registry::Registry;
use packd::util::Config;

fn registry_with(config: &Config, names: &[&str]) -> Registry {
    let registry = Registry::new(Box::new(MemoryBus::new()),
                                 StoredSettings::default(),
                                 config.settings_path());
    {
        let mut state = registry.lock("test setup");
        for name in names {
            state.add_package(name, "someone", "latest");
        }
    }
    registry
}

#[test]
fn missing_package_dir_blanks_everything() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::mark_installed(&config, "alpha", "v1.0.0");

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);

    let package = &state.packages[0];
    assert_eq!(package.incompatible, "no package");
    assert_eq!(package.installed_version, "");
    assert_eq!(package.stored_version, "");
    assert!(!package.auto_install_ok);
}

#[test]
fn versions_read_from_disk() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.2.3\n");
    support::mark_installed(&config, "alpha", "v1.2.2\n");

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);

    let package = &state.packages[0];
    assert_eq!(package.stored_version, "v1.2.3");
    assert_eq!(package.installed_version, "v1.2.2");
    assert_eq!(package.incompatible, "");
    assert!(package.auto_install_ok);
}

#[test]
fn empty_installed_marker_reads_as_unknown() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.2.3\n");
    support::mark_installed(&config, "alpha", "");

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);
    assert_eq!(state.packages[0].installed_version, "unknown");
}

#[test]
fn platform_gate() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    File::create(config.package_dir("alpha").join("raspberryPiOnly")).unwrap();

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);
    assert_eq!(state.packages[0].incompatible,
               format!("incompatible with {}", config.platform()));
}

#[test]
fn firmware_window_boundaries() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");

    // firmware exactly equal to the first compatible version is compatible
    File::create(config.package_dir("alpha").join("firstCompatibleVersion"))
        .unwrap()
        .write_all(config.firmware_version().as_bytes())
        .unwrap();
    {
        let mut state = registry.lock("test");
        update_versions_and_flags(&mut state, 0, &config, true, false);
        assert_eq!(state.packages[0].incompatible, "");
    }

    // firmware equal to the obsolete version is not
    File::create(config.package_dir("alpha").join("obsoleteVersion"))
        .unwrap()
        .write_all(config.firmware_version().as_bytes())
        .unwrap();
    {
        let mut state = registry.lock("test");
        update_versions_and_flags(&mut state, 0, &config, true, false);
        assert_eq!(state.packages[0].incompatible,
                   format!("incompatible with {}", config.firmware_version()));
    }
}

#[test]
fn firmware_allowlist() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    File::create(config.package_dir("alpha").join("validFirmwareVersions"))
        .unwrap()
        .write_all(b"v2.80\nv2.81\n")
        .unwrap();

    {
        let mut state = registry.lock("test");
        update_versions_and_flags(&mut state, 0, &config, true, false);
        assert_eq!(state.packages[0].incompatible,
                   format!("incompatible with {}", config.firmware_version()));
    }

    // adding the running firmware to the list clears the gate
    let mut listing = fs::OpenOptions::new()
        .append(true)
        .open(config.package_dir("alpha").join("validFirmwareVersions"))
        .unwrap();
    listing.write_all(format!("{}\n", config.firmware_version()).as_bytes()).unwrap();
    drop(listing);
    {
        let mut state = registry.lock("test");
        update_versions_and_flags(&mut state, 0, &config, true, false);
        assert_eq!(state.packages[0].incompatible, "");
    }
}

#[test]
fn options_required_without_options_set() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    File::create(config.package_dir("alpha").join("optionsRequired")).unwrap();

    {
        let mut state = registry.lock("test");
        update_versions_and_flags(&mut state, 0, &config, true, false);
        assert_eq!(state.packages[0].incompatible, "install from command line");
    }

    fs::create_dir_all(config.options_dir("alpha")).unwrap();
    File::create(config.options_dir("alpha").join("optionsSet")).unwrap();
    {
        let mut state = registry.lock("test");
        update_versions_and_flags(&mut state, 0, &config, true, false);
        assert_eq!(state.packages[0].incompatible, "");
    }
}

#[test]
fn incomplete_file_set_blocks_install() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    let file_set = config.package_dir("alpha").join("FileSets").join(config.firmware_version());
    fs::create_dir_all(&file_set).unwrap();
    File::create(file_set.join("INCOMPLETE")).unwrap();

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);
    assert_eq!(state.packages[0].incompatible,
               format!("incomplete file set for {}", config.firmware_version()));
}

#[test]
fn dependency_conflict_is_resolvable() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha", "bravo"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    support::make_package_dir(&config, "bravo", "v1.0.0\n");
    support::mark_installed(&config, "bravo", "v1.0.0\n");
    File::create(config.package_dir("alpha").join("packageDependencies"))
        .unwrap()
        .write_all(b"bravo uninstalled\n")
        .unwrap();

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);

    let package = &state.packages[0];
    assert_eq!(package.incompatible, "package conflict");
    assert_eq!(package.incompatible_details, "bravo must not be installed\n");
    assert!(package.incompatible_resolvable);
    assert_eq!(package.dependency_errors.len(), 1);
    assert_eq!(package.dependency_errors[0].package, "bravo");
}

#[test]
fn missing_dependency_is_not_resolvable() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    File::create(config.package_dir("alpha").join("packageDependencies"))
        .unwrap()
        .write_all(b"ghost installed\n")
        .unwrap();

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);

    let package = &state.packages[0];
    assert_eq!(package.incompatible, "package conflict");
    assert_eq!(package.incompatible_details,
               "ghost must be installed but not available\n");
    assert!(!package.incompatible_resolvable);
}

#[test]
fn satisfied_dependencies_clear_the_conflict() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha", "bravo"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    support::make_package_dir(&config, "bravo", "v1.0.0\n");
    support::mark_installed(&config, "bravo", "v1.0.0\n");
    File::create(config.package_dir("alpha").join("packageDependencies"))
        .unwrap()
        .write_all(b"bravo installed\n")
        .unwrap();

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);
    assert_eq!(state.packages[0].incompatible, "");
    assert!(state.packages[0].dependency_errors.is_empty());
}

#[test]
fn patch_errors_surface_last() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    File::create(config.package_dir("alpha").join("patchErrors"))
        .unwrap()
        .write_all(b"/etc/thing.conf would not apply\n")
        .unwrap();

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);

    let package = &state.packages[0];
    assert_eq!(package.incompatible, "patch error");
    assert!(package.incompatible_details.contains("would not apply"));
}

#[test]
fn first_pass_schedules_a_script_check() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");

    let mut state = registry.lock("test");
    assert!(update_versions_and_flags(&mut state, 0, &config, true, false));
    // the pre-check time is now stamped, so the next pass stays quiet
    assert!(!update_versions_and_flags(&mut state, 0, &config, true, false));
}

#[test]
fn two_ticks_of_flag_updates_are_idempotent() {
    let root = TempDir::new("compat").unwrap();
    let config = support::test_config(root.path());
    let registry = registry_with(&config, &["alpha"]);
    support::make_package_dir(&config, "alpha", "v1.0.0\n");
    support::mark_installed(&config, "alpha", "v1.0.0\n");

    let mut state = registry.lock("test");
    update_versions_and_flags(&mut state, 0, &config, true, false);
    let first = state.packages[0].clone();
    update_versions_and_flags(&mut state, 0, &config, true, false);
    let second = &state.packages[0];

    assert_eq!(first.stored_version, second.stored_version);
    assert_eq!(first.installed_version, second.installed_version);
    assert_eq!(first.incompatible, second.incompatible);
    assert_eq!(first.dependency_errors, second.dependency_errors);
}
