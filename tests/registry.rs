extern crate packd;
extern crate tempdir;

use std::fs::{self, File};
use std::io::prelude::*;
use std::path::Path;

use tempdir::TempDir;

use packd::bus::{BusValue, MemoryBus, PropertyBus, StoredSettings};
use packd::registry::Registry;
use packd::util::Config;

fn test_config(root: &Path) -> Config {
    let machine = root.join("machine");
    let firmware = root.join("firmware");
    File::create(&machine).unwrap().write_all(b"einstein\n").unwrap();
    File::create(&firmware).unwrap().write_all(b"v3.10\n").unwrap();
    Config::new(&root.join("data"),
                &root.join("venus"),
                &root.join("media"),
                &machine,
                &firmware)
}

fn test_registry(root: &Path) -> Registry {
    let config = test_config(root);
    fs::create_dir_all(config.data_dir()).unwrap();
    Registry::new(Box::new(MemoryBus::new()),
                  StoredSettings::default(),
                  config.settings_path())
}

fn read_str(registry: &Registry, path: &str) -> String {
    let state = registry.lock("test read");
    match state.bus.read(path) {
        Some(BusValue::Str(s)) => s,
        Some(other) => panic!("unexpected value at {}: {:?}", path, other),
        None => panic!("nothing published at {}", path),
    }
}

#[test]
fn add_is_idempotent_on_name() {
    let root = TempDir::new("registry").unwrap();
    let registry = test_registry(root.path());
    let config = test_config(root.path());

    let mut state = registry.lock("test");
    assert!(state.add_package("alpha", "someone", "latest"));
    assert!(!state.add_package("alpha", "other", "main"));
    assert_eq!(state.count(), 1);
    assert_eq!(state.packages[0].user, "someone");

    // names stay unique across remove/re-add
    assert!(state.remove_package("alpha", &config));
    assert!(state.add_package("alpha", "someone", "latest"));
    assert_eq!(state.count(), 1);
}

#[test]
fn unknown_coordinates_become_question_marks() {
    let root = TempDir::new("registry").unwrap();
    let registry = test_registry(root.path());

    let mut state = registry.lock("test");
    assert!(state.add_package("alpha", "", ""));
    assert_eq!(state.packages[0].user, "?");
    assert_eq!(state.packages[0].branch, "?");
}

#[test]
fn installed_package_is_not_removed() {
    let root = TempDir::new("registry").unwrap();
    let registry = test_registry(root.path());
    let config = test_config(root.path());

    let mut state = registry.lock("test");
    state.add_package("alpha", "someone", "latest");
    {
        let state = &mut *state;
        let package = &mut state.packages[0];
        package.set_installed_version(&*state.bus, "v1.0.0");
    }
    assert!(!state.remove_package("alpha", &config));
    assert_eq!(state.count(), 1);
}

#[test]
fn removal_compacts_and_blanks_the_tail() {
    let root = TempDir::new("registry").unwrap();
    let registry = test_registry(root.path());
    let config = test_config(root.path());

    {
        let mut state = registry.lock("test");
        state.add_package("alpha", "a", "latest");
        state.add_package("bravo", "b", "latest");
        state.add_package("charlie", "c", "latest");
        assert!(state.remove_package("bravo", &config));

        assert_eq!(state.count(), 2);
        assert_eq!(state.packages[0].name(), "alpha");
        assert_eq!(state.packages[1].name(), "charlie");
        assert_eq!(state.packages[1].index(), 1);
        assert_eq!(state.settings.packages.len(), 2);
    }

    // survivors keep stable addressing, and observers that read Count
    // before the stale index-2 paths see a blanked record there
    assert_eq!(read_str(&registry, "/Settings/PackageManager/1/PackageName"),
               "charlie");
    assert_eq!(read_str(&registry, "/Settings/PackageManager/2/PackageName"), "");
    assert_eq!(read_str(&registry, "/Package/2/InstalledVersion"), "?");
    let count = {
        let state = registry.lock("test");
        state.bus.read("/Settings/PackageManager/Count").map(|v| v.as_int())
    };
    assert_eq!(count, Some(2));
}

#[test]
fn removal_blocks_future_auto_add() {
    let root = TempDir::new("registry").unwrap();
    let registry = test_registry(root.path());
    let config = test_config(root.path());
    fs::create_dir_all(config.options_dir("alpha")).unwrap();

    let mut state = registry.lock("test");
    state.add_package("alpha", "a", "latest");
    assert!(state.remove_package("alpha", &config));
    assert!(config.options_dir("alpha").join("DO_NOT_AUTO_ADD").exists());
    assert!(!packd::package::auto_add_ok(&config, "alpha"));
}

#[test]
fn default_package_list_parsing() {
    let root = TempDir::new("registry").unwrap();
    let registry = test_registry(root.path());
    let config = test_config(root.path());

    let list_dir = config.default_package_list();
    fs::create_dir_all(list_dir.parent().unwrap()).unwrap();
    File::create(&list_dir)
        .unwrap()
        .write_all(b"# comment line\n\
                     alpha someone latest\n\
                     incomplete-line\n\
                     bravo other main\n")
        .unwrap();

    let mut state = registry.lock("test");
    state.read_default_package_list(&config);
    assert_eq!(state.raw_default_packages.len(), 2);
    assert_eq!(state.locate_raw_default("alpha").unwrap().user, "someone");
    assert_eq!(state.locate_raw_default("bravo").unwrap().branch, "main");
    assert!(state.locate_raw_default("incomplete-line").is_none());

    // packages already in the registry are not offered as defaults
    state.add_package("alpha", "someone", "latest");
    state.update_default_packages();
    drop(state);
    assert_eq!(read_str(&registry, "/Default/0/PackageName"), "new");
    assert_eq!(read_str(&registry, "/Default/1/PackageName"), "bravo");
    let count = {
        let state = registry.lock("test");
        state.bus.read("/DefaultCount").map(|v| v.as_int())
    };
    assert_eq!(count, Some(2));
}

#[test]
fn settings_round_trip() {
    let root = TempDir::new("registry").unwrap();
    let registry = test_registry(root.path());

    let path = {
        let mut state = registry.lock("test");
        state.settings.auto_download = 3;
        state.settings.auto_install = true;
        state.add_package("alpha", "someone", "latest");
        state.settings_path.clone()
    };

    let reloaded = StoredSettings::load(&path).unwrap();
    assert_eq!(reloaded.auto_download, 3);
    assert!(reloaded.auto_install);
    assert_eq!(reloaded.packages.len(), 1);
    assert_eq!(reloaded.packages[0].name, "alpha");
    assert_eq!(reloaded.packages[0].branch, "latest");
}
