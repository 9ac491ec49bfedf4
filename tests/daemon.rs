extern crate packd;
extern crate tempdir;

mod support;

use std::fs::{self, File};
use std::io::prelude::*;

use tempdir::TempDir;

use packd::bus::{BusValue, MemoryBus, PropertyBus, StoredSettings};
use packd::daemon::Daemon;
use packd::dispatch::{QueueItem, RefreshRequest, Verb};

#[test]
fn gui_edit_action_reaches_the_install_queue() {
    let root = TempDir::new("daemon").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    {
        let mut state = daemon.registry.lock("test setup");
        state.add_package("alpha", "someone", "latest");
    }

    daemon.bus_changed("/GuiEditAction", &BusValue::Str("install:alpha".to_string()));

    match channels.install.try_recv().unwrap() {
        QueueItem::Run(command) => {
            assert_eq!(command.verb, Verb::Install);
            assert_eq!(command.package, "alpha");
        }
        QueueItem::Stop => panic!("unexpected stop sentinel"),
    }
    let state = daemon.registry.lock("test verify");
    assert!(state.packages[0].install_pending);
}

#[test]
fn blank_gui_edit_action_is_ignored() {
    let root = TempDir::new("daemon").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    daemon.bus_changed("/GuiEditAction", &BusValue::Str(String::new()));
    assert!(channels.install.try_recv().is_err());
    assert!(channels.download.try_recv().is_err());
}

#[test]
fn settings_writes_persist() {
    let root = TempDir::new("daemon").unwrap();
    let (daemon, _channels) = support::test_daemon(root.path());

    daemon.bus_changed("/Settings/PackageManager/AutoInstall", &BusValue::Int(1));
    daemon.bus_changed("/Settings/PackageManager/GitHubAutoDownload", &BusValue::Int(2));

    let path = {
        let state = daemon.registry.lock("test verify");
        assert!(state.settings.auto_install);
        assert_eq!(state.settings.auto_download, 2);
        state.settings_path.clone()
    };
    let reloaded = StoredSettings::load(&path).unwrap();
    assert!(reloaded.auto_install);
    assert_eq!(reloaded.auto_download, 2);
}

#[test]
fn coordinate_writes_trigger_priority_refresh() {
    let root = TempDir::new("daemon").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    {
        let mut state = daemon.registry.lock("test setup");
        state.add_package("alpha", "someone", "latest");
    }

    daemon.bus_changed("/Settings/PackageManager/0/GitHubBranch",
                       &BusValue::Str("main".to_string()));

    {
        let state = daemon.registry.lock("test verify");
        assert_eq!(state.packages[0].branch, "main");
        assert_eq!(state.settings.packages[0].branch, "main");
    }
    match channels.refresh.try_recv().unwrap() {
        RefreshRequest::Package { name, .. } => assert_eq!(name, "alpha"),
        other => panic!("unexpected refresh request {:?}", other),
    }
}

#[test]
fn edit_paths_feed_gui_adds() {
    let root = TempDir::new("daemon").unwrap();
    let (daemon, _channels) = support::test_daemon(root.path());

    daemon.bus_changed("/Settings/PackageManager/Edit/PackageName",
                       &BusValue::Str("alpha".to_string()));
    daemon.bus_changed("/Settings/PackageManager/Edit/GitHubUser",
                       &BusValue::Str("someone".to_string()));
    daemon.bus_changed("/Settings/PackageManager/Edit/GitHubBranch",
                       &BusValue::Str("main".to_string()));

    let state = daemon.registry.lock("test verify");
    assert_eq!(state.edit.name, "alpha");
    assert_eq!(state.edit.user, "someone");
    assert_eq!(state.edit.branch, "main");
}

#[test]
fn init_repairs_duplicates_and_invalid_names() {
    let root = TempDir::new("daemon").unwrap();
    let config = support::test_config(root.path());

    // seed the settings document with a duplicate and an invalid name
    let settings_path = config.settings_path();
    fs::create_dir_all(settings_path.parent().unwrap()).unwrap();
    File::create(&settings_path)
        .unwrap()
        .write_all(b"auto_download = 0\n\
                     auto_install = false\n\n\
                     [[packages]]\n\
                     name = \"alpha\"\n\
                     user = \"a\"\n\
                     branch = \"latest\"\n\n\
                     [[packages]]\n\
                     name = \"alpha\"\n\
                     user = \"a\"\n\
                     branch = \"latest\"\n\n\
                     [[packages]]\n\
                     name = \"bad-backup1\"\n\
                     user = \"b\"\n\
                     branch = \"latest\"\n")
        .unwrap();

    let (daemon, _channels) = Daemon::new(config, Box::new(MemoryBus::new())).unwrap();
    daemon.init();

    let state = daemon.registry.lock("test verify");
    assert_eq!(state.count(), 1);
    assert_eq!(state.packages[0].name(), "alpha");
    assert_eq!(state.settings.packages.len(), 1);
    // the registry never holds two entries with the same name
    for i in 0..state.count() {
        for j in 0..state.count() {
            if i != j {
                assert!(state.packages[i].name() != state.packages[j].name());
            }
        }
    }
}

#[test]
fn init_publishes_platform() {
    let root = TempDir::new("daemon").unwrap();
    let (daemon, _channels) = support::test_daemon(root.path());
    daemon.init();

    let state = daemon.registry.lock("test verify");
    assert_eq!(state.bus.read("/Platform"),
               Some(BusValue::Str("Cerbo GX".to_string())));
    assert_eq!(state.bus.read("/Default/0/PackageName"),
               Some(BusValue::Str("new".to_string())));
}

#[test]
fn second_instance_is_refused() {
    let root = TempDir::new("daemon").unwrap();
    let (_daemon, _channels) = support::test_daemon(root.path());

    let config = support::test_config(root.path());
    assert!(Daemon::new(config, Box::new(MemoryBus::new())).is_err());
}
