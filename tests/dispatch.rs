extern crate packd;
extern crate tempdir;

mod support;

use tempdir::TempDir;

use packd::dispatch::{QueueItem, Source, Verb, push_action};

#[test]
fn download_routes_to_download_queue() {
    let root = TempDir::new("dispatch").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    let mut state = daemon.registry.lock("test");
    state.add_package("alpha", "someone", "latest");
    assert!(push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        "download:alpha",
                        Source::Gui));
    assert!(state.packages[0].download_pending);

    match channels.download.try_recv().unwrap() {
        QueueItem::Run(command) => {
            assert_eq!(command.verb, Verb::Download);
            assert_eq!(command.package, "alpha");
            assert_eq!(command.source, Source::Gui);
        }
        QueueItem::Stop => panic!("unexpected stop sentinel"),
    }
}

#[test]
fn download_refused_while_action_pending() {
    let root = TempDir::new("dispatch").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    let mut state = daemon.registry.lock("test");
    state.add_package("alpha", "someone", "latest");
    state.packages[0].install_pending = true;
    assert!(!push_action(&mut state,
                         &daemon.queues,
                         &daemon.flags,
                         &daemon.config,
                         "download:alpha",
                         Source::Auto));
    assert!(channels.download.try_recv().is_err());
}

#[test]
fn install_blocked_by_download_becomes_install_after() {
    let root = TempDir::new("dispatch").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    let mut state = daemon.registry.lock("test");
    state.add_package("alpha", "someone", "latest");
    state.packages[0].download_pending = true;
    assert!(push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        "install:alpha",
                        Source::Gui));

    // nothing queued; the downloader honors the flag at completion
    assert!(state.packages[0].install_after_download);
    assert!(!state.packages[0].install_pending);
    assert!(channels.install.try_recv().is_err());
}

#[test]
fn self_uninstall_is_deferred() {
    let root = TempDir::new("dispatch").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    let mut state = daemon.registry.lock("test");
    let self_package = daemon.config.self_package().to_string();
    state.add_package(&self_package, "someone", "latest");
    assert!(push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        &format!("uninstall:{}", self_package),
                        Source::Gui));

    assert!(daemon.flags.self_uninstall());
    assert!(channels.install.try_recv().is_err());
}

#[test]
fn unknown_verb_gets_deferred_error_ack() {
    let root = TempDir::new("dispatch").unwrap();
    let (daemon, _channels) = support::test_daemon(root.path());

    let mut state = daemon.registry.lock("test");
    assert!(!push_action(&mut state,
                         &daemon.queues,
                         &daemon.flags,
                         &daemon.config,
                         "explode:alpha",
                         Source::Gui));
    assert_eq!(state.take_deferred_ack(), Some("ERROR".to_string()));
}

#[test]
fn lifecycle_verbs_set_flags_without_queueing() {
    let root = TempDir::new("dispatch").unwrap();
    let (daemon, channels) = support::test_daemon(root.path());

    let mut state = daemon.registry.lock("test");
    assert!(push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        "reboot:",
                        Source::Auto));
    assert!(push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        "restartGui:",
                        Source::Auto));
    assert!(push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        "RESTART_PM:",
                        Source::Auto));
    assert!(push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        "INITIALIZE_PM:",
                        Source::Auto));

    assert!(daemon.flags.system_reboot());
    assert!(daemon.flags.gui_restart());
    assert!(daemon.flags.restart());
    assert!(daemon.flags.initialize());
    assert!(channels.install.try_recv().is_err());
    assert!(channels.download.try_recv().is_err());
    assert!(channels.add_remove.try_recv().is_err());
}

#[test]
fn overflowing_queue_drops_and_clears_pending() {
    let root = TempDir::new("dispatch").unwrap();
    let (daemon, _channels) = support::test_daemon(root.path());

    // the install queue holds ten entries; the eleventh is dropped and the
    // pending flag rolled back so the scan can retry
    let mut state = daemon.registry.lock("test");
    for i in 0..11 {
        state.add_package(&format!("pkg{}", i), "someone", "latest");
    }
    for i in 0..10 {
        assert!(push_action(&mut state,
                            &daemon.queues,
                            &daemon.flags,
                            &daemon.config,
                            &format!("install:pkg{}", i),
                            Source::Auto));
    }
    assert!(!push_action(&mut state,
                         &daemon.queues,
                         &daemon.flags,
                         &daemon.config,
                         "install:pkg10",
                         Source::Auto));
    assert!(!state.packages[10].install_pending);
}
