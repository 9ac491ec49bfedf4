//! The add/remove worker.
//!
//! Services `add:<name>` and `remove:<name>` commands and, while idle,
//! sweeps the storage tree for packages that should join the registry. The
//! idle pass also watches for duplicate or invalid names appearing at
//! runtime; finding one is a structural failure that restarts the process
//! so the startup repair pass can clean up.

use std::fs;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, TryRecvError};

use daemon::Daemon;
use dispatch::{QueueItem, RefreshRequest, Source, Verb, push_action};
use package::{self, package_name_valid};
use registry::StatusTarget;
use util::paths;

const IDLE_DELAY: Duration = Duration::from_secs(3);

pub struct AddRemove;

impl AddRemove {
    pub fn run(daemon: &Daemon, queue: Receiver<QueueItem>) {
        let mut changes = false;
        loop {
            // when a package was just added or removed, drain the queue
            // without waiting so bursts of edits resolve quickly
            let item = if changes {
                match queue.try_recv() {
                    Ok(item) => Some(item),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => return,
                }
            } else {
                match queue.recv_timeout(IDLE_DELAY) {
                    Ok(item) => Some(item),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            };

            let command = match item {
                None => {
                    if changes {
                        daemon.registry.lock("add/remove defaults").update_default_packages();
                    } else {
                        if let Some(bad) = find_duplicate_or_invalid(daemon) {
                            error!("duplicate or invalid name {} in package list - restarting", bad);
                            daemon.flags.set_restart();
                            return;
                        }
                        add_stored_packages(daemon);
                    }
                    changes = false;
                    continue;
                }
                Some(QueueItem::Stop) => return,
                Some(QueueItem::Run(command)) => command,
            };

            match command.verb {
                Verb::Add => {
                    if add_package(daemon, &command.package, command.source) {
                        changes = true;
                    }
                }
                Verb::Remove => {
                    if remove_package(daemon, &command.package, command.source) {
                        changes = true;
                    }
                }
                other => {
                    error!("received invalid command on add/remove queue: {}", other);
                }
            }
        }
    }
}

fn find_duplicate_or_invalid(daemon: &Daemon) -> Option<String> {
    let state = daemon.registry.lock("add/remove audit");
    let mut seen: Vec<&str> = Vec::new();
    for package in state.packages.iter() {
        let name = package.name();
        if !package_name_valid(name) || seen.contains(&name) {
            return Some(name.to_string());
        }
        seen.push(name);
    }
    None
}

/// Add one package to the registry. The remote coordinates come from the
/// GUI's edit paths, the package's own `gitHubInfo` file, or the default
/// package list, in that order.
fn add_package(daemon: &Daemon, name: &str, source: Source) -> bool {
    if name.is_empty() || !package_name_valid(name) {
        error!("add package: invalid name `{}` - nothing done", name);
        if source == Source::Gui {
            let mut state = daemon.registry.lock("add invalid");
            state.update_status(StatusTarget::Editor, &format!("invalid package name {}", name));
            state.acknowledge_gui_edit("ERROR", false);
        }
        return false;
    }

    let (mut user, mut branch) = {
        let state = daemon.registry.lock("add coordinates");
        if source == Source::Gui {
            (state.edit.user.clone(), state.edit.branch.clone())
        } else {
            (String::new(), String::new())
        }
    };

    // fall back to the coordinates the package shipped with
    if user.is_empty() {
        let info = daemon.config.package_dir(name).join("gitHubInfo");
        if let Some(line) = paths::read_first_line(&info) {
            let parts: Vec<&str> = line.split(':').collect();
            if parts.len() >= 2 {
                user = parts[0].to_string();
                branch = parts[1].to_string();
            }
        }
    }

    // still nothing - try the default package list
    if user.is_empty() {
        let state = daemon.registry.lock("add defaults");
        if let Some(default) = state.locate_raw_default(name) {
            user = default.user.clone();
            branch = default.branch.clone();
        }
    }

    let mut state = daemon.registry.lock("add package");
    if !state.add_package(name, &user, &branch) {
        warn!("add package: {} already in package list", name);
        if source == Source::Gui {
            state.update_status(StatusTarget::Editor,
                                &format!("{} already in package list", name));
            state.acknowledge_gui_edit("ERROR", false);
        }
        return false;
    }
    warn!("adding package {}", name);
    if source == Source::Gui {
        state.update_status(StatusTarget::Editor, "");
        state.acknowledge_gui_edit("", false);
    }
    // get a remote version on the board quickly
    let _ = daemon.queues.refresh.try_send(RefreshRequest::Package {
        name: name.to_string(),
        source: Source::Local,
    });
    true
}

fn remove_package(daemon: &Daemon, name: &str, source: Source) -> bool {
    let mut state = daemon.registry.lock("remove package");
    if source == Source::Gui {
        state.update_status(StatusTarget::Editor, &format!("removing {}", name));
    }
    let removed = state.remove_package(name, &daemon.config);
    if removed {
        warn!("removed package {}", name);
        if source == Source::Gui {
            state.update_status(StatusTarget::Editor, "");
            state.acknowledge_gui_edit("", false);
        }
    } else {
        error!("{} not removed", name);
        if source == Source::Gui {
            state.update_status(StatusTarget::Editor,
                                &format!("{} not removed - name not found or installed", name));
            state.acknowledge_gui_edit("ERROR", false);
        }
    }
    removed
}

/// Sweep `<data>` for package directories that are not in the registry yet
/// and queue an add for each. In order to qualify a directory must carry an
/// executable setup program and a `version` file whose content begins with
/// `v`; packages the user manually removed stay out.
pub fn add_stored_packages(daemon: &Daemon) {
    let entries = match fs::read_dir(daemon.config.data_dir()) {
        Ok(entries) => entries,
        Err(..) => return,
    };
    let platform_is_pi = daemon.config.platform().starts_with("Rasp");

    for entry in entries.filter_map(|e| e.ok()) {
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(..) => continue,
        };
        if !package_name_valid(&name) {
            continue;
        }
        {
            let state = daemon.registry.lock("stored package scan");
            if state.locate(&name).is_some() {
                continue;
            }
        }
        // also verifies the entry is a directory
        if !daemon.config.setup_file(&name).exists() {
            continue;
        }
        match paths::read_first_line(&daemon.config.version_file(&name)) {
            Some(ref version) if version.starts_with('v') => {}
            _ => continue,
        }
        if daemon.config.package_dir(&name).join("raspberryPiOnly").exists() && !platform_is_pi {
            continue;
        }
        if !package::auto_add_ok(&daemon.config, &name) {
            continue;
        }
        let mut state = daemon.registry.lock("stored package add");
        push_action(&mut state,
                    &daemon.queues,
                    &daemon.flags,
                    &daemon.config,
                    &format!("add:{}", name),
                    Source::Auto);
    }
}
