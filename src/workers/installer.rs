//! The installer.
//!
//! Runs each package's setup program for `install`, `uninstall` and
//! `check` actions and interprets its exit code, and services
//! `resolveConflicts` requests by queueing the corrective actions. The
//! setup program runs outside the registry lock; only the bookkeeping
//! around it is locked.

use std::process::Output;

use crossbeam::channel::Receiver;

use compat;
use daemon::Daemon;
use dispatch::{QueueItem, Source, Verb, push_action};
use package::{self, ActionNeeded};
use registry::StatusTarget;
use util::{clock, paths, process};

// setup program exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_REBOOT: i32 = 123;
const EXIT_RESTART_GUI: i32 = 124;
const EXIT_INCOMPATIBLE_VERSION: i32 = 254;
const EXIT_INCOMPATIBLE_PLATFORM: i32 = 253;
const EXIT_FILE_SET_ERROR: i32 = 252;
const EXIT_OPTIONS_NOT_SET: i32 = 251;
const EXIT_RUN_AGAIN: i32 = 250;
const EXIT_ROOT_FULL: i32 = 249;
const EXIT_DATA_FULL: i32 = 248;
const EXIT_NO_GUI_V1: i32 = 247;
const EXIT_PACKAGE_CONFLICT: i32 = 246;
const EXIT_PATCH_ERROR: i32 = 245;

/// What a setup exit code means for the package and the system.
struct ExitEffect {
    /// Human-readable failure, empty on success paths.
    error: String,
    /// Extra detail published alongside `incompatible`.
    details: String,
    /// Whether the failure marks the package incompatible.
    incompatible: bool,
}

/// The exit-code table. Success-like codes (0, reboot, GUI restart, run
/// again) produce no error; everything else describes why the package
/// cannot be used.
fn interpret_exit(daemon: &Daemon, code: i32, stderr: &str) -> ExitEffect {
    let mut effect = ExitEffect {
        error: String::new(),
        details: String::new(),
        incompatible: false,
    };
    match code {
        EXIT_SUCCESS | EXIT_REBOOT | EXIT_RESTART_GUI | EXIT_RUN_AGAIN => {}
        EXIT_INCOMPATIBLE_VERSION => {
            effect.error = format!("incompatible with {}", daemon.config.firmware_version());
            effect.incompatible = true;
        }
        EXIT_INCOMPATIBLE_PLATFORM => {
            effect.error = format!("incompatible with {}", daemon.config.platform());
            effect.incompatible = true;
        }
        EXIT_OPTIONS_NOT_SET => {
            effect.error = "setup must be run from the command line".to_string();
            effect.incompatible = true;
        }
        EXIT_FILE_SET_ERROR => {
            effect.error = format!("incomplete file set for {}", daemon.config.firmware_version());
            effect.incompatible = true;
        }
        EXIT_ROOT_FULL => {
            effect.error = "no room on root partition".to_string();
            effect.incompatible = true;
        }
        EXIT_DATA_FULL => {
            effect.error = "no room on data partition".to_string();
            effect.incompatible = true;
        }
        EXIT_NO_GUI_V1 => {
            effect.error = "failed - GUI v1 not installed".to_string();
            effect.incompatible = true;
        }
        EXIT_PACKAGE_CONFLICT => {
            effect.error = "package conflict".to_string();
            effect.details = stderr.to_string();
            effect.incompatible = true;
        }
        EXIT_PATCH_ERROR => {
            effect.error = "could not patch some files".to_string();
            effect.incompatible = true;
        }
        other => {
            effect.error = format!("unknown error {} {}", other, stderr);
            effect.incompatible = true;
        }
    }
    effect
}

pub struct Installer;

impl Installer {
    pub fn run(daemon: &Daemon, queue: Receiver<QueueItem>) {
        loop {
            let command = match queue.recv() {
                Ok(QueueItem::Stop) => return,
                Ok(QueueItem::Run(command)) => command,
                Err(..) => return,
            };
            match command.verb {
                Verb::Install | Verb::Uninstall | Verb::Check => {
                    install_package(daemon, &command.package, command.source, command.verb);
                }
                Verb::ResolveConflicts => {
                    resolve_conflicts(daemon, &command.package, command.source);
                }
                other => {
                    error!("received invalid command on install queue: {}", other);
                }
            }
        }
    }
}

fn status_target(source: Source) -> Option<StatusTarget> {
    match source {
        Source::Gui => Some(StatusTarget::Editor),
        Source::Auto => Some(StatusTarget::PmStatus),
        _ => None,
    }
}

/// Install, uninstall or check one package by running its setup program as
/// `setup <action> runFromPm`.
fn install_package(daemon: &Daemon, name: &str, source: Source, verb: Verb) {
    let action = verb.as_str();
    let target = status_target(source);
    let setup_file = daemon.config.setup_file(name);

    // checks that only need the registry and the filesystem happen under
    // the lock; the setup run itself must not
    {
        let mut state = daemon.registry.lock("install checks");
        let index = match state.locate_index(name) {
            Some(index) => index,
            None => {
                error!("install: {} not in package list", name);
                if source == Source::Gui {
                    state.update_status(StatusTarget::Editor,
                                        &format!("{} not in package list", name));
                    state.acknowledge_gui_edit("ERROR", false);
                }
                return;
            }
        };

        if source == Source::Gui {
            // a manual uninstall blocks future auto installs; a manual
            // install re-allows them
            if verb == Verb::Uninstall {
                package::set_auto_install_ok(&daemon.config, name, false);
                warn!("{} was manually uninstalled - auto install for that package will be skipped",
                      name);
            } else if verb == Verb::Install {
                package::set_auto_install_ok(&daemon.config, name, true);
                warn!("{} was manually installed - allowing auto install for that package", name);
            }
        }

        let problem = if !daemon.config.package_dir(name).is_dir() {
            Some(format!("no package directory {}", name))
        } else if !setup_file.is_file() {
            Some(format!("setup file for {} doesn't exist", name))
        } else if !paths::is_executable(&setup_file) {
            Some(format!("setup file for {} not executable", name))
        } else {
            None
        };
        if let Some(message) = problem {
            error!("install - {}", message);
            if let Some(target) = target {
                state.update_status(target, &message);
            }
            state.packages[index].install_pending = false;
            compat::update_versions_and_flags(&mut state, index, &daemon.config, false, false);
            if source == Source::Gui {
                state.acknowledge_gui_edit("ERROR", false);
            }
            return;
        }
    }

    if let Some(target) = target {
        let state = daemon.registry.lock("install status");
        state.update_status(target, &format!("{}ing {}", action, name));
    }

    let output = process(&setup_file).arg(action).arg("runFromPm").exec_capture();

    let mut state = daemon.registry.lock("install result");
    let index = match state.locate_index(name) {
        Some(index) => index,
        None => return,
    };
    state.packages[index].install_pending = false;

    let (code, stderr) = match output {
        Ok(Output { status, ref stderr, .. }) => {
            (status.code().unwrap_or(-1), String::from_utf8_lossy(stderr).trim().to_string())
        }
        Err(ref e) => {
            error!("could not run setup for {}: {}", name, e);
            if let Some(target) = target {
                state.update_status(target, &format!("{} {} failed - could not run setup", name, action));
            }
            if source == Source::Gui {
                state.acknowledge_gui_edit("ERROR", false);
            }
            state.packages[index].last_script_precheck = clock::now_secs();
            compat::update_versions_and_flags(&mut state, index, &daemon.config, false, false);
            return;
        }
    };

    let effect = interpret_exit(daemon, code, &stderr);

    match code {
        EXIT_SUCCESS => {
            if let Some(target) = target {
                state.update_status(target, "");
            }
            if source == Source::Gui {
                state.acknowledge_gui_edit("", false);
            }
        }
        EXIT_REBOOT => {
            state.packages[index].action_needed = ActionNeeded::Reboot;
            if source == Source::Gui {
                // the user confirms the reboot from the GUI
                warn!("{} {} reboot needed but handled by GUI", name, action);
                if let Some(target) = target {
                    state.update_status(target, "");
                }
                state.acknowledge_gui_edit("RebootNeeded", false);
            } else {
                warn!("{} {} reboot pending", name, action);
                daemon.flags.set_system_reboot();
            }
        }
        EXIT_RESTART_GUI => {
            state.packages[index].action_needed = ActionNeeded::GuiRestart;
            if source == Source::Gui {
                warn!("{} {} GUI restart needed but handled by GUI", name, action);
                if let Some(target) = target {
                    state.update_status(target, "");
                }
                state.acknowledge_gui_edit("GuiRestartNeeded", false);
            } else {
                warn!("{} {} GUI restart pending", name, action);
                daemon.flags.set_gui_restart();
            }
        }
        EXIT_RUN_AGAIN => {
            if source == Source::Gui {
                if let Some(target) = target {
                    state.update_status(target,
                                        &format!("{} run install again to complete install", name));
                }
                state.acknowledge_gui_edit("ERROR", false);
            } else if let Some(target) = target {
                state.update_status(target, &format!("{} setup must be run again", name));
            }
            warn!("{} setup must be run again", name);
        }
        _ => {
            warn!("{} {} failed - {}", name, action, effect.error);
            if let Some(target) = target {
                state.update_status(target, &format!("{} {} failed - {}", name, action, effect.error));
            }
            if source == Source::Gui {
                state.acknowledge_gui_edit("ERROR", false);
            }
        }
    }

    // installs run script conflict checks on their own; pushing the
    // precheck time out here keeps the engine from re-running them at once
    state.packages[index].last_script_precheck = clock::now_secs();

    compat::update_versions_and_flags(&mut state, index, &daemon.config, false, false);

    // the setup program's own verdict survives until the next full check
    if effect.incompatible {
        let state = &mut *state;
        let package = &mut state.packages[index];
        package.set_incompatible(&*state.bus, &effect.error, &effect.details, false);
    }
}

/// Queue the installs and uninstalls that clear the way for `name`. A
/// dependency that is only available remotely is downloaded first with
/// `installAfterDownload` armed so its install is triggered by the
/// downloader completing.
fn resolve_conflicts(daemon: &Daemon, name: &str, source: Source) {
    let mut state = daemon.registry.lock("resolve conflicts");

    let conflicts: Vec<(String, String)> = match state.locate(name) {
        Some(package) => {
            package.dependency_errors
                .iter()
                .map(|d| (d.package.clone(), d.requirement.clone()))
                .chain(package.file_conflicts.iter().map(|f| (f.package.clone(), f.requirement.clone())))
                .collect()
        }
        None => {
            error!("resolve conflicts: {} not found", name);
            return;
        }
    };

    for (other, requirement) in conflicts {
        let must_be_installed = match requirement.as_str() {
            "installed" => true,
            "uninstalled" => false,
            other_req => {
                error!("resolve conflicts: {} unrecognized requirement {}", name, other_req);
                continue;
            }
        };

        let availability = match state.locate(&other) {
            Some(package) => {
                (package.installed_version.is_empty(),
                 !package.stored_version.is_empty(),
                 !package.remote_version.is_empty())
            }
            None => {
                warn!("resolve conflicts: {} is not in the package list", other);
                if source == Source::Gui {
                    state.update_status(StatusTarget::Editor,
                                        &format!("{} not available - can't install", other));
                }
                continue;
            }
        };
        let (not_installed, stored, on_remote) = availability;

        if must_be_installed && not_installed {
            if !stored && on_remote {
                warn!("resolve conflicts: downloading and installing {} so that {} can be installed",
                      other,
                      name);
                push_action(&mut state,
                            &daemon.queues,
                            &daemon.flags,
                            &daemon.config,
                            &format!("download:{}", other),
                            source);
                if let Some(package) = state.locate_mut(&other) {
                    package.install_after_download = true;
                }
            } else if stored {
                warn!("resolve conflicts: installing {} so that {} can be installed", other, name);
                push_action(&mut state,
                            &daemon.queues,
                            &daemon.flags,
                            &daemon.config,
                            &format!("install:{}", other),
                            source);
            } else if source == Source::Gui {
                state.update_status(StatusTarget::Editor,
                                    &format!("{} not available - can't install", other));
            }
        } else if !must_be_installed && !not_installed {
            warn!("resolve conflicts: uninstalling {} so that {} can be installed", other, name);
            push_action(&mut state,
                        &daemon.queues,
                        &daemon.flags,
                        &daemon.config,
                        &format!("uninstall:{}", other),
                        source);
        }
    }
}
