//! Command parsing and queue routing.
//!
//! External commands arrive as `"<verb>:<name>"` strings with a source tag.
//! `push_action` inspects the verb and either enqueues the command on the
//! owning worker's bounded queue or flips a global lifecycle flag. Queue
//! overflow is logged and the command dropped; every dropped event is
//! regenerated by the once-a-second scan.

use std::fmt;

use crossbeam::channel::Sender;

use daemon::Flags;
use registry::{State, StatusTarget};
use util::Config;

/// Where a command came from. The source decides who gets progress and
/// error feedback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Source {
    Gui,
    Auto,
    Local,
    Transfer,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
                Source::Gui => "GUI",
                Source::Auto => "AUTO",
                Source::Local => "local",
                Source::Transfer => "TRANSFER",
            }
            .fmt(f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Download,
    Install,
    Uninstall,
    Check,
    ResolveConflicts,
    Add,
    Remove,
    RemoteScan,
    Reboot,
    RestartGui,
    InitializePm,
    RestartPm,
}

impl Verb {
    pub fn parse(text: &str) -> Option<Verb> {
        match text {
            "download" => Some(Verb::Download),
            "install" => Some(Verb::Install),
            "uninstall" => Some(Verb::Uninstall),
            "check" => Some(Verb::Check),
            "resolveConflicts" => Some(Verb::ResolveConflicts),
            "add" => Some(Verb::Add),
            "remove" => Some(Verb::Remove),
            "gitHubScan" => Some(Verb::RemoteScan),
            "reboot" => Some(Verb::Reboot),
            "restartGui" => Some(Verb::RestartGui),
            "INITIALIZE_PM" => Some(Verb::InitializePm),
            "RESTART_PM" => Some(Verb::RestartPm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match *self {
            Verb::Download => "download",
            Verb::Install => "install",
            Verb::Uninstall => "uninstall",
            Verb::Check => "check",
            Verb::ResolveConflicts => "resolveConflicts",
            Verb::Add => "add",
            Verb::Remove => "remove",
            Verb::RemoteScan => "gitHubScan",
            Verb::Reboot => "reboot",
            Verb::RestartGui => "restartGui",
            Verb::InitializePm => "INITIALIZE_PM",
            Verb::RestartPm => "RESTART_PM",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

/// A parsed command bound for a worker queue.
#[derive(Clone, Debug)]
pub struct Command {
    pub verb: Verb,
    pub package: String,
    pub source: Source,
}

/// Worker queue item; `Stop` wakes the queue read so shutdown is prompt.
#[derive(Clone, Debug)]
pub enum QueueItem {
    Stop,
    Run(Command),
}

/// Version-refresher queue item.
#[derive(Clone, Debug)]
pub enum RefreshRequest {
    Stop,
    /// Restart the scan at index 0 with the fast cadence and hold off the
    /// sequencer until the pass completes.
    Refresh,
    /// Fetch one package's remote version ahead of the scan. The name `ALL`
    /// restarts the scan without holding off the sequencer.
    Package { name: String, source: Source },
}

/// The senders feeding the five workers.
#[derive(Clone)]
pub struct Queues {
    pub download: Sender<QueueItem>,
    pub install: Sender<QueueItem>,
    pub add_remove: Sender<QueueItem>,
    pub refresh: Sender<RefreshRequest>,
    pub media: Sender<QueueItem>,
}

pub const DOWNLOAD_QUEUE_SIZE: usize = 50;
pub const INSTALL_QUEUE_SIZE: usize = 10;
pub const ADD_REMOVE_QUEUE_SIZE: usize = 50;
pub const REFRESH_QUEUE_SIZE: usize = 50;
pub const MEDIA_QUEUE_SIZE: usize = 10;

fn enqueue(queue: &Sender<QueueItem>, queue_name: &str, command: Command, source: Source) -> bool {
    let text = format!("{}:{}", command.verb, command.package);
    match queue.try_send(QueueItem::Run(command)) {
        Ok(()) => true,
        Err(..) => {
            error!("command {} from {} lost - {} queue full", text, source, queue_name);
            false
        }
    }
}

/// Route one command. Must be called with the registry locked; the caller
/// passes its guard down so no helper ever re-locks.
///
/// Returns true when the command was accepted.
pub fn push_action(state: &mut State,
                   queues: &Queues,
                   flags: &Flags,
                   config: &Config,
                   command: &str,
                   source: Source)
                   -> bool {
    let mut parts = command.splitn(2, ':');
    let action = parts.next().unwrap_or("");
    let package_name = parts.next().unwrap_or("").trim().to_string();

    let verb = match Verb::parse(action) {
        Some(verb) => verb,
        None => {
            error!("unrecognized command from {}: {}", source, command);
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor,
                                    &format!("unrecognized command '{}'", command));
                state.acknowledge_gui_edit("ERROR", true);
            }
            return false;
        }
    };

    match verb {
        Verb::Download => {
            match state.locate_mut(&package_name) {
                Some(package) => {
                    // refuse a second action while one is outstanding; the
                    // scan re-requests anything that matters
                    if package.pending() {
                        warn!("download of {} refused - action already pending", package_name);
                        return false;
                    }
                    package.download_pending = true;
                }
                None => {
                    error!("push download: {} not in package list", package_name);
                    if source == Source::Gui {
                        state.update_status(StatusTarget::Editor,
                                            &format!("{} not in package list", package_name));
                        state.acknowledge_gui_edit("ERROR", true);
                    }
                    return false;
                }
            }
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor,
                                    &format!("download pending {}", package_name));
            }
            let accepted = enqueue(&queues.download,
                                   "Download",
                                   Command {
                                       verb: verb,
                                       package: package_name.clone(),
                                       source: source,
                                   },
                                   source);
            if !accepted {
                if let Some(package) = state.locate_mut(&package_name) {
                    package.download_pending = false;
                }
            }
            accepted
        }

        Verb::Install | Verb::Uninstall | Verb::Check => {
            // uninstalling the package that contains this process would kill
            // it mid-flight; defer until the main loop has drained
            if verb == Verb::Uninstall && package_name == config.self_package() {
                flags.set_self_uninstall();
                warn!("deferring self uninstall until exit");
                return true;
            }
            match state.locate_mut(&package_name) {
                Some(package) => {
                    if package.install_pending {
                        warn!("{} of {} refused - install already pending", verb, package_name);
                        return false;
                    }
                    // an install blocked on a running download is honored
                    // when the download lands
                    if package.download_pending {
                        if verb == Verb::Install {
                            package.install_after_download = true;
                            return true;
                        }
                        warn!("{} of {} refused - download in progress", verb, package_name);
                        return false;
                    }
                    package.install_pending = true;
                }
                None => {
                    error!("push {}: {} not in package list", verb, package_name);
                    if source == Source::Gui {
                        state.update_status(StatusTarget::Editor,
                                            &format!("{} not in package list", package_name));
                        state.acknowledge_gui_edit("ERROR", true);
                    }
                    return false;
                }
            }
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor,
                                    &format!("{} pending {}", verb, package_name));
            }
            let accepted = enqueue(&queues.install,
                                   "Install",
                                   Command {
                                       verb: verb,
                                       package: package_name.clone(),
                                       source: source,
                                   },
                                   source);
            if !accepted {
                if let Some(package) = state.locate_mut(&package_name) {
                    package.install_pending = false;
                }
            }
            accepted
        }

        Verb::ResolveConflicts => {
            if source == Source::Gui {
                // overwritten by the install/uninstall actions this triggers
                state.update_status(StatusTarget::Editor,
                                    &format!("resolving conflicts for {}", package_name));
            }
            enqueue(&queues.install,
                    "Install",
                    Command {
                        verb: verb,
                        package: package_name,
                        source: source,
                    },
                    source)
        }

        Verb::Add | Verb::Remove => {
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor,
                                    &format!("{} pending {}", verb, package_name));
            }
            enqueue(&queues.add_remove,
                    "AddRemove",
                    Command {
                        verb: verb,
                        package: package_name,
                        source: source,
                    },
                    source)
        }

        Verb::RemoteScan => {
            match queues.refresh.try_send(RefreshRequest::Package {
                name: package_name,
                source: source,
            }) {
                Ok(()) => true,
                Err(..) => {
                    error!("command {} from {} lost - RemoteVersion queue full", command, source);
                    false
                }
            }
        }

        Verb::Reboot => {
            flags.set_system_reboot();
            warn!("received reboot request from {}", source);
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor, "reboot pending");
            }
            true
        }
        Verb::RestartGui => {
            flags.set_gui_restart();
            warn!("received GUI restart request from {}", source);
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor, "GUI restart pending");
            }
            true
        }
        Verb::InitializePm => {
            flags.set_initialize();
            warn!("received initialize request from {}", source);
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor, "initialize pending");
            }
            true
        }
        Verb::RestartPm => {
            flags.set_restart();
            warn!("received restart request from {}", source);
            if source == Source::Gui {
                state.update_status(StatusTarget::Editor, "restart pending");
            }
            true
        }
    }
}
