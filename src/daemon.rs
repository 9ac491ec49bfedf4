//! The daemon context: global lifecycle flags, worker spawn and join, the
//! bus-change inlet and the startup/shutdown paths.

use std::fs::{self, File};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError};
use fs2::FileExt;
use libc;

use bus::{self, BusValue, PropertyBus, StoredSettings};
use compat;
use dispatch::{self, QueueItem, Queues, RefreshRequest, Source, push_action};
use package::package_name_valid;
use registry::{Registry, StatusTarget};
use sequencer::{Sequencer, Tick};
use util::{Config, PackdResult, ChainError, human, paths, process};
use workers::{AddRemove, Downloader, Installer, MediaScanner, Refresher};
use workers::addremove::add_stored_packages;

// Signal state. TERM asks for a restart; CONT arriving after TERM means the
// supervisor is taking the service down rather than restarting it.
static TERM_RECEIVED: AtomicBool = AtomicBool::new(false);
static SHUTDOWN_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_sigterm(_: libc::c_int) {
    TERM_RECEIVED.store(true, Ordering::SeqCst);
}

extern "C" fn on_sigcont(_: libc::c_int) {
    if TERM_RECEIVED.load(Ordering::SeqCst) {
        SHUTDOWN_RECEIVED.store(true, Ordering::SeqCst);
    }
}

pub fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM,
                     on_sigterm as extern "C" fn(libc::c_int) as libc::sighandler_t);
        libc::signal(libc::SIGCONT,
                     on_sigcont as extern "C" fn(libc::c_int) as libc::sighandler_t);
    }
}

/// Global lifecycle flags. Cheap single-writer booleans read from many
/// threads, so they are atomics rather than registry state.
#[derive(Default)]
pub struct Flags {
    system_reboot: AtomicBool,
    gui_restart: AtomicBool,
    restart: AtomicBool,
    shutdown: AtomicBool,
    initialize: AtomicBool,
    self_uninstall: AtomicBool,
    wait_for_remote_versions: AtomicBool,
    media_auto_uninstall: AtomicBool,
}

impl Flags {
    pub fn set_system_reboot(&self) {
        self.system_reboot.store(true, Ordering::SeqCst);
    }
    pub fn system_reboot(&self) -> bool {
        self.system_reboot.load(Ordering::SeqCst)
    }
    pub fn set_gui_restart(&self) {
        self.gui_restart.store(true, Ordering::SeqCst);
    }
    pub fn gui_restart(&self) -> bool {
        self.gui_restart.load(Ordering::SeqCst)
    }
    pub fn set_restart(&self) {
        self.restart.store(true, Ordering::SeqCst);
    }
    pub fn restart(&self) -> bool {
        self.restart.load(Ordering::SeqCst)
    }
    pub fn set_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
    pub fn shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
    pub fn set_initialize(&self) {
        self.initialize.store(true, Ordering::SeqCst);
    }
    pub fn initialize(&self) -> bool {
        self.initialize.load(Ordering::SeqCst)
    }
    pub fn set_self_uninstall(&self) {
        self.self_uninstall.store(true, Ordering::SeqCst);
    }
    pub fn self_uninstall(&self) -> bool {
        self.self_uninstall.load(Ordering::SeqCst)
    }
    pub fn set_wait_for_remote_versions(&self, value: bool) {
        self.wait_for_remote_versions.store(value, Ordering::SeqCst);
    }
    pub fn wait_for_remote_versions(&self) -> bool {
        self.wait_for_remote_versions.load(Ordering::SeqCst)
    }
    pub fn set_media_auto_uninstall(&self) {
        self.media_auto_uninstall.store(true, Ordering::SeqCst);
    }
    pub fn media_auto_uninstall(&self) -> bool {
        self.media_auto_uninstall.load(Ordering::SeqCst)
    }

    /// Whether any lifecycle action is waiting for the pipeline to drain.
    pub fn exit_requested(&self) -> bool {
        self.system_reboot() || self.gui_restart() || self.restart() || self.shutdown() ||
        self.initialize() || self.self_uninstall() || self.media_auto_uninstall()
    }
}

/// The receivers handed to the worker threads at spawn time.
pub struct WorkerChannels {
    pub download: Receiver<QueueItem>,
    pub install: Receiver<QueueItem>,
    pub add_remove: Receiver<QueueItem>,
    pub refresh: Receiver<RefreshRequest>,
    pub media: Receiver<QueueItem>,
}

pub struct Daemon {
    pub config: Config,
    pub registry: Registry,
    pub flags: Flags,
    pub queues: Queues,
    // held for the lifetime of the process so a second instance cannot
    // start against the same data partition
    _instance_lock: File,
}

#[derive(PartialEq)]
enum Repair {
    Invalid,
    Forced,
    Duplicate,
}

impl Daemon {
    pub fn new(config: Config, property_bus: Box<PropertyBus>) -> PackdResult<(Daemon, WorkerChannels)> {
        if !config.data_dir().is_dir() {
            fs::create_dir_all(config.data_dir())?;
        }
        let instance_lock = File::create(config.instance_lock_path())?;
        instance_lock.try_lock_exclusive()
            .chain_error(|| human("another package manager instance is already running"))?;

        let settings_path = config.settings_path();
        let settings = match StoredSettings::load(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("could not load settings: {} - starting clean", e);
                StoredSettings::default()
            }
        };

        let (download_tx, download_rx) = bounded(dispatch::DOWNLOAD_QUEUE_SIZE);
        let (install_tx, install_rx) = bounded(dispatch::INSTALL_QUEUE_SIZE);
        let (add_remove_tx, add_remove_rx) = bounded(dispatch::ADD_REMOVE_QUEUE_SIZE);
        let (refresh_tx, refresh_rx) = bounded(dispatch::REFRESH_QUEUE_SIZE);
        let (media_tx, media_rx) = bounded(dispatch::MEDIA_QUEUE_SIZE);

        let daemon = Daemon {
            registry: Registry::new(property_bus, settings, settings_path),
            config: config,
            flags: Flags::default(),
            queues: Queues {
                download: download_tx,
                install: install_tx,
                add_remove: add_remove_tx,
                refresh: refresh_tx,
                media: media_tx,
            },
            _instance_lock: instance_lock,
        };
        let channels = WorkerChannels {
            download: download_rx,
            install: install_rx,
            add_remove: add_remove_rx,
            refresh: refresh_rx,
            media: media_rx,
        };
        Ok((daemon, channels))
    }

    /// Translate pending signals into lifecycle flags; called once per tick.
    pub fn poll_signals(&self) {
        if TERM_RECEIVED.load(Ordering::SeqCst) {
            self.flags.set_restart();
        }
        if SHUTDOWN_RECEIVED.load(Ordering::SeqCst) {
            self.flags.set_shutdown();
        }
    }

    /// Build the runtime state: publish the static service leaves, rebuild
    /// the package list from the settings document, repair it, pick up
    /// stored packages and run one full flags pass.
    pub fn init(&self) {
        {
            let mut state = self.registry.lock("init");
            state.bus.publish(bus::PLATFORM,
                              BusValue::Str(self.config.platform().to_string()));
            state.bus.publish(bus::PM_STATUS, BusValue::Str(String::new()));
            state.bus.publish(bus::GUI_EDIT_STATUS, BusValue::Str(String::new()));
            state.bus.publish(bus::GUI_EDIT_ACTION, BusValue::Str(String::new()));
            state.bus.publish(bus::MEDIA_UPDATE_STATUS, BusValue::Str(String::new()));
            state.bus.publish(bus::ACTION_NEEDED, BusValue::Str(String::new()));
            state.bus.publish(bus::BACKUP_PROGRESS, BusValue::Int(0));
            state.bus.publish(bus::BACKUP_MEDIA_AVAILABLE, BusValue::Int(0));
            state.bus.publish(bus::BACKUP_SETTINGS_FILE_EXIST, BusValue::Int(0));
            state.bus.publish(bus::BACKUP_SETTINGS_LOCAL_FILE_EXIST, BusValue::Int(0));
            state.load_packages_from_settings();
            state.publish_settings();
            state.read_default_package_list(&self.config);
        }

        self.startup_repair();
        add_stored_packages(self);

        let mut state = self.registry.lock("init flags");
        for index in 0..state.count() {
            compat::update_versions_and_flags(&mut state, index, &self.config, true, false);
        }
        state.update_default_packages();
    }

    /// Remove invalid names, duplicates and force-removed packages left
    /// over from earlier runs. Runs before the workers start, so taking and
    /// releasing the lock per entry is free of races.
    fn startup_repair(&self) {
        loop {
            let plan = {
                let state = self.registry.lock("startup repair");
                let mut seen: Vec<String> = Vec::new();
                let mut plan = None;
                for (index, package) in state.packages.iter().enumerate() {
                    let name = package.name().to_string();
                    if !package_name_valid(&name) {
                        plan = Some((index, name, Repair::Invalid));
                        break;
                    }
                    if self.config.options_dir(&name).join("FORCE_REMOVE").exists() {
                        plan = Some((index, name, Repair::Forced));
                        break;
                    }
                    if seen.contains(&name) {
                        plan = Some((index, name, Repair::Duplicate));
                        break;
                    }
                    seen.push(name);
                }
                plan
            };

            let (index, name, repair) = match plan {
                Some(plan) => plan,
                None => return,
            };
            match repair {
                Repair::Invalid => {
                    warn!("removing package with invalid name {}", name);
                }
                Repair::Forced => {
                    paths::remove_file_if_exists(&self.config.options_dir(&name).join("FORCE_REMOVE"));
                    if self.config.installed_version_file(&name).exists() {
                        warn!("uninstalling {} prior to forced remove", name);
                        self.direct_uninstall(&name);
                    }
                    warn!("forced remove of {}", name);
                }
                Repair::Duplicate => {
                    warn!("removing duplicate {}", name);
                }
            }
            let mut state = self.registry.lock("startup repair remove");
            state.remove_package_at(index, repair == Repair::Duplicate, &self.config);
        }
    }

    /// Uninstall a package with a direct call to its setup program,
    /// bypassing the queues. Used by the startup repair pass and the
    /// uninstall-all exit path; never once the workers are running.
    pub fn direct_uninstall(&self, name: &str) {
        if name == self.config.self_package() {
            self.flags.set_self_uninstall();
            return;
        }
        let setup = self.config.setup_file(name);
        if !self.config.package_dir(name).is_dir() || !paths::is_executable(&setup) {
            return;
        }
        match process(&setup).arg("uninstall").arg("runFromPm").exec_capture() {
            Ok(output) => {
                match output.status.code() {
                    Some(123) => self.flags.set_system_reboot(),
                    Some(124) => self.flags.set_gui_restart(),
                    _ => {}
                }
            }
            Err(e) => {
                error!("could not uninstall {}: {}", name, e);
            }
        }
    }

    /// The watch half of the property-bus contract: the embedding runtime
    /// forwards every external write here.
    pub fn bus_changed(&self, path: &str, value: &BusValue) {
        if path == bus::GUI_EDIT_ACTION {
            let command = value.as_text();
            // a blank command is the acknowledgement clearing the path
            if command.is_empty() {
                return;
            }
            let mut state = self.registry.lock("gui edit action");
            push_action(&mut state,
                        &self.queues,
                        &self.flags,
                        &self.config,
                        &command,
                        Source::Gui);
            return;
        }
        if path == bus::BACKUP_PROGRESS {
            let state = self.registry.lock("backup progress");
            state.bus.publish(bus::BACKUP_PROGRESS, value.clone());
            return;
        }
        if !path.starts_with(bus::SETTINGS_PREFIX) {
            return;
        }
        let leaf = &path[bus::SETTINGS_PREFIX.len()..];
        match leaf {
            "/GitHubAutoDownload" => {
                let mut state = self.registry.lock("settings download mode");
                state.settings.auto_download = value.as_int();
                state.save_settings();
                state.publish_settings();
            }
            "/AutoInstall" => {
                let mut state = self.registry.lock("settings auto install");
                state.settings.auto_install = value.as_int() != 0;
                state.save_settings();
                state.publish_settings();
            }
            "/Edit/PackageName" => {
                self.registry.lock("settings edit").edit.name = value.as_text();
            }
            "/Edit/GitHubUser" => {
                self.registry.lock("settings edit").edit.user = value.as_text();
            }
            "/Edit/GitHubBranch" => {
                self.registry.lock("settings edit").edit.branch = value.as_text();
            }
            _ => {
                // /<index>/GitHubUser or /<index>/GitHubBranch
                let mut parts = leaf.trim_matches('/').split('/');
                let index: usize = match parts.next().and_then(|p| p.parse().ok()) {
                    Some(index) => index,
                    None => return,
                };
                let field = parts.next().unwrap_or("");
                let mut state = self.registry.lock("settings coordinates");
                if index >= state.packages.len() {
                    return;
                }
                let name = state.packages[index].name().to_string();
                {
                    let state = &mut *state;
                    let package = &mut state.packages[index];
                    match field {
                        "GitHubUser" => package.set_user(&*state.bus, &value.as_text()),
                        "GitHubBranch" => package.set_branch(&*state.bus, &value.as_text()),
                        _ => return,
                    }
                }
                state.persist_coordinates(index);
                // the new coordinates deserve a fresh remote version
                let _ = self.queues.refresh.try_send(RefreshRequest::Package {
                    name: name,
                    source: Source::Local,
                });
            }
        }
    }
}

/// Spawn the five workers, drive the sequencer at one hertz until a
/// lifecycle flag fires and then run the shutdown path.
pub fn run(daemon: &Arc<Daemon>, channels: WorkerChannels) -> PackdResult<()> {
    let (done_tx, done_rx) = bounded::<&'static str>(8);

    {
        let daemon = daemon.clone();
        let queue = channels.refresh;
        let done = done_tx.clone();
        let _ = thread::Builder::new().name("refresher".to_string())
            .spawn(move || {
                Refresher::run(&daemon, queue);
                let _ = done.send("refresher");
            })?;
    }
    {
        let daemon = daemon.clone();
        let queue = channels.download;
        let done = done_tx.clone();
        let _ = thread::Builder::new().name("downloader".to_string())
            .spawn(move || {
                Downloader::run(&daemon, queue);
                let _ = done.send("downloader");
            })?;
    }
    {
        let daemon = daemon.clone();
        let queue = channels.install;
        let done = done_tx.clone();
        let _ = thread::Builder::new().name("installer".to_string())
            .spawn(move || {
                Installer::run(&daemon, queue);
                let _ = done.send("installer");
            })?;
    }
    {
        let daemon = daemon.clone();
        let queue = channels.add_remove;
        let done = done_tx.clone();
        let _ = thread::Builder::new().name("add-remove".to_string())
            .spawn(move || {
                AddRemove::run(&daemon, queue);
                let _ = done.send("add-remove");
            })?;
    }
    {
        let daemon = daemon.clone();
        let queue = channels.media;
        let done = done_tx.clone();
        let _ = thread::Builder::new().name("media-scan".to_string())
            .spawn(move || {
                MediaScanner::run(&daemon, queue);
                let _ = done.send("media-scan");
            })?;
    }

    let mut sequencer = Sequencer::new();
    loop {
        let started = Instant::now();
        if sequencer.tick(daemon) == Tick::Exit {
            break;
        }
        let elapsed = started.elapsed();
        if elapsed < Duration::from_secs(1) {
            thread::sleep(Duration::from_secs(1) - elapsed);
        }
    }

    shutdown(daemon, &done_rx);
    Ok(())
}

fn shutdown(daemon: &Daemon, done: &Receiver<&'static str>) {
    let flags = &daemon.flags;

    let message = if flags.media_auto_uninstall() {
        "UNINSTALLING ALL PACKAGES & REBOOTING ..."
    } else if flags.self_uninstall() {
        "UNINSTALLING package manager ..."
    } else if flags.initialize() && flags.system_reboot() {
        "initializing and REBOOTING ..."
    } else if flags.initialize() {
        "initializing and restarting package manager ..."
    } else if flags.system_reboot() {
        "REBOOTING SYSTEM ..."
    } else if flags.gui_restart() {
        "restarting GUI and package manager ..."
    } else if flags.shutdown() {
        "shutting down package manager ..."
    } else {
        "restarting package manager ..."
    };
    warn!(">>>> {}", message);
    {
        let mut state = daemon.registry.lock("shutdown status");
        state.bus.publish(bus::ACTION_NEEDED, BusValue::Str(String::new()));
        state.update_status(StatusTarget::PmStatus, message);
        state.update_status(StatusTarget::Editor, message);
        state.acknowledge_gui_edit("", false);
    }

    // wake every worker with a sentinel, then give them a moment; a worker
    // stuck in a long transfer is abandoned since the process is exiting
    warn!("stopping threads");
    let _ = daemon.queues.refresh.try_send(RefreshRequest::Stop);
    let _ = daemon.queues.download.try_send(QueueItem::Stop);
    let _ = daemon.queues.install.try_send(QueueItem::Stop);
    let _ = daemon.queues.add_remove.try_send(QueueItem::Stop);
    let _ = daemon.queues.media.try_send(QueueItem::Stop);

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut finished = 0;
    while finished < 5 && Instant::now() < deadline {
        match done.recv_timeout(Duration::from_millis(100)) {
            Ok(..) => finished += 1,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    if finished < 5 {
        error!("one or more threads failed to exit");
    }

    // initializing wipes the persisted package list; it is rebuilt from the
    // storage tree on the next start (user coordinates are lost)
    if flags.initialize() {
        let mut state = daemon.registry.lock("shutdown initialize");
        state.settings.packages.clear();
        state.save_settings();
    }

    // blanket uninstall armed from removable media
    if flags.media_auto_uninstall() {
        if let Ok(entries) = fs::read_dir(daemon.config.data_dir()) {
            for entry in entries.filter_map(|e| e.ok()) {
                if let Ok(name) = entry.file_name().into_string() {
                    daemon.direct_uninstall(&name);
                }
            }
        }
        flags.set_system_reboot();
    }

    // the self uninstall and the reboot/GUI restart must happen after this
    // process exits; the finish script runs detached and outlives us
    if flags.system_reboot() || flags.gui_restart() || flags.self_uninstall() {
        let script = daemon.config.finish_script();
        if script.exists() {
            let mut command = process(&script);
            if flags.self_uninstall() {
                command.arg("selfUninstall");
            }
            if flags.system_reboot() {
                command.arg("reboot");
            } else if flags.gui_restart() {
                command.arg("guiRestart");
            }
            warn!("finishing up in {}", script.display());
            if let Err(e) = command.spawn_detached() {
                error!("could not run finish script: {}", e);
            }
        } else {
            error!("no finish script at {} - deferred actions dropped", script.display());
        }
    }

    warn!(">>>> package manager exiting");
}
