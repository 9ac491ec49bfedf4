//! The removable-media scanner.
//!
//! Polls the media mount root for newly inserted drives, ingests package
//! archives found in their top level, honors the marker files that arm
//! automatic install/uninstall/restore/eject behavior, and performs
//! settings backup and restore to either removable media or the local data
//! partition. A drive is scanned once per insertion.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use glob::glob;
use tempdir::TempDir;

use bus::{self, BusValue, PropertyBus};
use daemon::Daemon;
use dispatch::QueueItem;
use package::locate_package_dir;
use registry::StatusTarget;
use util::paths;
use version::version_to_number;
use workers::downloader::extract_archive;

const SCAN_DELAY: Duration = Duration::from_secs(5);

/// Archive names must end in `-<suffix>.tar.gz` with an accepted
/// branch/version suffix; anything else on the drive is ignored.
const ACCEPT_SUFFIXES: &'static [&'static str] = &["-current", "-latest", "-main", "-test", "-debug", "-beta",
                                                   "-install", "-0", "-1", "-2", "-3", "-4", "-5", "-6", "-7",
                                                   "-8", "-9"];

pub struct MediaScanner;

impl MediaScanner {
    pub fn run(daemon: &Daemon, queue: Receiver<QueueItem>) {
        let mut already_scanned: Vec<String> = Vec::new();
        let mut auto_restore = false;
        let mut auto_restore_complete = false;
        let mut auto_eject = false;

        loop {
            // the queue only ever carries the stop sentinel; the timeout
            // paces the scan
            match queue.recv_timeout(SCAN_DELAY) {
                Ok(QueueItem::Stop) => return,
                Ok(..) => {}
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }

            let mut automatic_transfers = false;

            // local (data partition) backup file and GUI-triggered local
            // backup/restore
            let local_backup_exists = daemon.config.data_dir().join("settingsBackup").exists();
            {
                let state = daemon.registry.lock("media local backup flags");
                state.bus.publish(bus::BACKUP_SETTINGS_LOCAL_FILE_EXIST,
                                  BusValue::Int(if local_backup_exists {
                                      1
                                  } else {
                                      0
                                  }));
            }
            match backup_progress(daemon) {
                21 => {
                    set_backup_progress(daemon, 23);
                    settings_backup(daemon, daemon.config.data_dir(), true);
                    set_backup_progress(daemon, 0);
                }
                22 => {
                    if local_backup_exists {
                        set_backup_progress(daemon, 24);
                        settings_restore(daemon, daemon.config.data_dir(), true);
                    }
                    set_backup_progress(daemon, 0);
                }
                _ => {}
            }

            let drives = list_drives(daemon.config.media_root());
            {
                let state = daemon.registry.lock("media availability");
                state.bus.publish(bus::BACKUP_MEDIA_AVAILABLE,
                                  BusValue::Int(if drives.is_empty() {
                                      0
                                  } else {
                                      1
                                  }));
                if drives.is_empty() {
                    state.bus.publish(bus::BACKUP_SETTINGS_FILE_EXIST, BusValue::Int(0));
                }
            }

            // removed media may be scanned again when reinserted
            already_scanned.retain(|drive| drives.contains(drive));

            for drive in drives.iter() {
                let drive_path = daemon.config.media_root().join(drive);

                let backup_file_exists = drive_path.join("settingsBackup").exists();
                {
                    let state = daemon.registry.lock("media backup flags");
                    state.bus.publish(bus::BACKUP_SETTINGS_FILE_EXIST,
                                      BusValue::Int(if backup_file_exists {
                                          1
                                      } else {
                                          0
                                      }));
                }

                if drive_path.join("SETTINGS_AUTO_RESTORE").exists() {
                    auto_restore = true;
                }
                if drive_path.join("AUTO_EJECT").exists() {
                    auto_eject = true;
                }
                if drive_path.join("INITIALIZE_PACKAGE_MANAGER").exists() {
                    daemon.flags.set_initialize();
                }
                // auto uninstall overrides auto install
                let mut auto_install_override = false;
                if drive_path.join("AUTO_UNINSTALL_PACKAGES").exists() {
                    daemon.flags.set_media_auto_uninstall();
                } else if drive_path.join("AUTO_INSTALL_PACKAGES").exists() {
                    auto_install_override = true;
                }

                match backup_progress(daemon) {
                    1 => {
                        set_backup_progress(daemon, 3);
                        settings_backup(daemon, &drive_path, false);
                        set_backup_progress(daemon, 0);
                    }
                    2 => {
                        if backup_file_exists {
                            set_backup_progress(daemon, 4);
                            settings_restore(daemon, &drive_path, false);
                            if auto_restore {
                                auto_restore_complete = true;
                                automatic_transfers = true;
                            }
                        }
                        set_backup_progress(daemon, 0);
                    }
                    _ => {
                        if auto_restore && !auto_restore_complete && backup_file_exists {
                            set_backup_progress(daemon, 4);
                            settings_restore(daemon, &drive_path, false);
                            auto_restore_complete = true;
                            automatic_transfers = true;
                            set_backup_progress(daemon, 0);
                        }
                    }
                }

                // a drive scanned once has no new packages to offer
                if already_scanned.contains(drive) {
                    continue;
                }
                let pattern = format!("{}/*.tar.gz", drive_path.display());
                if let Ok(entries) = glob(&pattern) {
                    for entry in entries.filter_map(|e| e.ok()) {
                        if entry.is_dir() {
                            continue;
                        }
                        let base = entry.file_name()
                            .map(|f| f.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        if ACCEPT_SUFFIXES.iter().any(|accept| base.contains(accept)) {
                            if transfer_package(daemon, &entry, auto_install_override) {
                                automatic_transfers = true;
                            }
                        } else {
                            warn!("{} not a valid archive name - rejected", entry.display());
                        }
                    }
                }
                already_scanned.push(drive.clone());
            }

            // ejects ALL removable media whether or not it was involved in
            // the transfers
            if automatic_transfers && auto_eject {
                warn!("automatic media transfers have occurred, ejecting ALL removable media");
                let state = daemon.registry.lock("media eject");
                state.bus.publish(bus::MEDIA_MOUNT_STATE, BusValue::Int(2));
            }

            if drives.is_empty() {
                auto_restore = false;
                auto_eject = false;
                auto_restore_complete = false;
            }
        }
    }
}

fn list_drives(media_root: &Path) -> Vec<String> {
    let mut drives = Vec::new();
    if let Ok(entries) = fs::read_dir(media_root) {
        for entry in entries.filter_map(|e| e.ok()) {
            if let Ok(name) = entry.file_name().into_string() {
                drives.push(name);
            }
        }
    }
    drives.sort();
    drives
}

fn backup_progress(daemon: &Daemon) -> i64 {
    let state = daemon.registry.lock("media progress");
    state.bus.read(bus::BACKUP_PROGRESS).map(|v| v.as_int()).unwrap_or(0)
}

fn set_backup_progress(daemon: &Daemon, value: i64) {
    let state = daemon.registry.lock("media progress set");
    state.bus.publish(bus::BACKUP_PROGRESS, BusValue::Int(value));
}

fn media_status(daemon: &Daemon, message: &str) {
    let state = daemon.registry.lock("media status");
    state.update_status(StatusTarget::Media, message);
}

/// Unpack one archive from removable media and swap it into the storage
/// tree. The transfer is skipped when the archive holds the version already
/// stored. Returns true when a package actually moved.
pub fn transfer_package(daemon: &Daemon, archive: &Path, auto_install_override: bool) -> bool {
    let base = archive.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let package_name = base.split('-').next().unwrap_or("").to_string();

    let scratch = match TempDir::new_in(daemon.config.data_dir(), "pm-media") {
        Ok(scratch) => scratch,
        Err(e) => {
            error!("could not create media scratch directory: {}", e);
            return false;
        }
    };

    if let Err(e) = extract_archive(archive, scratch.path()) {
        error!("could not unpack {} from removable media: {}", package_name, e);
        media_status(daemon,
                     &format!("could not unpack {} from removable media", package_name));
        thread::sleep(Duration::from_secs(5));
        media_status(daemon, "");
        return false;
    }

    let unpacked = match locate_package_dir(scratch.path()) {
        Some(unpacked) => unpacked,
        None => {
            warn!("{} archive doesn't contain a package directory - rejected", package_name);
            thread::sleep(Duration::from_secs(5));
            media_status(daemon, "");
            return false;
        }
    };

    // proceed only when the versions differ
    let package_path = daemon.config.package_dir(&package_name);
    let stored = paths::read_first_line(&package_path.join("version"))
        .map(|v| version_to_number(&v))
        .unwrap_or(0);
    let unpacked_version = paths::read_first_line(&unpacked.join("version"))
        .map(|v| version_to_number(&v))
        .unwrap_or(0);
    if stored == unpacked_version {
        warn!("transfer: {} versions are the same - skipping transfer", package_name);
        media_status(daemon, "");
        return false;
    }

    media_status(daemon,
                 &format!("transferring {} from removable media", package_name));
    let aside = daemon.config.data_dir().join(format!("{}-temp", package_name));
    if aside.exists() {
        let _ = fs::remove_dir_all(&aside);
    }
    let swapped = {
        let _state = daemon.registry.lock("media transfer");
        swap_into_place(&unpacked, &package_path, &aside)
    };
    if let Err(e) = swapped {
        error!("transfer: couldn't relocate {}: {}", package_name, e);
        media_status(daemon, "");
        return false;
    }
    // a one-time install happens even when auto install is disabled; the
    // marker is consumed when honored
    if auto_install_override {
        warn!("auto install - setting one-time install for {}", package_name);
        let _ = paths::touch(&package_path.join("ONE_TIME_INSTALL"));
    }
    if aside.exists() {
        let _ = fs::remove_dir_all(&aside);
    }

    thread::sleep(Duration::from_secs(5));
    media_status(daemon, "");
    true
}

/// Rename the existing tree aside, then move the new one in; on failure the
/// old tree is put back. Must be called with the registry locked.
fn swap_into_place(unpacked: &Path, package_path: &Path, aside: &Path) -> ::std::io::Result<()> {
    if package_path.exists() {
        fs::rename(package_path, aside)?;
    }
    if let Err(e) = fs::rename(unpacked, package_path) {
        if aside.exists() {
            let _ = fs::rename(aside, package_path);
        }
        return Err(e);
    }
    Ok(())
}

/// Write the settings CSV (`path,value,typeId`) for every bus path listed
/// in the settings list file, and copy the options tree alongside unless
/// only settings were asked for.
pub fn settings_backup(daemon: &Daemon, backup_path: &Path, settings_only: bool) {
    let list_path = daemon.config.settings_list();
    if !list_path.exists() {
        error!("{} does not exist - can't backup settings", list_path.display());
        return;
    }
    let listing = match paths::read(&list_path) {
        Ok(listing) => listing,
        Err(e) => {
            error!("settings backup - could not read settings list: {}", e);
            return;
        }
    };

    let mut settings_count = 0;
    let mut lines = String::new();
    {
        let state = daemon.registry.lock("settings backup");
        for setting in listing.lines() {
            let setting = setting.trim();
            if setting.is_empty() {
                continue;
            }
            let value = match state.bus.read(setting) {
                Some(value) => value,
                None => continue,
            };
            lines.push_str(&format!("{},{},{}\n", setting, value.as_text(), value.type_id()));
            settings_count += 1;
        }
    }
    if let Err(e) = paths::write(&backup_path.join("settingsBackup"), lines.as_bytes()) {
        error!("settings backup - settings write failure: {}", e);
        return;
    }

    let mut options_copied = "no options";
    if !settings_only {
        let options_src = daemon.config.data_dir().join("setupOptions");
        let options_dst = backup_path.join("setupOptions");
        paths::remove_dir_if_exists(&options_dst);
        if options_src.is_dir() {
            match paths::copy_tree(&options_src, &options_dst) {
                Ok(()) => options_copied = "options",
                Err(e) => error!("settings backup - options write failure: {}", e),
            }
        }
    }

    warn!("settings backup completed - {} settings, {}", settings_count, options_copied);
}

/// Recreate bus values from a settings CSV and put the options tree back.
pub fn settings_restore(daemon: &Daemon, backup_path: &Path, settings_only: bool) {
    let backup_file = backup_path.join("settingsBackup");
    let contents = match paths::read(&backup_file) {
        Ok(contents) => contents,
        Err(..) => {
            error!("{} does not exist - can't restore settings", backup_file.display());
            return;
        }
    };

    let mut settings_count = 0;
    {
        let mut state = daemon.registry.lock("settings restore");
        for line in contents.lines() {
            let parts: Vec<&str> = line.trim().split(',').collect();
            let (path, value) = match parts.len() {
                n if n >= 3 => {
                    let type_id = parts[2].chars().next().unwrap_or('s');
                    match BusValue::from_text(type_id, parts[1]) {
                        Some(value) => (parts[0], value),
                        None => {
                            error!("settings restore: invalid line in file {}", line);
                            continue;
                        }
                    }
                }
                2 => (parts[0], BusValue::Str(parts[1].to_string())),
                _ => {
                    error!("settings restore: invalid line in file {}", line);
                    continue;
                }
            };
            state.bus.publish(path, value.clone());
            // our own knobs round-trip into the settings document
            if path == format!("{}/GitHubAutoDownload", bus::SETTINGS_PREFIX) {
                state.settings.auto_download = value.as_int();
                state.save_settings();
            } else if path == format!("{}/AutoInstall", bus::SETTINGS_PREFIX) {
                state.settings.auto_install = value.as_int() != 0;
                state.save_settings();
            }
            settings_count += 1;
        }
    }

    if !settings_only {
        let options_src = backup_path.join("setupOptions");
        let options_dst = daemon.config.data_dir().join("setupOptions");
        if options_src.is_dir() {
            paths::remove_dir_if_exists(&options_dst);
            if let Err(e) = paths::copy_tree(&options_src, &options_dst) {
                error!("settings restore: options restore failed: {}", e);
            }
        }
    }

    warn!("settings restore completed - {} settings", settings_count);
}
