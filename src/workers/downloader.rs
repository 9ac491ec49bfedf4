//! The package downloader.
//!
//! Consumes `download:<name>` items: fetch the archive for the package's
//! remote coordinates, extract it, find the package directory inside the
//! tree and swap it into `<data>/<name>`. The swap uses a
//! rename-aside-then-move-in pattern under the registry lock so there is no
//! moment at which the package directory is partially populated.

use std::fs;
use std::path::Path;
use std::time::Duration;

use crossbeam::channel::Receiver;
use flate2::read::GzDecoder;
use tar::Archive;
use tempdir::TempDir;

use compat;
use daemon::Daemon;
use dispatch::{QueueItem, Source, Verb, push_action};
use package::locate_package_dir;
use registry::StatusTarget;
use util::{PackdResult, ChainError, human, internal, network};

const FETCH_TIMEOUT: Duration = Duration::from_secs(120);

pub struct Downloader;

impl Downloader {
    pub fn run(daemon: &Daemon, queue: Receiver<QueueItem>) {
        loop {
            let command = match queue.recv() {
                Ok(QueueItem::Stop) => return,
                Ok(QueueItem::Run(command)) => command,
                Err(..) => return,
            };
            if command.verb != Verb::Download {
                error!("received invalid command on download queue: {}", command.verb);
                continue;
            }
            download(daemon, &command.package, command.source);
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

/// Download one package. Failures are logged, the pending flag cleared and
/// a GUI request acknowledged with `ERROR`; the next scan retries
/// automatic downloads implicitly.
fn download(daemon: &Daemon, name: &str, source: Source) {
    let target = status_target(source);

    let coordinates = {
        let mut state = daemon.registry.lock("download coordinates");
        match state.locate(name) {
            Some(package) => Some((package.user.clone(), package.branch.clone())),
            None => {
                error!("download: {} not in package list", name);
                if source == Source::Gui {
                    state.update_status(StatusTarget::Editor,
                                        &format!("{} not in package list", name));
                    state.acknowledge_gui_edit("ERROR", false);
                }
                None
            }
        }
    };
    let (user, branch) = match coordinates {
        Some(c) => c,
        None => return,
    };

    if let Some(target) = target {
        let state = daemon.registry.lock("download status");
        state.update_status(target, &format!("downloading {}", name));
    }

    let result = fetch_and_swap(daemon, name, &user, &branch);

    let mut install_after = false;
    {
        let mut state = daemon.registry.lock("download commit");
        if let Some(index) = state.locate_index(name) {
            // save the install-after flag for later, then clear it
            install_after = state.packages[index].install_after_download && result.is_ok();
            {
                let package = &mut state.packages[index];
                package.install_after_download = false;
                package.download_pending = false;
            }
            if result.is_ok() {
                if install_after {
                    compat::update_versions_and_flags(&mut state, index, &daemon.config, false, false);
                    warn!("install after download requested for {}", name);
                    push_action(&mut state,
                                &daemon.queues,
                                &daemon.flags,
                                &daemon.config,
                                &format!("install:{}", name),
                                source);
                } else {
                    let needs_check = compat::update_versions_and_flags(&mut state,
                                                                        index,
                                                                        &daemon.config,
                                                                        true,
                                                                        true);
                    if needs_check {
                        push_action(&mut state,
                                    &daemon.queues,
                                    &daemon.flags,
                                    &daemon.config,
                                    &format!("check:{}", name),
                                    Source::Auto);
                    }
                }
            }
        }

        match result {
            Ok(()) => {
                if let Some(target) = target {
                    state.update_status(target, "");
                }
                // don't ack success if there's more to do
                if source == Source::Gui && !install_after {
                    state.acknowledge_gui_edit("", false);
                }
            }
            Err(e) => {
                error!("could not download {} {} {}: {}", name, user, branch, e);
                if let Some(target) = target {
                    state.update_status(target, &format!("could not download {}", name));
                }
                if source == Source::Gui {
                    state.acknowledge_gui_edit("ERROR", false);
                }
            }
        }
    }
}

/// Fetch the archive, extract it and swap the contained package directory
/// into place. Partial artifacts live in a scratch directory on the data
/// partition (renames must not cross filesystems) and are cleaned up when
/// the scratch directory drops.
fn fetch_and_swap(daemon: &Daemon, name: &str, user: &str, branch: &str) -> PackdResult<()> {
    let scratch = TempDir::new_in(daemon.config.data_dir(), "pm-download")?;

    let url = daemon.config.archive_url(user, name, branch)?;
    let archive_path = scratch.path().join("archive.tar.gz");
    network::fetch_file(url.as_str(), &archive_path, FETCH_TIMEOUT)
        .chain_error(|| human(format!("could not access archive for {} on the package server", name)))?;

    extract_archive(&archive_path, scratch.path())
        .chain_error(|| human(format!("could not unpack {} {} {}", name, user, branch)))?;

    let unpacked = locate_package_dir(scratch.path())
        .chain_error(|| human(format!("no package directory in archive for {}", name)))?;

    let package_path = daemon.config.package_dir(name);
    let aside = daemon.config.data_dir().join(format!("{}-temp", name));
    if aside.exists() {
        let _ = fs::remove_dir_all(&aside);
    }

    // the swap itself happens under the lock so nothing reads a
    // half-populated package directory
    {
        let _state = daemon.registry.lock("download swap");
        if package_path.exists() {
            fs::rename(&package_path, &aside)?;
        }
        if let Err(e) = fs::rename(&unpacked, &package_path) {
            // put the old tree back before giving up
            if aside.exists() {
                let _ = fs::rename(&aside, &package_path);
            }
            return Err(internal(format!("couldn't update {}: {}", name, e)));
        }
    }
    if aside.exists() {
        let _ = fs::remove_dir_all(&aside);
    }
    Ok(())
}

pub fn extract_archive(archive: &Path, destination: &Path) -> PackdResult<()> {
    let file = fs::File::open(archive)?;
    let gz = GzDecoder::new(file);
    let mut tar = Archive::new(gz);
    tar.unpack(destination)?;
    Ok(())
}
