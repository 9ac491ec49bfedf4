//! The remote-version refresher.
//!
//! A single worker keeps the remote version of every package current.
//! Background fetches are driven by the queue's idle timeout so network
//! traffic is spaced out: one package per timeout, with the delay chosen so
//! a full pass completes within the user-selected refresh period. A
//! priority request jumps a single package ahead of the scan.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};

use daemon::Daemon;
use dispatch::{RefreshRequest, Source};
use util::{clock, network};

/// Delay between fetches while a full forced pass is running.
const FAST_REFRESH: Duration = Duration::from_millis(250);

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A GUI-triggered refresh is skipped when the version is younger than
/// this, so menu navigation does not hammer the network.
const GUI_REFRESH_HOLDOFF: u64 = 30;

pub struct Refresher;

impl Refresher {
    pub fn run(daemon: &Daemon, queue: Receiver<RefreshRequest>) {
        let mut cursor = 0;
        let mut forced_refresh = true;
        let mut package_count = 0;

        loop {
            let mode = daemon.registry.lock("refresher mode").settings.download_mode();

            // fast cadence until one full pass has completed, then spread
            // the fetches over the selected refresh period
            let delay = if forced_refresh {
                FAST_REFRESH
            } else if package_count != 0 {
                mode.refresh_period() / package_count as u32
            } else {
                mode.refresh_period()
            };

            let request = match queue.recv_timeout(delay) {
                Ok(request) => Some(request),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            };

            let mut fetch: Option<(String, String, String)> = None;

            match request {
                Some(RefreshRequest::Stop) => return,
                Some(RefreshRequest::Refresh) => {
                    // hold off sequencer decisions until the pass completes
                    cursor = 0;
                    forced_refresh = true;
                    daemon.flags.set_wait_for_remote_versions(true);
                }
                Some(RefreshRequest::Package { name, source }) => {
                    if source == Source::Gui {
                        // acknowledge right away to minimize the time the
                        // GUI is held off
                        let mut state = daemon.registry.lock("refresher ack");
                        state.acknowledge_gui_edit("", false);
                        drop(state);
                    }
                    if name == "ALL" {
                        if !forced_refresh {
                            cursor = 0;
                            forced_refresh = true;
                        }
                    } else if name.is_empty() {
                        error!("missing name in remote version refresh request from {}", source);
                    } else {
                        let state = daemon.registry.lock("refresher priority");
                        match state.locate(&name) {
                            Some(package) => {
                                let recently = package.last_remote_refresh + GUI_REFRESH_HOLDOFF >
                                               clock::now_secs();
                                if source != Source::Gui || package.remote_version.is_empty() || !recently {
                                    fetch = Some((name.clone(),
                                                  package.user.clone(),
                                                  package.branch.clone()));
                                }
                            }
                            None => {
                                error!("can't fetch remote version - {} not in package list", name);
                            }
                        }
                    }
                }
                None => {}
            }

            // no priority work: advance the background scan
            if fetch.is_none() && (forced_refresh || mode.auto_downloads()) {
                let state = daemon.registry.lock("refresher scan");
                package_count = state.count();
                if package_count == 0 {
                    cursor = 0;
                } else if cursor < package_count {
                    let package = &state.packages[cursor];
                    fetch = Some((package.name().to_string(), package.user.clone(), package.branch.clone()));
                    cursor += 1;
                }
                if cursor >= package_count {
                    // pass complete; decisions may be made against these
                    // versions again
                    cursor = 0;
                    forced_refresh = false;
                    daemon.flags.set_wait_for_remote_versions(false);
                }
            }

            // the fetch happens outside the lock
            if let Some((name, user, branch)) = fetch {
                update_remote_version(daemon, &name, &user, &branch);
            }
        }
    }
}

/// Fetch one package's remote version and store it. Any failure - bad
/// coordinates, no network - records the version as unknown.
fn update_remote_version(daemon: &Daemon, name: &str, user: &str, branch: &str) {
    let fetched = daemon.config
        .version_url(user, name, branch)
        .and_then(|url| network::fetch_text(url.as_str(), FETCH_TIMEOUT));
    let version = match fetched {
        Ok(version) => version,
        Err(e) => {
            debug!("remote version fetch failed for {}: {}", name, e);
            String::new()
        }
    };

    let mut state = daemon.registry.lock("refresher update");
    let state = &mut *state;
    if let Some(index) = state.packages.iter().position(|p| p.name() == name) {
        let package = &mut state.packages[index];
        package.set_remote_version(&*state.bus, &version);
        package.last_remote_refresh = clock::now_secs();
    }
}
