//! The main sequencer: one tick per second.
//!
//! Each tick walks a single package (spreading full-registry work over
//! time), schedules automatic downloads and installs, aggregates the
//! action-needed state, expires stale remote versions, and decides when the
//! process may leave the main loop for a deferred lifecycle action. Restart
//! and reboot wait until the pipeline has been quiescent for two
//! consecutive ticks so every package gets its chance to finish first.

use std::fs;

use bus::{self, BusValue, DownloadMode, PropertyBus};
use compat;
use daemon::Daemon;
use dispatch::{RefreshRequest, Source, push_action};
use package::ActionNeeded;
use registry::StatusTarget;
use util::clock;

#[derive(Debug, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Exit,
}

pub struct Sequencer {
    cursor: usize,
    no_action_count: u32,
    last_download_mode: DownloadMode,
    boot_install: bool,
    ignore_boot_install: bool,
}

impl Sequencer {
    pub fn new() -> Sequencer {
        Sequencer {
            cursor: 0,
            no_action_count: 0,
            last_download_mode: DownloadMode::Off,
            boot_install: false,
            ignore_boot_install: false,
        }
    }

    pub fn tick(&mut self, daemon: &Daemon) -> Tick {
        daemon.poll_signals();

        // the bus change handler parks GUI acknowledgements here because it
        // cannot publish from its own callback
        {
            let mut state = daemon.registry.lock("tick ack");
            if let Some(ack) = state.take_deferred_ack() {
                state.acknowledge_gui_edit(&ack, false);
            }
        }

        let (mut current_mode, auto_install_setting, package_count) = {
            let state = daemon.registry.lock("tick modes");
            (state.settings.download_mode(), state.settings.auto_install, state.count())
        };

        let mut action_message = String::new();
        let mut check_packages = true;
        let mut empty_list = false;
        let mut auto_download = false;
        let mut auto_install = false;

        if package_count == 0 {
            // hold off all package processing while the list is empty
            empty_list = true;
            check_packages = false;
            self.cursor = 0;
        } else if daemon.config.reinstall_flag().exists() && !self.ignore_boot_install {
            // a firmware update wiped the modifications; reinstall all
            // packages, ignoring the user auto-install toggle
            if !self.boot_install {
                self.boot_install = true;
                self.cursor = 0;
                warn!("starting boot-time reinstall");
            }
        } else if daemon.flags.wait_for_remote_versions() {
            // decisions must not be made against stale remote versions
            check_packages = false;
        } else if daemon.flags.media_auto_uninstall() || daemon.flags.self_uninstall() {
            // a blanket uninstall is armed; start nothing new
        } else {
            auto_download = current_mode.auto_downloads();
            auto_install = auto_install_setting;

            // a mode transition restarts the scan and refreshes every
            // remote version before any download decision is made
            if current_mode != self.last_download_mode && current_mode != DownloadMode::Off {
                self.cursor = 0;
                check_packages = false;
                daemon.flags.set_wait_for_remote_versions(true);
                let _ = daemon.queues.refresh.try_send(RefreshRequest::Refresh);
            }
            self.last_download_mode = current_mode;
        }

        if !check_packages {
            self.cursor = 0;
        } else {
            let mut state = daemon.registry.lock("tick package");
            let count = state.count();
            if self.cursor >= count {
                self.cursor = 0;
                // one full pass in ONE_DOWNLOAD mode turns downloads off
                if current_mode == DownloadMode::Once {
                    state.settings.auto_download = DownloadMode::Off.as_i64();
                    state.save_settings();
                    state.publish_settings();
                    current_mode = DownloadMode::Off;
                    self.last_download_mode = DownloadMode::Off;
                    auto_download = false;
                }
                if self.boot_install {
                    warn!("boot-time reinstall complete");
                    self.boot_install = false;
                    let flag = daemon.config.reinstall_flag();
                    if flag.exists() {
                        if let Err(e) = fs::remove_file(&flag) {
                            // don't repeat the reinstall until next boot if
                            // the flag cannot be removed
                            self.ignore_boot_install = true;
                            error!("could not remove the boot-time reinstall flag {}: {}",
                                   flag.display(),
                                   e);
                        }
                    }
                }
            }

            if count > 0 {
                let index = self.cursor;
                self.cursor += 1;

                // boot-time passes skip conflict checks; they re-run once
                // the reinstall scan is done
                let needs_check = compat::update_versions_and_flags(&mut state,
                                                                    index,
                                                                    &daemon.config,
                                                                    !self.boot_install,
                                                                    false);
                let name = state.packages[index].name().to_string();
                if needs_check {
                    push_action(&mut state,
                                &daemon.queues,
                                &daemon.flags,
                                &daemon.config,
                                &format!("check:{}", name),
                                Source::Auto);
                }

                let operation_ok = !state.packages[index].pending();
                if operation_ok && auto_download && state.packages[index].download_required() {
                    action_message = format!("downloading {} ...", name);
                    push_action(&mut state,
                                &daemon.queues,
                                &daemon.flags,
                                &daemon.config,
                                &format!("download:{}", name),
                                Source::Auto);
                } else if operation_ok {
                    let (versions_differ, installed_empty, compatible, auto_install_ok) = {
                        let package = &state.packages[index];
                        (package.stored_version_number != package.installed_version_number,
                         package.installed_version.is_empty(),
                         package.incompatible.is_empty(),
                         package.auto_install_ok)
                    };

                    let mut install_ok = false;
                    let one_time = daemon.config.package_dir(&name).join("ONE_TIME_INSTALL");
                    if one_time.exists() {
                        // the one-time marker overrides every gate except
                        // version equality, and is consumed when honored
                        if versions_differ {
                            let _ = fs::remove_file(&one_time);
                            install_ok = true;
                        }
                    } else if compatible && auto_install_ok && versions_differ {
                        if auto_install {
                            install_ok = true;
                        } else if self.boot_install && installed_empty {
                            install_ok = true;
                        } else if daemon.config.package_dir(&name).join("AUTO_INSTALL").exists() {
                            install_ok = true;
                        }
                    }

                    if install_ok {
                        action_message = format!("installing {} ...", name);
                        push_action(&mut state,
                                    &daemon.queues,
                                    &daemon.flags,
                                    &daemon.config,
                                    &format!("install:{}", name),
                                    Source::Auto);
                    }
                }
            }
        }

        // aggregate pending work and action-needed state over the whole
        // registry, and expire remote versions nobody has refreshed
        let mut actions_pending = false;
        let mut system_action = ActionNeeded::None;
        {
            let mut state = daemon.registry.lock("tick aggregate");
            let mut actions_needed = String::new();
            let expiry = current_mode.refresh_period().as_secs() + 10;
            let now = clock::now_secs();

            for index in 0..state.packages.len() {
                let (pending, stale) = {
                    let package = &state.packages[index];
                    (package.pending(),
                     !package.remote_version.is_empty() && package.last_remote_refresh > 0 &&
                     now > package.last_remote_refresh + expiry)
                };
                if pending {
                    actions_pending = true;
                } else if stale {
                    // observers see "unknown" rather than stale data
                    let state = &mut *state;
                    let package = &mut state.packages[index];
                    package.set_remote_version(&*state.bus, "");
                }

                match state.packages[index].action_needed {
                    ActionNeeded::Reboot => {
                        actions_needed.push_str(&format!("{} requires REBOOT\n",
                                                         state.packages[index].name()));
                        system_action = ActionNeeded::Reboot;
                    }
                    ActionNeeded::GuiRestart => {
                        actions_needed.push_str(&format!("{} requires GUI restart\n",
                                                         state.packages[index].name()));
                        if system_action != ActionNeeded::Reboot {
                            system_action = ActionNeeded::GuiRestart;
                        }
                    }
                    ActionNeeded::None => {}
                }
            }

            if system_action == ActionNeeded::Reboot {
                actions_needed.push_str("REBOOT system ?");
            } else if system_action == ActionNeeded::GuiRestart {
                actions_needed.push_str("restart GUI ?");
            }

            // no prompting while an exit is already on its way
            if daemon.flags.exit_requested() {
                state.bus.publish(bus::ACTION_NEEDED, BusValue::Str(String::new()));
            } else {
                state.bus.publish(bus::ACTION_NEEDED, BusValue::Str(actions_needed));
            }
        }

        if actions_pending {
            self.no_action_count = 0;
        } else {
            self.no_action_count += 1;
        }

        // two full quiescent passes before any lifecycle action fires
        if self.no_action_count >= 2 && daemon.flags.exit_requested() {
            // carry still-deferred package actions into the exit
            if system_action == ActionNeeded::Reboot {
                daemon.flags.set_system_reboot();
            } else if system_action == ActionNeeded::GuiRestart {
                daemon.flags.set_gui_restart();
            }
            return Tick::Exit;
        }

        let idle_message = if !action_message.is_empty() {
            action_message
        } else if empty_list {
            "no active packages".to_string()
        } else if self.boot_install {
            "reinstalling packages after firmware update".to_string()
        } else if daemon.flags.wait_for_remote_versions() {
            "refreshing remote version information".to_string()
        } else if auto_download && auto_install {
            "checking for downloads and installs".to_string()
        } else if auto_install {
            "checking for installs".to_string()
        } else if auto_download {
            "checking for downloads".to_string()
        } else {
            String::new()
        };
        {
            let state = daemon.registry.lock("tick status");
            state.update_status(StatusTarget::PmStatus, &idle_message);
        }

        Tick::Continue
    }
}
