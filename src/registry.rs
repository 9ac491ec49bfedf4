//! The package registry and the global lock that guards it.
//!
//! Every piece of shared daemon state - the package list, the persistent
//! settings document, the published service bus and the deferred GUI
//! acknowledgement - lives in `State`, behind a single mutex owned by
//! `Registry`. Workers take the lock only to read coordinates before
//! launching work and to commit results; network and subprocess I/O always
//! happens outside it.

use std::path::PathBuf;
use std::process;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use bus::{self, BusValue, PropertyBus, StoredPackage, StoredSettings};
use package::{self, Package};
use util::{Config, paths};

/// Destination of a human-readable status line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatusTarget {
    PmStatus,
    Editor,
    Media,
}

impl StatusTarget {
    fn path(&self) -> &'static str {
        match *self {
            StatusTarget::PmStatus => bus::PM_STATUS,
            StatusTarget::Editor => bus::GUI_EDIT_STATUS,
            StatusTarget::Media => bus::MEDIA_UPDATE_STATUS,
        }
    }
}

/// All mutable daemon state, guarded by the registry lock.
pub struct State {
    pub packages: Vec<Package>,
    pub bus: Box<PropertyBus>,
    pub settings: StoredSettings,
    pub settings_path: PathBuf,
    pub raw_default_packages: Vec<StoredPackage>,
    pub default_count: usize,
    pub deferred_ack: Option<String>,
    pub edit: StoredPackage,
}

pub struct Registry {
    state: Mutex<State>,
}

impl Registry {
    pub fn new(bus: Box<PropertyBus>, settings: StoredSettings, settings_path: PathBuf) -> Registry {
        Registry {
            state: Mutex::new(State {
                packages: Vec::new(),
                bus: bus,
                settings: settings,
                settings_path: settings_path,
                raw_default_packages: Vec::new(),
                default_count: 0,
                deferred_ack: None,
                edit: StoredPackage::default(),
            }),
        }
    }

    /// Acquire the global lock. The wait is bounded: after five seconds the
    /// process terminates so the service supervisor can restart it, because
    /// a lock held that long means a thread wedged inside a critical
    /// section.
    pub fn lock(&self, name: &str) -> MutexGuard<State> {
        let request = Instant::now();
        let mut report = Instant::now();
        loop {
            match self.state.try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {}
            }
            thread::sleep(Duration::from_millis(100));
            if request.elapsed() > Duration::from_secs(5) {
                error!("timeout waiting for lock {} - exiting for restart", name);
                process::exit(1);
            } else if report.elapsed() > Duration::from_millis(500) {
                warn!("waiting to acquire lock {}", name);
                report = Instant::now();
            }
        }
    }
}

impl State {
    pub fn locate(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name() == name)
    }

    pub fn locate_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.iter_mut().find(|p| p.name() == name)
    }

    pub fn locate_index(&self, name: &str) -> Option<usize> {
        self.packages.iter().position(|p| p.name() == name)
    }

    pub fn count(&self) -> usize {
        self.packages.len()
    }

    pub fn update_status(&self, target: StatusTarget, message: &str) {
        self.bus.publish(target.path(), BusValue::Str(message.to_string()));
    }

    /// Acknowledge a GUI edit action. The bus change handler must not write
    /// the acknowledgement synchronously (the write would reenter the bus
    /// library), so it parks the value here and the sequencer delivers it on
    /// the next tick.
    pub fn acknowledge_gui_edit(&mut self, value: &str, defer: bool) {
        if defer {
            self.deferred_ack = Some(value.to_string());
        } else {
            self.bus.publish(bus::GUI_EDIT_ACTION, BusValue::Str(value.to_string()));
        }
    }

    pub fn take_deferred_ack(&mut self) -> Option<String> {
        self.deferred_ack.take()
    }

    pub fn save_settings(&self) {
        if let Err(e) = self.settings.save(&self.settings_path) {
            error!("could not save settings to `{}`: {}",
                   self.settings_path.display(),
                   e);
        }
    }

    /// Mirror the non-package settings leaves.
    pub fn publish_settings(&self) {
        self.bus.publish(&format!("{}/Count", bus::SETTINGS_PREFIX),
                         BusValue::Int(self.packages.len() as i64));
        self.bus.publish(&format!("{}/GitHubAutoDownload", bus::SETTINGS_PREFIX),
                         BusValue::Int(self.settings.auto_download));
        self.bus.publish(&format!("{}/AutoInstall", bus::SETTINGS_PREFIX),
                         BusValue::Int(if self.settings.auto_install {
                             1
                         } else {
                             0
                         }));
    }

    fn update_package_count(&self) {
        self.bus.publish(&format!("{}/Count", bus::SETTINGS_PREFIX),
                         BusValue::Int(self.packages.len() as i64));
    }

    /// Add a package. Idempotent on name: a second add with the same name
    /// fails. Unknown coordinates are stored as `?`.
    pub fn add_package(&mut self, name: &str, user: &str, branch: &str) -> bool {
        if self.locate(name).is_some() {
            return false;
        }
        let user = if user.is_empty() {
            "?"
        } else {
            user
        };
        let branch = if branch.is_empty() {
            "?"
        } else {
            branch
        };
        let index = self.packages.len();
        let package = Package::new(index, name, user, branch);
        package.republish(&*self.bus);
        self.packages.push(package);
        self.settings.packages.push(StoredPackage {
            name: name.to_string(),
            user: user.to_string(),
            branch: branch.to_string(),
        });
        self.update_package_count();
        self.save_settings();
        true
    }

    /// Remove a package by index, compacting higher indices down one slot so
    /// external observers keep stable addressing for the survivors. The
    /// record left at the tail is blanked rather than detached from the bus;
    /// its paths disappear on the next process start.
    ///
    /// A package with a non-empty installed version is never removed.
    pub fn remove_package_at(&mut self, index: usize, is_duplicate: bool, config: &Config) -> bool {
        if index >= self.packages.len() {
            return false;
        }
        let name = self.packages[index].name().to_string();
        if !self.packages[index].installed_version.is_empty() {
            warn!("{} is installed - not removing", name);
            return false;
        }

        // this package is going away for good, so block future automatic
        // adds (duplicate cleanup keeps the marker untouched - the other
        // copy stays active)
        if !is_duplicate {
            package::set_auto_add_ok(config, &name, false);
        }

        self.packages.remove(index);
        for (new_index, package) in self.packages.iter_mut().enumerate().skip(index) {
            package.set_index(new_index);
            package.republish(&*self.bus);
        }

        // blank the now-stale tail record instead of deleting its paths
        let tail = self.packages.len();
        let mut ghost = Package::new(tail, "", "", "");
        ghost.remote_version = "?".to_string();
        ghost.stored_version = "?".to_string();
        ghost.installed_version = "?".to_string();
        ghost.republish(&*self.bus);

        if index < self.settings.packages.len() {
            self.settings.packages.remove(index);
        }
        self.update_package_count();
        self.save_settings();
        true
    }

    pub fn remove_package(&mut self, name: &str, config: &Config) -> bool {
        match self.locate_index(name) {
            Some(index) => self.remove_package_at(index, false, config),
            None => false,
        }
    }

    /// Rebuild the in-memory package list from the persisted settings rows.
    pub fn load_packages_from_settings(&mut self) {
        let rows = self.settings.packages.clone();
        self.packages.clear();
        for (index, row) in rows.iter().enumerate() {
            let package = Package::new(index, &row.name, &row.user, &row.branch);
            package.republish(&*self.bus);
            self.packages.push(package);
        }
        self.update_package_count();
    }

    /// Keep the persisted row for a package in step with its coordinates.
    pub fn persist_coordinates(&mut self, index: usize) {
        if index >= self.packages.len() {
            return;
        }
        let (name, user, branch) = {
            let package = &self.packages[index];
            (package.name().to_string(), package.user.clone(), package.branch.clone())
        };
        if index < self.settings.packages.len() {
            self.settings.packages[index] = StoredPackage {
                name: name,
                user: user,
                branch: branch,
            };
            self.save_settings();
        }
    }

    // ------------------------------------------------------------------
    // default-package list

    /// Read `<data>/<self>/defaultPackageList`: one package per line, three
    /// whitespace-delimited fields, `#` starts a comment.
    pub fn read_default_package_list(&mut self, config: &Config) {
        let path = config.default_package_list();
        self.raw_default_packages.clear();
        let contents = match paths::read(&path) {
            Ok(contents) => contents,
            Err(..) => {
                error!("no default package list at `{}`", path.display());
                return;
            }
        };
        for line in contents.lines() {
            if line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }
            self.raw_default_packages.push(StoredPackage {
                name: parts[0].to_string(),
                user: parts[1].to_string(),
                branch: parts[2].to_string(),
            });
        }
    }

    pub fn locate_raw_default(&self, name: &str) -> Option<&StoredPackage> {
        self.raw_default_packages.iter().find(|d| d.name == name)
    }

    /// Publish the defaults the GUI offers in its add-package menu: every
    /// raw default not already in the registry. Entry 0 is the synthetic
    /// `new` entry and never changes; stale tail entries are blanked.
    pub fn update_default_packages(&mut self) {
        self.bus.publish(&bus::default_path(0, "PackageName"),
                         BusValue::Str("new".to_string()));
        self.bus.publish(&bus::default_path(0, "GitHubUser"), BusValue::Str(String::new()));
        self.bus.publish(&bus::default_path(0, "GitHubBranch"), BusValue::Str(String::new()));

        let mut index = 1;
        let defaults: Vec<StoredPackage> = self.raw_default_packages
            .iter()
            .filter(|d| self.locate(&d.name).is_none())
            .cloned()
            .collect();
        for default in defaults.iter() {
            self.bus.publish(&bus::default_path(index, "PackageName"),
                             BusValue::Str(default.name.clone()));
            self.bus.publish(&bus::default_path(index, "GitHubUser"),
                             BusValue::Str(default.user.clone()));
            self.bus.publish(&bus::default_path(index, "GitHubBranch"),
                             BusValue::Str(default.branch.clone()));
            index += 1;
        }
        self.bus.publish(bus::DEFAULT_COUNT, BusValue::Int(index as i64));

        while index < self.default_count {
            self.bus.publish(&bus::default_path(index, "PackageName"),
                             BusValue::Str(String::new()));
            self.bus.publish(&bus::default_path(index, "GitHubUser"),
                             BusValue::Str(String::new()));
            self.bus.publish(&bus::default_path(index, "GitHubBranch"),
                             BusValue::Str(String::new()));
            index += 1;
        }
        self.default_count = index;
    }
}
