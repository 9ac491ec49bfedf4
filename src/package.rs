//! The package entity and its per-package state.
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use bus::{self, BusValue, PropertyBus};
use util::{Config, paths};
use version::version_to_number;

/// Action a package asked for after its last setup run, most severe last.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionNeeded {
    None,
    GuiRestart,
    Reboot,
}

/// A dependency requirement parsed from `packageDependencies`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dependency {
    pub package: String,
    pub requirement: String, // "installed" or "uninstalled"
}

/// A file claimed by another package, discovered through `<file>.package`
/// markers next to active files.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileConflict {
    pub package: String,
    pub requirement: String, // always "uninstalled"
    pub file: String,
}

/// One tracked package. The three version fields are mirrored to the bus
/// whenever they change; the numeric forms are kept alongside so the
/// schedulers never re-parse in a loop.
#[derive(Clone, Debug)]
pub struct Package {
    index: usize,
    name: String,
    pub user: String,
    pub branch: String,

    pub remote_version: String,
    pub remote_version_number: u64,
    pub stored_version: String,
    pub stored_version_number: u64,
    pub installed_version: String,
    pub installed_version_number: u64,

    pub incompatible: String,
    pub incompatible_details: String,
    pub incompatible_resolvable: bool,

    pub download_pending: bool,
    pub install_pending: bool,
    pub install_after_download: bool,
    pub auto_install_ok: bool,

    pub dependency_errors: Vec<Dependency>,
    pub file_conflicts: Vec<FileConflict>,
    pub patch_errors: Vec<String>,

    pub action_needed: ActionNeeded,
    pub last_remote_refresh: u64,
    pub last_script_precheck: u64,
}

impl Package {
    pub fn new(index: usize, name: &str, user: &str, branch: &str) -> Package {
        Package {
            index: index,
            name: name.to_string(),
            user: user.to_string(),
            branch: branch.to_string(),
            remote_version: String::new(),
            remote_version_number: 0,
            stored_version: String::new(),
            stored_version_number: 0,
            installed_version: String::new(),
            installed_version_number: 0,
            incompatible: String::new(),
            incompatible_details: String::new(),
            incompatible_resolvable: false,
            download_pending: false,
            install_pending: false,
            install_after_download: false,
            auto_install_ok: true,
            dependency_errors: Vec::new(),
            file_conflicts: Vec::new(),
            patch_errors: Vec::new(),
            action_needed: ActionNeeded::None,
            last_remote_refresh: 0,
            last_script_precheck: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn set_name(&mut self, bus: &PropertyBus, name: &str) {
        self.name = name.to_string();
        bus.publish(&bus::settings_package_path(self.index, "PackageName"),
                    BusValue::Str(name.to_string()));
    }

    pub fn set_user(&mut self, bus: &PropertyBus, user: &str) {
        self.user = user.to_string();
        bus.publish(&bus::settings_package_path(self.index, "GitHubUser"),
                    BusValue::Str(user.to_string()));
    }

    pub fn set_branch(&mut self, bus: &PropertyBus, branch: &str) {
        self.branch = branch.to_string();
        bus.publish(&bus::settings_package_path(self.index, "GitHubBranch"),
                    BusValue::Str(branch.to_string()));
    }

    pub fn set_remote_version(&mut self, bus: &PropertyBus, version: &str) {
        self.remote_version = version.to_string();
        self.remote_version_number = version_to_number(version);
        bus.publish(&bus::package_path(self.index, "GitHubVersion"),
                    BusValue::Str(version.to_string()));
    }

    pub fn set_stored_version(&mut self, bus: &PropertyBus, version: &str) {
        self.stored_version = version.to_string();
        self.stored_version_number = version_to_number(version);
        bus.publish(&bus::package_path(self.index, "PackageVersion"),
                    BusValue::Str(version.to_string()));
    }

    pub fn set_installed_version(&mut self, bus: &PropertyBus, version: &str) {
        self.installed_version = version.to_string();
        self.installed_version_number = version_to_number(version);
        bus.publish(&bus::package_path(self.index, "InstalledVersion"),
                    BusValue::Str(version.to_string()));
    }

    pub fn set_incompatible(&mut self, bus: &PropertyBus, value: &str, details: &str, resolvable: bool) {
        self.incompatible = value.to_string();
        self.incompatible_details = details.to_string();
        self.incompatible_resolvable = resolvable;
        bus.publish(&bus::package_path(self.index, "Incompatible"),
                    BusValue::Str(value.to_string()));
        bus.publish(&bus::package_path(self.index, "IncompatibleDetails"),
                    BusValue::Str(details.to_string()));
        bus.publish(&bus::package_path(self.index, "IncompatibleResolvable"),
                    BusValue::Int(if resolvable {
                        1
                    } else {
                        0
                    }));
    }

    /// Republish every mirrored field under the current index; used after
    /// list compaction moves a record.
    pub fn republish(&self, bus: &PropertyBus) {
        bus.publish(&bus::settings_package_path(self.index, "PackageName"),
                    BusValue::Str(self.name.clone()));
        bus.publish(&bus::settings_package_path(self.index, "GitHubUser"),
                    BusValue::Str(self.user.clone()));
        bus.publish(&bus::settings_package_path(self.index, "GitHubBranch"),
                    BusValue::Str(self.branch.clone()));
        bus.publish(&bus::package_path(self.index, "GitHubVersion"),
                    BusValue::Str(self.remote_version.clone()));
        bus.publish(&bus::package_path(self.index, "PackageVersion"),
                    BusValue::Str(self.stored_version.clone()));
        bus.publish(&bus::package_path(self.index, "InstalledVersion"),
                    BusValue::Str(self.installed_version.clone()));
        bus.publish(&bus::package_path(self.index, "Incompatible"),
                    BusValue::Str(self.incompatible.clone()));
        bus.publish(&bus::package_path(self.index, "IncompatibleDetails"),
                    BusValue::Str(self.incompatible_details.clone()));
        bus.publish(&bus::package_path(self.index, "IncompatibleResolvable"),
                    BusValue::Int(if self.incompatible_resolvable {
                        1
                    } else {
                        0
                    }));
    }

    pub fn pending(&self) -> bool {
        self.download_pending || self.install_pending
    }

    /// Whether the remote announces something the store should pick up.
    ///
    /// Versions that are still unknown never trigger a download. A branch
    /// coordinate beginning with `v` pins an exact version, so any
    /// difference - including a downgrade - requires a download; a named
    /// stream only downloads when the remote is newer.
    pub fn download_required(&self) -> bool {
        if self.remote_version.is_empty() || !self.remote_version.starts_with('v') {
            return false;
        }
        if self.stored_version.is_empty() || self.stored_version == "?" {
            return false;
        }
        if self.branch.starts_with('v') {
            self.remote_version_number != self.stored_version_number
        } else {
            self.remote_version_number > self.stored_version_number
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

// Names matching any of these substrings collide with the working copies,
// backups and media archives the storage tree also holds.
const REJECT_STRINGS: &'static [&'static str] = &["-current", "-latest", "-main", "-test", "-temp", "-debug",
                                                  "-beta", "-backup1", "-backup2", "-blind", "-0", "-1", "-2",
                                                  "-3", "-4", "-5", "-6", "-7", "-8", "-9", "ccgx", " "];

const REJECT_NAMES: &'static [&'static str] = &["conf", "db", "etc", "home", "keys", "log", "lost+found",
                                                "setupOptions", "themes", "tmp", "var", "venus", "vrmfilescache"];

/// Validate a package name against the reject lists. Names beginning with
/// `.` are always refused.
pub fn package_name_valid(name: &str) -> bool {
    if name.is_empty() || name.starts_with('.') {
        return false;
    }
    if REJECT_NAMES.iter().any(|reject| *reject == name) {
        return false;
    }
    if REJECT_STRINGS.iter().any(|reject| name.contains(reject)) {
        return false;
    }
    true
}

/// Whether automatic re-adding of the package is permitted. A manual remove
/// leaves a marker so the stored-package scan will not bring it back.
pub fn auto_add_ok(config: &Config, name: &str) -> bool {
    !config.options_dir(name).join("DO_NOT_AUTO_ADD").exists()
}

pub fn set_auto_add_ok(config: &Config, name: &str, ok: bool) {
    let options_dir = config.options_dir(name);
    // the directory may not exist if the package was never downloaded or
    // transferred from media
    if !options_dir.is_dir() {
        return;
    }
    let flag = options_dir.join("DO_NOT_AUTO_ADD");
    if ok {
        paths::remove_file_if_exists(&flag);
    } else if !flag.exists() {
        if let Err(e) = paths::touch(&flag) {
            error!("could not write auto-add block for {}: {}", name, e);
        }
    }
}

pub fn set_auto_install_ok(config: &Config, name: &str, ok: bool) {
    let options_dir = config.options_dir(name);
    if !options_dir.is_dir() {
        return;
    }
    let flag = options_dir.join("DO_NOT_AUTO_INSTALL");
    if ok {
        paths::remove_file_if_exists(&flag);
    } else if !flag.exists() {
        if let Err(e) = paths::touch(&flag) {
            error!("could not write auto-install block for {}: {}", name, e);
        }
    }
}

/// Depth-first search for the package directory inside an unpacked archive:
/// the first directory that directly contains a file named `version`.
pub fn locate_package_dir(root: &Path) -> Option<PathBuf> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(..) => return None,
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if path.join("version").is_file() {
            return Some(path);
        }
        if let Some(found) = locate_package_dir(&path) {
            return Some(found);
        }
    }
    None
}
