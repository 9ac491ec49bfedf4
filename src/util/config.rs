//! Daemon-wide configuration: directory layout, remote endpoints and the
//! identity of the machine we are running on.
use std::path::{Path, PathBuf};

use url::Url;

use util::{PackdResult, internal, paths};
use version;

/// Package-directory tree and platform facts, fixed for the lifetime of the
/// process. Everything here is read once at startup; the per-user knobs live
/// in the settings store instead.
#[derive(Clone, Debug)]
pub struct Config {
    data_dir: PathBuf,
    venus_dir: PathBuf,
    media_root: PathBuf,
    self_package: String,
    raw_base_url: String,
    archive_base_url: String,
    platform: String,
    firmware_version: String,
    firmware_version_number: u64,
}

impl Config {
    pub fn new(data_dir: &Path,
               venus_dir: &Path,
               media_root: &Path,
               machine_file: &Path,
               firmware_file: &Path)
               -> Config {
        let machine = paths::read_first_line(machine_file).unwrap_or_default();
        let firmware = paths::read_first_line(firmware_file).unwrap_or_default();
        let number = version::version_to_number(&firmware);
        Config {
            data_dir: data_dir.to_path_buf(),
            venus_dir: venus_dir.to_path_buf(),
            media_root: media_root.to_path_buf(),
            self_package: "packd".to_string(),
            raw_base_url: "https://raw.githubusercontent.com".to_string(),
            archive_base_url: "https://github.com".to_string(),
            platform: machine_to_platform(&machine),
            firmware_version: firmware,
            firmware_version_number: number,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn self_package(&self) -> &str {
        &self.self_package
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn firmware_version(&self) -> &str {
        &self.firmware_version
    }

    pub fn firmware_version_number(&self) -> u64 {
        self.firmware_version_number
    }

    /// `<data>/<name>` - the per-package storage tree.
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn version_file(&self, name: &str) -> PathBuf {
        self.package_dir(name).join("version")
    }

    pub fn setup_file(&self, name: &str) -> PathBuf {
        self.package_dir(name).join("setup")
    }

    /// `<data>/setupOptions/<name>` - persistent per-package flags, kept
    /// outside the package directory so an update cannot wipe them.
    pub fn options_dir(&self, name: &str) -> PathBuf {
        self.data_dir.join("setupOptions").join(name)
    }

    /// The installed-version marker; absence means not installed.
    pub fn installed_version_file(&self, name: &str) -> PathBuf {
        self.venus_dir.join(format!("installedVersion-{}", name))
    }

    /// Boot-time reinstall sentinel left behind by a firmware update.
    pub fn reinstall_flag(&self) -> PathBuf {
        self.venus_dir.join("REINSTALL_PACKAGES")
    }

    pub fn default_package_list(&self) -> PathBuf {
        self.package_dir(&self.self_package).join("defaultPackageList")
    }

    pub fn settings_list(&self) -> PathBuf {
        self.package_dir(&self.self_package).join("settingsList")
    }

    /// The settings document lives in the options tree so that replacing the
    /// daemon's own package directory does not lose user state.
    pub fn settings_path(&self) -> PathBuf {
        self.options_dir(&self.self_package).join("settings.toml")
    }

    pub fn instance_lock_path(&self) -> PathBuf {
        self.data_dir.join(".packd-lock")
    }

    pub fn finish_script(&self) -> PathBuf {
        self.package_dir(&self.self_package).join("finishUpdate.sh")
    }

    /// `<base>/<user>/<name>/<branch>/version`
    pub fn version_url(&self, user: &str, name: &str, branch: &str) -> PackdResult<Url> {
        let mut url = Url::parse(&self.raw_base_url)?;
        url.path_segments_mut()
            .map_err(|_| internal("version base url cannot be a base"))?
            .push(user)
            .push(name)
            .push(branch)
            .push("version");
        Ok(url)
    }

    /// `<base>/<user>/<name>/archive/<branch>.tar.gz`
    pub fn archive_url(&self, user: &str, name: &str, branch: &str) -> PackdResult<Url> {
        let mut url = Url::parse(&self.archive_base_url)?;
        url.path_segments_mut()
            .map_err(|_| internal("archive base url cannot be a base"))?
            .push(user)
            .push(name)
            .push("archive")
            .push(&format!("{}.tar.gz", branch));
        Ok(url)
    }
}

/// Map the machine identity string to the human-readable platform name the
/// compatibility gates and status strings use.
fn machine_to_platform(machine: &str) -> String {
    match machine {
            "" => "???",
            "einstein" => "Cerbo GX",
            "cerbosgx" => "Cerbo SGX",
            "beaglebone" => "Venus GX",
            "ccgx" => "CCGX",
            "canvu500" => "CanVu 500",
            "nanopi" => "Multi/Easy Solar GX",
            "raspberrypi2" => "Raspberry Pi 2/3",
            "raspberrypi4" => "Raspberry Pi 4",
            "ekrano" => "Ekrano GX",
            other => other,
        }
        .to_string()
}
