//! The property-bus boundary.
//!
//! The daemon exposes its state to the rest of the system through a bus of
//! typed leaf values and receives commands back through a handful of watched
//! paths. The real message-bus runtime is an external collaborator; the core
//! only depends on the `PropertyBus` trait below. `MemoryBus` is the
//! in-process implementation used by the daemon binary and the tests.
//!
//! Persistent settings (the `/Settings/PackageManager/...` namespace) are a
//! typed document stored on disk and mirrored to the bus on every change.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use toml;

use util::{PackdResult, ChainError, human, paths};

/// A dynamically typed bus leaf. Conversion to and from the wire happens at
/// this boundary only; the core works with the concrete fields.
#[derive(Clone, Debug, PartialEq)]
pub enum BusValue {
    Int(i64),
    Double(f64),
    Str(String),
    Bool(bool),
}

impl BusValue {
    pub fn as_int(&self) -> i64 {
        match *self {
            BusValue::Int(v) => v,
            BusValue::Double(v) => v as i64,
            BusValue::Bool(v) => {
                if v {
                    1
                } else {
                    0
                }
            }
            BusValue::Str(ref v) => v.parse().unwrap_or(0),
        }
    }

    pub fn as_text(&self) -> String {
        match *self {
            BusValue::Int(v) => v.to_string(),
            BusValue::Double(v) => v.to_string(),
            BusValue::Bool(v) => v.to_string(),
            BusValue::Str(ref v) => v.clone(),
        }
    }

    /// Single-character type tag used by the settings backup file format.
    pub fn type_id(&self) -> char {
        match *self {
            BusValue::Int(..) => 'i',
            BusValue::Double(..) => 'f',
            BusValue::Bool(..) => 'i',
            BusValue::Str(..) => 's',
        }
    }

    /// Rebuild a value from a type tag and its textual form.
    pub fn from_text(type_id: char, text: &str) -> Option<BusValue> {
        match type_id {
            'i' => text.parse().ok().map(BusValue::Int),
            'f' => text.parse().ok().map(BusValue::Double),
            's' => Some(BusValue::Str(text.to_string())),
            _ => None,
        }
    }
}

/// Per-path publish/read access to the bus. Watching is the inverse
/// direction: the embedding runtime forwards external writes to
/// `Daemon::bus_changed`.
pub trait PropertyBus: Send {
    fn publish(&self, path: &str, value: BusValue);
    fn read(&self, path: &str) -> Option<BusValue>;
}

/// In-memory bus used by the binary and by tests.
pub struct MemoryBus {
    values: Mutex<BTreeMap<String, BusValue>>,
}

impl MemoryBus {
    pub fn new() -> MemoryBus {
        MemoryBus { values: Mutex::new(BTreeMap::new()) }
    }

    pub fn snapshot(&self) -> BTreeMap<String, BusValue> {
        self.values.lock().unwrap().clone()
    }
}

impl PropertyBus for MemoryBus {
    fn publish(&self, path: &str, value: BusValue) {
        self.values.lock().unwrap().insert(path.to_string(), value);
    }

    fn read(&self, path: &str) -> Option<BusValue> {
        self.values.lock().unwrap().get(path).cloned()
    }
}

// Well-known service paths.
pub const PM_STATUS: &'static str = "/PmStatus";
pub const GUI_EDIT_ACTION: &'static str = "/GuiEditAction";
pub const GUI_EDIT_STATUS: &'static str = "/GuiEditStatus";
pub const MEDIA_UPDATE_STATUS: &'static str = "/MediaUpdateStatus";
pub const PLATFORM: &'static str = "/Platform";
pub const ACTION_NEEDED: &'static str = "/ActionNeeded";
pub const DEFAULT_COUNT: &'static str = "/DefaultCount";
pub const BACKUP_MEDIA_AVAILABLE: &'static str = "/BackupMediaAvailable";
pub const BACKUP_SETTINGS_FILE_EXIST: &'static str = "/BackupSettingsFileExist";
pub const BACKUP_SETTINGS_LOCAL_FILE_EXIST: &'static str = "/BackupSettingsLocalFileExist";
pub const BACKUP_PROGRESS: &'static str = "/BackupProgress";
pub const MEDIA_MOUNT_STATE: &'static str = "/Storage/MountState";

pub const SETTINGS_PREFIX: &'static str = "/Settings/PackageManager";

pub fn package_path(index: usize, field: &str) -> String {
    format!("/Package/{}/{}", index, field)
}

pub fn default_path(index: usize, field: &str) -> String {
    format!("/Default/{}/{}", index, field)
}

pub fn settings_package_path(index: usize, field: &str) -> String {
    format!("{}/{}/{}", SETTINGS_PREFIX, index, field)
}

/// The automatic download mode selected by the user.
///
/// `Once` runs a single pass at the fast cadence and then turns itself off
/// at the pass boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DownloadMode {
    Off,
    Normal,
    Hourly,
    Daily,
    Once,
}

impl DownloadMode {
    pub fn from_i64(value: i64) -> DownloadMode {
        match value {
            1 => DownloadMode::Normal,
            2 => DownloadMode::Hourly,
            3 => DownloadMode::Daily,
            99 => DownloadMode::Once,
            _ => DownloadMode::Off,
        }
    }

    pub fn as_i64(&self) -> i64 {
        match *self {
            DownloadMode::Off => 0,
            DownloadMode::Normal => 1,
            DownloadMode::Hourly => 2,
            DownloadMode::Daily => 3,
            DownloadMode::Once => 99,
        }
    }

    pub fn auto_downloads(&self) -> bool {
        *self != DownloadMode::Off
    }

    /// The period over which one full refresh pass is spread. `Off` and
    /// `Once` pace like `Normal`; remote-version expiry also keys off this.
    pub fn refresh_period(&self) -> Duration {
        match *self {
            DownloadMode::Hourly => Duration::from_secs(60 * 60),
            DownloadMode::Daily => Duration::from_secs(60 * 60 * 24),
            _ => Duration::from_secs(600),
        }
    }
}

/// One persisted package row.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredPackage {
    pub name: String,
    pub user: String,
    pub branch: String,
}

/// The persistent settings document. This is the typed backing store for
/// the `/Settings/PackageManager` namespace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoredSettings {
    #[serde(default)]
    pub auto_download: i64,
    #[serde(default)]
    pub auto_install: bool,
    #[serde(default)]
    pub packages: Vec<StoredPackage>,
}

impl StoredSettings {
    pub fn load(path: &Path) -> PackdResult<StoredSettings> {
        if !path.exists() {
            return Ok(StoredSettings::default());
        }
        let contents = paths::read(path)?;
        toml::from_str(&contents).chain_error(|| human(format!("malformed settings file `{}`", path.display())))
    }

    pub fn save(&self, path: &Path) -> PackdResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.is_dir() {
                ::std::fs::create_dir_all(parent)?;
            }
        }
        let rendered = toml::to_string(self)?;
        paths::write(path, rendered.as_bytes())
    }

    pub fn download_mode(&self) -> DownloadMode {
        DownloadMode::from_i64(self.auto_download)
    }
}
