use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;

/// Wall clock in whole seconds since the epoch.
pub fn now_secs() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs(),
        Err(..) => 0,
    }
}

/// Last-modification time of a file in whole seconds, `None` when the file
/// is missing.
pub fn mtime_secs(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .map(|meta| FileTime::from_last_modification_time(&meta).unix_seconds() as u64)
}
