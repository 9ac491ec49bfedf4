//! Package manager daemon for embedded Linux appliances
//!
//! The daemon maintains a registry of optional packages, each with a stored,
//! an installed and a remote version, and schedules downloads, installs and
//! uninstalls so the installed versions converge toward the stored versions
//! and the stored versions toward the remote ones. Removable media is
//! scanned for package archives and settings backups; process restart, GUI
//! restart and reboot are deferred until the pipeline is quiescent.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

extern crate crossbeam;
extern crate curl;
extern crate filetime;
extern crate flate2;
extern crate fs2;
extern crate glob;
extern crate libc;
extern crate regex;
extern crate serde;
extern crate tar;
extern crate tempdir;
extern crate toml;
extern crate url;

pub use util::{PackdError, PackdResult, ChainError, Human, Config, human, internal};

macro_rules! bail {
    ($($fmt:tt)*) => (
        return Err(::util::human(&format_args!($($fmt)*)))
    )
}

pub mod bus;
pub mod compat;
pub mod daemon;
pub mod dispatch;
pub mod package;
pub mod registry;
pub mod sequencer;
pub mod util;
pub mod version;
pub mod workers;

pub fn pkg_version() -> String {
    format!("packd {}.{}.{}{}",
            env!("CARGO_PKG_VERSION_MAJOR"),
            env!("CARGO_PKG_VERSION_MINOR"),
            env!("CARGO_PKG_VERSION_PATCH"),
            option_env!("CARGO_PKG_VERSION_PRE").unwrap_or(""))
}
