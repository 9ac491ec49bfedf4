//! The top level executable
extern crate docopt;
extern crate env_logger;
extern crate packd;
extern crate serde;

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

use std::path::Path;
use std::process;
use std::sync::Arc;

use docopt::Docopt;

use packd::bus::MemoryBus;
use packd::daemon::{self, Daemon};
use packd::util::Config;

#[derive(Debug, Deserialize)]
struct Flags {
    flag_version: bool,
    flag_data_dir: String,
    flag_venus_dir: String,
    flag_media_root: String,
    flag_machine_file: String,
    flag_firmware_file: String,
}

const USAGE: &'static str = "
Package manager daemon for embedded Linux appliances

Usage:
    packd [options]

Options:
    -h, --help            Display this message
    -V, --version         Print version info and exit
    --data-dir DIR        Package storage root [default: /data]
    --venus-dir DIR       Installed-version marker directory [default: /etc/venus]
    --media-root DIR      Removable media mount root [default: /media]
    --machine-file FILE   Platform identity file [default: /etc/venus/machine]
    --firmware-file FILE  Running firmware version file [default: /opt/victronenergy/version]
";

fn main() {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Info);
    builder.parse_default_env();
    builder.init();

    let flags: Flags = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());

    if flags.flag_version {
        println!("{}", packd::pkg_version());
        return;
    }

    let config = Config::new(Path::new(&flags.flag_data_dir),
                             Path::new(&flags.flag_venus_dir),
                             Path::new(&flags.flag_media_root),
                             Path::new(&flags.flag_machine_file),
                             Path::new(&flags.flag_firmware_file));

    daemon::install_signal_handlers();

    let (daemon, channels) = match Daemon::new(config, Box::new(MemoryBus::new())) {
        Ok(pair) => pair,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    let daemon = Arc::new(daemon);

    warn!("{} starting on {}", packd::pkg_version(), daemon.config.platform());
    daemon.init();

    if let Err(e) = daemon::run(&daemon, channels) {
        error!("{}", e);
        process::exit(1);
    }
}
