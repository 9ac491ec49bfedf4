//! The five long-lived worker threads.
//!
//! Each worker owns a bounded command queue and drains it forever; blocking
//! I/O (network, archives, subprocesses, removable media) happens on these
//! threads so the sequencer tick never waits on the outside world. A `Stop`
//! sentinel pushed at shutdown makes the queue read return promptly.

pub use self::addremove::AddRemove;
pub use self::downloader::Downloader;
pub use self::installer::Installer;
pub use self::media::MediaScanner;
pub use self::refresher::Refresher;

pub mod addremove;
pub mod downloader;
pub mod installer;
pub mod media;
pub mod refresher;
