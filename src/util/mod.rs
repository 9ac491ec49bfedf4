//! General purpose utility functions and structures
pub use self::clock::{now_secs, mtime_secs};
pub use self::config::Config;
pub use self::errors::{ProcessError, PackdResult, PackdError, ChainError, Human, NetworkError, caused_human,
                       process_error, internal_error, internal, human};
pub use self::process_builder::{process, ProcessBuilder};

pub mod clock;
pub mod config;
pub mod errors;
pub mod network;
pub mod paths;
pub mod process_builder;
