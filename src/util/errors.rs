//! Error reporting and conversion
use std::error::Error;
use std::fmt;
use std::io;
use std::num;
use std::process::{Output, ExitStatus};
use std::str;
use std::string;

use curl;
use glob;
use regex;
use toml;
use url;

pub type PackdResult<T> = Result<T, Box<PackdError>>;

// =============================================================================
// PackdError trait

pub trait PackdError: Error + Send + 'static {
    fn is_human(&self) -> bool {
        false
    }
    fn packd_cause(&self) -> Option<&PackdError> {
        None
    }
    fn as_error(&self) -> &Error
        where Self: Sized
    {
        self as &Error
    }
}

impl Error for Box<PackdError> {
    fn description(&self) -> &str {
        (**self).description()
    }
    fn cause(&self) -> Option<&Error> {
        (**self).cause()
    }
}

impl PackdError for Box<PackdError> {
    fn is_human(&self) -> bool {
        (**self).is_human()
    }
    fn packd_cause(&self) -> Option<&PackdError> {
        (**self).packd_cause()
    }
}

// =============================================================================
// Chaining errors

pub trait ChainError<T> {
    fn chain_error<E, F>(self, callback: F) -> PackdResult<T>
        where E: PackdError,
              F: FnOnce() -> E;
}

#[derive(Debug)]
struct ChainedError<E> {
    error: E,
    cause: Box<PackdError>,
}

impl<'a, T, F> ChainError<T> for F
    where F: FnOnce() -> PackdResult<T>
{
    fn chain_error<E, C>(self, callback: C) -> PackdResult<T>
        where E: PackdError,
              C: FnOnce() -> E
    {
        self().chain_error(callback)
    }
}

impl<T, E: PackdError + 'static> ChainError<T> for Result<T, E> {
    fn chain_error<E2: 'static, C>(self, callback: C) -> PackdResult<T>
        where E2: PackdError,
              C: FnOnce() -> E2
    {
        self.map_err(move |err| {
            Box::new(ChainedError {
                error: callback(),
                cause: Box::new(err),
            }) as Box<PackdError>
        })
    }
}

impl<T> ChainError<T> for Box<PackdError> {
    fn chain_error<E2, C>(self, callback: C) -> PackdResult<T>
        where E2: PackdError,
              C: FnOnce() -> E2
    {
        Err(Box::new(ChainedError {
            error: callback(),
            cause: self,
        }))
    }
}

impl<T> ChainError<T> for Option<T> {
    fn chain_error<E: 'static, C>(self, callback: C) -> PackdResult<T>
        where E: PackdError,
              C: FnOnce() -> E
    {
        match self {
            Some(t) => Ok(t),
            None => Err(Box::new(callback())),
        }
    }
}

impl<E: Error> Error for ChainedError<E> {
    fn description(&self) -> &str {
        self.error.description()
    }
}

impl<E: fmt::Display> fmt::Display for ChainedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<E: PackdError> PackdError for ChainedError<E> {
    fn is_human(&self) -> bool {
        self.error.is_human()
    }
    fn packd_cause(&self) -> Option<&PackdError> {
        Some(&*self.cause)
    }
}

// =============================================================================
// Process errors

pub struct ProcessError {
    pub desc: String,
    pub exit: Option<ExitStatus>,
    pub output: Option<Output>,
    cause: Option<Box<PackdError>>,
}

impl Error for ProcessError {
    fn description(&self) -> &str {
        &self.desc
    }
    fn cause(&self) -> Option<&Error> {
        self.cause.as_ref().map(|e| e.as_error())
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.desc, f)
    }
}
impl fmt::Debug for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// =============================================================================
// Concrete errors

struct ConcretePackdError {
    description: String,
    detail: Option<String>,
    cause: Option<Box<Error + Send>>,
    is_human: bool,
}

impl fmt::Display for ConcretePackdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.description)?;
        if let Some(ref s) = self.detail {
            write!(f, " ({})", s)?;
        }
        Ok(())
    }
}
impl fmt::Debug for ConcretePackdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Error for ConcretePackdError {
    fn description(&self) -> &str {
        &self.description
    }
    fn cause(&self) -> Option<&Error> {
        self.cause.as_ref().map(|c| {
            let e: &Error = &**c;
            e
        })
    }
}

impl PackdError for ConcretePackdError {
    fn is_human(&self) -> bool {
        self.is_human
    }
}

// =============================================================================
// Human errors

#[derive(Debug)]
pub struct Human<E>(pub E);

impl<E: Error> Error for Human<E> {
    fn description(&self) -> &str {
        self.0.description()
    }
    fn cause(&self) -> Option<&Error> {
        self.0.cause()
    }
}

impl<E: fmt::Display> fmt::Display for Human<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl<E: PackdError> PackdError for Human<E> {
    fn is_human(&self) -> bool {
        true
    }
    fn packd_cause(&self) -> Option<&PackdError> {
        self.0.packd_cause()
    }
}

// =============================================================================
// NetworkError trait

pub trait NetworkError: PackdError {
    fn maybe_spurious(&self) -> bool;
}

impl NetworkError for curl::Error {
    fn maybe_spurious(&self) -> bool {
        self.is_couldnt_connect() || self.is_couldnt_resolve_proxy() || self.is_couldnt_resolve_host() ||
        self.is_operation_timedout() || self.is_recv_error()
    }
}

// =============================================================================
// various impls

macro_rules! from_error {
    ($($p:ty,)*) => (
        $(impl From<$p> for Box<PackdError> {
            fn from(t: $p) -> Box<PackdError> { Box::new(t) }
        })*
    )
}

from_error! {
    io::Error,
    ProcessError,
    curl::Error,
    url::ParseError,
    toml::de::Error,
    toml::ser::Error,
    glob::PatternError,
    glob::GlobError,
    regex::Error,
    num::ParseIntError,
    str::Utf8Error,
    string::FromUtf8Error,
}

impl From<string::ParseError> for Box<PackdError> {
    fn from(t: string::ParseError) -> Box<PackdError> {
        match t {}
    }
}

impl<E: PackdError> From<Human<E>> for Box<PackdError> {
    fn from(t: Human<E>) -> Box<PackdError> {
        Box::new(t)
    }
}

impl PackdError for io::Error {}
impl PackdError for ProcessError {}
impl PackdError for curl::Error {}
impl PackdError for url::ParseError {}
impl PackdError for toml::de::Error {}
impl PackdError for toml::ser::Error {}
impl PackdError for glob::PatternError {}
impl PackdError for glob::GlobError {}
impl PackdError for regex::Error {}
impl PackdError for num::ParseIntError {}
impl PackdError for str::Utf8Error {}
impl PackdError for string::FromUtf8Error {}

// =============================================================================
// Construction helpers

pub fn process_error(msg: &str,
                     cause: Option<Box<PackdError>>,
                     status: Option<&ExitStatus>,
                     output: Option<&Output>)
                     -> ProcessError {
    let exit = match status {
        Some(s) => status_to_string(s),
        None => "never executed".to_string(),
    };
    let mut desc = format!("{} ({})", &msg, exit);

    if let Some(out) = output {
        match str::from_utf8(&out.stdout) {
            Ok(s) if s.trim().len() > 0 => {
                desc.push_str("\n--- stdout\n");
                desc.push_str(s);
            }
            Ok(..) | Err(..) => {}
        }
        match str::from_utf8(&out.stderr) {
            Ok(s) if s.trim().len() > 0 => {
                desc.push_str("\n--- stderr\n");
                desc.push_str(s);
            }
            Ok(..) | Err(..) => {}
        }
    }

    return ProcessError {
        desc: desc,
        exit: status.cloned(),
        output: output.cloned(),
        cause: cause,
    };

    #[cfg(unix)]
    fn status_to_string(status: &ExitStatus) -> String {
        use std::os::unix::process::*;
        use libc;

        if let Some(signal) = status.signal() {
            let name = match signal as libc::c_int {
                libc::SIGABRT => ", SIGABRT: process abort signal",
                libc::SIGALRM => ", SIGALRM: alarm clock",
                libc::SIGFPE => ", SIGFPE: erroneous arithmetic operation",
                libc::SIGHUP => ", SIGHUP: hangup",
                libc::SIGILL => ", SIGILL: illegal instruction",
                libc::SIGINT => ", SIGINT: terminal interrupt signal",
                libc::SIGKILL => ", SIGKILL: kill",
                libc::SIGPIPE => ", SIGPIPE: write on a pipe with no one to read",
                libc::SIGQUIT => ", SIGQUIT: terminal quite signal",
                libc::SIGSEGV => ", SIGSEGV: invalid memory reference",
                libc::SIGTERM => ", SIGTERM: termination signal",
                libc::SIGBUS => ", SIGBUS: access to undefined memory",
                libc::SIGSYS => ", SIGSYS: bad system call",
                libc::SIGTRAP => ", SIGTRAP: trace/breakpoint trap",
                _ => "",
            };
            format!("signal: {}{}", signal, name)
        } else {
            status.to_string()
        }
    }

    #[cfg(windows)]
    fn status_to_string(status: &ExitStatus) -> String {
        status.to_string()
    }
}

pub fn internal_error(error: &str, detail: &str) -> Box<PackdError> {
    Box::new(ConcretePackdError {
        description: error.to_string(),
        detail: Some(detail.to_string()),
        cause: None,
        is_human: false,
    })
}

pub fn internal<S: fmt::Display>(error: S) -> Box<PackdError> {
    _internal(&error)
}

fn _internal(error: &fmt::Display) -> Box<PackdError> {
    Box::new(ConcretePackdError {
        description: error.to_string(),
        detail: None,
        cause: None,
        is_human: false,
    })
}

pub fn human<S: fmt::Display>(error: S) -> Box<PackdError> {
    _human(&error)
}

fn _human(error: &fmt::Display) -> Box<PackdError> {
    Box::new(ConcretePackdError {
        description: error.to_string(),
        detail: None,
        cause: None,
        is_human: true,
    })
}

pub fn caused_human<S, E>(error: S, cause: E) -> Box<PackdError>
    where S: fmt::Display,
          E: Error + Send + 'static
{
    Box::new(ConcretePackdError {
        description: error.to_string(),
        detail: None,
        cause: Some(Box::new(cause)),
        is_human: true,
    })
}
