use std::collections::HashMap;
use std::env;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use util::{PackdResult, ProcessError, process_error};

/// A builder object for an external process, similar to `std::process::Command`.
#[derive(Clone, Debug)]
pub struct ProcessBuilder {
    program: OsString,
    args: Vec<OsString>,
    env: HashMap<String, Option<OsString>>,
    cwd: Option<OsString>,
}

impl fmt::Display for ProcessBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "`{}", self.program.to_string_lossy())?;

        for arg in self.args.iter() {
            write!(f, " {}", arg.to_string_lossy())?;
        }

        write!(f, "`")
    }
}

impl ProcessBuilder {
    pub fn arg<T: AsRef<OsStr>>(&mut self, arg: T) -> &mut ProcessBuilder {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<T: AsRef<OsStr>>(&mut self, arguments: &[T]) -> &mut ProcessBuilder {
        self.args.extend(arguments.iter().map(|t| t.as_ref().to_os_string()));
        self
    }

    pub fn cwd<T: AsRef<OsStr>>(&mut self, path: T) -> &mut ProcessBuilder {
        self.cwd = Some(path.as_ref().to_os_string());
        self
    }

    pub fn env<T: AsRef<OsStr>>(&mut self, key: &str, val: T) -> &mut ProcessBuilder {
        self.env.insert(key.to_string(), Some(val.as_ref().to_os_string()));
        self
    }

    pub fn env_remove(&mut self, key: &str) -> &mut ProcessBuilder {
        self.env.insert(key.to_string(), None);
        self
    }

    pub fn get_program(&self) -> &OsString {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Run the process, waiting for completion.
    pub fn exec(&self) -> Result<(), ProcessError> {
        let mut command = self.build_command();
        let exit = command.status()
            .map_err(|e| {
                process_error(&format!("could not execute process `{}`", self.debug_string()),
                              Some(Box::new(e)),
                              None,
                              None)
            })?;

        if exit.success() {
            Ok(())
        } else {
            Err(process_error(&format!("process didn't exit successfully: `{}`", self.debug_string()),
                              None,
                              Some(&exit),
                              None))
        }
    }

    /// Run the process, capturing stdout/stderr. A non-zero exit status is an
    /// error.
    pub fn exec_with_output(&self) -> Result<Output, ProcessError> {
        let output = self.exec_capture()?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(process_error(&format!("process didn't exit successfully: `{}`", self.debug_string()),
                              None,
                              Some(&output.status),
                              Some(&output)))
        }
    }

    /// Run the process, capturing stdout/stderr, and hand the raw output back
    /// to the caller regardless of the exit status. Used where the exit code
    /// carries meaning of its own.
    pub fn exec_capture(&self) -> Result<Output, ProcessError> {
        let mut command = self.build_command();
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        command.output()
            .map_err(|e| {
                process_error(&format!("could not execute process `{}`", self.debug_string()),
                              Some(Box::new(e)),
                              None,
                              None)
            })
    }

    /// Spawn the process detached; the child outlives this program.
    pub fn spawn_detached(&self) -> PackdResult<()> {
        let mut command = self.build_command();
        command.stdout(Stdio::null()).stderr(Stdio::null()).stdin(Stdio::null());
        command.spawn()
            .map(|_| ())
            .map_err(|e| {
                process_error(&format!("could not spawn process `{}`", self.debug_string()),
                              Some(Box::new(e)),
                              None,
                              None)
                    .into()
            })
    }

    pub fn build_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(cwd) = self.cwd.as_ref() {
            command.current_dir(Path::new(cwd));
        }
        for arg in self.args.iter() {
            command.arg(arg);
        }
        for (k, v) in self.env.iter() {
            match *v {
                Some(ref v) => {
                    command.env(k, v);
                }
                None => {
                    command.env_remove(k);
                }
            }
        }
        command
    }

    fn debug_string(&self) -> String {
        let mut program = format!("{}", self.program.to_string_lossy());
        for arg in self.args.iter() {
            program.push(' ');
            program.push_str(&format!("{}", arg.to_string_lossy()));
        }
        program
    }
}

pub fn process<T: AsRef<OsStr>>(cmd: T) -> ProcessBuilder {
    ProcessBuilder {
        program: cmd.as_ref().to_os_string(),
        args: Vec::new(),
        cwd: env::current_dir().ok().map(|p| p.into_os_string()),
        env: HashMap::new(),
    }
}
