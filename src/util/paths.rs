use std::fs::{self, File};
use std::fs::OpenOptions;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use util::{human, internal, PackdResult, ChainError};

pub fn read(path: &Path) -> PackdResult<String> {
    (|| -> PackdResult<_> {
            let mut ret = String::new();
            let mut f = File::open(path)?;
            f.read_to_string(&mut ret)?;
            Ok(ret)
        })()
        .map_err(human)
        .chain_error(|| human(format!("failed to read `{}`", path.display())))
}

pub fn read_bytes(path: &Path) -> PackdResult<Vec<u8>> {
    (|| -> PackdResult<_> {
            let mut ret = Vec::new();
            let mut f = File::open(path)?;
            f.read_to_end(&mut ret)?;
            Ok(ret)
        })()
        .map_err(human)
        .chain_error(|| human(format!("failed to read `{}`", path.display())))
}

pub fn write(path: &Path, contents: &[u8]) -> PackdResult<()> {
    (|| -> PackdResult<()> {
            let mut f = File::create(path)?;
            f.write_all(contents)?;
            Ok(())
        })()
        .map_err(human)
        .chain_error(|| human(format!("failed to write `{}`", path.display())))
}

pub fn append(path: &Path, contents: &[u8]) -> PackdResult<()> {
    (|| -> PackdResult<()> {
            let mut f = OpenOptions::new().write(true)
                .append(true)
                .create(true)
                .open(path)?;

            f.write_all(contents)?;
            Ok(())
        })()
        .chain_error(|| internal(format!("failed to write `{}`", path.display())))
}

/// First line of a file, trimmed. `None` when the file is missing or
/// unreadable.
pub fn read_first_line(path: &Path) -> Option<String> {
    match read(path) {
        Ok(contents) => Some(contents.lines().next().unwrap_or("").trim().to_string()),
        Err(..) => None,
    }
}

/// Equivalent of the unix touch command.
pub fn touch(path: &Path) -> PackdResult<()> {
    OpenOptions::new().write(true)
        .append(true)
        .create(true)
        .open(path)
        .map(|_| ())
        .chain_error(|| human(format!("failed to create `{}`", path.display())))
}

pub fn remove_file_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("could not remove `{}`: {}", path.display(), e);
        }
    }
}

pub fn remove_dir_if_exists(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_dir_all(path) {
            warn!("could not remove `{}`: {}", path.display(), e);
        }
    }
}

/// Recursive directory copy, skipping dot files.
pub fn copy_tree(src: &Path, dst: &Path) -> PackdResult<()> {
    if !dst.is_dir() {
        fs::create_dir_all(dst)?;
    }
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let from = entry.path();
        let to = dst.join(&name);
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
pub fn is_executable<P: AsRef<Path>>(path: P) -> bool {
    use std::os::unix::prelude::*;
    fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(windows)]
pub fn is_executable<P: AsRef<Path>>(path: P) -> bool {
    fs::metadata(path).map(|metadata| metadata.is_file()).unwrap_or(false)
}

pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Component::Prefix(..)) = components.peek()
        .cloned() {
        components.next();
        PathBuf::from(c.as_os_str())
    } else {
        PathBuf::new()
    };

    for component in components {
        match component {
            Component::Prefix(..) => unreachable!(),
            Component::RootDir => {
                ret.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                ret.pop();
            }
            Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}
