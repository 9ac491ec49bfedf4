//! The compatibility and conflict engine.
//!
//! Runs per package per tick (and after downloads and installs) and derives
//! the package's version triple and `incompatible` state from what is on
//! disk. The first failing check wins; conflict bookkeeping only runs when
//! everything ahead of it passed and no operation is in flight.

use std::path::Path;

use package::{Dependency, FileConflict};
use registry::State;
use util::{Config, clock, paths};
use version::version_to_number;

/// Re-read versions and flags for the package at `index`.
///
/// Returns true when a `check:<name>` pre-run should be scheduled so the
/// setup program can refresh its own conflict bookkeeping. Must be called
/// with the registry locked.
pub fn update_versions_and_flags(state: &mut State,
                                 index: usize,
                                 config: &Config,
                                 do_conflict_checks: bool,
                                 do_script_prechecks: bool)
                                 -> bool {
    let name = match state.packages.get(index) {
        Some(package) => package.name().to_string(),
        None => return false,
    };
    let package_dir = config.package_dir(&name);

    let (pending, old_dependency_errors, old_file_conflicts, old_patch_errors, last_precheck) = {
        let package = &state.packages[index];
        (package.pending(),
         package.dependency_errors.clone(),
         package.file_conflicts.clone(),
         package.patch_errors.clone(),
         package.last_script_precheck)
    };

    // no package directory - null out all params
    if !package_dir.is_dir() {
        let package = &mut state.packages[index];
        package.set_installed_version(&*state.bus, "");
        package.set_stored_version(&*state.bus, "");
        package.auto_install_ok = false;
        package.set_incompatible(&*state.bus, "no package", "", false);
        return false;
    }

    // an installed-version marker with no content means some unknown
    // version is installed
    let installed = match paths::read_first_line(&config.installed_version_file(&name)) {
        Some(ref version) if version.is_empty() => "unknown".to_string(),
        Some(version) => version,
        None => String::new(),
    };
    let stored = paths::read_first_line(&config.version_file(&name)).unwrap_or_default();

    let auto_install_ok = !config.options_dir(&name).join("DO_NOT_AUTO_INSTALL").exists();

    let mut incompatible: Option<String> = None;
    let mut details = String::new();
    let mut resolvable = false;

    if package_dir.join("raspberryPiOnly").exists() && !config.platform().starts_with("Rasp") {
        incompatible = Some(format!("incompatible with {}", config.platform()));
    }

    // firmware window: [firstCompatibleVersion, obsoleteVersion), optionally
    // narrowed by an explicit allowlist
    if incompatible.is_none() {
        let first = paths::read_first_line(&package_dir.join("firstCompatibleVersion"))
            .unwrap_or_else(|| "v2.71".to_string());
        let obsolete = paths::read_first_line(&package_dir.join("obsoleteVersion"))
            .unwrap_or_else(|| "v9999.9999.9999".to_string());
        let firmware = config.firmware_version_number();
        if firmware < version_to_number(&first) || firmware >= version_to_number(&obsolete) {
            incompatible = Some(format!("incompatible with {}", config.firmware_version()));
        } else {
            let allowlist = package_dir.join("validFirmwareVersions");
            if allowlist.exists() {
                let allowed = paths::read(&allowlist)
                    .map(|contents| contents.lines().any(|line| line.trim() == config.firmware_version()))
                    .unwrap_or(false);
                if !allowed {
                    incompatible = Some(format!("incompatible with {}", config.firmware_version()));
                }
            }
        }
    }

    if incompatible.is_none() {
        let file_set = package_dir.join("FileSets").join(config.firmware_version());
        if file_set.join("INCOMPLETE").exists() {
            incompatible = Some(format!("incomplete file set for {}", config.firmware_version()));
        }
    }

    // optionsRequired without optionsSet means a blind install would run
    // with no configuration
    if incompatible.is_none() {
        if package_dir.join("optionsRequired").exists() &&
           !config.options_dir(&name).join("optionsSet").exists() {
            incompatible = Some("install from command line".to_string());
        }
    }

    let mut needs_precheck = do_script_prechecks;
    let mut dependency_errors = old_dependency_errors.clone();
    let mut file_conflicts = old_file_conflicts.clone();
    let mut patch_errors = old_patch_errors.clone();
    let mut ran_conflict_checks = false;

    if do_conflict_checks && incompatible.is_none() && !pending {
        ran_conflict_checks = true;
        dependency_errors = read_dependency_errors(config, &package_dir);
        let (conflicts, precheck) = read_file_conflicts(&name, &package_dir, last_precheck);
        file_conflicts = conflicts;
        if precheck {
            needs_precheck = true;
        }

        if dependency_errors != old_dependency_errors {
            if dependency_errors.is_empty() {
                warn!("dependency conflicts for {} have been resolved", name);
            } else {
                for dependency in dependency_errors.iter() {
                    warn!("{} requires {} to be {}", name, dependency.package, dependency.requirement);
                }
            }
        }
        if file_conflicts != old_file_conflicts {
            if file_conflicts.is_empty() {
                warn!("file conflicts for {} have been resolved", name);
            } else {
                for conflict in file_conflicts.iter() {
                    warn!("to install {}, {} must not be installed ({})",
                          name,
                          conflict.package,
                          conflict.file);
                }
            }
        }

        // merge both conflict sets, eliminating duplicates
        let mut conflicts: Vec<(String, String)> = dependency_errors.iter()
            .map(|d| (d.package.clone(), d.requirement.clone()))
            .chain(file_conflicts.iter().map(|f| (f.package.clone(), f.requirement.clone())))
            .collect();
        conflicts.sort();
        conflicts.dedup();

        if !conflicts.is_empty() {
            resolvable = true;
            for (other, requirement) in conflicts {
                if requirement == "uninstalled" {
                    details.push_str(&format!("{} must not be installed\n", other));
                } else {
                    match state.locate(&other) {
                        None => {
                            details.push_str(&format!("{} must be installed but not available\n", other));
                            resolvable = false;
                        }
                        Some(package) => {
                            if !package.stored_version.is_empty() {
                                details.push_str(&format!("{} must be installed\n", other));
                            } else if !package.remote_version.is_empty() {
                                details.push_str(&format!("{} must be downloaded and installed\n", other));
                            } else {
                                details.push_str(&format!("{} unknown\n", other));
                            }
                        }
                    }
                }
            }
            incompatible = Some("package conflict".to_string());
        } else {
            // patch errors only surface when nothing else is wrong
            patch_errors = read_patch_errors(&package_dir);
            if patch_errors != old_patch_errors {
                if patch_errors.is_empty() {
                    warn!("{} patch check reported no errors", name);
                } else {
                    for line in patch_errors.iter() {
                        warn!("{} patch check error: {}", name, line);
                    }
                }
            }
            if !patch_errors.is_empty() {
                for line in patch_errors.iter() {
                    details.push_str(line);
                    details.push('\n');
                }
                incompatible = Some("patch error".to_string());
                resolvable = false;
            }
        }

        // make sure script checks run once after startup
        if last_precheck == 0 {
            needs_precheck = true;
        }
    }

    {
        let package = &mut state.packages[index];
        package.set_installed_version(&*state.bus, &installed);
        package.set_stored_version(&*state.bus, &stored);
        package.auto_install_ok = auto_install_ok;
        package.dependency_errors = dependency_errors;
        package.file_conflicts = file_conflicts;
        package.patch_errors = patch_errors;
        match incompatible {
            Some(reason) => package.set_incompatible(&*state.bus, &reason, &details, resolvable),
            None => package.set_incompatible(&*state.bus, "", "", false),
        }
        if ran_conflict_checks {
            package.last_script_precheck = clock::now_secs();
        }
    }

    needs_precheck && config.setup_file(&name).exists()
}

/// Parse `packageDependencies`: one `<package> installed|uninstalled` pair
/// per line, collecting the ones the system currently violates.
fn read_dependency_errors(config: &Config, package_dir: &Path) -> Vec<Dependency> {
    let mut errors = Vec::new();
    let path = package_dir.join("packageDependencies");
    let contents = match paths::read(&path) {
        Ok(contents) => contents,
        Err(..) => return errors,
    };
    for line in contents.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        if parts.len() < 2 {
            error!("package dependency `{}` incomplete", line);
            continue;
        }
        let dependency = parts[0];
        let requirement = parts[1];
        let is_installed = config.installed_version_file(dependency).exists();
        let must_be_installed = requirement == "installed";
        if is_installed != must_be_installed {
            errors.push(Dependency {
                package: dependency.to_string(),
                requirement: requirement.to_string(),
            });
        }
    }
    errors.sort();
    errors
}

/// Walk both file lists for active-file paths and report files whose
/// `.package` marker names another package. A marker newer than the last
/// setup pre-check also forces a fresh `check` run.
fn read_file_conflicts(name: &str,
                       package_dir: &Path,
                       last_precheck: u64)
                       -> (Vec<FileConflict>, bool) {
    let mut conflicts = Vec::new();
    let mut needs_precheck = false;
    for list in &["fileList", "fileListVersionIndependent"] {
        let path = package_dir.join("FileSets").join(list);
        let contents = match paths::read(&path) {
            Ok(contents) => contents,
            Err(..) => continue,
        };
        for entry in contents.lines() {
            let entry = entry.trim();
            if !entry.starts_with('/') {
                continue;
            }
            let active_file = match entry.split_whitespace().next() {
                Some(path) => path,
                None => continue,
            };
            let marker = format!("{}.package", active_file);
            let marker_path = Path::new(&marker);
            if !marker_path.exists() {
                continue;
            }
            if clock::mtime_secs(marker_path).unwrap_or(0) > last_precheck {
                needs_precheck = true;
            }
            if let Ok(owners) = paths::read(marker_path) {
                for owner in owners.lines() {
                    let owner = owner.trim();
                    if !owner.is_empty() && owner != name {
                        let base = Path::new(active_file)
                            .file_name()
                            .map(|f| f.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        conflicts.push(FileConflict {
                            package: owner.to_string(),
                            requirement: "uninstalled".to_string(),
                            file: base,
                        });
                    }
                }
            }
        }
    }
    conflicts.sort();
    conflicts.dedup();
    (conflicts, needs_precheck)
}

fn read_patch_errors(package_dir: &Path) -> Vec<String> {
    let path = package_dir.join("patchErrors");
    let contents = match paths::read(&path) {
        Ok(contents) => contents,
        Err(..) => return Vec::new(),
    };
    let mut errors: Vec<String> = contents.lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    errors.sort();
    errors.dedup();
    errors
}
