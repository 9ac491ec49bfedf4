//! The total order over package version strings.
//!
//! A version string has the shape `v<major>[.<minor>[.<patch>]]` with an
//! optional prerelease part. Any run of non-digits separates the numeric
//! fields; single-character separators carry meaning for the prerelease
//! part:
//!
//! * `b` or `~` - beta
//! * `a` - alpha
//! * `d` - development
//!
//! A release outranks any beta of the same triple, a beta any alpha, an
//! alpha any development build. The mapping packs the fields into fixed
//! decimal widths (four digits each) with a release-type offset added to the
//! last field, so comparing the numbers compares the versions.
//!
//! A blank version, or one without at least one numeric part, maps to 0.
//! Alpha/beta/develop separators need at least two numeric parts; with only
//! one part the separator is ignored. A literal `large` in the version text
//! is neutralised before parsing.

use regex::Regex;

const RELEASE_OFFSET: u64 = 90_000;
const BETA_OFFSET: u64 = 60_000;
const ALPHA_OFFSET: u64 = 30_000;

const MAJOR_WEIGHT: u64 = 10_000_000_000_000;
const MINOR_WEIGHT: u64 = 1_000_000_000;
const PATCH_WEIGHT: u64 = 100_000;

pub fn version_to_number(version: &str) -> u64 {
    let version = version.replace("large", "L");

    let non_digits = Regex::new(r"\D+").unwrap();
    let digits = Regex::new(r"\d+").unwrap();

    let mut number_parts: Vec<&str> = non_digits.split(&version).collect();
    let other_parts: Vec<&str> = digits.split(&version).collect();

    // discard blank leading elements; these appear when the string starts
    // with alpha characters (like "v") or has no digits at all
    while !number_parts.is_empty() && number_parts[0].is_empty() {
        number_parts.remove(0);
    }

    let mut parts_length = number_parts.len();
    if parts_length == 0 {
        return 0;
    }

    let mut number = 0;
    let mut release = true;
    if parts_length >= 2 {
        if other_parts.iter().any(|p| *p == "b") || other_parts.iter().any(|p| *p == "~") {
            release = false;
            number += BETA_OFFSET;
        } else if other_parts.iter().any(|p| *p == "a") {
            release = false;
            number += ALPHA_OFFSET;
        } else if other_parts.iter().any(|p| *p == "d") {
            release = false;
        }
    }

    // if release, all parts contribute to the main version number and the
    // offset is greater than all prerelease versions; if pre-release, the
    // last part is the prerelease number and the rest the main version
    if release {
        number += RELEASE_OFFSET;
    } else {
        parts_length -= 1;
        if !number_parts[parts_length].is_empty() {
            number += part_value(number_parts[parts_length]);
        }
    }

    if parts_length >= 1 && !number_parts[0].is_empty() {
        number += part_value(number_parts[0]) * MAJOR_WEIGHT;
    }
    if parts_length >= 2 && !number_parts[1].is_empty() {
        number += part_value(number_parts[1]) * MINOR_WEIGHT;
    }
    if parts_length >= 3 && !number_parts[2].is_empty() {
        number += part_value(number_parts[2]) * PATCH_WEIGHT;
    }

    number
}

fn part_value(part: &str) -> u64 {
    part.parse().unwrap_or(0)
}

/// Render the canonical string for a value produced by `version_to_number`.
/// Round-tripping any well-formed version through both functions is stable.
pub fn number_to_version(number: u64) -> String {
    if number == 0 {
        return String::new();
    }
    let major = number / MAJOR_WEIGHT;
    let minor = (number / MINOR_WEIGHT) % 10_000;
    let patch = (number / PATCH_WEIGHT) % 10_000;
    let tail = number % PATCH_WEIGHT;

    let base = format!("v{}.{}.{}", major, minor, patch);
    if tail >= RELEASE_OFFSET {
        base
    } else if tail >= BETA_OFFSET {
        format!("{}b{}", base, tail - BETA_OFFSET)
    } else if tail >= ALPHA_OFFSET {
        format!("{}a{}", base, tail - ALPHA_OFFSET)
    } else {
        format!("{}d{}", base, tail)
    }
}
