extern crate packd;

use packd::version::{number_to_version, version_to_number};

#[test]
fn release_ordering() {
    assert!(version_to_number("v1.2.3") < version_to_number("v1.2.4"));
    assert!(version_to_number("v1.2.9") < version_to_number("v1.3.0"));
    assert!(version_to_number("v1.9.9") < version_to_number("v2.0.0"));
    assert!(version_to_number("v2.71") < version_to_number("v3.10"));
    assert_eq!(version_to_number("v1.2.3"), version_to_number("v1.2.3"));
}

#[test]
fn prerelease_ranks_below_release() {
    let release = version_to_number("v1.2.3");
    let beta = version_to_number("v1.2.3b4");
    let tilde_beta = version_to_number("v1.2.3~4");
    let alpha = version_to_number("v1.2.3a4");
    let develop = version_to_number("v1.2.3d4");

    assert!(release > beta);
    assert!(beta > alpha);
    assert!(alpha > develop);
    assert_eq!(beta, tilde_beta);
}

#[test]
fn prerelease_numbers_order_within_type() {
    assert!(version_to_number("v1.0.0b2") < version_to_number("v1.0.0b10"));
    assert!(version_to_number("v1.0.0a9") < version_to_number("v1.0.0b1"));
    // a beta of a later version outranks the earlier release
    assert!(version_to_number("v1.2.3") < version_to_number("v1.2.4b1"));
}

#[test]
fn invalid_versions_are_zero() {
    assert_eq!(version_to_number(""), 0);
    assert_eq!(version_to_number("latest"), 0);
    assert_eq!(version_to_number("?"), 0);
    assert_eq!(version_to_number("beta"), 0);
}

#[test]
fn single_part_ignores_prerelease_separator() {
    // alpha and beta separators need at least two number parts
    assert_eq!(version_to_number("v1"), version_to_number("b1"));
    assert!(version_to_number("v2b") > version_to_number("v1.9.9"));
}

#[test]
fn large_in_version_text_is_neutral() {
    assert_eq!(version_to_number("vlarge1.2"), version_to_number("v1.2"));
}

#[test]
fn two_part_versions() {
    assert_eq!(version_to_number("v1.2"), version_to_number("v1.2.0"));
    assert!(version_to_number("v1.2b3") < version_to_number("v1.2"));
}

#[test]
fn round_trip_is_stable() {
    for v in &["v1.2.3", "v1.2", "v1", "v1.2.3b4", "v1.2.3a4", "v1.2.3d4", "v1.2~7", "v2.71", "v9999.9999.9999"] {
        let number = version_to_number(v);
        assert_eq!(version_to_number(&number_to_version(number)),
                   number,
                   "round trip failed for {}",
                   v);
    }
    assert_eq!(number_to_version(0), "");
}
