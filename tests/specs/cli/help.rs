//! Help and version output specs

use crate::prelude::*;

#[test]
fn help_lists_operator_flags() {
    cli()
        .args(&["--help"])
        .passes()
        .stdout_has("Usage:")
        .stdout_has("--config")
        .stdout_has("--kill")
        .stdout_has("--immediate")
        .stdout_has("--reload")
        .stdout_has("--single");
}

#[test]
fn help_hides_internal_entry_points() {
    cli().args(&["--help"]).passes().stdout_lacks("--foreground").stdout_lacks("exec-job");
}

#[test]
fn short_version_flag() {
    cli().args(&["-v"]).passes().stdout_has(concat!("pg_dbms_job ", env!("CARGO_PKG_VERSION")));
}

#[test]
fn long_version_flag() {
    cli().args(&["--version"]).passes().stdout_has("pg_dbms_job");
}

#[test]
fn unknown_flag_is_a_usage_error() {
    cli().args(&["--bogus"]).exits(2).stderr_has("--bogus");
}
