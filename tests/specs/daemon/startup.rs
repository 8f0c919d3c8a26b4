//! Daemon startup failure specs
//!
//! Every fatal startup error must exit 1 and leave no pid file behind.

use crate::prelude::*;

#[test]
fn single_pass_fails_when_database_is_unreachable() {
    let install = Install::new();

    install.pg_dbms_job().args(&["-s"]).exits(1).stderr_has("pg_dbms_job:");

    assert!(!install.pidfile().exists());
    assert!(install.log().contains("pg_dbms_job starting"), "log:\n{}", install.log());
}

#[test]
fn foreground_fails_when_database_is_unreachable() {
    let install = Install::new();

    install.pg_dbms_job().args(&["--foreground"]).exits(1);

    assert!(!install.pidfile().exists());
}

#[test]
fn debug_flag_reaches_the_log() {
    let install = Install::new();

    install.pg_dbms_job().args(&["-s", "-d"]).exits(1);

    assert!(install.log().contains("DEBUG"), "log:\n{}", install.log());
}

#[test]
fn single_pass_fails_without_config() {
    let install = Install::new();
    let missing = install.config_path().with_file_name("absent.conf");

    cli().args(&["-c", path_str(&missing), "-s"]).exits(1).stderr_has("absent.conf");
}

#[test]
fn detach_fails_without_config() {
    let install = Install::new();
    let missing = install.config_path().with_file_name("absent.conf");

    cli().args(&["-c", path_str(&missing)]).exits(1).stderr_has("absent.conf");
    assert!(!install.pidfile().exists());
}

#[test]
fn bad_config_lines_are_logged_not_fatal() {
    let install = Install::new();
    install.write_config("no_such_option=1\n");

    // Still fails on the database, after logging the ignored line
    install.pg_dbms_job().args(&["-s"]).exits(1);

    assert!(install.log().contains("no_such_option"), "log:\n{}", install.log());
}
