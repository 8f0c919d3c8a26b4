//! Signalling a running daemon through its pid file

use crate::prelude::*;

#[test]
fn kill_without_daemon_fails() {
    let install = Install::new();
    install.pg_dbms_job().args(&["-k"]).exits(1).stderr_has("no pg_dbms_job daemon is running");
}

#[test]
fn immediate_without_daemon_fails() {
    let install = Install::new();
    install.pg_dbms_job().args(&["-m"]).exits(1).stderr_has("no pg_dbms_job daemon is running");
}

#[test]
fn reload_without_daemon_fails() {
    let install = Install::new();
    install.pg_dbms_job().args(&["-r"]).exits(1).stderr_has("no pg_dbms_job daemon is running");
}

#[test]
fn leftover_pid_file_is_not_a_daemon() {
    let install = Install::new();
    // Pid of a process that is certainly alive, but the file is not locked
    std::fs::write(install.pidfile(), "1\n").unwrap();

    install.pg_dbms_job().args(&["-k"]).exits(1).stderr_has("no pg_dbms_job daemon is running");
    assert!(install.pidfile().exists());
}

#[test]
fn missing_config_fails() {
    let install = Install::new();
    let missing = install.config_path().with_file_name("absent.conf");

    cli().args(&["-c", path_str(&missing), "-r"]).exits(1).stderr_has("absent.conf");
}

#[test]
fn config_path_from_environment() {
    let install = Install::new();
    cli()
        .env("PG_DBMS_JOB_CONFIG", install.config_path())
        .args(&["-k"])
        .exits(1)
        .stderr_has(path_str(&install.pidfile()));
}

#[test]
fn only_one_signal_at_a_time() {
    let install = Install::new();
    install.pg_dbms_job().args(&["-k", "-r"]).fails().stderr_has("cannot be used with");
}

#[test]
fn graceful_stop_waits_for_the_daemon_to_exit() {
    use fs2::FileExt;
    use std::time::{Duration, Instant};

    let install = Install::new();
    let mut daemon = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let lock = std::fs::File::create(install.pidfile()).unwrap();
    lock.try_lock_exclusive().unwrap();
    std::fs::write(install.pidfile(), format!("{}\n", daemon.id())).unwrap();

    let mut stop = install.spawn(&["-k"]);
    std::thread::sleep(Duration::from_millis(500));
    assert!(stop.try_wait().unwrap().is_none(), "-k returned while the pid file was locked");

    // The fake daemon lets go of its pid file
    drop(lock);
    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = stop.try_wait().unwrap() {
            break status;
        }
        assert!(Instant::now() < deadline, "-k still waiting after the lock was released");
        std::thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(0));
    daemon.wait().unwrap();
}
