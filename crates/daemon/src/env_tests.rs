// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::collections::HashMap;

fn lookup_from(vars: &[(&'static str, String)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> =
        vars.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
    move |name| map.get(name).cloned()
}

#[test]
fn job_survives_the_environment() {
    let key = JobKey::asynchronous(12);
    let payload = JobPayload {
        what: "PERFORM audit();".to_string(),
        log_user: Some("auditor".to_string()),
        schema_user: Some("audit".to_string()),
    };

    let (read_key, read_payload) = job_from_lookup(lookup_from(&job_vars(&key, &payload))).unwrap();

    assert_eq!(read_key, key);
    assert_eq!(read_payload, payload);
}

#[test]
fn optional_users_are_omitted() {
    let vars = job_vars(&JobKey::scheduled(1), &JobPayload::new("NULL;"));
    let names: Vec<&str> = vars.iter().map(|(k, _)| *k).collect();
    assert_eq!(names, vec![JOB_ID, JOB_SOURCE, JOB_WHAT]);
}

#[yare::parameterized(
    missing_id     = { &[], JobEnvError::Missing(JOB_ID) },
    bad_id         = { &[(JOB_ID, "abc")], JobEnvError::InvalidId("abc".to_string()) },
    missing_source = { &[(JOB_ID, "1")], JobEnvError::Missing(JOB_SOURCE) },
    bad_source     = { &[(JOB_ID, "1"), (JOB_SOURCE, "cron")], JobEnvError::InvalidSource("cron".to_string()) },
    missing_what   = { &[(JOB_ID, "1"), (JOB_SOURCE, "async")], JobEnvError::Missing(JOB_WHAT) },
)]
fn incomplete_environment_is_rejected(vars: &[(&'static str, &str)], expected: JobEnvError) {
    let owned: Vec<(&'static str, String)> = vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
    assert_eq!(job_from_lookup(lookup_from(&owned)).unwrap_err(), expected);
}

#[test]
fn libpq_vars_skip_empty_fields() {
    let target = ConnectTarget {
        host: "db".to_string(),
        port: 5433,
        database: "jobs".to_string(),
        user: String::new(),
        passwd: String::new(),
    };

    let vars: HashMap<&str, String> = libpq_vars(&target).into_iter().collect();

    assert_eq!(vars.get("PGHOST").map(String::as_str), Some("db"));
    assert_eq!(vars.get("PGPORT").map(String::as_str), Some("5433"));
    assert_eq!(vars.get("PGDATABASE").map(String::as_str), Some("jobs"));
    assert!(!vars.contains_key("PGUSER"));
    assert!(!vars.contains_key("PGPASSWORD"));
}

#[test]
#[serial_test::serial(process_env)]
fn config_path_follows_the_environment() {
    std::env::set_var("PG_DBMS_JOB_CONFIG", "/srv/dj/custom.conf");
    assert_eq!(config_path(), PathBuf::from("/srv/dj/custom.conf"));

    std::env::set_var("PG_DBMS_JOB_CONFIG", "");
    assert_eq!(config_path(), PathBuf::from(DEFAULT_CONFIG_PATH));

    std::env::remove_var("PG_DBMS_JOB_CONFIG");
    assert_eq!(config_path(), PathBuf::from(DEFAULT_CONFIG_PATH));
}

#[test]
#[serial_test::serial(process_env)]
fn child_reads_the_job_from_its_environment() {
    let key = JobKey { source: JobSource::Scheduled, id: JobId(12) };
    let payload = JobPayload { what: "PERFORM 1;".into(), log_user: None, schema_user: None };
    for (name, value) in job_vars(&key, &payload) {
        std::env::set_var(name, value);
    }
    std::env::remove_var(JOB_LOG_USER);
    std::env::remove_var(JOB_SCHEMA_USER);

    let read = job_from_env();

    for name in [JOB_ID, JOB_SOURCE, JOB_WHAT] {
        std::env::remove_var(name);
    }
    assert_eq!(read, Ok((key, payload)));
}
