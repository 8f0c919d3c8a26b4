// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

#[yare::parameterized(
    missing        = { None,                       Recurrence::Once },
    blank          = { Some("   "),                Recurrence::Once },
    seconds        = { Some("30 seconds"),         Recurrence::Every(Duration::from_secs(30)) },
    one_minute     = { Some("1 minute"),           Recurrence::Every(Duration::from_secs(60)) },
    short_units    = { Some("2 h"),                Recurrence::Every(Duration::from_secs(7_200)) },
    mixed_case     = { Some("1 Day"),              Recurrence::Every(Duration::from_secs(86_400)) },
    compound       = { Some("1 hour 30 minutes"),  Recurrence::Every(Duration::from_secs(5_400)) },
    week           = { Some("1 week"),             Recurrence::Every(Duration::from_secs(604_800)) },
)]
fn parse_interval(input: Option<&str>, expected: Recurrence) {
    assert_eq!(Recurrence::parse(input), expected);
}

#[yare::parameterized(
    oracle_style   = { "sysdate + 1" },
    sql_expression = { "current_timestamp + '1 day'::interval" },
    zero           = { "0 seconds" },
    unknown_unit   = { "3 fortnights" },
    dangling       = { "5" },
)]
fn non_literal_intervals_are_rules(input: &str) {
    assert_eq!(Recurrence::parse(Some(input)), Recurrence::Rule(input.to_string()));
}

#[test]
fn every_reschedules_from_completion_time() {
    let recurrence = Recurrence::Every(Duration::from_secs(90));
    assert_eq!(recurrence.next_after(at(1_000)), NextRun::At(at(1_090)));
}

#[test]
fn rescheduling_is_deterministic() {
    // Same interval and completion time always produce the same next run;
    // nothing about the execution feeds into it.
    let recurrence = Recurrence::parse(Some("5 minutes"));
    let first = recurrence.next_after(at(5_000));
    let second = recurrence.next_after(at(5_000));
    assert_eq!(first, second);
    assert_eq!(first, NextRun::At(at(5_300)));
}

#[test]
fn once_has_no_next_run() {
    assert_eq!(Recurrence::Once.next_after(at(0)), NextRun::Never);
}

#[test]
fn rule_is_passed_to_the_store() {
    let recurrence = Recurrence::Rule("sysdate + 1".to_string());
    assert_eq!(recurrence.next_after(at(0)), NextRun::Rule("sysdate + 1".to_string()));
}

#[test]
fn job_key_display_includes_source() {
    assert_eq!(JobKey::scheduled(7).to_string(), "scheduled:7");
    assert_eq!(JobKey::asynchronous(9).to_string(), "async:9");
}

#[test]
fn job_definition_once_defaults() {
    let job = JobDefinition::once(JobKey::scheduled(3), "PERFORM 1;", at(10))
        .with_recurrence(Recurrence::Every(Duration::from_secs(1)));
    assert_eq!(job.payload.what, "PERFORM 1;");
    assert_eq!(job.payload.log_user, None);
    assert_eq!(job.recurrence, Recurrence::Every(Duration::from_secs(1)));
}

#[yare::parameterized(
    scheduled = { "scheduled", Some(JobSource::Scheduled) },
    asynchronous = { "async", Some(JobSource::Async) },
    unknown = { "cron", None },
)]
fn job_source_parse(name: &str, expected: Option<JobSource>) {
    assert_eq!(JobSource::parse(name), expected);
}
