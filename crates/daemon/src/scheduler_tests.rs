// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::pool::ShellLauncher;
use chrono::{TimeDelta, Utc};
use dj_core::{JobKey, Outcome, SystemClock};
use dj_storage::{Channel, ConnectTarget, MemoryConnector, MemoryStore};
use tokio::process::Command;
use tokio::task::JoinHandle;

const SLOW: Duration = Duration::from_secs(3600);

fn config(processes: usize, interval: Duration) -> DaemonConfig {
    DaemonConfig {
        job_queue_processes: processes,
        job_queue_interval: interval,
        nap_time: Duration::from_millis(20),
        error_delay: Duration::from_millis(50),
        ..DaemonConfig::default()
    }
}

/// Scheduled one-shot job that became due `secs_ago` seconds ago.
fn due(id: i64, secs_ago: i64, script: &str) -> JobDefinition {
    JobDefinition::once(JobKey::scheduled(id), script, Utc::now() - TimeDelta::seconds(secs_ago))
}

fn connector() -> MemoryConnector<SystemClock> {
    MemoryConnector::new(MemoryStore::new(SystemClock))
}

async fn scheduler(
    config: DaemonConfig,
    connector: &MemoryConnector<SystemClock>,
    launcher: Arc<dyn Launcher>,
) -> (Scheduler<SystemClock>, mpsc::Sender<ControlSignal>) {
    let (tx, rx) = mpsc::channel(8);
    let gateway = connector.connect(&config.target).await.unwrap();
    let scheduler = Scheduler::new(config, Arc::new(connector.clone()), launcher, SystemClock, rx)
        .with_gateway(gateway);
    (scheduler, tx)
}

async fn spawn(
    config: DaemonConfig,
    connector: &MemoryConnector<SystemClock>,
) -> (JoinHandle<StopReason>, mpsc::Sender<ControlSignal>) {
    let (scheduler, tx) = scheduler(config, connector, Arc::new(ShellLauncher)).await;
    (tokio::spawn(scheduler.run()), tx)
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn stop(
    handle: JoinHandle<StopReason>,
    control: &mpsc::Sender<ControlSignal>,
    signal: ControlSignal,
) -> StopReason {
    control.send(signal).await.unwrap();
    tokio::time::timeout(Duration::from_secs(10), handle).await.unwrap().unwrap()
}

#[tokio::test]
async fn oldest_jobs_first_and_next_after_a_slot_frees() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 60, "sleep 0.3"));
    store.insert(due(2, 60, "sleep 0.3"));
    store.insert(due(3, 30, "sleep 0.3"));

    // Polling is effectively off: only child exits can start the third job
    let (handle, control) = spawn(config(2, SLOW), &connector).await;
    eventually("all three jobs", || store.history().len() == 3).await;

    let history = store.history();
    let first = &store.history_for(&JobKey::scheduled(1))[0];
    let second = &store.history_for(&JobKey::scheduled(2))[0];
    let third = &store.history_for(&JobKey::scheduled(3))[0];
    assert!(first.overlaps(second));
    assert!(third.started_at >= first.ended_at.min(second.ended_at));
    assert!(history.iter().all(|r| r.outcome == Outcome::Success));
    assert_eq!(store.claim_calls()[0], 2);

    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn first_two_slots_go_to_oldest_jobs() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(3, 30, "sleep 30"));
    store.insert(due(2, 60, "sleep 30"));
    store.insert(due(1, 60, "sleep 30"));

    let (handle, control) = spawn(config(2, SLOW), &connector).await;
    eventually("two running jobs", || store.running().len() == 2).await;

    assert_eq!(store.running(), vec![JobKey::scheduled(1), JobKey::scheduled(2)]);
    assert_eq!(stop(handle, &control, ControlSignal::ImmediateStop).await, StopReason::Killed);
}

#[tokio::test]
async fn notification_wakes_the_loop() {
    let connector = connector();
    let store = connector.store().clone();
    let (handle, control) = spawn(config(4, SLOW), &connector).await;
    eventually("initial pass", || !store.claim_calls().is_empty()).await;

    store.insert(JobDefinition::once(JobKey::asynchronous(5), "exit 0", Utc::now()));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(store.history().is_empty(), "job ran without a wake-up");

    connector.notifier().notify(Channel::Async, "5");
    eventually("notified job", || store.history().len() == 1).await;
    assert!(store.job(&JobKey::asynchronous(5)).is_none());

    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn lost_listener_forces_a_pass() {
    let connector = connector();
    let store = connector.store().clone();
    let (handle, control) = spawn(config(4, SLOW), &connector).await;
    eventually("initial pass", || !store.claim_calls().is_empty()).await;

    store.insert(due(1, 1, "exit 0"));
    connector.notifier().drop_connection();

    eventually("job after listener drop", || store.history().len() == 1).await;
    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn polling_interval_picks_up_jobs() {
    let connector = connector();
    let store = connector.store().clone();
    let (handle, control) = spawn(config(4, Duration::from_millis(100)), &connector).await;
    eventually("initial pass", || !store.claim_calls().is_empty()).await;

    store.insert(due(1, 1, "exit 0"));

    eventually("polled job", || store.history().len() == 1).await;
    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn graceful_stop_waits_and_records() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 1, "sleep 0.5; echo finished"));
    let (handle, control) = spawn(config(4, SLOW), &connector).await;
    eventually("running job", || store.running().len() == 1).await;

    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);

    let history = store.history_for(&JobKey::scheduled(1));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, Outcome::Success);
    assert_eq!(history[0].output, "finished\n");
    assert!(store.running().is_empty());
}

#[tokio::test]
async fn immediate_stop_leaves_claims_for_reconciliation() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 1, "sleep 30"));
    let (handle, control) = spawn(config(4, SLOW), &connector).await;
    eventually("running job", || store.running().len() == 1).await;

    assert_eq!(stop(handle, &control, ControlSignal::ImmediateStop).await, StopReason::Killed);
    assert_eq!(store.running(), vec![JobKey::scheduled(1)]);
    assert!(store.history().is_empty());

    let stale = store.reconcile_stale().await.unwrap();
    assert_eq!(stale.len(), 1);
    assert!(store.running().is_empty());
    assert_eq!(store.history()[0].outcome, Outcome::Crashed);
}

#[tokio::test]
async fn immediate_stop_escalates_a_drain() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 1, "sleep 30"));
    let (handle, control) = spawn(config(4, SLOW), &connector).await;
    eventually("running job", || store.running().len() == 1).await;

    control.send(ControlSignal::GracefulStop).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    assert_eq!(stop(handle, &control, ControlSignal::ImmediateStop).await, StopReason::Killed);
    assert!(store.history().is_empty());
}

#[tokio::test]
async fn reload_grows_the_pool() {
    let connector = connector();
    let store = connector.store().clone();
    for id in 1..=3 {
        store.insert(due(id, 1, "sleep 30"));
    }
    let (scheduler, control) = scheduler(config(1, SLOW), &connector, Arc::new(ShellLauncher)).await;
    let scheduler = scheduler.with_reloader(|current: &DaemonConfig| {
        Some(DaemonConfig { job_queue_processes: 3, ..current.clone() })
    });
    let handle = tokio::spawn(scheduler.run());
    eventually("first job", || store.running().len() == 1).await;

    control.send(ControlSignal::Reload).await.unwrap();

    eventually("all jobs", || store.running().len() == 3).await;
    assert_eq!(stop(handle, &control, ControlSignal::ImmediateStop).await, StopReason::Killed);
}

#[tokio::test]
async fn reload_with_new_target_reconnects() {
    let connector = connector();
    let store = connector.store().clone();
    let (scheduler, control) = scheduler(config(1, SLOW), &connector, Arc::new(ShellLauncher)).await;
    let scheduler = scheduler.with_reloader(|current: &DaemonConfig| {
        let target = ConnectTarget { database: "other".to_string(), ..current.target.clone() };
        Some(DaemonConfig { target, ..current.clone() })
    });
    let handle = tokio::spawn(scheduler.run());
    eventually("initial pass", || !store.claim_calls().is_empty()).await;

    control.send(ControlSignal::Reload).await.unwrap();

    eventually("reconnect", || connector.connects().len() == 2).await;
    assert_eq!(connector.connects()[1].database, "other");
    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn recovers_after_losing_the_store() {
    let connector = connector();
    let store = connector.store().clone();
    store.set_unavailable(true);
    store.insert(due(1, 1, "exit 0"));
    let (handle, control) = spawn(config(4, SLOW), &connector).await;
    eventually("reconnect attempt", || connector.connects().len() >= 2).await;

    store.set_unavailable(false);

    eventually("job after recovery", || store.history().len() == 1).await;
    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn refused_connections_back_off() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 1, "exit 0"));
    let (scheduler, control) = scheduler(config(4, SLOW), &connector, Arc::new(ShellLauncher)).await;
    store.set_unavailable(true);
    connector.refuse_next(2);
    let handle = tokio::spawn(scheduler.run());

    eventually("connect after refusals", || connector.connects().len() >= 2).await;
    store.set_unavailable(false);

    eventually("job after reconnect", || store.history().len() == 1).await;
    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn completion_survives_an_outage() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 1, "sleep 0.3"));
    let (handle, control) = spawn(config(4, SLOW), &connector).await;
    eventually("running job", || store.running().len() == 1).await;

    store.set_unavailable(true);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(store.history().is_empty());
    store.set_unavailable(false);

    eventually("recorded completion", || store.history().len() == 1).await;
    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
}

#[tokio::test]
async fn single_pass_runs_due_jobs_then_stops() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 5, "exit 0"));
    store.insert(due(2, 5, "exit 1"));
    store.insert(JobDefinition::once(JobKey::scheduled(3), "exit 0", Utc::now() + TimeDelta::hours(1)));
    let (scheduler, _control) = scheduler(config(4, SLOW), &connector, Arc::new(ShellLauncher)).await;

    let reason = tokio::time::timeout(Duration::from_secs(10), scheduler.run_once()).await.unwrap();

    assert_eq!(reason, StopReason::Finished);
    assert_eq!(store.history_for(&JobKey::scheduled(1))[0].outcome, Outcome::Success);
    assert_eq!(store.history_for(&JobKey::scheduled(2))[0].outcome, Outcome::Failure);
    assert!(store.history_for(&JobKey::scheduled(3)).is_empty());
    assert!(store.running().is_empty());
}

/// Launcher whose children can never start.
struct Unstartable;

impl Launcher for Unstartable {
    fn command(&self, _: &JobDefinition, _: &ConnectTarget) -> Command {
        Command::new("/nonexistent/pg_dbms_job")
    }
}

#[tokio::test]
async fn unstartable_job_is_released_on_stop() {
    let connector = connector();
    let store = connector.store().clone();
    store.insert(due(1, 1, "exit 0"));
    let config = config(4, Duration::from_millis(50));
    let (scheduler, control) = scheduler(config, &connector, Arc::new(Unstartable)).await;
    let handle = tokio::spawn(scheduler.run());
    eventually("claimed job", || store.running().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(store.running(), vec![JobKey::scheduled(1)]);

    assert_eq!(stop(handle, &control, ControlSignal::GracefulStop).await, StopReason::Drained);
    assert!(store.running().is_empty());
    assert!(store.history().is_empty());
}
