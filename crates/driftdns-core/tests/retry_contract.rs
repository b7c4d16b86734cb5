//! Contract tests for the hostname state machine: retry after failure,
//! at-most-one in-flight update, and supersession of a failed call by a
//! newer schedule.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use driftdns_core::Hostname;

#[tokio::test(start_paused = true)]
async fn failed_update_retries_with_same_set() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("10s", "60s"), &service);

    service.fail_next(1);
    table.seen(address("00:11:22:33:44:55", "2001:db8::1"));
    reconciler.scan();
    settle().await;

    // first attempt at t=10 fails
    advance(Duration::from_secs(11)).await;
    assert_eq!(service.update_calls(), 1);

    // the error is observable between attempts
    let state = reconciler.state();
    let rendered = state.pretty_print("", false);
    assert!(rendered.contains("(last update error:"), "got: {rendered}");

    // no retry before now + retry_time
    advance(Duration::from_secs(58)).await;
    assert_eq!(service.update_calls(), 1);

    // retry lands at ~t=70 carrying the same set
    advance(Duration::from_secs(3)).await;
    assert_eq!(service.update_calls(), 2);
    let updates = service.updates();
    assert_eq!(updates[0].1, updates[1].1);

    // success clears the error
    let rendered = state.pretty_print("", false);
    assert!(!rendered.contains("(last update error:"));
    assert!(rendered.contains("(last update: "));
}

fn bare_hostname(service: &Arc<MockService>) -> Arc<Hostname> {
    Hostname::new(
        "ep",
        "www",
        Arc::clone(service) as Arc<dyn driftdns_core::Service>,
        Duration::from_secs(1),
        Duration::from_secs(60),
    )
}

#[tokio::test(start_paused = true)]
async fn at_most_one_update_in_flight() {
    let service = MockService::new();
    service.set_delay(Duration::from_secs(5));
    let hostname = bare_hostname(&service);

    hostname.store_and_schedule(collection(&[("00:11:22:33:44:55", "2001:db8::1")]));
    // timer fires at t=1, update stalls until t=6
    advance(Duration::from_secs(1)).await;

    // a new schedule fires at t=3, while the first call is in flight
    hostname.store_and_schedule(collection(&[("00:11:22:33:44:55", "2001:db8::2")]));
    advance(Duration::from_secs(2)).await;
    assert_eq!(service.update_calls(), 0, "second call must wait for the first");

    // first call finishes at t=6; the deferred one follows at t=11
    advance(Duration::from_secs(4)).await;
    advance(Duration::from_secs(5)).await;
    settle().await;

    assert_eq!(service.update_calls(), 2);
    assert_eq!(service.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_of_superseded_call_does_not_override_new_schedule() {
    let service = MockService::new();
    service.set_delay(Duration::from_secs(5));
    service.fail_next(1);
    let hostname = bare_hostname(&service);

    hostname.store_and_schedule(collection(&[("00:11:22:33:44:55", "2001:db8::1")]));
    advance(Duration::from_secs(1)).await; // in flight, will fail at t=6

    // newer schedule arrives during the call
    hostname.store_and_schedule(collection(&[("00:11:22:33:44:55", "2001:db8::2")]));

    // first call fails at t=6; its retry (t=66) must NOT be armed, the
    // new schedule (fires t=2, deferred to completion) wins
    advance(Duration::from_secs(5)).await;
    advance(Duration::from_secs(5)).await;
    settle().await;

    assert_eq!(service.update_calls(), 2);
    let updates = service.updates();
    // the failed result was still recorded, then the new set was pushed
    assert_eq!(updates[0].1, vec!["2001:db8::1".to_string()]);
    assert_eq!(updates[1].1, vec!["2001:db8::2".to_string()]);

    // nothing further fires at the failed call's retry horizon
    advance(Duration::from_secs(70)).await;
    assert_eq!(service.update_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn schedule_while_pending_replaces_deadline() {
    let service = MockService::new();
    let hostname = bare_hostname(&service);

    hostname.store_and_schedule(collection(&[("00:11:22:33:44:55", "2001:db8::1")]));
    // re-arm five times within the window
    for _ in 0..5 {
        advance(Duration::from_millis(500)).await;
        hostname.schedule_update(Duration::from_secs(1));
    }
    settle().await;
    assert_eq!(service.update_calls(), 0);

    advance(Duration::from_secs(2)).await;
    assert_eq!(service.update_calls(), 1);
}
