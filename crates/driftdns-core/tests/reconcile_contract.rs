//! Contract tests for the reconciler scan loop: idempotence, debounce
//! coalescing, set semantics and discovery outage handling.
//!
//! Tests run on a paused clock; `advance` moves time deterministically
//! past timer deadlines.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use driftdns_core::discovery::Discovery;
use driftdns_core::Reconciler;

#[tokio::test(start_paused = true)]
async fn single_change_produces_single_update_after_debounce() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("10s", "60s"), &service);

    table.seen(address("00:11:22:33:44:55", "2001:db8::1"));
    reconciler.scan();
    settle().await;

    // nothing before the debounce window closes
    advance(Duration::from_secs(9)).await;
    assert_eq!(service.update_calls(), 0);

    advance(Duration::from_secs(2)).await;
    assert_eq!(service.update_calls(), 1);

    let updates = service.updates();
    assert_eq!(updates[0].0, "www");
    assert_eq!(updates[0].1, vec!["2001:db8::1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn unchanged_snapshot_does_not_reschedule() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("10s", "60s"), &service);

    table.seen(address("00:11:22:33:44:55", "2001:db8::1"));
    reconciler.scan();
    settle().await;

    // a second scan half way through the window must not reset the
    // deadline
    advance(Duration::from_secs(5)).await;
    reconciler.scan();
    settle().await;

    advance(Duration::from_secs(6)).await;
    assert_eq!(service.update_calls(), 1, "deadline was reset by an idempotent scan");

    // and repeated scans afterwards stay quiet
    for _ in 0..5 {
        reconciler.scan();
        advance(Duration::from_secs(1)).await;
    }
    advance(Duration::from_secs(30)).await;
    assert_eq!(service.update_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn burst_coalesces_into_one_update_with_latest_set() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("10s", "60s"), &service);

    table.seen(address("00:11:22:33:44:55", "2001:db8::1"));
    reconciler.scan();
    settle().await;

    // second address appears two seconds in; the window resets
    advance(Duration::from_secs(2)).await;
    table.seen(address("00:11:22:33:44:55", "2001:db8::2"));
    reconciler.scan();
    settle().await;

    // t=10: original deadline passed, nothing may fire
    advance(Duration::from_secs(8)).await;
    assert_eq!(service.update_calls(), 0);

    // t=12: exactly one update, carrying both addresses
    advance(Duration::from_secs(2)).await;
    assert_eq!(service.update_calls(), 1);
    assert_eq!(
        service.updates()[0].1,
        vec!["2001:db8::1".to_string(), "2001:db8::2".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn update_payload_is_a_set() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("1s", "60s"), &service);

    // same address sighted repeatedly over different channels
    table.seen(address("00:11:22:33:44:55", "2001:db8::1"));
    let mut again = address("00:11:22:33:44:55", "2001:db8::1");
    again.sources.insert("another-channel".into());
    table.seen(again);
    reconciler.scan();
    settle().await;

    advance(Duration::from_secs(2)).await;
    assert_eq!(service.update_calls(), 1);
    assert_eq!(service.updates()[0].1, vec!["2001:db8::1".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn addresses_outside_the_selector_are_ignored() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("1s", "60s"), &service);

    // wrong MAC, wrong prefix
    table.seen(address("aa:bb:cc:dd:ee:ff", "2001:db8::1"));
    table.seen(address("00:11:22:33:44:55", "2001:db9::1"));
    reconciler.scan();
    settle().await;

    advance(Duration::from_secs(5)).await;
    assert_eq!(service.update_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn convergence_after_discovery_settles() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("2s", "60s"), &service);

    table.seen(address("00:11:22:33:44:55", "2001:db8::1"));

    // snapshot stops changing; scans keep running
    for _ in 0..20 {
        reconciler.scan();
        advance(Duration::from_secs(1)).await;
    }
    advance(Duration::from_secs(60)).await;

    assert_eq!(service.update_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn discovery_outage_skips_the_tick() {
    let service = MockService::new();
    let registry = mock_registry(&service);
    let reconciler = Reconciler::new(
        single_target_config("1s", "60s"),
        Arc::new(UnavailableDiscovery) as Arc<dyn Discovery>,
        &registry,
    )
    .unwrap();

    reconciler.scan();
    settle().await;
    advance(Duration::from_secs(10)).await;

    assert_eq!(service.update_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn unknown_provider_is_fatal_at_construction() {
    let service = MockService::new();
    let table = Arc::new(driftdns_core::AddressTable::new());
    let registry = mock_registry(&service);

    let config = driftdns_core::Config::parse(
        r#"
tasks:
  lan:
    endpoints:
      ep: [www]
credentials:
  ep:
    provider: nonexistent
    settings: {}
"#,
    )
    .unwrap();

    let result = Reconciler::new(config, table as Arc<dyn Discovery>, &registry);
    assert!(matches!(
        result.err(),
        Some(driftdns_core::Error::UnknownProvider(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn pretty_print_shows_tree_and_redacts() {
    let service = MockService::new();
    let (reconciler, table) = reconciler(single_target_config("1s", "60s"), &service);

    table.seen(address("00:11:22:33:44:55", "2001:db8::1"));
    reconciler.scan();
    settle().await;

    let rendered = reconciler.pretty_print("", false);
    assert!(rendered.contains("Provider: mock"));
    assert!(rendered.contains("Endpoint: ep"));
    assert!(rendered.contains("www.example.com:"));
    assert!(rendered.contains("2001:db8::1"));
}
