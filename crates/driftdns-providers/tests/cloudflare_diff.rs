//! Cloudflare adapter: diff-and-apply against a mocked v4 API.

mod common;

use common::*;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_zone_lookup(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/zones"))
        .and(query_param("name", "example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [{"id": "zone-1"}]
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn settings(server: &MockServer) -> serde_json::Value {
    json!({
        "api_token": "token",
        "zone": "example.com",
        "ttl": "300s",
        "proxied": false,
        "api_base": server.uri(),
    })
}

#[tokio::test]
async fn creates_missing_and_deletes_obsolete_records() {
    let server = MockServer::start().await;
    mock_zone_lookup(&server).await;

    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .and(query_param("name", "www.example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"id": "r-keep", "type": "AAAA", "content": "2001:db8::1", "ttl": 300, "proxied": false},
                {"id": "r-stale", "type": "AAAA", "content": "2001:db8::dead", "ttl": 300, "proxied": false},
                {"id": "r-txt", "type": "TXT", "content": "ignored"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/zones/zone-1/dns_records/r-stale"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let service = service("cloudflare", settings(&server));
    service
        .update("www", &collection(&["2001:db8::1", "2001:db8::2"]))
        .await
        .unwrap();

    // the created record carries type, content and configured ttl
    let requests = server.received_requests().await.unwrap();
    let create = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .expect("one create request");
    let body: serde_json::Value = serde_json::from_slice(&create.body).unwrap();
    assert_eq!(body["type"], "AAAA");
    assert_eq!(body["content"], "2001:db8::2");
    assert_eq!(body["ttl"], 300);
}

#[tokio::test]
async fn converges_ttl_on_kept_records() {
    let server = MockServer::start().await;
    mock_zone_lookup(&server).await;

    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"id": "r-1", "type": "AAAA", "content": "2001:db8::1", "ttl": 120, "proxied": false}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/zones/zone-1/dns_records/r-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .expect(1)
        .mount(&server)
        .await;

    let service = service("cloudflare", settings(&server));
    service
        .update("www", &collection(&["2001:db8::1"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn unchanged_records_produce_no_mutations() {
    let server = MockServer::start().await;
    mock_zone_lookup(&server).await;

    Mock::given(method("GET"))
        .and(path("/zones/zone-1/dns_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"id": "r-1", "type": "AAAA", "content": "2001:db8::1", "ttl": 300, "proxied": false}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service = service("cloudflare", settings(&server));
    service
        .update("www", &collection(&["2001:db8::1"]))
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.method.as_str() == "GET"));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let service = service("cloudflare", settings(&server));
    let err = service
        .update("www", &collection(&["2001:db8::1"]))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "got: {err}");
}

#[tokio::test]
async fn auth_rejection_is_permanent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/zones"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let service = service("cloudflare", settings(&server));
    let err = service
        .update("www", &collection(&["2001:db8::1"]))
        .await
        .unwrap_err();
    assert!(!err.is_transient(), "got: {err}");
}
