#![allow(clippy::unwrap_used)]
// Integration tests for `ContextClient` and `DeviceClient` using wiremock.

use bytes::Bytes;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ulgate_api::context::types::{Attribute, Entity, EntityRef, Subscription};
use ulgate_api::{ContextClient, DeviceClient, Error, Scope};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ContextClient) {
    let server = MockServer::start().await;
    let client = ContextClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

fn scope() -> Scope<'static> {
    Scope::new("smartcity", "/parks")
}

// ── Update tests ────────────────────────────────────────────────────

#[tokio::test]
async fn test_update_entity_appends_with_tenancy_headers() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v2/op/update"))
        .and(header("fiware-service", "smartcity"))
        .and(header("fiware-servicepath", "/parks"))
        .and(body_json(json!({
            "actionType": "append",
            "entities": [{
                "id": "dev1",
                "type": "Thing",
                "humidity": { "type": "Text", "value": "32" }
            }]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let entity = Entity::new("dev1", "Thing").with_attribute("humidity", Attribute::text("32"));
    client.update_entity(scope(), entity).await.unwrap();
}

#[tokio::test]
async fn test_update_entity_maps_ngsi_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v2/op/update"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "BadRequest",
            "description": "invalid characters in attribute value"
        })))
        .mount(&server)
        .await;

    let result = client
        .update_entity(scope(), Entity::new("dev1", "Thing"))
        .await;

    match result {
        Err(Error::Broker {
            status,
            message,
            code,
        }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "invalid characters in attribute value");
            assert_eq!(code.as_deref(), Some("BadRequest"));
        }
        other => panic!("expected Broker error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v2/op/update"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;

    let err = client
        .update_entity(scope(), Entity::new("dev1", "Thing"))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "503 should be transient: {err:?}");
}

// ── Query tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_query_attributes() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v2/entities/dev1/attrs"))
        .and(query_param("type", "Thing"))
        .and(query_param("attrs", "sleepTime,warningLevel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sleepTime": { "type": "Number", "value": 200, "metadata": {} },
            "warningLevel": { "type": "Text", "value": "ERROR", "metadata": {} }
        })))
        .mount(&server)
        .await;

    let attrs = client
        .query_attributes(
            scope(),
            "dev1",
            Some("Thing"),
            &["sleepTime".into(), "warningLevel".into()],
        )
        .await
        .unwrap();

    assert_eq!(attrs.len(), 2);
    assert_eq!(attrs["sleepTime"].value, json!(200));
    assert_eq!(attrs["warningLevel"].value, json!("ERROR"));
}

#[tokio::test]
async fn test_query_unknown_entity_is_not_found() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/v2/entities/ghost/attrs"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "NotFound",
            "description": "The requested entity has not been found. Check type and id"
        })))
        .mount(&server)
        .await;

    let err = client
        .query_attributes(scope(), "ghost", None, &[])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// ── Subscription tests ──────────────────────────────────────────────

#[tokio::test]
async fn test_subscribe_reads_id_from_location() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v2/subscriptions"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Location", "/v2/subscriptions/5f9a1c2b3d4e"),
        )
        .mount(&server)
        .await;

    let sub = Subscription::for_entity(
        EntityRef {
            id: "dev1".into(),
            entity_type: "Thing".into(),
        },
        vec!["switch".into()],
        "http://localhost:4041/notify",
    );
    let id = client.subscribe(scope(), &sub).await.unwrap();
    assert_eq!(id, "5f9a1c2b3d4e");
}

#[tokio::test]
async fn test_subscribe_without_location_fails() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/v2/subscriptions"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let sub = Subscription::for_entity(
        EntityRef {
            id: "dev1".into(),
            entity_type: "Thing".into(),
        },
        vec!["switch".into()],
        "http://localhost:4041/notify",
    );
    let result = client.subscribe(scope(), &sub).await;
    assert!(matches!(result, Err(Error::MissingSubscriptionId)));
}

#[tokio::test]
async fn test_unsubscribe() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/v2/subscriptions/5f9a1c2b3d4e"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.unsubscribe(scope(), "5f9a1c2b3d4e").await.unwrap();
}

// ── Device push tests ───────────────────────────────────────────────

#[tokio::test]
async fn test_device_push_returns_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/command"))
        .and(header("content-type", "text/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("dev1@PING|pong"))
        .mount(&server)
        .await;

    let client = DeviceClient::from_reqwest(reqwest::Client::new());
    let body = client
        .push(
            &format!("{}/command", server.uri()),
            "text/plain",
            Bytes::from_static(b"dev1@PING|"),
        )
        .await
        .unwrap();
    assert_eq!(body, Bytes::from_static(b"dev1@PING|pong"));
}

#[tokio::test]
async fn test_device_push_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/command"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = DeviceClient::from_reqwest(reqwest::Client::new());
    let result = client
        .push(
            &format!("{}/command", server.uri()),
            "text/plain",
            Bytes::from_static(b"dev1@PING|"),
        )
        .await;
    assert!(matches!(
        result,
        Err(Error::DeviceRejected { status: 500, .. })
    ));
}
