use super::listen::{apply_event, DatabaseEvent};
use super::*;
use crate::auth::models::SessionCredential;
use chrono::Utc;
use futures::StreamExt;
use httpmock::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn credential(id_token: &str) -> SessionCredential {
    SessionCredential {
        uid: "u1".to_string(),
        phone_number: Some("+919876543210".to_string()),
        email: None,
        display_name: None,
        photo_url: None,
        provider_id: "phone".to_string(),
        id_token: id_token.to_string(),
        refresh_token: "refresh".to_string(),
        expires_at: Utc::now(),
        is_new_user: false,
    }
}

fn database(server: &MockServer) -> FirebaseDatabase {
    FirebaseDatabase::new(Session::new(), server.url("/"))
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Message {
    text: String,
}

#[test]
fn test_reference_paths() {
    let db = FirebaseDatabase::new(Session::new(), "https://demo.firebaseio.com/".into());
    assert_eq!(db.base_url(), "https://demo.firebaseio.com");

    let root = db.reference("/");
    assert_eq!(root.path(), "");
    assert_eq!(root.key(), None);
    assert_eq!(root.url(), "https://demo.firebaseio.com/.json");

    let msg = db.reference("/messages/").child("abc");
    assert_eq!(msg.path(), "messages/abc");
    assert_eq!(msg.key(), Some("abc"));
    assert_eq!(msg.url(), "https://demo.firebaseio.com/messages/abc.json");
}

#[tokio::test]
async fn test_get_missing_value() {
    let server = MockServer::start();
    let db = database(&server);

    let mock = server.mock(|when, then| {
        when.method(GET).path("/messages/none.json");
        then.status(200).body("null");
    });

    let value: Option<Message> = db.reference("messages/none").get().await.unwrap();
    mock.assert();
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_get_value() {
    let server = MockServer::start();
    let db = database(&server);

    server.mock(|when, then| {
        when.method(GET).path("/messages/m1.json");
        then.status(200).json_body(json!({ "text": "hello" }));
    });

    let value: Option<Message> = db.reference("messages/m1").get().await.unwrap();
    assert_eq!(value, Some(Message { text: "hello".into() }));
}

#[tokio::test]
async fn test_set_update_remove() {
    let server = MockServer::start();
    let db = database(&server);

    let put = server.mock(|when, then| {
        when.method(PUT)
            .path("/messages/m1.json")
            .json_body(json!({ "text": "hello" }));
        then.status(200).json_body(json!({ "text": "hello" }));
    });
    let patch = server.mock(|when, then| {
        when.method(PATCH)
            .path("/messages/m1.json")
            .json_body(json!({ "text": "edited" }));
        then.status(200).json_body(json!({ "text": "edited" }));
    });
    let delete = server.mock(|when, then| {
        when.method(DELETE).path("/messages/m1.json");
        then.status(200).body("null");
    });

    let reference = db.reference("messages/m1");
    reference.set(&Message { text: "hello".into() }).await.unwrap();
    reference.update(&json!({ "text": "edited" })).await.unwrap();
    reference.remove().await.unwrap();

    put.assert();
    patch.assert();
    delete.assert();
}

#[tokio::test]
async fn test_push_returns_child_reference() {
    let server = MockServer::start();
    let db = database(&server);

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/messages.json")
            .json_body(json!({ "text": "hi" }));
        then.status(200).json_body(json!({ "name": "-NxYz123" }));
    });

    let child = db
        .reference("messages")
        .push(&Message { text: "hi".into() })
        .await
        .unwrap();

    mock.assert();
    assert_eq!(child.path(), "messages/-NxYz123");
    assert_eq!(child.key(), Some("-NxYz123"));
}

#[tokio::test]
async fn test_push_is_sent_once() {
    let server = MockServer::start();
    let db = database(&server);

    let mock = server.mock(|when, then| {
        when.method(POST).path("/messages.json");
        then.status(503);
    });

    let result = db.reference("messages").push(&Message { text: "hi".into() }).await;

    match result {
        Err(DatabaseError::ApiError(msg)) => {
            assert_eq!(msg, "Push value failed: 503 Service Unavailable")
        }
        other => panic!("unexpected result: {:?}", other.map(|r| r.path().to_string())),
    }
    mock.assert_hits(1);
}

#[tokio::test]
async fn test_query_parameters() {
    let server = MockServer::start();
    let db = database(&server);

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/messages.json")
            .query_param("orderBy", "\"createdAt\"")
            .query_param("limitToLast", "20")
            .query_param("startAt", "1700000000000");
        then.status(200).json_body(json!({ "m1": { "text": "hi" } }));
    });

    let value: Option<Value> = db
        .reference("messages")
        .order_by_child("createdAt")
        .limit_to_last(20)
        .start_at(1_700_000_000_000u64)
        .unwrap()
        .get()
        .await
        .unwrap();

    mock.assert();
    assert_eq!(value, Some(json!({ "m1": { "text": "hi" } })));
}

#[test]
fn test_key_and_value_ordering() {
    let db = FirebaseDatabase::new(Session::new(), "https://demo.firebaseio.com".into());
    let params = db
        .reference("scores")
        .order_by_key()
        .limit_to_first(3)
        .equal_to("a")
        .unwrap()
        .params();
    assert_eq!(
        params,
        vec![
            ("orderBy", "\"$key\"".to_string()),
            ("limitToFirst", "3".to_string()),
            ("equalTo", "\"a\"".to_string()),
        ]
    );

    let params = db.reference("scores").order_by_value().end_at(10).unwrap().params();
    assert_eq!(params[0], ("orderBy", "\"$value\"".to_string()));
    assert_eq!(params[1], ("endAt", "10".to_string()));
}

#[tokio::test]
async fn test_signed_in_requests_carry_auth_param() {
    let server = MockServer::start();
    let session = Session::new();
    session.replace(credential("id-token-1")).await;
    let db = FirebaseDatabase::new(session.clone(), server.url(""));

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/messages.json")
            .query_param("auth", "id-token-1");
        then.status(200).body("null");
    });

    let _: Option<Value> = db.reference("messages").get().await.unwrap();
    mock.assert();
}

#[tokio::test]
async fn test_permission_denied() {
    let server = MockServer::start();
    let db = database(&server);

    server.mock(|when, then| {
        when.method(GET).path("/private.json");
        then.status(401).json_body(json!({ "error": "Permission denied" }));
    });

    let result: Result<Option<Value>, _> = db.reference("private").get().await;
    match result {
        Err(DatabaseError::ApiError(message)) => {
            assert_eq!(message, "Permission denied (401 Unauthorized)")
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_listen_streams_events() {
    let server = MockServer::start();
    let db = database(&server);

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/messages.json")
            .header("accept", "text/event-stream");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "event: put\ndata: {\"path\":\"/\",\"data\":{\"m1\":{\"text\":\"hi\"}}}\n\n",
                "event: keep-alive\ndata: null\n\n",
                "event: put\ndata: {\"path\":\"/m2\",\"data\":{\"text\":\"there\"}}\n\n",
            ));
    });

    let mut events = db.reference("messages").listen().await.unwrap();
    let mut tree = Value::Null;
    let mut count = 0;
    while let Some(event) = events.next().await {
        let event = event.unwrap();
        if event != DatabaseEvent::KeepAlive {
            count += 1;
        }
        apply_event(&mut tree, &event);
    }

    mock.assert();
    assert_eq!(count, 2);
    assert_eq!(
        tree,
        json!({ "m1": { "text": "hi" }, "m2": { "text": "there" } })
    );
}

#[tokio::test]
async fn test_listen_rejected() {
    let server = MockServer::start();
    let db = database(&server);

    server.mock(|when, then| {
        when.method(GET).path("/private.json");
        then.status(401).body("{\"error\":\"Permission denied\"}");
    });

    server.mock(|when, then| {
        when.method(GET).path("/broken.json");
        then.status(400).body("not json");
    });

    match db.reference("private").listen().await {
        Err(DatabaseError::ApiError(message)) => {
            assert_eq!(message, "Permission denied (401 Unauthorized)")
        }
        _ => panic!("expected an api error"),
    }
    match db.reference("broken").listen().await {
        Err(DatabaseError::ApiError(message)) => {
            assert_eq!(message, "Listen failed: 400 Bad Request")
        }
        _ => panic!("expected an api error"),
    }
}

#[tokio::test]
async fn test_requests_send_a_refreshed_token() {
    let server = MockServer::start();
    let session = Session::with_refresher(crate::auth::refresh::TokenRefresher::new_with_url(
        "key",
        server.url("/v1"),
    ));
    session.replace(credential("stale-token")).await;
    let db = FirebaseDatabase::new(session, server.url("/"));

    let refresh_mock = server.mock(|when, then| {
        when.method(POST).path("/v1/token");
        then.status(200).json_body(json!({
            "id_token": "new-token",
            "refresh_token": "new-refresh",
            "expires_in": "3600"
        }));
    });
    let get_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/messages.json")
            .query_param("auth", "new-token");
        then.status(200).body("null");
    });

    let value: Option<Message> = db.reference("messages").get().await.unwrap();
    assert_eq!(value, None);
    refresh_mock.assert();
    get_mock.assert();
}
