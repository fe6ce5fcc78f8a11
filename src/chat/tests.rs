use super::*;
use crate::core::Session;
use httpmock::prelude::*;
use serde_json::json;

fn room(server: &MockServer) -> ChatRoom {
    ChatRoom::new(FirebaseDatabase::new(Session::new(), server.url("")))
}

#[tokio::test]
async fn test_send_pushes_message() {
    let server = MockServer::start();
    let room = room(&server);

    let mock = server.mock(|when, then| {
        when.method(POST).path("/messages.json").json_body(json!({
            "text": "hello world",
            "senderId": "Anonymous User",
            "receiverId": "ALL",
            "createdAt": 1_700_000_000_000i64
        }));
        then.status(200).json_body(json!({ "name": "-Nabc" }));
    });

    let message = room.send_at("  hello world \n", 1_700_000_000_000).await.unwrap();

    mock.assert();
    assert_eq!(message.id, "-Nabc");
    assert_eq!(message.text, "hello world");
    assert_eq!(message.sender_id, SENDER_ID);
    assert_eq!(message.receiver_id, RECEIVER_ID);
}

#[tokio::test]
async fn test_send_stamps_current_time() {
    let server = MockServer::start();
    let room = room(&server);

    server.mock(|when, then| {
        when.method(POST).path("/messages.json");
        then.status(200).json_body(json!({ "name": "-Nnow" }));
    });

    let before = Utc::now().timestamp_millis();
    let message = room.send("hi").await.unwrap();
    let after = Utc::now().timestamp_millis();

    assert!(message.created_at >= before && message.created_at <= after);
}

#[tokio::test]
async fn test_blank_message_is_not_sent() {
    let server = MockServer::start();
    let room = room(&server);

    let mock = server.mock(|when, then| {
        when.method(POST).path("/messages.json");
        then.status(200).json_body(json!({ "name": "-Nx" }));
    });

    assert!(matches!(room.send("   ").await, Err(ChatError::EmptyMessage)));
    assert!(matches!(room.send("").await, Err(ChatError::EmptyMessage)));
    mock.assert_hits(0);
}

#[tokio::test]
async fn test_recent_is_newest_first() {
    let server = MockServer::start();
    let room = room(&server);

    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/messages.json")
            .query_param("orderBy", "\"createdAt\"")
            .query_param("limitToLast", "20");
        then.status(200).json_body(json!({
            "a": { "text": "first", "senderId": "Anonymous User", "receiverId": "ALL", "createdAt": 1 },
            "c": { "text": "third", "senderId": "Anonymous User", "receiverId": "ALL", "createdAt": 3 },
            "b": { "text": "second", "senderId": "Anonymous User", "receiverId": "ALL", "createdAt": 2 },
            "junk": { "nope": true }
        }));
    });

    let messages = room.recent().await.unwrap();

    mock.assert();
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "a"]);
    assert_eq!(messages[0].text, "third");
}

#[tokio::test]
async fn test_recent_empty_room() {
    let server = MockServer::start();
    let room = room(&server);

    server.mock(|when, then| {
        when.method(GET).path("/messages.json");
        then.status(200).body("null");
    });

    assert!(room.recent().await.unwrap().is_empty());
}

#[test]
fn test_history_is_capped() {
    let mut entries = serde_json::Map::new();
    for i in 0..25 {
        entries.insert(
            format!("m{:02}", i),
            json!({ "text": i.to_string(), "senderId": "s", "receiverId": "ALL", "createdAt": i }),
        );
    }
    let messages = messages_from(&Value::Object(entries));
    assert_eq!(messages.len(), HISTORY_LIMIT as usize);
    assert_eq!(messages[0].created_at, 24);
    assert_eq!(messages[19].created_at, 5);
}

#[tokio::test]
async fn test_subscribe_yields_updated_lists() {
    let server = MockServer::start();
    let room = room(&server);

    server.mock(|when, then| {
        when.method(GET)
            .path("/messages.json")
            .header("accept", "text/event-stream");
        then.status(200).body(concat!(
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"a\":{\"text\":\"hi\",\"senderId\":\"Anonymous User\",\"receiverId\":\"ALL\",\"createdAt\":1}}}\n\n",
            "event: keep-alive\ndata: null\n\n",
            "event: put\ndata: {\"path\":\"/b\",\"data\":{\"text\":\"yo\",\"senderId\":\"Anonymous User\",\"receiverId\":\"ALL\",\"createdAt\":2}}\n\n",
            "event: cancel\ndata: \"Permission denied\"\n\n",
            "event: put\ndata: {\"path\":\"/c\",\"data\":null}\n\n",
        ));
    });

    let mut updates = room.subscribe().await.unwrap();

    let first = updates.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].text, "hi");

    let second = updates.next().await.unwrap().unwrap();
    let texts: Vec<&str> = second.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["yo", "hi"]);

    match updates.next().await {
        Some(Err(ChatError::Database(DatabaseError::ListenCancelled(reason)))) => {
            assert_eq!(reason, "Permission denied")
        }
        _ => panic!("expected the listener to be cancelled"),
    }
    assert!(updates.next().await.is_none());
}
