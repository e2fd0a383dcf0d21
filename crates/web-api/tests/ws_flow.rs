mod support;

use std::{sync::Arc, time::Duration};

use application::FixedClock;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message as TungsteniteMessage, MaybeTlsStream, WebSocketStream,
};

use support::{TestApp, TestOptions};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(app: &TestApp, token: &str) -> Socket {
    let (socket, _) = connect_async(app.ws_url(token)).await.expect("connect");
    socket
}

/// 读取下一个 JSON 帧；连接关闭时返回 `None`
async fn next_frame(socket: &mut Socket) -> Option<Value> {
    loop {
        let message = timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("frame within timeout");
        match message {
            Some(Ok(TungsteniteMessage::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).expect("json frame"));
            }
            Some(Ok(TungsteniteMessage::Ping(_))) | Some(Ok(TungsteniteMessage::Pong(_))) => {
                continue
            }
            Some(Ok(TungsteniteMessage::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(other)) => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn expect_frame(socket: &mut Socket, kind: &str) -> Value {
    let frame = next_frame(socket).await.expect("open connection");
    assert_eq!(frame["type"], kind, "unexpected frame {frame}");
    frame
}

async fn send_chat(socket: &mut Socket, room_id: i64, message: &str) {
    let payload = json!({ "room_id": room_id, "message": message }).to_string();
    socket
        .send(TungsteniteMessage::Text(payload.into()))
        .await
        .expect("send");
}

async fn wait_for_sessions(app: &TestApp, expected: usize) {
    for _ in 0..50 {
        if app.registry.session_count().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never reached {expected} sessions");
}

#[tokio::test]
async fn members_receive_identical_event_and_history_matches() {
    let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let app = TestApp::spawn_with(TestOptions {
        clock: Arc::new(FixedClock(fixed)),
        ..TestOptions::default()
    })
    .await;

    let alice = app.storage.insert_user("alice").await.expect("alice");
    let bob = app.storage.insert_user("bob").await.expect("bob");
    let room = app
        .storage
        .create_group_room(&[alice.id, bob.id])
        .await
        .expect("room");

    let mut a = connect(&app, &app.token(alice.id)).await;
    let mut b = connect(&app, &app.token(bob.id)).await;

    let sync = expect_frame(&mut a, "initial_sync").await;
    assert_eq!(sync["rooms"][0]["room_id"], room.id.get());
    assert_eq!(sync["rooms"][0]["messages"], json!([]));
    expect_frame(&mut b, "initial_sync").await;

    send_chat(&mut a, room.id.get(), "hi").await;

    let to_a = expect_frame(&mut a, "message").await;
    let to_b = expect_frame(&mut b, "message").await;
    assert_eq!(to_a, to_b);
    assert_eq!(to_a["user"], "alice");
    assert_eq!(to_a["message"], "hi");
    assert_eq!(to_a["timestamp"], "2024-01-01T00:00:00.000000Z");

    let history: Vec<Value> = Client::new()
        .get(app.http_url(&format!("/api/v1/rooms/{}/messages", room.id)))
        .bearer_auth(app.token(bob.id))
        .send()
        .await
        .expect("history request")
        .json()
        .await
        .expect("history json");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["message_id"], to_a["message_id"]);
    assert_eq!(history[0]["timestamp"], to_a["timestamp"]);
}

#[tokio::test]
async fn non_member_gets_error_frame_and_nothing_is_stored() {
    let app = TestApp::spawn().await;
    let alice = app.storage.insert_user("alice").await.expect("alice");
    let bob = app.storage.insert_user("bob").await.expect("bob");
    let carol = app.storage.insert_user("carol").await.expect("carol");
    let room = app
        .storage
        .create_private_room(alice.id, bob.id)
        .await
        .expect("room");

    let mut c = connect(&app, &app.token(carol.id)).await;
    expect_frame(&mut c, "initial_sync").await;

    send_chat(&mut c, room.id.get(), "let me in").await;
    let error = expect_frame(&mut c, "error").await;
    assert_eq!(error["code"], "not_member");
    assert_eq!(error["room_id"], room.id.get());

    // 连接仍然可用：空消息被静默丢弃，随后的错误帧照常返回
    send_chat(&mut c, room.id.get(), "   ").await;
    send_chat(&mut c, room.id.get(), "again").await;
    let error = expect_frame(&mut c, "error").await;
    assert_eq!(error["code"], "not_member");

    let history: Vec<Value> = Client::new()
        .get(app.http_url(&format!("/api/v1/rooms/{}/messages", room.id)))
        .bearer_auth(app.token(alice.id))
        .send()
        .await
        .expect("history request")
        .json()
        .await
        .expect("history json");
    assert!(history.is_empty());
}

#[tokio::test]
async fn disconnect_removes_session_from_registry() {
    let app = TestApp::spawn().await;
    let alice = app.storage.insert_user("alice").await.expect("alice");
    let bob = app.storage.insert_user("bob").await.expect("bob");
    let room = app
        .storage
        .create_private_room(alice.id, bob.id)
        .await
        .expect("room");

    let mut a = connect(&app, &app.token(alice.id)).await;
    let mut b = connect(&app, &app.token(bob.id)).await;
    expect_frame(&mut a, "initial_sync").await;
    expect_frame(&mut b, "initial_sync").await;
    wait_for_sessions(&app, 2).await;
    assert_eq!(app.registry.subscribers(room.id).await.len(), 2);

    a.close(None).await.expect("close");
    wait_for_sessions(&app, 1).await;
    assert_eq!(app.registry.subscribers(room.id).await.len(), 1);
    assert!(app.registry.sessions_of(alice.id).await.is_empty());

    // 剩下的成员仍能收发
    send_chat(&mut b, room.id.get(), "still here").await;
    let frame = expect_frame(&mut b, "message").await;
    assert_eq!(frame["message"], "still here");
}

#[tokio::test]
async fn idle_connection_is_closed() {
    let app = TestApp::spawn_with(TestOptions {
        idle_timeout: Duration::from_millis(300),
        ..TestOptions::default()
    })
    .await;
    let alice = app.storage.insert_user("alice").await.expect("alice");

    let mut a = connect(&app, &app.token(alice.id)).await;
    expect_frame(&mut a, "initial_sync").await;

    assert!(next_frame(&mut a).await.is_none());
    wait_for_sessions(&app, 0).await;
}

#[tokio::test]
async fn missing_or_bad_token_is_rejected_before_upgrade() {
    let app = TestApp::spawn().await;

    let url = format!("ws://{}/api/v1/ws", app.addr);
    match connect_async(url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("expected 401 handshake failure, got {other:?}"),
        Ok(_) => panic!("handshake without token succeeded"),
    }

    match connect_async(app.ws_url("not-a-jwt")).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("expected 401 handshake failure, got {other:?}"),
        Ok(_) => panic!("handshake with invalid token succeeded"),
    }
    assert_eq!(app.registry.session_count().await, 0);
}

#[tokio::test]
async fn accepted_friend_request_opens_room_for_live_sessions() {
    let app = TestApp::spawn().await;
    let client = Client::new();
    let alice = app.storage.insert_user("alice").await.expect("alice");
    let bob = app.storage.insert_user("bob").await.expect("bob");
    let alice_token = app.token(alice.id);
    let bob_token = app.token(bob.id);

    let mut a = connect(&app, &alice_token).await;
    let mut b = connect(&app, &bob_token).await;
    expect_frame(&mut a, "initial_sync").await;
    expect_frame(&mut b, "initial_sync").await;

    let response = client
        .post(app.http_url(&format!("/api/v1/friend-requests/{}", bob.id)))
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("send request");
    assert_eq!(response.status(), StatusCode::CREATED);

    let duplicate = client
        .post(app.http_url(&format!("/api/v1/friend-requests/{}", bob.id)))
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("duplicate request");
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let incoming: Vec<Value> = client
        .get(app.http_url("/api/v1/friend-requests"))
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("list")
        .json()
        .await
        .expect("list json");
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0]["from_username"], "alice");
    let request_id = incoming[0]["id"].as_i64().expect("request id");

    // 发起方不能接受自己的请求
    let forbidden = client
        .post(app.http_url(&format!("/api/v1/friend-requests/{request_id}/accept")))
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("accept by sender");
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let room: Value = client
        .post(app.http_url(&format!("/api/v1/friend-requests/{request_id}/accept")))
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("accept")
        .json()
        .await
        .expect("room json");
    assert_eq!(room["kind"], "private");
    let room_id = room["id"].as_i64().expect("room id");

    let joined_a = expect_frame(&mut a, "room_joined").await;
    let joined_b = expect_frame(&mut b, "room_joined").await;
    assert_eq!(joined_a["room_id"], room_id);
    assert_eq!(joined_b["room_id"], room_id);

    send_chat(&mut b, room_id, "hello friend").await;
    assert_eq!(expect_frame(&mut a, "message").await["message"], "hello friend");
    assert_eq!(expect_frame(&mut b, "message").await["message"], "hello friend");

    let peer: Value = client
        .get(app.http_url(&format!("/api/v1/rooms/{room_id}/peer")))
        .bearer_auth(&alice_token)
        .send()
        .await
        .expect("peer")
        .json()
        .await
        .expect("peer json");
    assert_eq!(peer["username"], "bob");

    let again = client
        .post(app.http_url(&format!("/api/v1/friend-requests/{}", alice.id)))
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("request after friendship");
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let gone = client
        .post(app.http_url(&format!("/api/v1/friend-requests/{request_id}/decline")))
        .bearer_auth(&bob_token)
        .send()
        .await
        .expect("decline resolved request");
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rest_endpoints_require_bearer_token() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let health = client
        .get(app.http_url("/health"))
        .send()
        .await
        .expect("health");
    assert_eq!(health.status(), StatusCode::OK);

    let rooms = client
        .get(app.http_url("/api/v1/rooms"))
        .send()
        .await
        .expect("rooms");
    assert_eq!(rooms.status(), StatusCode::UNAUTHORIZED);

    let alice = app.storage.insert_user("alice").await.expect("alice");
    let self_request = client
        .post(app.http_url(&format!("/api/v1/friend-requests/{}", alice.id)))
        .bearer_auth(app.token(alice.id))
        .send()
        .await
        .expect("self request");
    assert_eq!(self_request.status(), StatusCode::BAD_REQUEST);
    let body: Value = self_request.json().await.expect("error body");
    assert_eq!(body["code"], "self_request");
}
