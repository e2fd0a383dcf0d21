//! 并发一致性测试
//!
//! 同一房间并发发送时，每个订阅者收到的顺序与存储顺序一致；
//! 同一好友请求被并发接受时只有一次生效。

mod common;

use std::sync::Arc;

use application::{
    ApplicationError, Identity, InboundMessage, SessionConfig, SessionEvent, SessionState,
    SystemClock,
};
use domain::{DomainError, MessageId, RoomRepository};
use futures::future::join_all;

use common::Harness;

fn drain(events: &mut tokio::sync::mpsc::Receiver<SessionEvent>) -> Vec<MessageId> {
    let mut ids = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Message(event) = event {
            ids.push(event.message_id);
        }
    }
    ids
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delivery_order_matches_storage_order() {
    let harness = Harness::with(
        Arc::new(SystemClock),
        SessionConfig {
            outbox_capacity: 1024,
            history_limit: 10,
        },
    );
    let mut users = Vec::new();
    for i in 0..4 {
        users.push(harness.user(&format!("user{i}")).await);
    }
    let ids: Vec<_> = users.iter().map(|(user, _)| user.id).collect();
    let room = harness.storage.create_group_room(&ids).await.expect("room");

    let mut receivers = Vec::new();
    let mut sessions = Vec::new();
    for (_, credential) in &users {
        let mut session = harness.sessions.open(credential).await.expect("open");
        receivers.push(session.take_events().expect("events"));
        session.activate().await.expect("activate");
        sessions.push(session);
    }

    let room_id = room.id;
    let sends = users.iter().flat_map(|(user, _)| {
        let chat = harness.chat.clone();
        let identity = Identity {
            user_id: user.id,
            username: user.username.as_str().to_owned(),
        };
        (0..25).map(move |n| {
            let chat = chat.clone();
            let identity = identity.clone();
            tokio::spawn(async move {
                chat.post_message(&identity, room_id, &format!("{} #{n}", identity.username))
                    .await
            })
        })
    });
    for result in join_all(sends).await {
        result.expect("task").expect("post");
    }

    let stored: Vec<MessageId> = harness
        .chat
        .history(ids[0], room.id, MessageId::BEGINNING, Some(1000))
        .await
        .expect("history")
        .into_iter()
        .map(|event| event.message_id)
        .collect();
    assert_eq!(stored.len(), 100);

    for receiver in &mut receivers {
        assert_eq!(drain(receiver), stored);
    }

    // 会话仍然活跃，可以继续发送
    sessions[0]
        .send(InboundMessage {
            room_id: room.id,
            message: "after burst".into(),
        })
        .await
        .expect("send after burst");
}

#[tokio::test]
async fn slow_session_is_closed_without_blocking_others() {
    let harness = Harness::with(
        Arc::new(SystemClock),
        SessionConfig {
            outbox_capacity: 2,
            history_limit: 10,
        },
    );
    let (alice, alice_token) = harness.user("alice").await;
    let (bob, bob_token) = harness.user("bob").await;
    let room = harness
        .storage
        .create_private_room(alice.id, bob.id)
        .await
        .expect("room");

    let mut a = harness.sessions.open(&alice_token).await.expect("open");
    let mut b = harness.sessions.open(&bob_token).await.expect("open");
    let mut a_events = a.take_events().expect("events");
    // bob 的队列从不读取
    let _b_events = b.take_events().expect("events");
    a.activate().await.expect("activate");
    b.activate().await.expect("activate");
    let bob_shutdown = b.shutdown_token();

    for n in 0..3 {
        let posted = harness
            .chat
            .post_message(a.identity(), room.id, &format!("msg {n}"))
            .await
            .expect("post");
        if n < 2 {
            assert!(posted.report.failed.is_empty());
        } else {
            assert_eq!(posted.report.failed.len(), 1);
            assert_eq!(posted.report.failed[0].0, b.id());
        }
        // alice 及时消费
        assert!(matches!(a_events.recv().await, Some(SessionEvent::Message(_))));
    }

    assert!(bob_shutdown.is_cancelled());
    assert!(!harness.registry.is_attached(b.id()).await);
    assert!(harness.registry.is_attached(a.id()).await);

    // 被强制关闭后不能再发送
    assert_eq!(b.state(), SessionState::Closed);
    let rejected = b
        .send(InboundMessage {
            room_id: room.id,
            message: "after close".into(),
        })
        .await;
    assert!(matches!(rejected, Err(ApplicationError::SessionNotActive)));
    let history = harness
        .chat
        .history(alice.id, room.id, MessageId::BEGINNING, None)
        .await
        .expect("history");
    assert_eq!(history.len(), 3);

    // 慢会话被移除后仍可幂等关闭
    b.close().await;
    assert!(!harness.registry.is_attached(b.id()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_double_accept_takes_effect_once() {
    let harness = Harness::new();
    let (alice, _) = harness.user("alice").await;
    let (bob, _) = harness.user("bob").await;

    let request = harness.friends.send(alice.id, bob.id).await.expect("send");

    let first = {
        let friends = harness.friends.clone();
        tokio::spawn(async move { friends.accept(request.id, bob.id).await })
    };
    let second = {
        let friends = harness.friends.clone();
        tokio::spawn(async move { friends.accept(request.id, bob.id).await })
    };
    let results = [
        first.await.expect("task"),
        second.await.expect("task"),
    ];

    let accepted: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(accepted.len(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(ApplicationError::Domain(DomainError::RequestNotFound))
    )));

    let rooms = harness.storage.list_for_user(alice.id).await.expect("rooms");
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, accepted[0].id);

    let again = harness.friends.send(bob.id, alice.id).await;
    assert!(matches!(
        again,
        Err(ApplicationError::Domain(DomainError::AlreadyFriends))
    ));
    assert!(harness
        .friends
        .list_incoming(bob.id)
        .await
        .expect("incoming")
        .is_empty());
}
