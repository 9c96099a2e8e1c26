//! Receive loop and listener dispatch.

use std::time::Duration;

use chatline::provider::loopback::LoopbackProvider;
use chatline::provider::{ChatEvent, ChatKind, PresenceEvent, ProviderEvent};
use chatline::session::{DispatchMode, SessionError, SessionOptions};

use super::support::{manager, manager_with, wait_until, RecordingListener};

#[tokio::test]
async fn chat_is_dispatched_with_split_address() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    let listener = RecordingListener::new();
    session.set_listener(listener.clone());
    session.start().await.expect("start should succeed");

    assert!(provider.deliver_chat("alice@example.com/phone", "hi there"));
    assert!(wait_until(|| listener.messages().len() == 1).await);

    let message = &listener.messages()[0];
    assert_eq!(message.from.bare, "alice@example.com");
    assert_eq!(message.from.resource.as_deref(), Some("phone"));
    assert_eq!(message.body, "hi there");
    assert_eq!(message.kind, ChatKind::Chat);
    assert_eq!(session.last_received(), Some(message.received_at));
    session.stop().await;
}

#[tokio::test]
async fn empty_body_is_ignored() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    let listener = RecordingListener::new();
    session.set_listener(listener.clone());
    session.start().await.expect("start should succeed");

    assert!(provider.deliver_chat("alice@example.com/phone", ""));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(listener.messages().is_empty());
    assert!(session.last_received().is_none());
    assert!(session.is_running());
    session.stop().await;
}

#[tokio::test]
async fn presence_and_other_events_are_ignored() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    let listener = RecordingListener::new();
    session.set_listener(listener.clone());
    session.start().await.expect("start should succeed");

    assert!(provider.deliver(ProviderEvent::Presence(PresenceEvent {
        from: "alice@example.com/phone".to_owned(),
        show: Some("away".to_owned()),
    })));
    assert!(provider.deliver(ProviderEvent::Other("iq".to_owned())));
    assert!(provider.deliver_chat("alice@example.com/phone", "after"));
    assert!(wait_until(|| listener.messages().len() == 1).await);

    assert_eq!(listener.bodies(), vec!["after".to_owned()]);
    assert!(session.is_running());
    session.stop().await;
}

#[tokio::test]
async fn non_chat_message_types_are_still_dispatched() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    let listener = RecordingListener::new();
    session.set_listener(listener.clone());
    session.start().await.expect("start should succeed");

    assert!(provider.deliver(ProviderEvent::Chat(ChatEvent {
        remote: "room@muc.example.com/nick".to_owned(),
        kind: ChatKind::Groupchat,
        text: "hello room".to_owned(),
    })));
    assert!(wait_until(|| listener.messages().len() == 1).await);

    assert_eq!(listener.messages()[0].kind, ChatKind::Groupchat);
    session.stop().await;
}

#[tokio::test]
async fn messages_without_listener_are_discarded() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    session.start().await.expect("start should succeed");

    assert!(provider.deliver_chat("alice@example.com/phone", "nobody home"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.last_received().is_some());

    let listener = RecordingListener::new();
    session.set_listener(listener.clone());
    assert!(provider.deliver_chat("alice@example.com/phone", "now listening"));
    assert!(wait_until(|| listener.messages().len() == 1).await);

    assert_eq!(listener.bodies(), vec!["now listening".to_owned()]);
    assert!(session.is_running());
    session.stop().await;
}

#[tokio::test]
async fn panicking_listener_does_not_stop_the_loop() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    let listener = RecordingListener::panicking_on("boom");
    session.set_listener(listener.clone());
    session.start().await.expect("start should succeed");

    assert!(provider.deliver_chat("alice@example.com/phone", "boom"));
    assert!(provider.deliver_chat("alice@example.com/phone", "still here"));
    assert!(wait_until(|| listener.messages().len() == 1).await);

    assert_eq!(listener.bodies(), vec!["still here".to_owned()]);
    assert!(session.is_running());
    session.stop().await;
}

#[tokio::test]
async fn panicking_listener_in_ordered_mode_keeps_worker_alive() {
    let provider = LoopbackProvider::new();
    let session = manager_with(
        &provider,
        SessionOptions {
            dispatch: DispatchMode::Ordered,
            ..SessionOptions::default()
        },
    );
    let listener = RecordingListener::panicking_on("boom");
    session.set_listener(listener.clone());
    session.start().await.expect("start should succeed");

    for body in ["a", "boom", "b"] {
        assert!(provider.deliver_chat("alice@example.com/phone", body));
    }
    assert!(wait_until(|| listener.messages().len() == 2).await);

    assert_eq!(listener.bodies(), vec!["a".to_owned(), "b".to_owned()]);
    session.stop().await;
}

#[tokio::test]
async fn ordered_dispatch_preserves_receive_order() {
    let provider = LoopbackProvider::new();
    let session = manager_with(
        &provider,
        SessionOptions {
            dispatch: DispatchMode::Ordered,
            ..SessionOptions::default()
        },
    );
    let listener = RecordingListener::slow(Duration::from_millis(2));
    session.set_listener(listener.clone());
    session.start().await.expect("start should succeed");

    let expected: Vec<String> = (0..20).map(|n| format!("msg {n}")).collect();
    for body in &expected {
        assert!(provider.deliver_chat("alice@example.com/phone", body));
    }
    assert!(wait_until(|| listener.messages().len() == expected.len()).await);

    assert_eq!(listener.bodies(), expected);
    session.stop().await;
}

#[tokio::test]
async fn replacing_listener_redirects_later_messages() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    let first = RecordingListener::new();
    let second = RecordingListener::new();
    session.set_listener(first.clone());
    session.start().await.expect("start should succeed");

    assert!(provider.deliver_chat("alice@example.com/phone", "one"));
    assert!(wait_until(|| first.messages().len() == 1).await);
    session.set_listener(second.clone());
    assert!(provider.deliver_chat("alice@example.com/phone", "two"));
    assert!(wait_until(|| second.messages().len() == 1).await);

    assert_eq!(first.bodies(), vec!["one".to_owned()]);
    assert_eq!(second.bodies(), vec!["two".to_owned()]);
    session.stop().await;
}

#[tokio::test]
async fn subscribers_see_dispatched_messages() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    session.start().await.expect("start should succeed");
    let mut inbound = session.subscribe();

    assert!(provider.deliver_chat("carol@example.com/desk", "ping"));
    let message = tokio::time::timeout(Duration::from_secs(5), inbound.recv())
        .await
        .expect("message should arrive")
        .expect("subscription should be open");

    assert_eq!(message.from.bare, "carol@example.com");
    assert_eq!(message.body, "ping");
    session.stop().await;
}

#[tokio::test]
async fn next_message_returns_echo() {
    let provider = LoopbackProvider::new();
    provider.echo(true);
    let session = manager(&provider);
    session.start().await.expect("start should succeed");

    let waiter = {
        let session = session.clone();
        tokio::spawn(async move { session.next_message(Duration::from_secs(5)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session
        .send_message("echo@example.com", "marco")
        .await
        .expect("send should succeed");

    let message = waiter
        .await
        .expect("waiter should not panic")
        .expect("echo should arrive");
    assert_eq!(message.from.bare, "echo@example.com");
    assert_eq!(message.from.resource.as_deref(), Some("loopback"));
    assert_eq!(message.body, "marco");
    session.stop().await;
}

#[tokio::test]
async fn next_message_times_out() {
    let provider = LoopbackProvider::new();
    let session = manager(&provider);
    session.start().await.expect("start should succeed");

    let result = session.next_message(Duration::from_millis(50)).await;

    assert!(matches!(result, Err(SessionError::Timeout)));
    session.stop().await;
}
