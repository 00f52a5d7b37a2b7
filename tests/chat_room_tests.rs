//! End-to-end chat room behavior over the in-memory transport.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use matchday_chat::connection::{ChatError, ConnectionConfig, ConnectionHandle, ConnectionState};
use matchday_chat::data::models::{ChatMessage, Delivery, TopicId};
use matchday_chat::protocol::{ClientEvent, ServerEvent};
use matchday_chat::room::{ChatRoom, IgnoreReason, RoomConfig, RoomUpdate};
use matchday_chat::transport::{MemoryConnector, MemoryPeer, MemoryServer};

// =============================================================================
// Helpers
// =============================================================================

fn msg(id: &str, topic: u64, body: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        topic_id: TopicId::from(topic),
        author: "bob".to_string(),
        body: body.to_string(),
        sent_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
    }
}

async fn open() -> (ConnectionHandle, MemoryConnector, MemoryServer, MemoryPeer) {
    let (connector, mut server) = MemoryConnector::pair();
    let handle = ConnectionHandle::open(connector.clone(), ConnectionConfig::default());
    let peer = tokio::time::timeout(Duration::from_secs(5), server.accept())
        .await
        .expect("client never connected")
        .expect("connector dropped");
    wait_for_state(&handle, ConnectionState::Connected).await;
    (handle, connector, server, peer)
}

async fn wait_for_state(handle: &ConnectionHandle, state: ConnectionState) {
    let mut rx = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .expect("state never reached")
        .expect("connection task gone");
}

async fn next_update(room: &mut ChatRoom) -> RoomUpdate {
    tokio::time::timeout(Duration::from_secs(5), room.recv())
        .await
        .expect("no room update")
        .expect("room channel closed")
}

async fn next_event(peer: &mut MemoryPeer) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), peer.next_event())
        .await
        .expect("no client event")
        .expect("client hung up")
}

/// Let the connection task and handlers run to idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn ids(room: &ChatRoom) -> Vec<String> {
    room.messages().into_iter().map(|m| m.id).collect()
}

// =============================================================================
// History and incoming messages
// =============================================================================

#[tokio::test(start_paused = true)]
async fn history_then_incoming_then_duplicate() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());

    room.bind(42u64);
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::SubscribeMatch(TopicId::from(42u64))
    );

    peer.push(&ServerEvent::ChatHistory(vec![
        msg("a", 42, "kick off"),
        msg("b", 42, "what a save"),
    ]));
    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryLoaded { count: 2 });

    let c = msg("c", 42, "goal!");
    peer.push(&ServerEvent::NewMessage(c.clone()));
    assert_eq!(next_update(&mut room).await, RoomUpdate::Appended(c));

    peer.push(&ServerEvent::NewMessage(msg("b", 42, "what a save")));
    assert_eq!(
        next_update(&mut room).await,
        RoomUpdate::Ignored(IgnoreReason::Duplicate)
    );

    assert_eq!(ids(&room), vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn repeated_history_merges_only_new_messages() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle, "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;

    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "one")]));
    peer.push(&ServerEvent::ChatHistory(vec![
        msg("a", 42, "one"),
        msg("x", 42, "replayed"),
    ]));

    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryLoaded { count: 1 });
    assert_eq!(
        next_update(&mut room).await,
        RoomUpdate::HistoryMerged(vec![msg("x", 42, "replayed")])
    );
    assert_eq!(ids(&room), vec!["a", "x"]);
}

#[tokio::test(start_paused = true)]
async fn history_after_reconnect_fills_the_gap() {
    let (handle, _connector, mut server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;
    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "before")]));
    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryLoaded { count: 1 });

    drop(peer);
    let mut peer = tokio::time::timeout(Duration::from_secs(5), server.accept())
        .await
        .expect("no reconnect")
        .expect("connector dropped");
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::SubscribeMatch(TopicId::from(42u64))
    );

    let gap = msg("gap", 42, "posted while we were away");
    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "before"), gap.clone()]));
    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryMerged(vec![gap]));
    assert_eq!(ids(&room), vec!["a", "gap"]);
}

#[tokio::test(start_paused = true)]
async fn invalid_frames_are_dropped() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle, "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;

    peer.push_raw("not json");
    peer.push_raw(r#"{"event":"score_update","data":{}}"#);
    peer.push_raw(r#"{"event":"new_message","data":{"id":"","matchId":42,"user":"x","message":"y","timestamp":0}}"#);
    let ok = msg("ok", 42, "still here");
    peer.push(&ServerEvent::NewMessage(ok.clone()));

    assert_eq!(next_update(&mut room).await, RoomUpdate::Appended(ok));
    settle().await;
    assert!(room.drain().is_empty());
    assert_eq!(handle_state(&room), ConnectionState::Connected);
}

fn handle_state(room: &ChatRoom) -> ConnectionState {
    room.connection().state()
}

// =============================================================================
// Composer
// =============================================================================

#[tokio::test(start_paused = true)]
async fn submit_echoes_immediately_and_sends_once() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle, "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;

    let sent = room.submit("hello").expect("message sent");
    assert_eq!(room.messages(), vec![sent.clone()]);
    assert_eq!(room.store().delivery(&sent.id), Some(Delivery::Pending));

    match next_event(&mut peer).await {
        ClientEvent::ChatMessage(wire) => {
            assert_eq!(wire.body, "hello");
            assert_eq!(wire.author, "alice");
            assert_eq!(wire.topic_id, TopicId::from(42u64));
            assert_eq!(wire.id, sent.id);
        }
        other => panic!("unexpected {other:?}"),
    }
    settle().await;
    assert!(peer.try_next_event().is_none());

    // The server relays it back to everyone, including us.
    peer.push(&ServerEvent::NewMessage(sent.clone()));
    assert_eq!(
        next_update(&mut room).await,
        RoomUpdate::Confirmed(sent.id.clone())
    );
    assert_eq!(room.store().delivery(&sent.id), Some(Delivery::Confirmed));
    assert_eq!(room.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn blank_submit_is_a_noop() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle, "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;

    assert!(room.submit("").is_none());
    assert!(room.submit("   \t ").is_none());

    room.composer_mut().set_input("  ");
    assert!(room.submit_input().is_none());
    assert_eq!(room.composer().input(), "  ");

    settle().await;
    assert!(room.messages().is_empty());
    assert!(peer.try_next_event().is_none());
}

#[tokio::test(start_paused = true)]
async fn submit_input_clears_the_buffer() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle, "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;

    room.composer_mut().set_input("  come on  ");
    let sent = room.submit_input().expect("message sent");
    assert_eq!(sent.body, "come on");
    assert_eq!(room.composer().input(), "");
}

#[tokio::test(start_paused = true)]
async fn submit_without_topic_sends_nothing() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle, "alice", RoomConfig::default());

    assert!(room.submit("hello?").is_none());
    settle().await;
    assert!(peer.try_next_event().is_none());
}

// =============================================================================
// Binding lifecycle
// =============================================================================

#[tokio::test(start_paused = true)]
async fn rebind_does_not_leak_previous_topic() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());

    room.bind(42u64);
    next_event(&mut peer).await;
    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "old room")]));
    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryLoaded { count: 1 });

    // Already routed to the room but not yet applied when it rebinds.
    peer.push(&ServerEvent::NewMessage(msg("late", 42, "in flight")));
    settle().await;

    room.bind(43u64);
    assert!(room.messages().is_empty());
    assert_eq!(
        next_update(&mut room).await,
        RoomUpdate::Ignored(IgnoreReason::Stale)
    );

    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::UnsubscribeMatch(TopicId::from(42u64))
    );
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::SubscribeMatch(TopicId::from(43u64))
    );

    // The server is slow to notice and sends one more for the old room.
    peer.push(&ServerEvent::NewMessage(msg("later", 42, "still old")));
    assert_eq!(
        next_update(&mut room).await,
        RoomUpdate::Ignored(IgnoreReason::ForeignTopic)
    );

    peer.push(&ServerEvent::ChatHistory(vec![
        msg("h1", 43, "new room"),
        msg("stray", 42, "wrong room"),
    ]));
    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryLoaded { count: 1 });
    assert_eq!(ids(&room), vec!["h1"]);
    assert_eq!(handle.handler_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn late_history_for_previous_topic_leaves_new_room_alone() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle, "alice", RoomConfig::default());

    room.bind(42u64);
    next_event(&mut peer).await;
    room.bind(43u64);
    next_event(&mut peer).await;
    next_event(&mut peer).await;

    peer.push(&ServerEvent::ChatHistory(vec![msg("old", 42, "old room")]));
    assert_eq!(
        next_update(&mut room).await,
        RoomUpdate::Ignored(IgnoreReason::ForeignTopic)
    );
    assert!(room.messages().is_empty());

    peer.push(&ServerEvent::ChatHistory(vec![
        msg("h1", 43, "new room"),
        msg("h2", 43, "still new"),
    ]));
    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryLoaded { count: 2 });
    assert_eq!(ids(&room), vec!["h1", "h2"]);
}

#[tokio::test(start_paused = true)]
async fn bind_same_topic_twice_is_a_noop() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());

    room.bind(42u64);
    room.bind(TopicId::new("42"));
    next_event(&mut peer).await;
    settle().await;
    assert!(peer.try_next_event().is_none());
    assert_eq!(handle.handler_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn unbind_stops_events_and_keeps_messages() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;
    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "hi")]));
    next_update(&mut room).await;

    room.unbind();
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::UnsubscribeMatch(TopicId::from(42u64))
    );
    assert_eq!(handle.handler_count(), 0);

    peer.push(&ServerEvent::NewMessage(msg("b", 42, "gone")));
    settle().await;
    assert!(room.drain().is_empty());
    assert_eq!(ids(&room), vec!["a"]);
}

#[tokio::test(start_paused = true)]
async fn dropping_a_room_unsubscribes() {
    let (handle, _connector, _server, mut peer) = open().await;
    {
        let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
        room.bind(42u64);
        next_event(&mut peer).await;
    }
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::UnsubscribeMatch(TopicId::from(42u64))
    );
    assert_eq!(handle.handler_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shared_topic_unsubscribes_with_the_last_room() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut first = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    let mut second = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());

    first.bind(42u64);
    second.bind(42u64);
    for _ in 0..2 {
        assert_eq!(
            next_event(&mut peer).await,
            ClientEvent::SubscribeMatch(TopicId::from(42u64))
        );
    }

    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "hi")]));
    assert_eq!(next_update(&mut first).await, RoomUpdate::HistoryLoaded { count: 1 });
    assert_eq!(next_update(&mut second).await, RoomUpdate::HistoryLoaded { count: 1 });

    first.unbind();
    settle().await;
    assert!(peer.try_next_event().is_none());

    second.unbind();
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::UnsubscribeMatch(TopicId::from(42u64))
    );
}

#[tokio::test(start_paused = true)]
async fn room_joining_a_live_topic_gets_its_own_backlog() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut first = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    first.bind(42u64);
    next_event(&mut peer).await;
    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "early")]));
    assert_eq!(next_update(&mut first).await, RoomUpdate::HistoryLoaded { count: 1 });

    let mut second = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    second.bind(42u64);
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::SubscribeMatch(TopicId::from(42u64))
    );

    let b = msg("b", 42, "later");
    peer.push(&ServerEvent::ChatHistory(vec![msg("a", 42, "early"), b.clone()]));
    assert_eq!(next_update(&mut second).await, RoomUpdate::HistoryLoaded { count: 2 });
    assert_eq!(ids(&second), vec!["a", "b"]);

    // The room that was already there only picks up what it lacked.
    assert_eq!(next_update(&mut first).await, RoomUpdate::HistoryMerged(vec![b]));
    assert_eq!(ids(&first), vec!["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn capped_room_evicts_oldest() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(
        handle,
        "alice",
        RoomConfig {
            max_messages: Some(2),
        },
    );
    room.bind(42u64);
    next_event(&mut peer).await;

    peer.push(&ServerEvent::ChatHistory(vec![
        msg("a", 42, "1"),
        msg("b", 42, "2"),
        msg("c", 42, "3"),
    ]));
    assert_eq!(next_update(&mut room).await, RoomUpdate::HistoryLoaded { count: 2 });
    assert_eq!(ids(&room), vec!["b", "c"]);
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test(start_paused = true)]
async fn reconnect_resubscribes_and_flushes_held_messages() {
    let (handle, _connector, mut server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;

    drop(peer);
    wait_for_state(&handle, ConnectionState::Reconnecting { attempt: 1 }).await;

    let held = room.submit("anyone there?").expect("queued while reconnecting");
    assert_eq!(room.store().delivery(&held.id), Some(Delivery::Pending));

    let mut peer = tokio::time::timeout(Duration::from_secs(5), server.accept())
        .await
        .expect("no reconnect")
        .expect("connector dropped");
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::SubscribeMatch(TopicId::from(42u64))
    );
    match next_event(&mut peer).await {
        ClientEvent::ChatMessage(wire) => assert_eq!(wire.id, held.id),
        other => panic!("unexpected {other:?}"),
    }
    wait_for_state(&handle, ConnectionState::Connected).await;

    peer.push(&ServerEvent::NewMessage(msg("after", 42, "yes")));
    assert_eq!(next_update(&mut room).await, RoomUpdate::Appended(msg("after", 42, "yes")));
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_bounded_attempts() {
    let (handle, connector, _server, peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    room.bind(42u64);
    assert_eq!(connector.attempts(), 1);

    connector.refuse_connections(true);
    drop(peer);
    wait_for_state(&handle, ConnectionState::Disconnected).await;

    assert_eq!(connector.attempts(), 1 + 5);
    assert!(matches!(
        handle.send(ClientEvent::SubscribeMatch(TopicId::from(7u64))),
        Err(ChatError::NotConnected)
    ));

    let failed = room.submit("hello?").expect("echo still shown");
    assert_eq!(room.store().delivery(&failed.id), Some(Delivery::Failed));
}

#[tokio::test(start_paused = true)]
async fn close_unsubscribes_and_disconnects() {
    let (handle, _connector, _server, mut peer) = open().await;
    let mut room = ChatRoom::new(handle.clone(), "alice", RoomConfig::default());
    room.bind(42u64);
    next_event(&mut peer).await;

    handle.close().await;
    assert_eq!(
        next_event(&mut peer).await,
        ClientEvent::UnsubscribeMatch(TopicId::from(42u64))
    );
    assert_eq!(handle.state(), ConnectionState::Disconnected);
    assert!(matches!(
        handle.subscribe_topic(&TopicId::from(1u64)),
        Err(ChatError::NotConnected)
    ));
}
