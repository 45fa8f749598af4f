mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use common::{
    eventually, host_candidate, relay, spawn, wait_for_state, CountingSignaling, MockNetwork,
    StalledSignaling,
};
use swipe_signal::peer::types::{
    ConnectionState, HandshakeError, HandshakeEvent, SwipeMessage, SwipeValue,
};
use swipe_signal::session::{Role, SessionId};

fn swipe(index: usize) -> SwipeMessage {
    SwipeMessage::Swipe {
        index,
        value: SwipeValue::Like,
    }
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<HandshakeEvent>) -> Vec<HandshakeEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_responder_waits_for_offer_then_both_open() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();
    let sig_a = CountingSignaling::new(relay.clone());
    let sig_b = CountingSignaling::new(relay.clone());

    let responder = spawn(Role::B, &id, sig_b.clone(), &net);
    responder.start().unwrap();
    sleep(Duration::from_millis(10)).await;

    // probed once before anything was published
    assert_eq!(sig_b.calls("fetch_offer"), 1);
    assert_eq!(responder.state(), ConnectionState::Connecting);

    let initiator = spawn(Role::A, &id, sig_a.clone(), &net);
    initiator.start().unwrap();

    wait_for_state(&initiator, ConnectionState::ChannelOpen).await;
    wait_for_state(&responder, ConnectionState::ChannelOpen).await;

    // second probe, one offer_retry_interval later, found it
    assert_eq!(sig_b.calls("fetch_offer"), 2);
    assert_eq!(sig_b.calls("publish_answer"), 1);
    assert_eq!(sig_a.calls("publish_offer"), 1);
    assert!(initiator.last_error().is_none());
    assert!(responder.last_error().is_none());

    // the answer and candidate polls are done: no more relay reads
    let answer_polls = sig_a.calls("fetch_answer");
    let candidate_polls = (sig_a.calls("fetch_candidates"), sig_b.calls("fetch_candidates"));
    sleep(Duration::from_secs(10)).await;
    assert_eq!(sig_a.calls("fetch_answer"), answer_polls);
    assert_eq!(
        (sig_a.calls("fetch_candidates"), sig_b.calls("fetch_candidates")),
        candidate_polls
    );
    assert_eq!(sig_b.calls("fetch_offer"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_candidates_applied_exactly_once() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();
    net.hold_open.store(true, Ordering::SeqCst);

    let initiator = spawn(Role::A, &id, Arc::new(relay.clone()), &net);
    let responder = spawn(Role::B, &id, Arc::new(relay.clone()), &net);
    initiator.start().unwrap();
    responder.start().unwrap();

    // several candidate polls while the channels stay closed
    eventually(|| net.applied(Role::A).len() == 2 && net.applied(Role::B).len() == 2).await;
    sleep(Duration::from_secs(5)).await;

    let applied_by_a = net.applied(Role::A);
    assert_eq!(applied_by_a.len(), 2);
    let distinct: HashSet<_> = applied_by_a.iter().map(|c| c.fingerprint()).collect();
    assert_eq!(distinct.len(), 2);
    assert!(applied_by_a.contains(&host_candidate(Role::B, 1)));
    assert!(applied_by_a.contains(&host_candidate(Role::B, 2)));

    assert_eq!(net.applied(Role::B).len(), 2);
    assert!(net.applied(Role::B).contains(&host_candidate(Role::A, 1)));
}

#[tokio::test(start_paused = true)]
async fn test_queued_messages_flush_in_order_on_open() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();
    net.hold_open.store(true, Ordering::SeqCst);

    let initiator = spawn(Role::A, &id, Arc::new(relay.clone()), &net);
    let responder = spawn(Role::B, &id, Arc::new(relay.clone()), &net);
    let mut responder_events = responder.subscribe();

    // queued before the attempt even starts
    initiator.send(&swipe(0)).unwrap();
    initiator.start().unwrap();
    responder.start().unwrap();
    initiator.send(&swipe(1)).unwrap();
    initiator
        .send(&SwipeMessage::Done { likes: vec![0, 1] })
        .unwrap();

    eventually(|| net.applied(Role::A).len() == 2).await;
    assert_eq!(initiator.state(), ConnectionState::Connecting);
    assert!(net.sent(Role::A).is_empty());

    net.open(Role::B);
    net.open(Role::A);
    wait_for_state(&initiator, ConnectionState::ChannelOpen).await;
    eventually(|| net.sent(Role::A).len() == 3).await;

    let sent: Vec<SwipeMessage> = net
        .sent(Role::A)
        .iter()
        .map(|s| serde_json::from_str(s).unwrap())
        .collect();
    assert_eq!(
        sent,
        vec![swipe(0), swipe(1), SwipeMessage::Done { likes: vec![0, 1] }]
    );

    sleep(Duration::from_millis(10)).await;
    let received: Vec<_> = drain(&mut responder_events)
        .into_iter()
        .filter_map(|e| match e {
            HandshakeEvent::Message(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(received, sent);
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_is_requeued_and_retried_once() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();

    let initiator = spawn(Role::A, &id, Arc::new(relay.clone()), &net);
    let responder = spawn(Role::B, &id, Arc::new(relay.clone()), &net);
    initiator.start().unwrap();
    responder.start().unwrap();
    wait_for_state(&initiator, ConnectionState::ChannelOpen).await;

    net.fail_next_sends(Role::A, 1);
    initiator.send(&swipe(0)).unwrap();
    initiator.send(&swipe(1)).unwrap();

    sleep(Duration::from_millis(10)).await;
    assert!(net.sent(Role::A).is_empty());

    sleep(Duration::from_millis(200)).await;
    let sent: Vec<SwipeMessage> = net
        .sent(Role::A)
        .iter()
        .map(|s| serde_json::from_str(s).unwrap())
        .collect();
    assert_eq!(sent, vec![swipe(0), swipe(1)]);
}

#[tokio::test(start_paused = true)]
async fn test_second_failure_waits_for_next_send() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();

    let initiator = spawn(Role::A, &id, Arc::new(relay.clone()), &net);
    let responder = spawn(Role::B, &id, Arc::new(relay.clone()), &net);
    initiator.start().unwrap();
    responder.start().unwrap();
    wait_for_state(&initiator, ConnectionState::ChannelOpen).await;

    // the send and its one deferred retry both fail
    net.fail_next_sends(Role::A, 2);
    initiator.send(&swipe(0)).unwrap();
    sleep(Duration::from_secs(5)).await;
    assert!(net.sent(Role::A).is_empty());

    initiator.send(&swipe(1)).unwrap();
    eventually(|| net.sent(Role::A).len() == 2).await;
    let first: SwipeMessage = serde_json::from_str(&net.sent(Role::A)[0]).unwrap();
    assert_eq!(first, swipe(0));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_both_sides_and_stops_polling() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();
    let sig_a = CountingSignaling::new(relay.clone());

    let initiator = spawn(Role::A, &id, sig_a.clone(), &net);
    let responder = spawn(Role::B, &id, Arc::new(relay.clone()), &net);
    let mut initiator_events = initiator.subscribe();
    let mut responder_events = responder.subscribe();
    initiator.start().unwrap();
    responder.start().unwrap();
    wait_for_state(&responder, ConnectionState::ChannelOpen).await;

    initiator.disconnect().unwrap();
    wait_for_state(&initiator, ConnectionState::Closed).await;
    wait_for_state(&responder, ConnectionState::Closed).await;

    assert!(net.closed().contains(&Role::A));
    assert!(net.closed().contains(&Role::B));
    assert!(drain(&mut initiator_events).contains(&HandshakeEvent::Disconnected));
    assert!(drain(&mut responder_events).contains(&HandshakeEvent::Disconnected));

    assert_eq!(initiator.send(&swipe(0)), Err(HandshakeError::Closed));
    assert_eq!(initiator.start(), Err(HandshakeError::Closed));

    let calls = sig_a.total_calls();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(sig_a.total_calls(), calls);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_cancels_offer_probe() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();
    let sig_b = CountingSignaling::new(relay.clone());

    let responder = spawn(Role::B, &id, sig_b.clone(), &net);
    responder.start().unwrap();

    // t = 0, 2, 4, 6
    sleep(Duration::from_millis(6500)).await;
    assert_eq!(sig_b.calls("fetch_offer"), 4);

    drop(responder);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(sig_b.calls("fetch_offer"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_construction_failure_is_absorbing() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();
    net.fail_connect.store(true, Ordering::SeqCst);

    let initiator = spawn(Role::A, &id, Arc::new(relay.clone()), &net);
    let mut events = initiator.subscribe();
    initiator.start().unwrap();

    wait_for_state(&initiator, ConnectionState::Failed).await;
    assert!(matches!(
        initiator.last_error(),
        Some(HandshakeError::Construction(_))
    ));
    sleep(Duration::from_millis(10)).await;
    let events = drain(&mut events);
    assert_eq!(
        events.first(),
        Some(&HandshakeEvent::StateChanged(ConnectionState::Connecting))
    );
    assert_eq!(
        events.last(),
        Some(&HandshakeEvent::StateChanged(ConnectionState::Failed))
    );
    assert_eq!(initiator.send(&swipe(0)), Err(HandshakeError::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_publish_into_unknown_session_fails_attempt() {
    let relay = relay();
    let id = SessionId::parse("AB12CD").unwrap();
    let net = MockNetwork::new();

    let initiator = spawn(Role::A, &id, Arc::new(relay.clone()), &net);
    initiator.start().unwrap();

    wait_for_state(&initiator, ConnectionState::Failed).await;
    assert!(matches!(
        initiator.last_error(),
        Some(HandshakeError::Exchange(_))
    ));
    assert_eq!(net.closed(), vec![Role::A]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_poll_tick_does_not_abort() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();
    let sig_a = CountingSignaling::new(relay.clone());
    sig_a.fail_candidate_fetches(3);

    let initiator = spawn(Role::A, &id, sig_a.clone(), &net);
    let responder = spawn(Role::B, &id, Arc::new(relay.clone()), &net);
    initiator.start().unwrap();
    responder.start().unwrap();

    wait_for_state(&initiator, ConnectionState::ChannelOpen).await;
    assert!(matches!(
        initiator.last_error(),
        Some(HandshakeError::Exchange(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_message_is_dropped() {
    let relay = relay();
    let id = relay.create_session().await.unwrap();
    let net = MockNetwork::new();

    let initiator = spawn(Role::A, &id, Arc::new(relay.clone()), &net);
    let responder = spawn(Role::B, &id, Arc::new(relay.clone()), &net);
    let mut events = responder.subscribe();
    initiator.start().unwrap();
    responder.start().unwrap();
    wait_for_state(&responder, ConnectionState::ChannelOpen).await;

    net.inject(Role::B, "not json");
    net.inject(Role::B, r#"{"type":"DONE","likes":[2]}"#);
    sleep(Duration::from_millis(10)).await;

    let messages: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            HandshakeEvent::Message(m) => Some(m),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec![SwipeMessage::Done { likes: vec![2] }]);
    assert_eq!(responder.state(), ConnectionState::ChannelOpen);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_stalled_relay_call() {
    let id = SessionId::parse("AB12CD").unwrap();
    let net = MockNetwork::new();
    let signaling = StalledSignaling::new();

    let responder = spawn(Role::B, &id, signaling.clone(), &net);
    let mut events = responder.subscribe();
    responder.start().unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(signaling.calls(), 1);

    responder.disconnect().unwrap();
    wait_for_state(&responder, ConnectionState::Closed).await;
    assert_eq!(net.closed(), vec![Role::B]);
    assert!(drain(&mut events).contains(&HandshakeEvent::Disconnected));

    // no further relay calls once torn down
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(signaling.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_during_stalled_relay_call() {
    let id = SessionId::parse("AB12CD").unwrap();
    let net = MockNetwork::new();
    let signaling = StalledSignaling::new();

    let initiator = spawn(Role::A, &id, signaling.clone(), &net);
    initiator.start().unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(initiator.state(), ConnectionState::Connecting);

    drop(initiator);
    eventually(|| net.closed() == vec![Role::A]).await;
}
