mod common;

use common::{bye_targets, candidate, kinds, Harness, REMOTE_OFFER};
use peercall_lib::commands::Command;
use peercall_lib::notification::Notification;
use peercall_lib::peer::session::SessionState;
use peercall_lib::peer::types::PeerId;
use peercall_lib::signaling::SignalingMessage;

#[tokio::test]
async fn test_initiate_sends_offer() {
    let mut h = Harness::new();
    h.dispatch(Command::Initiate("bob".into())).await;

    assert_eq!(h.state("bob"), Some(SessionState::Negotiating));
    let sent = h.sent();
    assert_eq!(sent, vec![SignalingMessage::offer("bob".into(), "offer-for-bob")]);

    let conn = h.engine.connection("bob");
    assert_eq!(conn.tracks(), vec!["microphone".to_string(), "camera".to_string()]);
    assert_eq!(conn.local_descriptions().len(), 1);
    assert!(h.notifications().contains(&Notification::SessionStateChanged {
        peer_id: "bob".into(),
        state: SessionState::Negotiating,
    }));
}

#[tokio::test]
async fn test_single_call_at_a_time() {
    let mut h = Harness::new();
    h.dispatch(Command::Initiate("bob".into())).await;
    h.sent();

    h.dispatch(Command::Initiate("carol".into())).await;
    h.dispatch(Command::Initiate("bob".into())).await;

    assert_eq!(h.manager.registry().len(), 1);
    assert_eq!(h.state("carol"), None);
    assert_eq!(h.engine.connection_count(), 1);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn test_offer_while_in_call_is_rejected() {
    let mut h = Harness::new();
    h.call_out("bob").await;
    h.sent();

    h.signal(SignalingMessage::offer("carol".into(), REMOTE_OFFER)).await;

    assert_eq!(bye_targets(&h.sent()), vec!["carol".to_string()]);
    assert!(h.manager.pending_offers().is_empty());
    assert_eq!(h.state("bob"), Some(SessionState::Established));
}

#[tokio::test]
async fn test_pending_offer_counts_as_busy() {
    let mut h = Harness::new();
    h.signal(SignalingMessage::offer("alice".into(), REMOTE_OFFER)).await;
    h.signal(SignalingMessage::offer("carol".into(), REMOTE_OFFER)).await;

    assert_eq!(bye_targets(&h.sent()), vec!["carol".to_string()]);
    assert_eq!(h.manager.pending_offers().peer_ids(), vec![PeerId::from("alice")]);
    assert_eq!(
        h.notifications(),
        vec![Notification::PendingOfferAdded {
            peer_id: "alice".into()
        }]
    );
}

#[tokio::test]
async fn test_repeated_offer_supersedes_pending_one() {
    let mut h = Harness::new();
    h.signal(SignalingMessage::offer("alice".into(), "first")).await;
    h.signal(SignalingMessage::candidate("alice".into(), candidate(1))).await;
    h.signal(SignalingMessage::offer("alice".into(), "second")).await;

    let offer = h.manager.pending_offers().get(&"alice".into()).cloned().unwrap();
    assert_eq!(offer.sdp, "second");
    assert!(offer.candidates.is_empty());
    assert_eq!(h.manager.pending_offers().len(), 1);
    assert!(h.sent().is_empty());

    let added = h
        .notifications()
        .into_iter()
        .filter(|n| matches!(n, Notification::PendingOfferAdded { .. }))
        .count();
    assert_eq!(added, 1);
}

#[tokio::test]
async fn test_decline_sends_bye() {
    let mut h = Harness::new();
    h.signal(SignalingMessage::offer("alice".into(), REMOTE_OFFER)).await;
    h.notifications();

    h.dispatch(Command::Decline("alice".into())).await;

    assert_eq!(bye_targets(&h.sent()), vec!["alice".to_string()]);
    assert!(h.manager.pending_offers().is_empty());
    assert_eq!(h.engine.connection_count(), 0);
    assert_eq!(
        h.notifications(),
        vec![Notification::PendingOfferRemoved {
            peer_id: "alice".into()
        }]
    );

    // второй раз отклонять нечего
    h.dispatch(Command::Decline("alice".into())).await;
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn test_accept_without_offer_does_nothing() {
    let mut h = Harness::new();
    h.dispatch(Command::Accept("alice".into())).await;

    assert!(h.manager.registry().is_empty());
    assert_eq!(h.engine.connection_count(), 0);
    assert!(h.sent().is_empty());
}

#[tokio::test]
async fn test_accept_while_busy_declines_offer() {
    let mut h = Harness::new();
    h.signal(SignalingMessage::offer("alice".into(), REMOTE_OFFER)).await;
    h.dispatch(Command::Initiate("bob".into())).await;
    h.sent();

    h.dispatch(Command::Accept("alice".into())).await;

    assert_eq!(bye_targets(&h.sent()), vec!["alice".to_string()]);
    assert_eq!(h.state("alice"), None);
    assert_eq!(h.manager.registry().peer_ids(), vec![PeerId::from("bob")]);
    assert!(h.manager.pending_offers().is_empty());
}

#[tokio::test]
async fn test_remote_bye_withdraws_pending_offer() {
    let mut h = Harness::new();
    h.signal(SignalingMessage::offer("alice".into(), REMOTE_OFFER)).await;
    h.notifications();

    h.signal(SignalingMessage::bye("alice".into())).await;

    assert!(h.manager.pending_offers().is_empty());
    assert!(h.sent().is_empty());
    assert_eq!(
        h.notifications(),
        vec![Notification::PendingOfferRemoved {
            peer_id: "alice".into()
        }]
    );
}

#[tokio::test]
async fn test_renegotiation_offer_is_ignored() {
    let mut h = Harness::new();
    h.call_in("alice").await;
    h.sent();
    let remote_before = h.engine.connection("alice").remote_descriptions().len();

    h.signal(SignalingMessage::offer("alice".into(), "renegotiate")).await;

    assert!(h.sent().is_empty());
    assert!(h.manager.pending_offers().is_empty());
    assert_eq!(h.state("alice"), Some(SessionState::Established));
    assert_eq!(
        h.engine.connection("alice").remote_descriptions().len(),
        remote_before
    );
}

#[tokio::test]
async fn test_hello_and_ice_servers() {
    let mut h = Harness::new();
    let hello = r#"{"type":"hello","payload":{"id":"me-42"}}"#;
    let servers = r#"{"type":"iceServers","payload":{"iceServers":[{"urls":"stun:stun.example.org:3478"}]}}"#;
    for text in [hello, servers] {
        match peercall_lib::signaling::Frame::parse(text).unwrap() {
            peercall_lib::signaling::Frame::Message(m) => h.signal(m).await,
            other => panic!("unexpected frame {other:?}"),
        }
    }

    assert_eq!(h.manager.client_id(), Some("me-42"));
    assert_eq!(h.manager.ice_servers().len(), 1);

    h.dispatch(Command::Initiate("bob".into())).await;
    assert_eq!(
        h.engine.last_ice_servers()[0].urls,
        vec!["stun:stun.example.org:3478".to_string()]
    );
    assert_eq!(kinds(&h.sent()), vec!["offer"]);
}
