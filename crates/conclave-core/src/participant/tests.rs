use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::computation::ComputationRegistry;
use crate::msg::{ConnectAck, EventKind, EventParticipant};
use crate::sum::{AdditiveSource, AdditiveSum};

/// Records outbound traffic instead of touching the network.
#[derive(Clone)]
struct TestLink {
    coordinator_key: String,
    shares: Arc<Mutex<Vec<(ParticipantId, PeerShare)>>>,
    submissions: Arc<Mutex<Vec<EventResponse>>>,
    pings: Arc<Mutex<Vec<ParticipantId>>>,
}

impl TestLink {
    fn new(coordinator_key: String) -> Self {
        Self {
            coordinator_key,
            shares: Arc::new(Mutex::new(Vec::new())),
            submissions: Arc::new(Mutex::new(Vec::new())),
            pings: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("delivery refused")]
struct Refused;

impl ParticipantClient for TestLink {
    type Error = Refused;

    async fn connect(&self, _request: &ConnectRequest) -> Result<ConnectAck, Refused> {
        Ok(ConnectAck {
            accepted: true,
            coordinator_public_key: self.coordinator_key.clone(),
        })
    }

    async fn send_share(&self, to: &EventParticipant, share: &PeerShare) -> Result<(), Refused> {
        self.shares
            .lock()
            .unwrap()
            .push((to.participant_id.clone(), share.clone()));
        Ok(())
    }

    async fn submit(&self, response: &EventResponse) -> Result<(), Refused> {
        self.submissions.lock().unwrap().push(response.clone());
        Ok(())
    }

    async fn ping(&self, response: &EventResponse) -> Result<(), Refused> {
        self.pings
            .lock()
            .unwrap()
            .push(response.participant_id.clone());
        Ok(())
    }
}

fn test_settings() -> ParticipantSettings {
    ParticipantSettings {
        share_delay: Duration::ZERO,
        ..ParticipantSettings::default()
    }
}

fn participant(
    id: &str,
    value: f64,
    coordinator: &Signer,
    settings: ParticipantSettings,
) -> Arc<Participant<TestLink>> {
    let computations = ComputationRegistry::new().register("sum", Arc::new(AdditiveSum));
    Arc::new(
        Participant::new(
            id,
            Endpoint::new("127.0.0.1", 9100),
            settings,
            Signer::generate(),
            Box::new(AdditiveSource::new(value)),
            computations,
            TestLink::new(coordinator.public_key_hex()),
        )
        .with_coordinator_key(coordinator.public_key_hex()),
    )
}

/// An event listing `members` (id, public key), signed by `coordinator`.
fn signed_event(
    event_id: &str,
    coordinator: &Signer,
    members: &[(&str, String)],
) -> Event {
    let mut event = Event {
        kind: EventKind::DataSubmission,
        event_id: event_id.into(),
        computation_type: "sum".into(),
        participants: members
            .iter()
            .enumerate()
            .map(|(i, (id, public_key))| EventParticipant {
                participant_id: (*id).into(),
                endpoint: Endpoint::new("127.0.0.1", 9200 + i as u16),
                public_key: public_key.clone(),
            })
            .collect(),
        metadata: serde_json::json!({}),
        created_at: unix_millis(),
        coordinator_signature: String::new(),
    };
    event.coordinator_signature = coordinator.sign(&event.signing_payload());
    event
}

fn signed_share(event: &Event, from: &Signer, from_id: &str, share: &str, embed: bool) -> PeerShare {
    PeerShare {
        event_id: event.event_id.clone(),
        from_participant: from_id.into(),
        share: share.into(),
        signature: from.sign(&PeerShare::signing_payload(&event.event_id, from_id, share)),
        original_event: embed.then(|| event.clone()),
        sent_at: unix_millis(),
    }
}

async fn wait_for_submissions(link: &TestLink, expected: usize) {
    for _ in 0..100 {
        if link.submissions.lock().unwrap().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {expected} submissions");
}

#[tokio::test]
async fn accepted_event_stores_self_share_and_fans_out() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", Signer::generate().public_key_hex()),
        ("p-2", Signer::generate().public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);

    let disposition = p0.clone().on_event(event.clone(), true).await.unwrap();
    assert_eq!(disposition, EventDisposition::Accepted);
    assert!(p0.knows_event("e-1").await);
    assert_eq!(p0.shard_count("e-1").await, 1);

    let sent = p0.client.shares.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    for (to, message) in &sent {
        assert_ne!(to, "p-0");
        // Relayed shares embed the signed event for peer propagation.
        assert_eq!(
            message.original_event.as_ref().map(|e| e.event_id.as_str()),
            Some("e-1")
        );
        crypto::verify(
            &p0.public_key_hex(),
            &PeerShare::signing_payload("e-1", "p-0", &message.share),
            &message.signature,
        )
        .unwrap();
    }
}

#[tokio::test]
async fn propagated_events_fan_out_without_embedding() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", Signer::generate().public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);

    p0.clone().on_event(event, false).await.unwrap();
    let sent = p0.client.shares.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].1.original_event.is_none());
}

#[tokio::test]
async fn duplicate_events_are_processed_once() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", Signer::generate().public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);

    assert_eq!(
        p0.clone().on_event(event.clone(), true).await.unwrap(),
        EventDisposition::Accepted
    );
    assert_eq!(
        p0.clone().on_event(event, true).await.unwrap(),
        EventDisposition::Duplicate
    );
    // The retry triggered neither collection nor another fan-out.
    assert_eq!(p0.client.shares.lock().unwrap().len(), 1);
    assert_eq!(p0.shard_count("e-1").await, 1);
}

#[tokio::test]
async fn events_with_forged_signatures_are_rejected() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let peers = [("p-0", p0.public_key_hex())];
    // Signed by somebody other than the coordinator this participant trusts.
    let event = signed_event("e-1", &Signer::generate(), &peers);

    let err = p0.clone().on_event(event, true).await.unwrap_err();
    assert!(matches!(err, EventError::BadSignature(_)));
    assert!(!p0.knows_event("e-1").await);
    assert!(p0.client.shares.lock().unwrap().is_empty());
}

#[tokio::test]
async fn stale_events_are_rejected() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let peers = [("p-0", p0.public_key_hex())];
    let mut event = signed_event("e-1", &coordinator, &peers);
    event.created_at = unix_millis().saturating_sub(31_000);
    event.coordinator_signature = coordinator.sign(&event.signing_payload());

    let err = p0.clone().on_event(event, true).await.unwrap_err();
    assert!(matches!(err, EventError::Stale { .. }));
}

#[tokio::test]
async fn uninvited_participants_reject_the_event() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let peers = [("p-1", Signer::generate().public_key_hex())];
    let event = signed_event("e-1", &coordinator, &peers);

    let err = p0.clone().on_event(event, true).await.unwrap_err();
    assert!(matches!(err, EventError::NotInvited));
    assert!(!p0.knows_event("e-1").await);
}

#[tokio::test]
async fn full_share_set_computes_and_submits_once() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let p1 = Signer::generate();
    let p2 = Signer::generate();
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", p1.public_key_hex()),
        ("p-2", p2.public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);
    p0.clone().on_event(event.clone(), true).await.unwrap();

    let first = p0
        .clone()
        .on_peer_share(signed_share(&event, &p1, "p-1", "10", false))
        .await
        .unwrap();
    assert_eq!(first, ShareDisposition::Stored);
    let second = p0
        .clone()
        .on_peer_share(signed_share(&event, &p2, "p-2", "20", false))
        .await
        .unwrap();
    assert_eq!(second, ShareDisposition::Completed);

    wait_for_submissions(&p0.client, 1).await;
    let submissions = p0.client.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].event_id, "e-1");
    assert_eq!(submissions[0].participant_id, "p-0");
    submissions[0].partial.parse::<i64>().unwrap();
    // Event state is destroyed on completion.
    assert!(!p0.knows_event("e-1").await);
    assert_eq!(p0.shard_count("e-1").await, 0);

    // A straggler duplicate neither recomputes nor resubmits.
    let late = p0
        .clone()
        .on_peer_share(signed_share(&event, &p1, "p-1", "10", false))
        .await
        .unwrap();
    assert_eq!(late, ShareDisposition::Duplicate);
    assert_eq!(p0.client.submissions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn shares_from_unauthorized_senders_are_rejected() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let p1 = Signer::generate();
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", p1.public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);
    p0.clone().on_event(event.clone(), true).await.unwrap();

    let outsider = Signer::generate();
    let err = p0
        .clone()
        .on_peer_share(signed_share(&event, &outsider, "p-9", "10", false))
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::UnauthorizedSender(id) if id == "p-9"));
    assert_eq!(p0.shard_count("e-1").await, 1);
}

#[tokio::test]
async fn forged_sender_shares_are_rejected() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let p1 = Signer::generate();
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", p1.public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);
    p0.clone().on_event(event.clone(), true).await.unwrap();

    // Attacker claims to be p-1 but signs with its own key.
    let attacker = Signer::generate();
    let err = p0
        .clone()
        .on_peer_share(signed_share(&event, &attacker, "p-1", "666", false))
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::BadSignature(_)));
    assert_eq!(p0.shard_count("e-1").await, 1);
    assert!(p0.client.submissions.lock().unwrap().is_empty());

    // The forgery burned the dedup slot for p-1; the honest share is now a
    // duplicate and the event can only time out. That trade is deliberate.
    let honest = p0
        .clone()
        .on_peer_share(signed_share(&event, &p1, "p-1", "10", false))
        .await
        .unwrap();
    assert_eq!(honest, ShareDisposition::Duplicate);
}

#[tokio::test]
async fn embedded_events_recover_a_missed_announcement() {
    let coordinator = Signer::generate();
    let p2 = participant("p-2", 30.0, &coordinator, test_settings());
    let p0 = Signer::generate();
    let p1 = Signer::generate();
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", p1.public_key_hex()),
        ("p-2", p2.public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);

    // p-2 never saw the announcement; the first peer share carries it.
    let disposition = p2
        .clone()
        .on_peer_share(signed_share(&event, &p0, "p-0", "10", true))
        .await
        .unwrap();
    assert_eq!(disposition, ShareDisposition::Stored);
    assert!(p2.knows_event("e-1").await);
    // Own share plus p-0's.
    assert_eq!(p2.shard_count("e-1").await, 2);

    // p-2 contributed its own shares, without re-embedding the event.
    let sent = p2.client.shares.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, message)| message.original_event.is_none()));

    // The last share completes the set and p-2 submits.
    let disposition = p2
        .clone()
        .on_peer_share(signed_share(&event, &p1, "p-1", "20", true))
        .await
        .unwrap();
    assert_eq!(disposition, ShareDisposition::Completed);
    wait_for_submissions(&p2.client, 1).await;
}

#[tokio::test]
async fn shares_for_unknown_events_without_embed_are_dropped() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let p1 = Signer::generate();
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", p1.public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);

    let disposition = p0
        .clone()
        .on_peer_share(signed_share(&event, &p1, "p-1", "10", false))
        .await
        .unwrap();
    assert_eq!(disposition, ShareDisposition::DroppedUnknownEvent);
    assert!(!p0.knows_event("e-1").await);
}

#[tokio::test]
async fn stale_shares_are_dropped() {
    let coordinator = Signer::generate();
    let p0 = participant("p-0", 10.0, &coordinator, test_settings());
    let p1 = Signer::generate();
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", p1.public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);
    p0.clone().on_event(event.clone(), true).await.unwrap();

    let mut share = signed_share(&event, &p1, "p-1", "10", false);
    share.sent_at = unix_millis().saturating_sub(31_000);
    let disposition = p0.clone().on_peer_share(share).await.unwrap();
    assert_eq!(disposition, ShareDisposition::DroppedStale);
    assert_eq!(p0.shard_count("e-1").await, 1);
}

#[tokio::test]
async fn connect_learns_the_coordinator_key() {
    let coordinator = Signer::generate();
    let computations = ComputationRegistry::new().register("sum", Arc::new(AdditiveSum));
    let p0 = Arc::new(Participant::new(
        "p-0",
        Endpoint::new("127.0.0.1", 9100),
        test_settings(),
        Signer::generate(),
        Box::new(AdditiveSource::new(10.0)),
        computations,
        TestLink::new(coordinator.public_key_hex()),
    ));
    let peers = [("p-0", p0.public_key_hex())];
    let event = signed_event("e-1", &coordinator, &peers);

    // Before connecting there is no key to verify against.
    let err = p0.clone().on_event(event.clone(), true).await.unwrap_err();
    assert!(matches!(err, EventError::UnknownCoordinator));

    p0.connect().await.unwrap();
    p0.clone().on_event(event, true).await.unwrap();
}

#[tokio::test]
async fn expired_event_state_is_reaped() {
    let coordinator = Signer::generate();
    let settings = ParticipantSettings {
        event_timeout: Duration::from_millis(50),
        ..test_settings()
    };
    let p0 = participant("p-0", 10.0, &coordinator, settings);
    let peers = [
        ("p-0", p0.public_key_hex()),
        ("p-1", Signer::generate().public_key_hex()),
    ];
    let event = signed_event("e-1", &coordinator, &peers);
    p0.clone().on_event(event, true).await.unwrap();
    assert!(p0.knows_event("e-1").await);

    tokio::time::sleep(Duration::from_millis(60)).await;
    p0.expire_events().await;
    assert!(!p0.knows_event("e-1").await);
    assert_eq!(p0.shard_count("e-1").await, 0);
}
