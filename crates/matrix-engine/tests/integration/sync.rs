use std::time::Duration;

use assert_matches2::assert_let;
use matrix_engine::{
    config::{SyncRetryPolicy, SyncSettings, SyncToken},
    crypto::types::OneTimeKeyAlgorithm,
    Error, LoopCtrl, Session, SyncState,
};
use matrix_engine_test::{test_json, MockHomeserver};
use ruma::{api::client::room::create_room, assign, RoomId};
use serde_json::json;
use tokio::{sync::mpsc, time::timeout};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::{logged_in_session, restored_session, test_identity};

async fn wait_for_state(session: &Session, state: SyncState) {
    let mut subscriber = session.subscribe_sync_state();

    timeout(Duration::from_secs(5), async {
        while subscriber.get() != state {
            subscriber.next().await;
        }
    })
    .await
    .expect("The sync loop should reach the expected state");
}

#[tokio::test]
async fn test_sync_loop_runs_until_the_handler_breaks() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    alice.create_room(create_room::v3::Request::new()).await.unwrap();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    let mut count = 0;

    alice
        .start_sync(SyncSettings::new(), move |response| {
            sender.send(response.map(|r| r.next_batch)).unwrap();
            count += 1;

            if count == 3 {
                LoopCtrl::Break
            } else {
                LoopCtrl::Continue
            }
        })
        .unwrap();

    wait_for_state(&alice, SyncState::Stopped).await;

    let mut tokens = Vec::new();
    while let Some(token) = receiver.recv().await {
        tokens.push(token.unwrap());
    }

    let current = server.current_sync_token();
    assert_eq!(tokens, [current.clone(), current.clone(), current.clone()]);
    assert_eq!(alice.sync_cursor(), Some(current));
}

#[tokio::test]
async fn test_sync_loop_delivers_new_invites() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let bob = logged_in_session(&server, "bob").await;

    let (sender, mut receiver) = mpsc::unbounded_channel();
    bob.start_sync(SyncSettings::new(), move |response| {
        let response = response.unwrap();

        if response.rooms.invite.is_empty() {
            LoopCtrl::Continue
        } else {
            sender.send(response).unwrap();
            LoopCtrl::Break
        }
    })
    .unwrap();
    assert_let!(Err(Error::SyncAlreadyRunning) = bob.sync_once(SyncSettings::new()).await);

    let request = assign!(create_room::v3::Request::new(), {
        invite: vec![bob.user_id().unwrap()],
    });
    let room_id = alice.create_room(request).await.unwrap();

    let response = timeout(Duration::from_secs(5), receiver.recv()).await.unwrap().unwrap();
    assert!(response.rooms.invite.contains_key(&room_id));
}

#[tokio::test]
async fn test_stop_and_restart_from_the_cursor() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;

    alice.start_sync(SyncSettings::new(), |_| LoopCtrl::Continue).unwrap();
    wait_for_state(&alice, SyncState::Polling).await;

    alice.stop_sync();
    assert_eq!(alice.sync_state(), SyncState::Stopped);
    assert!(alice.dispatcher().pending_requests().is_empty());

    let room_id = alice.create_room(create_room::v3::Request::new()).await.unwrap();

    // Incremental: only the new room shows up.
    let response = alice.sync_once(SyncSettings::new()).await.unwrap();
    assert!(response.rooms.join.contains_key(&room_id));
    assert_eq!(alice.sync_cursor(), Some(server.current_sync_token()));

    let response = alice.sync_once(SyncSettings::new()).await.unwrap();
    assert!(response.rooms.is_empty());

    // A full snapshot brings everything back.
    let response = alice.sync_once(SyncSettings::new().token(SyncToken::NoToken)).await.unwrap();
    assert!(response.rooms.join.contains_key(&room_id));
}

#[tokio::test]
async fn test_sync_once_parses_the_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_matrix/client/v3/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::SYNC))
        .mount(&server)
        .await;
    let session = restored_session(&server);

    let response = session.sync_once(SyncSettings::new()).await.unwrap();

    let room_id = <&RoomId>::try_from(test_json::SYNC_ROOM_ID).unwrap();
    let room = &response.rooms.join[room_id];
    let types: Vec<_> = room
        .timeline
        .events
        .iter()
        .map(|raw| raw.get_field::<String>("type").unwrap().unwrap())
        .collect();
    assert_eq!(types, ["m.room.member", "m.room.encryption", "m.room.message", "m.room.topic"]);
    assert!(room.timeline.limited);

    let key_manager = session.key_manager().unwrap();
    let counts = key_manager.key_counts().unwrap();
    assert_eq!(counts.get(&OneTimeKeyAlgorithm::SignedCurve25519), 3);
    assert_eq!(session.sync_cursor().as_deref(), Some("s526_47314_0_7_1_1_1_11444_1"));

    let request = &server.received_requests().await.unwrap()[0];
    assert_eq!(
        request.headers.get("authorization").and_then(|h| h.to_str().ok()),
        Some("Bearer 1234")
    );
}

#[tokio::test]
async fn test_rate_limited_sync_is_retried_with_the_same_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_matrix/client/v3/sync"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "errcode": "M_LIMIT_EXCEEDED",
            "error": "Too many requests",
            "retry_after_ms": 50,
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_matrix/client/v3/sync"))
        .and(query_param("since", "s1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::SYNC_EMPTY))
        .mount(&server)
        .await;
    let session = restored_session(&server);

    let (sender, mut receiver) = mpsc::unbounded_channel();
    session
        .start_sync(SyncSettings::new().token("s1"), move |response| {
            sender.send(response).unwrap();
            LoopCtrl::Break
        })
        .unwrap();

    let response = timeout(Duration::from_secs(5), receiver.recv()).await.unwrap().unwrap();
    assert_eq!(response.unwrap().next_batch, "s526_47315_0_7_1_1_1_11444_1");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.url.query_pairs().any(|(k, v)| k == "since" && v == "s1")));
}

#[tokio::test]
async fn test_sync_loop_gives_up_after_the_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_matrix/client/v3/sync"))
        .respond_with(ResponseTemplate::new(500).set_body_json(&*test_json::SERVER_ERROR))
        .mount(&server)
        .await;

    let session = Session::builder()
        .homeserver_url(server.uri())
        .sync_retry_policy(
            SyncRetryPolicy::new().max_retries(1).initial_interval(Duration::from_millis(10)),
        )
        .build()
        .unwrap();
    session.restore_session(test_identity()).unwrap();

    let (sender, mut receiver) = mpsc::unbounded_channel();
    session
        .start_sync(SyncSettings::new(), move |response| {
            sender.send(response).unwrap();
            LoopCtrl::Continue
        })
        .unwrap();

    let response = timeout(Duration::from_secs(5), receiver.recv()).await.unwrap().unwrap();
    assert_let!(Err(Error::Http(error)) = response);
    assert_eq!(error.as_client_api_error().map(|e| e.status_code.as_u16()), Some(500));
    assert!(error.is_transient());

    wait_for_state(&session, SyncState::Stopped).await;
    assert!(receiver.recv().await.is_none());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
