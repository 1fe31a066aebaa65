use assert_matches2::{assert_let, assert_matches};
use matrix_engine_test::MockHomeserver;
use ruma::{
    api::{client::room::create_room, error::ErrorKind},
    assign,
    events::{AnySyncStateEvent, AnySyncTimelineEvent, SyncStateEvent},
    room_id, EventEncryptionAlgorithm,
};

use crate::logged_in_session;

#[tokio::test]
async fn test_invite_join_and_enable_encryption() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let bob = logged_in_session(&server, "bob").await;

    let request = assign!(create_room::v3::Request::new(), {
        name: Some("Secret plans".to_owned()),
        invite: vec![bob.user_id().unwrap()],
    });
    let room_id = alice.create_room(request).await.unwrap();

    let response = bob.sync_once(Default::default()).await.unwrap();
    assert!(response.rooms.invite.contains_key(&room_id));
    assert!(response.rooms.join.is_empty());

    let joined = bob.join_room(room_id.clone().into()).await.unwrap();
    assert_eq!(joined, room_id);

    let event_id = alice.enable_encryption(&room_id).await.unwrap();

    let response = alice.sync_once(Default::default()).await.unwrap();
    let room = &response.rooms.join[&room_id];
    let encryption = room.timeline.events.iter().find_map(|raw| match raw.deserialize() {
        Ok(AnySyncTimelineEvent::State(AnySyncStateEvent::RoomEncryption(
            SyncStateEvent::Original(event),
        ))) => Some(event),
        _ => None,
    });

    assert_let!(Some(encryption) = encryption);
    assert_eq!(encryption.event_id, event_id);
    assert_eq!(encryption.content.algorithm, EventEncryptionAlgorithm::MegolmV1AesSha2);
    assert_eq!(encryption.sender, alice.user_id().unwrap());

    // Bob sees the event too after joining.
    let response = bob.sync_once(Default::default()).await.unwrap();
    assert!(response.rooms.join[&room_id].timeline.events.iter().any(|raw| {
        matches!(
            raw.deserialize(),
            Ok(AnySyncTimelineEvent::State(AnySyncStateEvent::RoomEncryption(_)))
        )
    }));
}

#[tokio::test]
async fn test_join_unknown_room() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;

    let result = alice.join_room(room_id!("!unknown:localhost").to_owned().into()).await;

    assert_let!(Err(error) = result);
    assert_eq!(error.client_api_error_kind(), Some(&ErrorKind::NotFound));
    assert!(!error.is_auth_error());
}

#[tokio::test]
async fn test_only_members_enable_encryption() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let bob = logged_in_session(&server, "bob").await;

    let room_id = alice.create_room(create_room::v3::Request::new()).await.unwrap();

    assert_let!(Err(error) = bob.enable_encryption(&room_id).await);
    assert_matches!(error.client_api_error_kind(), Some(ErrorKind::Forbidden { .. }));

    assert_let!(Err(error) = bob.enable_encryption(room_id!("!nowhere:localhost")).await);
    assert_eq!(error.client_api_error_kind(), Some(&ErrorKind::NotFound));
}
