use assert_matches2::{assert_let, assert_matches};
use matrix_engine::{
    crypto::types::{OneTimeKey, OneTimeKeyAlgorithm},
    Error,
};
use matrix_engine_test::MockHomeserver;
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use crate::logged_in_session;

#[tokio::test]
async fn test_upload_identity_and_one_time_keys() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let key_manager = alice.key_manager().unwrap();

    assert_eq!(key_manager.generate_one_time_keys(5).unwrap(), 5);
    let request = key_manager.build_upload_request(true).unwrap();
    assert!(request.device_keys.is_some());
    assert_eq!(request.one_time_keys.len(), 5);

    let counts = alice.upload_keys(request).await.unwrap();

    assert_eq!(counts.get(&OneTimeKeyAlgorithm::SignedCurve25519), 5);
    assert_eq!(key_manager.key_counts(), Some(counts));
    assert!(key_manager.unsubmitted_one_time_keys().is_empty());

    let identity = alice.identity().unwrap();
    let stored = server.one_time_key_count(identity.user_id.as_str(), identity.device_id.as_str());
    assert_eq!(stored, 5);

    // Nothing new to upload.
    assert!(key_manager.build_upload_request(false).unwrap().is_empty());
}

#[tokio::test]
async fn test_identity_only_upload() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let key_manager = alice.key_manager().unwrap();

    let request = key_manager.build_upload_request(true).unwrap();
    assert!(request.one_time_keys.is_empty());

    let counts = alice.upload_keys(request).await.unwrap();

    assert!(counts.is_empty());
    let algorithm = OneTimeKeyAlgorithm::SignedCurve25519;
    assert_eq!(key_manager.needs_replenishment(&algorithm, 1), Some(true));
}

#[tokio::test]
async fn test_unsigned_upload() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let key_manager = alice.key_manager().unwrap();

    key_manager.generate_one_time_keys(2).unwrap();
    let request = key_manager.build_unsigned_upload_request();
    assert!(request.one_time_keys.values().all(|key| matches!(key, OneTimeKey::Key(_))));

    let counts = alice.upload_keys(request).await.unwrap();

    assert_eq!(counts.get(&OneTimeKeyAlgorithm::Curve25519), 2);
    assert_eq!(counts.get(&OneTimeKeyAlgorithm::SignedCurve25519), 0);
}

#[tokio::test]
async fn test_replenishment_follows_the_server_count() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let key_manager = alice.key_manager().unwrap();
    let identity = alice.identity().unwrap();
    let algorithm = OneTimeKeyAlgorithm::SignedCurve25519;

    assert_eq!(key_manager.needs_replenishment(&algorithm, 5), None);

    key_manager.generate_one_time_keys(2).unwrap();
    alice.upload_keys(key_manager.build_upload_request(true).unwrap()).await.unwrap();

    assert_eq!(key_manager.needs_replenishment(&algorithm, 5), Some(true));
    assert_eq!(key_manager.needs_replenishment(&algorithm, 2), Some(false));

    // Another user starts an Olm session with us.
    server.claim_one_time_keys(identity.user_id.as_str(), identity.device_id.as_str(), 1);
    alice.sync_once(Default::default()).await.unwrap();

    assert_eq!(key_manager.key_counts().unwrap().get(&algorithm), 1);
    assert_eq!(key_manager.needs_replenishment(&algorithm, 2), Some(true));
}

#[tokio::test]
async fn test_query_each_others_keys() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let bob = logged_in_session(&server, "bob").await;

    for session in [&alice, &bob] {
        let request = session.key_manager().unwrap().build_upload_request(true).unwrap();
        session.upload_keys(request).await.unwrap();
    }

    let bob_id = bob.user_id().unwrap();
    let response = alice.query_keys([bob_id.clone()]).await.unwrap();

    let devices = response.devices(&bob_id).unwrap();
    assert_eq!(devices.len(), 1);

    let bob_keys = &devices[&bob.device_id().unwrap()];
    assert_eq!(bob_keys, &bob.key_manager().unwrap().device_keys().unwrap());
    alice.key_manager().unwrap().verify_device_keys(bob_keys).unwrap();

    let identity_keys = bob.key_manager().unwrap().identity_keys().unwrap();
    assert_eq!(bob_keys.ed25519_key(), Some(identity_keys.ed25519.as_str()));
    assert_eq!(bob_keys.curve25519_key(), Some(identity_keys.curve25519.as_str()));
}

#[tokio::test]
async fn test_verify_a_signed_one_time_key() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let bob = logged_in_session(&server, "bob").await;

    let bob_keys = bob.key_manager().unwrap();
    bob_keys.generate_one_time_keys(1).unwrap();
    let request = bob_keys.build_upload_request(true).unwrap();
    let device_keys = request.device_keys.clone().unwrap();
    bob.upload_keys(request.clone()).await.unwrap();

    assert_let!(Some(OneTimeKey::SignedKey(signed_key)) = request.one_time_keys.values().next());

    let signing_key = device_keys.ed25519_key().unwrap();
    let alice_keys = alice.key_manager().unwrap();
    alice_keys
        .verify_signed_key(&device_keys.user_id, &device_keys.device_id, signing_key, signed_key)
        .unwrap();

    // A key signed by somebody else doesn't verify.
    let wrong_key = alice_keys.identity_keys().unwrap().ed25519;
    alice_keys
        .verify_signed_key(&device_keys.user_id, &device_keys.device_id, &wrong_key, signed_key)
        .unwrap_err();
}

#[tokio::test]
async fn test_tampered_device_keys_are_dropped() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let bob = logged_in_session(&server, "bob").await;

    let mut tampered = bob.key_manager().unwrap().device_keys().unwrap();
    tampered.algorithms.push("m.plaintext".to_owned());

    Mock::given(method("POST"))
        .and(path("/_matrix/client/v3/keys/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_keys": {
                tampered.user_id.as_str(): { tampered.device_id.as_str(): tampered },
            },
        })))
        .with_priority(1)
        .mount(server.server())
        .await;

    let bob_id = bob.user_id().unwrap();
    let response = alice.query_keys([bob_id.clone()]).await.unwrap();

    assert_eq!(response.devices(&bob_id).map(|devices| devices.len()), Some(0));
}

#[tokio::test]
async fn test_key_changes_between_two_cursors() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let bob = logged_in_session(&server, "bob").await;

    let request = alice.key_manager().unwrap().build_upload_request(true).unwrap();
    alice.upload_keys(request).await.unwrap();
    let from = server.current_sync_token();

    let request = bob.key_manager().unwrap().build_upload_request(true).unwrap();
    bob.upload_keys(request).await.unwrap();
    let to = server.current_sync_token();

    let changes = alice.key_changes(&from, &to).await.unwrap();

    assert_eq!(changes.since, from);
    assert_eq!(changes.changed.into_iter().collect::<Vec<_>>(), [bob.user_id().unwrap()]);
    assert!(changes.left.is_empty());
}

#[tokio::test]
async fn test_key_operations_need_a_login() {
    let server = MockHomeserver::start().await;
    let alice = logged_in_session(&server, "alice").await;
    let user_id = alice.user_id().unwrap();

    alice.logout().await.unwrap();

    assert_matches!(alice.key_manager(), Err(Error::NotLoggedIn));
    assert_matches!(alice.query_keys([user_id]).await, Err(Error::NotLoggedIn));
    assert_matches!(alice.key_changes("s0", "s1").await, Err(Error::NotLoggedIn));
}
