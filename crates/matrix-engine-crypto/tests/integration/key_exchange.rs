// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Two devices exchanging keys through a pretend server that stores whatever
//! gets uploaded and hands it out on query.

use std::collections::BTreeMap;

use assert_matches2::assert_let;
use matrix_engine_crypto::{
    types::{KeyCounts, KeyUploadRequest, OneTimeKey, OneTimeKeyAlgorithm},
    KeyManager, KeyStore,
};
use matrix_engine_test::{ALICE, BOB};
use ruma::device_id;
use serde_json::json;

fn get_manager_pair() -> (KeyManager, KeyManager) {
    let alice = KeyManager::with_new_identity(
        ALICE.to_owned(),
        device_id!("ALICEDEVICE").to_owned(),
        KeyStore::default(),
    )
    .unwrap();
    let bob = KeyManager::with_new_identity(
        BOB.to_owned(),
        device_id!("BOBDEVICE").to_owned(),
        KeyStore::default(),
    )
    .unwrap();

    (alice, bob)
}

/// What a homeserver would answer to an upload.
fn upload_response(request: &KeyUploadRequest) -> KeyCounts {
    let mut counts = BTreeMap::new();

    for key_id in request.one_time_keys.keys() {
        let (algorithm, _) = key_id.split_once(':').unwrap();
        *counts.entry(OneTimeKeyAlgorithm::from(algorithm)).or_insert(0) += 1;
    }

    counts.into_iter().collect()
}

#[test]
fn test_uploaded_keys_round_trip_through_a_query() {
    let (alice, bob) = get_manager_pair();

    alice.generate_one_time_keys(1).unwrap();
    bob.generate_one_time_keys(1).unwrap();

    let alice_upload = alice.build_upload_request(true).unwrap();
    let bob_upload = bob.build_upload_request(true).unwrap();

    let alice_counts = upload_response(&alice_upload);
    assert_eq!(alice_counts.get(&OneTimeKeyAlgorithm::SignedCurve25519), 1);
    alice.on_upload_response(&alice_upload, alice_counts);
    bob.on_upload_response(&bob_upload, upload_response(&bob_upload));

    let alice_device = alice_upload.device_keys.clone().unwrap();
    let bob_device = bob_upload.device_keys.clone().unwrap();

    let query = alice.build_query_request([bob.user_id().to_owned()]);
    assert!(query.device_keys.contains_key(bob.user_id()));

    let server_answer = json!({
        "failures": {},
        "device_keys": {
            bob.user_id().as_str(): { bob.device_id().as_str(): bob_device },
        },
    })
    .to_string();

    let response = alice.interpret_query_response(server_answer.as_bytes()).unwrap();
    assert!(response.failures.is_empty());

    let bob_devices = response.devices(bob.user_id()).unwrap();
    let dev_keys = bob_devices.get(bob.device_id()).unwrap();

    assert_eq!(dev_keys.user_id(), bob.user_id());
    assert_eq!(dev_keys.device_id(), bob.device_id());
    assert_eq!(dev_keys.keys, bob_device.keys);
    assert_eq!(dev_keys.signatures, bob_device.signatures);

    // Bob can check Alice's one-time key against her identity.
    assert_let!(
        Some(OneTimeKey::SignedKey(one_time_key)) = alice_upload.one_time_keys.values().next()
    );
    bob.verify_signed_key(
        alice.user_id(),
        alice.device_id(),
        alice_device.ed25519_key().unwrap(),
        one_time_key,
    )
    .expect("Alice's one-time key should be signed by her device");
}

#[test]
fn test_identity_only_upload() {
    let (alice, _) = get_manager_pair();

    let request = alice.build_upload_request(true).unwrap();

    assert!(request.one_time_keys.is_empty());
    assert!(request.device_keys.is_some());

    let counts = upload_response(&request);
    assert!(counts.is_empty());

    alice.on_upload_response(&request, counts);
    assert_eq!(alice.needs_replenishment(&OneTimeKeyAlgorithm::SignedCurve25519, 1), Some(true));
}

#[test]
fn test_replenishment_cycle() {
    let (alice, _) = get_manager_pair();

    alice.generate_one_time_keys(1).unwrap();
    let request = alice.build_upload_request(true).unwrap();
    alice.on_upload_response(&request, upload_response(&request));

    let signed = OneTimeKeyAlgorithm::SignedCurve25519;
    assert_eq!(alice.needs_replenishment(&signed, 5), Some(true));
    assert_eq!(alice.needs_replenishment(&signed, 1), Some(false));

    alice.generate_one_time_keys(4).unwrap();
    let request = alice.build_upload_request(false).unwrap();
    assert_eq!(request.one_time_keys.len(), 4);

    let server_total: KeyCounts = [(signed.clone(), 5)].into_iter().collect();
    alice.on_upload_response(&request, server_total);
    assert_eq!(alice.needs_replenishment(&signed, 5), Some(false));
}

#[test]
fn test_replenishment_keeps_working_after_many_uploads() {
    let (alice, _) = get_manager_pair();
    let signed = OneTimeKeyAlgorithm::SignedCurve25519;
    let mut server_count = 0;

    // Others claim every key between two uploads, the device keeps topping up.
    for _ in 0..5 {
        alice.generate_one_time_keys(50).unwrap();
        let request = alice.build_upload_request(false).unwrap();
        assert_eq!(request.one_time_keys.len(), 50);

        server_count += request.one_time_keys.len() as u64;
        alice.on_upload_response(&request, [(signed.clone(), server_count)].into_iter().collect());

        server_count = 0;
        alice.update_key_counts([(signed.clone(), server_count)].into_iter().collect());
        assert_eq!(alice.needs_replenishment(&signed, 25), Some(true));
    }
}
