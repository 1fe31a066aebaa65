// Copyright 2020 The Matrix.org Foundation C.I.C.
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

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, Mutex},
};

use ruma::{DeviceId, OwnedDeviceId, OwnedUserId, UserId};
use tracing::{debug, instrument, trace};

use crate::{
    error::{KeyManagerError, KeyResult, KeyStoreError, SignatureError},
    store::KeyStore,
    types::{
        device_key_id, DeviceKeys, KeyChangeSet, KeyCounts, KeyUploadRequest, KeysQueryRequest,
        KeysQueryResponse, OneTimeKey, OneTimeKeyAlgorithm, OneTimeKeyId, PublicIdentityKeys,
        SignedKey, ED25519, MEGOLM_V1_AES_SHA2, OLM_V1_CURVE25519_AES_SHA2,
    },
    utilities::canonical_json_for_signing,
};

struct KeyManagerState {
    store: KeyStore,
    /// One-time keys that are part of an upload the server didn't answer yet.
    submitted: BTreeSet<OneTimeKeyId>,
    /// The last counts the server reported, `None` until the first report.
    key_counts: Option<KeyCounts>,
}

impl KeyManagerState {
    fn unsubmitted_keys(&self) -> Vec<(OneTimeKeyId, String)> {
        self.store
            .public_one_time_keys()
            .into_iter()
            .filter(|(id, _)| !self.submitted.contains(id))
            .collect()
    }

    /// The submitted keys that are part of the given request.
    fn submitted_keys_of(&self, request: &KeyUploadRequest) -> Vec<OneTimeKeyId> {
        self.submitted
            .iter()
            .copied()
            .filter(|id| {
                request
                    .one_time_keys
                    .contains_key(&id.key_id(&OneTimeKeyAlgorithm::SignedCurve25519))
                    || request
                        .one_time_keys
                        .contains_key(&id.key_id(&OneTimeKeyAlgorithm::Curve25519))
            })
            .collect()
    }
}

/// Builds key upload payloads for a device and tracks what the server knows
/// about its keys.
///
/// The manager is cheap to clone, all clones share the same state. Marking
/// keys as submitted happens under a single lock so two concurrent uploads
/// never carry the same key.
///
/// The manager never generates keys on its own, callers consult
/// [`KeyManager::needs_replenishment()`] and call
/// [`KeyManager::generate_one_time_keys()`] themselves.
#[derive(Clone)]
pub struct KeyManager {
    user_id: OwnedUserId,
    device_id: OwnedDeviceId,
    state: Arc<Mutex<KeyManagerState>>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyManager")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Create a manager for the device owning the given store.
    ///
    /// The store needs an identity before anything can be signed.
    pub fn new(user_id: OwnedUserId, device_id: OwnedDeviceId, store: KeyStore) -> Self {
        let state = KeyManagerState { store, submitted: BTreeSet::new(), key_counts: None };

        Self { user_id, device_id, state: Arc::new(Mutex::new(state)) }
    }

    /// Create a manager with a freshly generated device identity.
    pub fn with_new_identity(
        user_id: OwnedUserId,
        device_id: OwnedDeviceId,
        mut store: KeyStore,
    ) -> KeyResult<Self> {
        store.create_identity()?;
        Ok(Self::new(user_id, device_id, store))
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The public identity keys of our device.
    pub fn identity_keys(&self) -> Option<PublicIdentityKeys> {
        self.state.lock().unwrap().store.public_identity_keys()
    }

    /// Add `count` fresh one-time keys to the pool of our device.
    pub fn generate_one_time_keys(&self, count: usize) -> KeyResult<usize> {
        Ok(self.state.lock().unwrap().store.generate_one_time_keys(count)?)
    }

    /// The public one-time keys that weren't part of any upload yet.
    pub fn unsubmitted_one_time_keys(&self) -> BTreeMap<OneTimeKeyId, String> {
        self.state.lock().unwrap().unsubmitted_keys().into_iter().collect()
    }

    /// Sign the device keys of our device.
    pub fn device_keys(&self) -> KeyResult<DeviceKeys> {
        let state = self.state.lock().unwrap();
        self.signed_device_keys(&state)
    }

    fn signed_device_keys(&self, state: &KeyManagerState) -> KeyResult<DeviceKeys> {
        let identity_keys =
            state.store.public_identity_keys().ok_or(KeyStoreError::NotInitialized)?;

        let mut device_keys = DeviceKeys::new(
            self.user_id.clone(),
            self.device_id.clone(),
            vec![OLM_V1_CURVE25519_AES_SHA2.to_owned(), MEGOLM_V1_AES_SHA2.to_owned()],
            &identity_keys,
        );

        let signature = state.store.sign_string(&canonical_json_for_signing(&device_keys)?)?;
        device_keys.signatures.add_signature(
            self.user_id.clone(),
            device_key_id(ED25519, self.device_id.as_str()),
            signature,
        );

        Ok(device_keys)
    }

    fn sign_key(&self, state: &KeyManagerState, key: String) -> KeyResult<SignedKey> {
        let mut key = SignedKey::new(key);

        let signature = state.store.sign_string(&canonical_json_for_signing(&key)?)?;
        key.signatures_mut().add_signature(
            self.user_id.clone(),
            device_key_id(ED25519, self.device_id.as_str()),
            signature,
        );

        Ok(key)
    }

    /// Build a `/keys/upload` request containing every one-time key that
    /// wasn't uploaded yet, each signed by our identity key, and the signed
    /// device keys if `include_identity` is set.
    ///
    /// The included keys are marked as submitted: another call won't include
    /// them until [`KeyManager::on_upload_failure()`] returns them to the
    /// pool. If any signature can't be created no key is marked and the
    /// error is returned.
    #[instrument(skip(self), fields(user_id = ?self.user_id, device_id = ?self.device_id))]
    pub fn build_upload_request(&self, include_identity: bool) -> KeyResult<KeyUploadRequest> {
        let mut state = self.state.lock().unwrap();

        let device_keys =
            if include_identity { Some(self.signed_device_keys(&state)?) } else { None };

        let mut one_time_keys = BTreeMap::new();
        let mut included = Vec::new();

        for (id, key) in state.unsubmitted_keys() {
            let signed_key = self.sign_key(&state, key)?;
            one_time_keys.insert(
                id.key_id(&OneTimeKeyAlgorithm::SignedCurve25519),
                OneTimeKey::SignedKey(signed_key),
            );
            included.push(id);
        }

        debug!(
            one_time_keys = included.len(),
            device_keys = device_keys.is_some(),
            "Built a key upload request"
        );

        state.submitted.extend(included);

        Ok(KeyUploadRequest { device_keys, one_time_keys })
    }

    /// Build a `/keys/upload` request containing every one-time key that
    /// wasn't uploaded yet, without signatures.
    ///
    /// The server counts these keys under the `curve25519` algorithm.
    /// Bookkeeping is the same as for [`KeyManager::build_upload_request()`].
    pub fn build_unsigned_upload_request(&self) -> KeyUploadRequest {
        let mut state = self.state.lock().unwrap();
        let keys = state.unsubmitted_keys();

        let one_time_keys = keys
            .iter()
            .map(|(id, key)| {
                (id.key_id(&OneTimeKeyAlgorithm::Curve25519), OneTimeKey::Key(key.clone()))
            })
            .collect();

        state.submitted.extend(keys.into_iter().map(|(id, _)| id));

        KeyUploadRequest { device_keys: None, one_time_keys }
    }

    /// Handle the successful response to the given `/keys/upload` request.
    ///
    /// The one-time keys of that request are published, they leave the local
    /// pool and free their slots for new keys. Keys of other uploads that are
    /// still in flight stay submitted. The counts reported by the server
    /// replace the cached ones.
    pub fn on_upload_response(&self, request: &KeyUploadRequest, counts: KeyCounts) {
        let mut state = self.state.lock().unwrap();

        let published = state.submitted_keys_of(request);
        debug!(count = published.len(), "Marking one-time keys as published");

        for id in &published {
            state.submitted.remove(id);
        }
        state.store.remove_one_time_keys(&published);

        Self::replace_key_counts(&mut state, counts);
    }

    /// The upload of the given request failed, make its one-time keys
    /// available for the next upload again.
    ///
    /// Keys the server already acknowledged stay consumed.
    pub fn on_upload_failure(&self, request: &KeyUploadRequest) {
        let mut state = self.state.lock().unwrap();

        let released = state.submitted_keys_of(request);

        debug!(
            count = released.len(),
            "Key upload failed, releasing the submitted one-time keys"
        );

        for id in released {
            state.submitted.remove(&id);
        }
    }

    /// Update the one-time key counts, for example from a sync response.
    pub fn update_key_counts(&self, counts: KeyCounts) {
        let mut state = self.state.lock().unwrap();
        Self::replace_key_counts(&mut state, counts);
    }

    fn replace_key_counts(state: &mut KeyManagerState, counts: KeyCounts) {
        let old_count =
            state.key_counts.as_ref().map(|c| c.get(&OneTimeKeyAlgorithm::SignedCurve25519));
        let new_count = counts.get(&OneTimeKeyAlgorithm::SignedCurve25519);

        // Servers return the counts in every sync response, don't spam the
        // logs with no-op updates.
        if old_count != Some(new_count) {
            debug!("Updated uploaded one-time key count {old_count:?} -> {new_count}.");
        }

        state.key_counts = Some(counts);
    }

    /// The last counts the server reported, if any.
    pub fn key_counts(&self) -> Option<KeyCounts> {
        self.state.lock().unwrap().key_counts.clone()
    }

    /// Is the last known server-side count for the algorithm below
    /// `threshold`.
    ///
    /// Returns `None` if the server didn't report any counts yet.
    pub fn needs_replenishment(
        &self,
        algorithm: &OneTimeKeyAlgorithm,
        threshold: u64,
    ) -> Option<bool> {
        let state = self.state.lock().unwrap();
        state.key_counts.as_ref().map(|counts| counts.get(algorithm) < threshold)
    }

    /// Build a `/keys/query` request for every device of the given users.
    pub fn build_query_request(
        &self,
        users: impl IntoIterator<Item = OwnedUserId>,
    ) -> KeysQueryRequest {
        let device_keys = users.into_iter().map(|user_id| (user_id, Vec::new())).collect();
        KeysQueryRequest { device_keys, timeout: None }
    }

    /// Decode the body of a `/keys/changes` response.
    pub fn interpret_key_changes(
        &self,
        raw_response: &[u8],
        since: &str,
    ) -> KeyResult<KeyChangeSet> {
        let changes: KeyChangeSet = serde_json::from_slice(raw_response)?;
        Ok(self.receive_key_changes(since, changes.changed, changes.left))
    }

    /// Collect the users of an already decoded `/keys/changes` response.
    pub fn receive_key_changes(
        &self,
        since: &str,
        changed: impl IntoIterator<Item = OwnedUserId>,
        left: impl IntoIterator<Item = OwnedUserId>,
    ) -> KeyChangeSet {
        let changes = KeyChangeSet {
            since: since.to_owned(),
            changed: changed.into_iter().collect(),
            left: left.into_iter().collect(),
        };

        trace!(
            since,
            changed = changes.changed.len(),
            left = changes.left.len(),
            "Received key changes"
        );

        changes
    }

    /// Decode the body of a `/keys/query` response.
    ///
    /// Devices whose self-signature doesn't verify are dropped from the
    /// result.
    pub fn interpret_query_response(&self, raw_response: &[u8]) -> KeyResult<KeysQueryResponse> {
        let response: KeysQueryResponse = serde_json::from_slice(raw_response)?;
        Ok(self.receive_query_response(response))
    }

    /// Drop the devices of an already decoded `/keys/query` response whose
    /// self-signature doesn't verify.
    pub fn receive_query_response(&self, mut response: KeysQueryResponse) -> KeysQueryResponse {
        for devices in response.device_keys.values_mut() {
            devices.retain(|device_id, device_keys| {
                let valid = device_id == &device_keys.device_id
                    && self.verify_device_keys(device_keys).is_ok();

                if !valid {
                    debug!(
                        user_id = ?device_keys.user_id,
                        ?device_id,
                        "Dropping device keys with an invalid signature"
                    );
                }

                valid
            });
        }

        response
    }

    /// Check the self-signature of a device.
    pub fn verify_device_keys(&self, device_keys: &DeviceKeys) -> Result<(), SignatureError> {
        let key_id = device_key_id(ED25519, device_keys.device_id.as_str());
        let signing_key = device_keys
            .ed25519_key()
            .ok_or_else(|| SignatureError::MissingSigningKey(key_id.clone()))?;

        self.verify_signature(device_keys.user_id(), &key_id, signing_key, device_keys)
    }

    /// Check a one-time key of another device, signed by `signing_key`.
    pub fn verify_signed_key(
        &self,
        signer: &UserId,
        device_id: &DeviceId,
        signing_key: &str,
        signed_key: &SignedKey,
    ) -> Result<(), SignatureError> {
        let key_id = device_key_id(ED25519, device_id.as_str());
        self.verify_signature(signer, &key_id, signing_key, signed_key)
    }

    fn verify_signature<T>(
        &self,
        signer: &UserId,
        key_id: &str,
        signing_key: &str,
        object: &T,
    ) -> Result<(), SignatureError>
    where
        T: serde::Serialize + HasSignatures,
    {
        let signature = object
            .signatures()
            .get_signature(signer, key_id)
            .ok_or_else(|| SignatureError::NoSignatureFound(key_id.to_owned()))?;
        let canonical_json = canonical_json_for_signing(object)?;

        let state = self.state.lock().unwrap();
        Ok(state.store.verify(signing_key, &canonical_json, signature)?)
    }
}

trait HasSignatures {
    fn signatures(&self) -> &crate::types::Signatures;
}

impl HasSignatures for DeviceKeys {
    fn signatures(&self) -> &crate::types::Signatures {
        &self.signatures
    }
}

impl HasSignatures for SignedKey {
    fn signatures(&self) -> &crate::types::Signatures {
        SignedKey::signatures(self)
    }
}
