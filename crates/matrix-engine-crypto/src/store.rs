// Copyright 2021 The Matrix.org Foundation C.I.C.
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

//! In-memory holder of a device's key material.

use std::{collections::BTreeMap, fmt, sync::Arc};

use tracing::debug;
use vodozemac::{base64_decode, base64_encode};

use crate::{
    error::{CryptoError, KeyStoreError},
    provider::{CryptoProvider, KeyPair, VodozemacProvider},
    types::{OneTimeKeyId, PublicIdentityKeys},
};

/// The default number of one-time keys the pool may hold at once.
pub const DEFAULT_ONE_TIME_KEY_CAPACITY: usize = 100;

struct IdentityKeyPairs {
    signing: KeyPair,
    curve25519: KeyPair,
}

/// Holder of the long-term identity key pairs of a device and of its pool of
/// one-time key pairs.
///
/// The store never decides on its own that a one-time key was used up, the
/// [`KeyManager`](crate::KeyManager) removes the keys the server
/// acknowledged.
pub struct KeyStore {
    provider: Arc<dyn CryptoProvider>,
    identity: Option<IdentityKeyPairs>,
    one_time_keys: BTreeMap<OneTimeKeyId, KeyPair>,
    next_key_id: u64,
    capacity: usize,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("identity_keys", &self.public_identity_keys())
            .field("one_time_keys", &self.one_time_keys.len())
            .field("next_key_id", &self.next_key_id)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(Arc::new(VodozemacProvider::new()))
    }
}

impl KeyStore {
    /// Create an empty store backed by the given primitives.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self::with_capacity(provider, DEFAULT_ONE_TIME_KEY_CAPACITY)
    }

    /// Create an empty store whose one-time key pool holds at most
    /// `capacity` keys.
    pub fn with_capacity(provider: Arc<dyn CryptoProvider>, capacity: usize) -> Self {
        Self { provider, identity: None, one_time_keys: BTreeMap::new(), next_key_id: 0, capacity }
    }

    /// Generate the long-term identity key pairs of the device.
    pub fn create_identity(&mut self) -> Result<(), KeyStoreError> {
        if self.identity.is_some() {
            return Err(KeyStoreError::AlreadyInitialized);
        }

        let signing = self.provider.generate_signing_key_pair()?;
        let curve25519 = self.provider.generate_curve25519_key_pair()?;

        debug!(ed25519 = signing.public_key_base64(), "Created a new device identity");

        self.identity = Some(IdentityKeyPairs { signing, curve25519 });

        Ok(())
    }

    pub fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    /// Add `count` fresh one-time key pairs to the pool.
    ///
    /// Returns the number of created keys, which is always `count`. If the
    /// pool can't hold that many keys no key is created.
    pub fn generate_one_time_keys(&mut self, count: usize) -> Result<usize, KeyStoreError> {
        let current = self.one_time_keys.len();
        let exhausted = KeyStoreError::AllocationFailure {
            requested: count,
            current,
            capacity: self.capacity,
        };

        if current.checked_add(count).is_none_or(|total| total > self.capacity) {
            return Err(exhausted);
        }

        let first_id = self.next_key_id;
        let Some(next_key_id) = u64::try_from(count).ok().and_then(|c| first_id.checked_add(c))
        else {
            return Err(exhausted);
        };

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            created.push(self.provider.generate_curve25519_key_pair()?);
        }

        for (id, key_pair) in (first_id..).zip(created) {
            self.one_time_keys.insert(OneTimeKeyId::new(id), key_pair);
        }
        self.next_key_id = next_key_id;

        debug!(count, total = self.one_time_keys.len(), "Generated new one-time keys");

        Ok(count)
    }

    /// Drop one-time key pairs from the pool, freeing their slots.
    ///
    /// Returns the number of keys that were actually removed, unknown ids are
    /// ignored.
    pub fn remove_one_time_keys(&mut self, ids: &[OneTimeKeyId]) -> usize {
        let removed = ids.iter().filter(|id| self.one_time_keys.remove(id).is_some()).count();

        debug!(removed, total = self.one_time_keys.len(), "Removed published one-time keys");

        removed
    }

    /// Sign arbitrary content with the identity signing key.
    pub fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        let identity = self.identity.as_ref().ok_or(KeyStoreError::NotInitialized)?;

        Ok(self.provider.sign(&identity.signing, payload)?)
    }

    /// Sign a string, returning the unpadded base64 signature.
    pub fn sign_string(&self, payload: &str) -> Result<String, KeyStoreError> {
        self.sign(payload.as_bytes()).map(base64_encode)
    }

    /// Check a base64 signature made by the owner of a base64 Ed25519 key.
    pub fn verify(
        &self,
        public_key: &str,
        payload: &str,
        signature: &str,
    ) -> Result<(), CryptoError> {
        let public_key = base64_decode(public_key)
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
        let signature =
            base64_decode(signature).map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        self.provider.verify(&public_key, payload.as_bytes(), &signature)
    }

    /// The public halves of the identity keys, if they were created.
    pub fn public_identity_keys(&self) -> Option<PublicIdentityKeys> {
        self.identity.as_ref().map(|identity| PublicIdentityKeys {
            ed25519: identity.signing.public_key_base64(),
            curve25519: identity.curve25519.public_key_base64(),
        })
    }

    /// The public halves of every one-time key in the pool.
    pub fn public_one_time_keys(&self) -> BTreeMap<OneTimeKeyId, String> {
        self.one_time_keys
            .iter()
            .map(|(id, key_pair)| (*id, key_pair.public_key_base64()))
            .collect()
    }

    /// The number of keys in the one-time key pool.
    pub fn one_time_key_count(&self) -> usize {
        self.one_time_keys.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
