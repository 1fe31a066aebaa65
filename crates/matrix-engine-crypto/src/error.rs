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

use ruma::CanonicalJsonError;
use serde_json::Error as SerdeError;
use thiserror::Error;

pub type KeyResult<T> = Result<T, KeyManagerError>;

/// Error type for failures of the cryptographic primitives.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The stored key material can't be turned into a key.
    #[error("the key material is corrupt: {0}")]
    InvalidKeyMaterial(String),

    /// A signature couldn't be decoded.
    #[error("the signature is malformed: {0}")]
    InvalidSignature(String),

    /// The signature didn't match the signed payload.
    #[error("the signature didn't match the provided key")]
    VerificationFailed,

    /// The object that should be signed couldn't be converted to canonical
    /// JSON.
    #[error(transparent)]
    CanonicalJson(#[from] CanonicalJsonError),

    /// Only JSON objects can be signed.
    #[error("the signed payload needs to be a JSON object")]
    NotAnObject,

    /// The provider refused to produce a key or signature.
    #[error("the crypto provider failed: {0}")]
    Provider(String),
}

/// Errors of the [`KeyStore`](crate::KeyStore).
#[derive(Error, Debug)]
pub enum KeyStoreError {
    /// `create_identity()` was called on a store that already has an identity.
    #[error("the device identity was already created")]
    AlreadyInitialized,

    /// The store has no identity yet, keys can't be signed.
    #[error("the device identity wasn't created yet")]
    NotInitialized,

    /// The one-time key pool can't hold the requested amount of keys.
    #[error("can't allocate {requested} one-time keys, the pool holds {current} out of {capacity}")]
    AllocationFailure {
        /// The number of keys that should have been generated.
        requested: usize,
        /// The number of keys currently in the pool.
        current: usize,
        /// The maximum number of keys the pool may hold.
        capacity: usize,
    },

    /// The crypto provider failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Error type describing failures while checking a signed object of another
/// device.
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The signed object isn't a JSON object.
    #[error("the signed value is not a JSON object")]
    NotAnObject,

    /// No signature of the expected key was found.
    #[error("no signature found for the key {0}")]
    NoSignatureFound(String),

    /// The device doesn't advertise the key that should have signed the
    /// object.
    #[error("the signing key {0} is missing from the device keys")]
    MissingSigningKey(String),

    /// The key or the signature couldn't be decoded, or the signature is
    /// invalid.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Errors of the [`KeyManager`](crate::KeyManager).
#[derive(Error, Debug)]
pub enum KeyManagerError {
    /// A key couldn't be generated or signed, no request was produced.
    #[error("a cryptographic operation failed: {0}")]
    CryptoFailure(CryptoError),

    /// The key pool is exhausted.
    #[error("can't allocate any more one-time keys: {0}")]
    AllocationFailure(KeyStoreError),

    /// A server response didn't have the expected shape.
    #[error("the server response is malformed: {0}")]
    MalformedResponse(#[from] SerdeError),

    /// The key store is in the wrong state for the operation.
    #[error(transparent)]
    Store(KeyStoreError),

    /// A signed object of another device failed verification.
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl From<KeyStoreError> for KeyManagerError {
    fn from(error: KeyStoreError) -> Self {
        match error {
            KeyStoreError::Crypto(e) => Self::CryptoFailure(e),
            e @ KeyStoreError::AllocationFailure { .. } => Self::AllocationFailure(e),
            e => Self::Store(e),
        }
    }
}

impl From<CryptoError> for KeyManagerError {
    fn from(error: CryptoError) -> Self {
        Self::CryptoFailure(error)
    }
}
