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

//! The seam between the key store and the actual elliptic-curve primitives.

use std::fmt;

use matrix_engine_common::{debug::Redacted, AsyncTraitDeps};
use vodozemac::{
    base64_encode, Curve25519PublicKey, Curve25519SecretKey, Ed25519PublicKey, Ed25519SecretKey,
    Ed25519Signature,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// The kind of key a [`KeyPair`] holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// An Ed25519 signing key.
    Ed25519,
    /// A Curve25519 key used for key agreement.
    Curve25519,
}

/// An opaque key pair.
///
/// The private half is zeroized when the pair is dropped and is never
/// printed.
#[derive(Clone)]
pub struct KeyPair {
    kind: KeyKind,
    public_key: Vec<u8>,
    private_key: Zeroizing<Vec<u8>>,
}

impl KeyPair {
    /// Assemble a key pair out of raw key material.
    pub fn from_parts(kind: KeyKind, public_key: Vec<u8>, private_key: Vec<u8>) -> Self {
        Self { kind, public_key, private_key: Zeroizing::new(private_key) }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }

    /// The public key encoded as unpadded base64, the way Matrix transports
    /// keys.
    pub fn public_key_base64(&self) -> String {
        base64_encode(&self.public_key)
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("kind", &self.kind)
            .field("public_key", &self.public_key_base64())
            .field("private_key", &Redacted)
            .finish()
    }
}

/// Provider of key generation, signing and signature verification.
///
/// The [`KeyStore`](crate::KeyStore) treats it as an oracle and never looks
/// at the key material itself.
pub trait CryptoProvider: AsyncTraitDeps {
    /// Generate a new Ed25519 key pair.
    fn generate_signing_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// Generate a new Curve25519 key pair.
    fn generate_curve25519_key_pair(&self) -> Result<KeyPair, CryptoError>;

    /// Sign the payload with the private half of the given Ed25519 key pair,
    /// returning the raw signature bytes.
    fn sign(&self, key_pair: &KeyPair, payload: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Check that `signature` was produced over `payload` by the owner of the
    /// Ed25519 `public_key`.
    fn verify(&self, public_key: &[u8], payload: &[u8], signature: &[u8])
        -> Result<(), CryptoError>;
}

/// The default [`CryptoProvider`], backed by vodozemac.
#[derive(Clone, Debug, Default)]
pub struct VodozemacProvider;

impl VodozemacProvider {
    pub fn new() -> Self {
        Self
    }
}

fn to_key_bytes(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    bytes.try_into().map_err(|_| {
        CryptoError::InvalidKeyMaterial(format!("expected 32 bytes, got {}", bytes.len()))
    })
}

impl CryptoProvider for VodozemacProvider {
    fn generate_signing_key_pair(&self) -> Result<KeyPair, CryptoError> {
        let secret_key = Ed25519SecretKey::new();
        let public_key = secret_key.public_key();

        Ok(KeyPair::from_parts(
            KeyKind::Ed25519,
            public_key.as_bytes().to_vec(),
            secret_key.to_bytes().to_vec(),
        ))
    }

    fn generate_curve25519_key_pair(&self) -> Result<KeyPair, CryptoError> {
        let secret_key = Curve25519SecretKey::new();
        let public_key = Curve25519PublicKey::from(&secret_key);

        Ok(KeyPair::from_parts(
            KeyKind::Curve25519,
            public_key.as_bytes().to_vec(),
            secret_key.to_bytes().to_vec(),
        ))
    }

    fn sign(&self, key_pair: &KeyPair, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if key_pair.kind() != KeyKind::Ed25519 {
            return Err(CryptoError::InvalidKeyMaterial(
                "only Ed25519 keys can produce signatures".to_owned(),
            ));
        }

        let private_key = Zeroizing::new(to_key_bytes(key_pair.private_key())?);
        let secret_key = Ed25519SecretKey::from_slice(&private_key);

        Ok(secret_key.sign(payload).to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        payload: &[u8],
        signature: &[u8],
    ) -> Result<(), CryptoError> {
        let public_key = to_key_bytes(public_key)?;
        let public_key = Ed25519PublicKey::from_slice(&public_key)
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
        let signature = Ed25519Signature::from_slice(signature)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;

        public_key.verify(payload, &signature).map_err(|_| CryptoError::VerificationFailed)
    }
}
