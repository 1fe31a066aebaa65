// Copyright 2022 The Matrix.org Foundation C.I.C.
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

//! Module containing the wire types the key manager produces and consumes.
//!
//! Keys travel as unpadded base64 strings, key ids as `<algorithm>:<name>`.

mod device_keys;
mod one_time_keys;
mod requests;

use std::{collections::BTreeMap, fmt};

use ruma::{OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use vodozemac::base64_encode;

pub use self::{
    device_keys::{DeviceKeys, PublicIdentityKeys},
    one_time_keys::{OneTimeKey, SignedKey},
    requests::{KeyChangeSet, KeyCounts, KeyUploadRequest, KeysQueryRequest, KeysQueryResponse},
};

/// The Ed25519 algorithm name as used in key ids.
pub const ED25519: &str = "ed25519";
/// The Curve25519 algorithm name as used in key ids.
pub const CURVE25519: &str = "curve25519";
/// The Olm encryption algorithm a device advertises.
pub const OLM_V1_CURVE25519_AES_SHA2: &str = "m.olm.v1.curve25519-aes-sha2";
/// The Megolm encryption algorithm a device advertises.
pub const MEGOLM_V1_AES_SHA2: &str = "m.megolm.v1.aes-sha2";

/// The algorithms one-time keys are uploaded and counted under.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OneTimeKeyAlgorithm {
    /// Curve25519 keys signed by the device's Ed25519 key.
    SignedCurve25519,
    /// Bare Curve25519 keys.
    Curve25519,
    /// An algorithm this crate doesn't know about.
    Custom(String),
}

impl OneTimeKeyAlgorithm {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SignedCurve25519 => "signed_curve25519",
            Self::Curve25519 => CURVE25519,
            Self::Custom(algorithm) => algorithm,
        }
    }
}

impl From<String> for OneTimeKeyAlgorithm {
    fn from(algorithm: String) -> Self {
        match algorithm.as_str() {
            "signed_curve25519" => Self::SignedCurve25519,
            CURVE25519 => Self::Curve25519,
            _ => Self::Custom(algorithm),
        }
    }
}

impl From<&str> for OneTimeKeyAlgorithm {
    fn from(algorithm: &str) -> Self {
        algorithm.to_owned().into()
    }
}

impl From<OneTimeKeyAlgorithm> for String {
    fn from(algorithm: OneTimeKeyAlgorithm) -> Self {
        match algorithm {
            OneTimeKeyAlgorithm::Custom(algorithm) => algorithm,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for OneTimeKeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The local, monotonically increasing id of a one-time key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OneTimeKeyId(u64);

impl OneTimeKeyId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// The key name used on the wire, the big-endian id as unpadded base64.
    pub fn to_base64(&self) -> String {
        base64_encode(self.0.to_be_bytes())
    }

    /// The full key id, `<algorithm>:<name>`, for the given algorithm.
    pub fn key_id(&self, algorithm: &OneTimeKeyAlgorithm) -> String {
        format!("{algorithm}:{}", self.to_base64())
    }
}

impl fmt::Display for OneTimeKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Build the id of a device's key, `<algorithm>:<device_id>`.
pub fn device_key_id(algorithm: &str, device_id: &str) -> String {
    format!("{algorithm}:{device_id}")
}

/// Signatures of a signed object.
///
/// Maps the signing user to the key id of the signing key and the unpadded
/// base64 signature.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signatures(BTreeMap<OwnedUserId, BTreeMap<String, String>>);

impl Signatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signature, replacing the previous one of the same key.
    pub fn add_signature(&mut self, signer: OwnedUserId, key_id: String, signature: String) {
        self.0.entry(signer).or_default().insert(key_id, signature);
    }

    /// Get the signature a user made with the given key.
    pub fn get_signature(&self, signer: &UserId, key_id: &str) -> Option<&str> {
        self.0.get(signer)?.get(key_id).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
