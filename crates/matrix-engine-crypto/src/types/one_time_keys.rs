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

use serde::{Deserialize, Serialize};

use super::Signatures;

/// A one-time key together with the signature of the device's identity key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKey {
    /// The unpadded base64 Curve25519 public key.
    key: String,

    /// Signatures for the key object.
    #[serde(default)]
    signatures: Signatures,

    /// Is the key considered to be a fallback key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fallback: Option<bool>,
}

impl SignedKey {
    /// Creates a new, not yet signed, `SignedKey` for the given key.
    pub fn new(key: String) -> Self {
        Self { key, signatures: Signatures::new(), fallback: None }
    }

    /// The unpadded base64 Curve25519 public key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn signatures(&self) -> &Signatures {
        &self.signatures
    }

    pub fn signatures_mut(&mut self) -> &mut Signatures {
        &mut self.signatures
    }

    pub fn fallback(&self) -> bool {
        self.fallback.unwrap_or(false)
    }
}

/// A one-time key as it appears in a `/keys/upload` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneTimeKey {
    /// A key signed by the device, uploaded as `signed_curve25519`.
    SignedKey(SignedKey),
    /// A bare key, uploaded as `curve25519`.
    Key(String),
}

impl OneTimeKey {
    /// The unpadded base64 public key, signed or not.
    pub fn key(&self) -> &str {
        match self {
            Self::SignedKey(key) => key.key(),
            Self::Key(key) => key,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_let;
    use ruma::user_id;
    use serde_json::json;

    use super::{OneTimeKey, SignedKey};

    #[test]
    fn test_untagged_one_time_keys() {
        let signed = json!({
            "key": "zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnlZzs",
            "signatures": {
                "@alice:example.org": {
                    "ed25519:JLAFKJWSCS": "FLWxXqGbwrb8SM3Y795eB6OA8bwBcoMZFXBqnTn58AYWZSqiD45tlBVcDa2L7RwdKXebW/VzDlnfVJ+9jok1Bw"
                }
            }
        });

        let key: OneTimeKey = serde_json::from_value(signed.clone()).unwrap();
        assert_let!(OneTimeKey::SignedKey(signed_key) = &key);
        assert!(signed_key
            .signatures()
            .get_signature(user_id!("@alice:example.org"), "ed25519:JLAFKJWSCS")
            .is_some());
        assert_eq!(serde_json::to_value(&key).unwrap(), signed);

        let bare: OneTimeKey =
            serde_json::from_value(json!("zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnlZzs")).unwrap();
        assert_let!(OneTimeKey::Key(_) = &bare);
        assert_eq!(bare.key(), key.key());
    }

    #[test]
    fn test_fallback_flag_is_omitted_by_default() {
        let key = SignedKey::new("key".to_owned());

        assert!(!key.fallback());
        assert_eq!(serde_json::to_value(&key).unwrap(), json!({ "key": "key", "signatures": {} }));
    }
}
