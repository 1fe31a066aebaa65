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

use std::collections::BTreeMap;

use ruma::{DeviceId, OwnedDeviceId, OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{device_key_id, Signatures, CURVE25519, ED25519};

/// The public identity keys of a device.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIdentityKeys {
    /// The unpadded base64 Ed25519 key, used for signing.
    pub ed25519: String,
    /// The unpadded base64 Curve25519 key, used for key agreement.
    pub curve25519: String,
}

/// Identity keys for a device, as uploaded to and returned from the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKeys {
    /// The ID of the user the device belongs to.
    pub user_id: OwnedUserId,

    /// The ID of the device these keys belong to.
    pub device_id: OwnedDeviceId,

    /// The encryption algorithms supported by this device.
    pub algorithms: Vec<String>,

    /// Public identity keys, keyed by `<algorithm>:<device_id>`.
    pub keys: BTreeMap<String, String>,

    /// Signatures for the device key object.
    #[serde(default)]
    pub signatures: Signatures,

    /// Additional data added to the device key information by intermediate
    /// servers, not covered by the signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
}

impl DeviceKeys {
    /// Create a new, unsigned, set of device keys.
    pub fn new(
        user_id: OwnedUserId,
        device_id: OwnedDeviceId,
        algorithms: Vec<String>,
        identity_keys: &PublicIdentityKeys,
    ) -> Self {
        let keys = BTreeMap::from([
            (device_key_id(CURVE25519, device_id.as_str()), identity_keys.curve25519.clone()),
            (device_key_id(ED25519, device_id.as_str()), identity_keys.ed25519.clone()),
        ]);

        Self { user_id, device_id, algorithms, keys, signatures: Signatures::new(), unsigned: None }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// The Ed25519 key of the device, if it advertises one.
    pub fn ed25519_key(&self) -> Option<&str> {
        self.keys.get(&device_key_id(ED25519, self.device_id.as_str())).map(String::as_str)
    }

    /// The Curve25519 key of the device, if it advertises one.
    pub fn curve25519_key(&self) -> Option<&str> {
        self.keys.get(&device_key_id(CURVE25519, self.device_id.as_str())).map(String::as_str)
    }
}
