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

use std::collections::{BTreeMap, BTreeSet};

use ruma::{OwnedDeviceId, OwnedUserId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DeviceKeys, OneTimeKey, OneTimeKeyAlgorithm};

/// Request body of `POST /_matrix/client/v3/keys/upload`.
///
/// Built fresh for every upload and never modified after it was handed out.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyUploadRequest {
    /// The signed identity keys of the device, present on the first upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_keys: Option<DeviceKeys>,

    /// One-time keys, keyed by `<algorithm>:<key name>`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub one_time_keys: BTreeMap<String, OneTimeKey>,
}

impl KeyUploadRequest {
    /// Does the request carry nothing that needs to be uploaded.
    pub fn is_empty(&self) -> bool {
        self.device_keys.is_none() && self.one_time_keys.is_empty()
    }
}

/// The number of unclaimed one-time keys the server holds, per algorithm.
///
/// The server is authoritative, an algorithm missing from the map has no keys
/// left.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCounts(BTreeMap<OneTimeKeyAlgorithm, u64>);

impl KeyCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// The remaining count for the algorithm, zero if the server didn't
    /// mention it.
    pub fn get(&self, algorithm: &OneTimeKeyAlgorithm) -> u64 {
        self.0.get(algorithm).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&OneTimeKeyAlgorithm, &u64)> {
        self.0.iter()
    }
}

impl FromIterator<(OneTimeKeyAlgorithm, u64)> for KeyCounts {
    fn from_iter<T: IntoIterator<Item = (OneTimeKeyAlgorithm, u64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Request body of `POST /_matrix/client/v3/keys/query`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysQueryRequest {
    /// The devices to fetch keys for, an empty list means every device of
    /// the user.
    pub device_keys: BTreeMap<OwnedUserId, Vec<OwnedDeviceId>>,

    /// How long the server should wait for remote servers, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Response body of `POST /_matrix/client/v3/keys/query`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysQueryResponse {
    /// Remote servers that couldn't be reached, with the reason.
    #[serde(default)]
    pub failures: BTreeMap<String, Value>,

    /// The device keys of every queried user.
    #[serde(default)]
    pub device_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, DeviceKeys>>,
}

impl KeysQueryResponse {
    /// The devices of a single user.
    pub fn devices(&self, user_id: &UserId) -> Option<&BTreeMap<OwnedDeviceId, DeviceKeys>> {
        self.device_keys.get(user_id)
    }
}

/// Users whose device lists changed between two sync cursors.
///
/// Overlapping cursor ranges may report the same user again, consumers need
/// to treat the sets idempotently.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChangeSet {
    /// The cursor the changes were computed from.
    #[serde(skip)]
    pub since: String,

    /// Users who may have new or updated device keys.
    #[serde(default)]
    pub changed: BTreeSet<OwnedUserId>,

    /// Users who no longer share an encrypted room with us.
    #[serde(default)]
    pub left: BTreeSet<OwnedUserId>,
}

impl KeyChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.left.is_empty()
    }
}
