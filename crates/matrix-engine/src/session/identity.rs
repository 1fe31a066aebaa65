// Copyright 2023 The Matrix.org Foundation C.I.C.
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
    fmt,
    sync::{Arc, RwLock as StdRwLock},
};

use matrix_engine_common::debug::Redacted;
use ruma::{OwnedDeviceId, OwnedUserId};

/// The user and device a [`Session`] acts as, with the access token that
/// authenticates them.
///
/// [`Session`]: crate::Session
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: OwnedUserId,
    pub device_id: OwnedDeviceId,
    pub access_token: String,
}

impl Identity {
    pub fn new(user_id: OwnedUserId, device_id: OwnedDeviceId, access_token: String) -> Self {
        Self { user_id, device_id, access_token }
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("access_token", &Redacted)
            .finish()
    }
}

/// Shared slot holding the identity of a session.
///
/// Only the [`Session`](crate::Session) writes to it. Everybody else reads the
/// access token at the moment a request is submitted and never keeps a copy,
/// so a new token is used by the next request.
#[derive(Clone, Debug, Default)]
pub(crate) struct IdentityHandle(Arc<StdRwLock<Option<Identity>>>);

impl IdentityHandle {
    pub(crate) fn get(&self) -> Option<Identity> {
        self.0.read().unwrap().clone()
    }

    pub(crate) fn access_token(&self) -> Option<String> {
        self.0.read().unwrap().as_ref().map(|identity| identity.access_token.clone())
    }

    /// Store the identity unless there already is one.
    pub(crate) fn set_if_empty(&self, identity: Identity) -> bool {
        let mut slot = self.0.write().unwrap();

        if slot.is_some() {
            false
        } else {
            *slot = Some(identity);
            true
        }
    }

    pub(crate) fn set_access_token(&self, access_token: String) -> bool {
        match self.0.write().unwrap().as_mut() {
            Some(identity) => {
                identity.access_token = access_token;
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear(&self) -> Option<Identity> {
        self.0.write().unwrap().take()
    }
}
