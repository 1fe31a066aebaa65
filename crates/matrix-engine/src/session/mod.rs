// Copyright 2020 Damir Jelić
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
    borrow::Cow,
    collections::BTreeMap,
    fmt::{self, Debug},
    sync::{Arc, RwLock as StdRwLock},
    time::Duration,
};

use eyeball::Subscriber;
use matrix_engine_crypto::{
    types::{KeyChangeSet, KeyCounts, KeyUploadRequest, KeysQueryRequest, KeysQueryResponse},
    CryptoProvider, KeyManager, KeyStore,
};
use ruma::{
    api::{
        auth_scheme::{AuthScheme, SendAccessToken},
        client::{
            keys::{get_key_changes, get_keys, upload_keys},
            membership::join_room_by_id_or_alias,
            room::create_room,
            session::{
                login::{self, v3::LoginInfo},
                logout,
            },
            state::send_state_event,
            sync::sync_events::v3::Response as SyncResponse,
            uiaa::{MatrixUserIdentifier, UserIdentifier},
        },
        error::{FromHttpResponseError, IntoHttpError},
        path_builder::PathBuilder,
        OutgoingRequest, SupportedVersions,
    },
    assign,
    events::{room::encryption::RoomEncryptionEventContent, EmptyStateKey},
    serde::Raw,
    OneTimeKeyAlgorithm, OwnedDeviceId, OwnedEventId, OwnedRoomId, OwnedRoomOrAliasId,
    OwnedUserId, RoomId, UInt,
};
use tracing::{debug, instrument};
use url::Url;

use crate::{
    config::{RequestConfig, SyncSettings},
    dispatcher::Dispatcher,
    error::{Error, HttpError, HttpResult, Result},
    http_client::RequestId,
    sync::{LoopCtrl, SyncEngine, SyncState},
};

mod builder;
mod identity;

pub use self::{builder::SessionBuilder, identity::Identity};
pub(crate) use self::identity::IdentityHandle;

struct SessionInner {
    dispatcher: Dispatcher,
    identity: IdentityHandle,
    sync: SyncEngine,
    /// Present while the session is logged in.
    key_manager: StdRwLock<Option<KeyManager>>,
    crypto_provider: Arc<dyn CryptoProvider>,
    one_time_key_capacity: usize,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.sync.stop();
    }
}

/// A logged in, or not yet logged in, device of a Matrix user.
///
/// The session is the only place the identity of the device changes. It
/// composes the [`Dispatcher`] for single requests, the [`SyncEngine`] for
/// the sync loop and the [`KeyManager`] of the device.
///
/// All clones of a session share the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("homeserver", &self.homeserver().as_str())
            .field("identity", &self.identity())
            .field("sync_state", &self.sync_state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a new [`SessionBuilder`].
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// The homeserver of the session.
    pub fn homeserver(&self) -> &Url {
        self.inner.dispatcher.homeserver()
    }

    /// The identity of the session, if it is logged in.
    pub fn identity(&self) -> Option<Identity> {
        self.inner.identity.get()
    }

    pub fn user_id(&self) -> Option<OwnedUserId> {
        self.identity().map(|identity| identity.user_id)
    }

    pub fn device_id(&self) -> Option<OwnedDeviceId> {
        self.identity().map(|identity| identity.device_id)
    }

    pub fn access_token(&self) -> Option<String> {
        self.inner.identity.access_token()
    }

    /// Is the session logged in.
    pub fn logged_in(&self) -> bool {
        self.inner.identity.access_token().is_some()
    }

    /// The dispatcher sending the requests of this session.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Log in with a user name and a password.
    ///
    /// On success the device gets fresh identity keys and the session is
    /// ready to sync and to upload keys.
    ///
    /// # Arguments
    ///
    /// * `user` - The localpart or the full user ID of the user.
    ///
    /// * `password` - The password of the user.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyLoggedIn`] if the session is logged in, otherwise the
    /// error of the server, [`Error::is_auth_error()`] is `true` for wrong
    /// credentials.
    pub async fn login(&self, user: &str, password: &str) -> Result<Identity> {
        let identifier = UserIdentifier::Matrix(MatrixUserIdentifier::new(user.to_owned()));
        let login_info =
            LoginInfo::Password(login::v3::Password::new(identifier, password.to_owned()));

        self.login_with(login::v3::Request::new(login_info)).await
    }

    /// Log in with a custom login request.
    #[instrument(skip_all)]
    pub async fn login_with(&self, request: login::v3::Request) -> Result<Identity> {
        if self.logged_in() {
            return Err(Error::AlreadyLoggedIn);
        }

        let response = self.inner.dispatcher.send(request, None, None).await?;
        debug!(user_id = ?response.user_id, device_id = ?response.device_id, "Logged in");

        let identity =
            Identity::new(response.user_id, response.device_id, response.access_token);
        self.restore_session(identity.clone())?;

        Ok(identity)
    }

    /// Use an identity that was obtained earlier instead of logging in.
    ///
    /// Key material is only held in memory, the device gets fresh identity
    /// keys.
    pub fn restore_session(&self, identity: Identity) -> Result<()> {
        let store = KeyStore::with_capacity(
            self.inner.crypto_provider.clone(),
            self.inner.one_time_key_capacity,
        );
        let key_manager = KeyManager::with_new_identity(
            identity.user_id.clone(),
            identity.device_id.clone(),
            store,
        )?;

        let mut slot = self.inner.key_manager.write().unwrap();

        if !self.inner.identity.set_if_empty(identity) {
            return Err(Error::AlreadyLoggedIn);
        }

        *slot = Some(key_manager);

        Ok(())
    }

    /// Replace the access token, the next request uses the new one.
    ///
    /// Requests that are already in flight keep the token they were sent
    /// with.
    pub fn refresh_access_token(&self, access_token: String) -> Result<()> {
        if self.inner.identity.set_access_token(access_token) {
            debug!("Replaced the access token");
            Ok(())
        } else {
            Err(Error::NotLoggedIn)
        }
    }

    /// Invalidate the access token on the server and [`close()`] the
    /// session.
    ///
    /// If the server doesn't know the token anymore the session is closed
    /// all the same.
    ///
    /// [`close()`]: Self::close
    #[instrument(skip_all)]
    pub async fn logout(&self) -> Result<()> {
        let access_token = self.access_token().ok_or(Error::NotLoggedIn)?;

        let request = logout::v3::Request::new();

        match self.inner.dispatcher.send(request, Some(&access_token), None).await {
            Ok(_) => {}
            Err(error) if error.is_auth_error() => {
                debug!("The access token was already invalid: {error}");
            }
            Err(error) => return Err(error.into()),
        }

        self.close();

        Ok(())
    }

    /// Forget the identity of the session without telling the server.
    ///
    /// The sync loop is stopped and every pending request is cancelled. The
    /// key material of the device and the sync cursor are dropped, a later
    /// login starts with a full sync.
    pub fn close(&self) {
        self.inner.sync.stop();
        self.inner.dispatcher.cancel_all();
        self.inner.sync.set_cursor(None);

        let identity = self.inner.identity.clear();
        self.inner.key_manager.write().unwrap().take();

        if let Some(identity) = identity {
            debug!(user_id = ?identity.user_id, device_id = ?identity.device_id, "Session closed");
        }
    }

    /// Send a request without waiting for its outcome.
    ///
    /// The current access token is attached, see [`Dispatcher::submit()`]
    /// for how the outcome is delivered.
    pub fn submit_request<R, F>(
        &self,
        request: R,
        config: Option<RequestConfig>,
        continuation: F,
    ) -> RequestId
    where
        R: OutgoingRequest + Debug,
        for<'a> R::Authentication: AuthScheme<Input<'a> = SendAccessToken<'a>>,
        for<'a> R::PathBuilder: PathBuilder<Input<'a> = Cow<'a, SupportedVersions>>,
        HttpError: From<FromHttpResponseError<R::EndpointError>>,
        F: FnOnce(HttpResult<R::IncomingResponse>) + Send + 'static,
    {
        let access_token = self.access_token();
        self.inner.dispatcher.submit(request, access_token.as_deref(), config, continuation)
    }

    /// Send a request with the current access token and wait for the
    /// outcome.
    pub async fn send<R>(
        &self,
        request: R,
        config: Option<RequestConfig>,
    ) -> HttpResult<R::IncomingResponse>
    where
        R: OutgoingRequest + Debug,
        for<'a> R::Authentication: AuthScheme<Input<'a> = SendAccessToken<'a>>,
        for<'a> R::PathBuilder: PathBuilder<Input<'a> = Cow<'a, SupportedVersions>>,
        HttpError: From<FromHttpResponseError<R::EndpointError>>,
        R::IncomingResponse: Send + 'static,
    {
        let access_token = self.access_token();
        self.inner.dispatcher.send(request, access_token.as_deref(), config).await
    }

    /// Cancel a request that was sent with [`submit_request()`].
    ///
    /// [`submit_request()`]: Self::submit_request
    pub fn cancel_request(&self, request_id: RequestId) -> bool {
        self.inner.dispatcher.cancel(request_id)
    }

    /// Start the sync loop, see [`SyncEngine::start()`].
    ///
    /// One-time key counts reported in sync responses are handed to the
    /// [`KeyManager`] before `handler` sees the response.
    pub fn start_sync<H>(&self, settings: SyncSettings, mut handler: H) -> Result<()>
    where
        H: FnMut(Result<SyncResponse>) -> LoopCtrl + Send + 'static,
    {
        let key_manager = self.key_manager()?;

        self.inner.sync.start(settings, move |response| {
            if let Ok(response) = &response {
                update_key_counts(&key_manager, response);
            }

            handler(response)
        })
    }

    /// Stop the sync loop.
    pub fn stop_sync(&self) {
        self.inner.sync.stop();
    }

    /// Send a single sync request, see [`SyncEngine::sync_once()`].
    #[instrument(skip_all)]
    pub async fn sync_once(&self, settings: SyncSettings) -> Result<SyncResponse> {
        let key_manager = self.key_manager()?;
        let response = self.inner.sync.sync_once(settings).await?;

        update_key_counts(&key_manager, &response);

        Ok(response)
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.sync.state()
    }

    /// Get notified about changes of the sync loop state.
    pub fn subscribe_sync_state(&self) -> Subscriber<SyncState> {
        self.inner.sync.subscribe_state()
    }

    /// The cursor the next sync request starts from.
    pub fn sync_cursor(&self) -> Option<String> {
        self.inner.sync.cursor()
    }

    /// The key manager of the device.
    ///
    /// # Errors
    ///
    /// [`Error::NotLoggedIn`] if the session isn't logged in.
    pub fn key_manager(&self) -> Result<KeyManager> {
        self.inner.key_manager.read().unwrap().clone().ok_or(Error::NotLoggedIn)
    }

    /// Upload a request built by the [`KeyManager`].
    ///
    /// On success the key manager learns the new one-time key counts, which
    /// are returned. On failure the one-time keys of the request are
    /// released for the next upload.
    #[instrument(skip_all, fields(one_time_keys = request.one_time_keys.len()))]
    pub async fn upload_keys(&self, request: KeyUploadRequest) -> Result<KeyCounts> {
        let key_manager = self.key_manager()?;

        let result = match upload_keys_request(&request) {
            Ok(upload_request) => self.send(upload_request, None).await,
            Err(error) => Err(IntoHttpError::from(error).into()),
        };

        match result {
            Ok(response) => {
                let counts = key_counts(&response.one_time_key_counts);
                key_manager.on_upload_response(&request, counts.clone());
                Ok(counts)
            }
            Err(error) => {
                key_manager.on_upload_failure(&request);
                Err(error.into())
            }
        }
    }

    /// Fetch the device keys of the given users.
    ///
    /// Devices whose keys aren't properly self-signed are left out.
    #[instrument(skip_all)]
    pub async fn query_keys(
        &self,
        users: impl IntoIterator<Item = OwnedUserId>,
    ) -> Result<KeysQueryResponse> {
        let key_manager = self.key_manager()?;
        let KeysQueryRequest { device_keys, timeout } = key_manager.build_query_request(users);

        let request = assign!(get_keys::v3::Request::new(), {
            device_keys,
            timeout: timeout.map(Duration::from_millis),
        });
        let response = self.send(request, None).await?;

        Ok(key_manager.receive_query_response(keys_query_response(response)))
    }

    /// Fetch the users whose device keys changed between two sync cursors.
    #[instrument(skip(self))]
    pub async fn key_changes(&self, from: &str, to: &str) -> Result<KeyChangeSet> {
        let key_manager = self.key_manager()?;

        let request = get_key_changes::v3::Request::new(from.to_owned(), to.to_owned());
        let response = self.send(request, None).await?;

        Ok(key_manager.receive_key_changes(from, response.changed, response.left))
    }

    /// Create a room.
    #[instrument(skip_all)]
    pub async fn create_room(&self, request: create_room::v3::Request) -> Result<OwnedRoomId> {
        Ok(self.send(request, None).await?.room_id)
    }

    /// Join a room by its ID or one of its aliases.
    #[instrument(skip(self))]
    pub async fn join_room(&self, room_id_or_alias: OwnedRoomOrAliasId) -> Result<OwnedRoomId> {
        let request = join_room_by_id_or_alias::v3::Request::new(room_id_or_alias);
        Ok(self.send(request, None).await?.room_id)
    }

    /// Turn on end-to-end encryption in a room.
    ///
    /// Returns the ID of the `m.room.encryption` state event.
    #[instrument(skip(self))]
    pub async fn enable_encryption(&self, room_id: &RoomId) -> Result<OwnedEventId> {
        let content = RoomEncryptionEventContent::with_recommended_defaults();
        let request =
            send_state_event::v3::Request::new(room_id.to_owned(), &EmptyStateKey, &content)
                .map_err(|e| HttpError::from(IntoHttpError::from(e)))?;

        Ok(self.send(request, None).await?.event_id)
    }
}

fn update_key_counts(key_manager: &KeyManager, response: &SyncResponse) {
    // Servers leave the field out when nothing changed.
    if !response.device_one_time_keys_count.is_empty() {
        key_manager.update_key_counts(key_counts(&response.device_one_time_keys_count));
    }
}

fn key_counts(counts: &BTreeMap<OneTimeKeyAlgorithm, UInt>) -> KeyCounts {
    counts.iter().map(|(algorithm, count)| (algorithm.as_str().into(), u64::from(*count))).collect()
}

fn upload_keys_request(request: &KeyUploadRequest) -> serde_json::Result<upload_keys::v3::Request> {
    let device_keys = request
        .device_keys
        .as_ref()
        .map(|keys| serde_json::value::to_raw_value(keys).map(Raw::from_json))
        .transpose()?;
    // Key ids are validated while the keys are decoded into the request.
    let one_time_keys = serde_json::from_str(&serde_json::to_string(&request.one_time_keys)?)?;

    Ok(assign!(upload_keys::v3::Request::new(), { device_keys, one_time_keys }))
}

/// Decode the device keys of a `/keys/query` response, entries that don't
/// parse are left out.
fn keys_query_response(response: get_keys::v3::Response) -> KeysQueryResponse {
    let device_keys = response
        .device_keys
        .into_iter()
        .map(|(user_id, devices)| {
            let devices = devices
                .into_iter()
                .filter_map(|(device_id, raw)| match serde_json::from_str(raw.json().get()) {
                    Ok(keys) => Some((device_id, keys)),
                    Err(error) => {
                        debug!(?user_id, ?device_id, "Dropping malformed device keys: {error}");
                        None
                    }
                })
                .collect();

            (user_id, devices)
        })
        .collect();

    KeysQueryResponse { failures: response.failures, device_keys }
}
