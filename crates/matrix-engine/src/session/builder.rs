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

use std::{fmt, sync::Arc};

use matrix_engine_crypto::{CryptoProvider, VodozemacProvider, DEFAULT_ONE_TIME_KEY_CAPACITY};
use tracing::debug;
use url::Url;

use super::{IdentityHandle, Session, SessionInner};
use crate::{
    config::{RequestConfig, SyncRetryPolicy},
    dispatcher::Dispatcher,
    error::SessionBuildError,
    http_client::{HttpClient, HttpSend, HttpSettings},
    sync::SyncEngine,
};

/// Builder that allows creating and configuring various parts of a
/// [`Session`].
///
/// # Examples
///
/// ```
/// use matrix_engine::Session;
///
/// let session = Session::builder()
///     .homeserver_url("https://example.org")
///     .user_agent("my-client/1.0")
///     .build()?;
/// # Ok::<(), matrix_engine::SessionBuildError>(())
/// ```
///
/// It is also possible to bring a custom transport:
///
/// ```no_run
/// # use std::sync::Arc;
/// # use matrix_engine::{HttpSend, Session};
/// # fn transport() -> Arc<dyn HttpSend> { unimplemented!() }
/// let session = Session::builder()
///     .homeserver_url("https://example.org")
///     .http_client(transport())
///     .build()?;
/// # Ok::<(), matrix_engine::SessionBuildError>(())
/// ```
#[must_use]
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    homeserver_url: Option<String>,
    http_cfg: Option<HttpConfig>,
    request_config: RequestConfig,
    sync_retry_policy: SyncRetryPolicy,
    crypto_provider: Option<Arc<dyn CryptoProvider>>,
    one_time_key_capacity: usize,
}

impl SessionBuilder {
    pub(crate) fn new() -> Self {
        Self {
            homeserver_url: None,
            http_cfg: None,
            request_config: Default::default(),
            sync_retry_policy: Default::default(),
            crypto_provider: None,
            one_time_key_capacity: DEFAULT_ONE_TIME_KEY_CAPACITY,
        }
    }

    /// Set the homeserver URL to use.
    pub fn homeserver_url(mut self, url: impl AsRef<str>) -> Self {
        self.homeserver_url = Some(url.as_ref().to_owned());
        self
    }

    /// Set the default timeout of all requests.
    pub fn request_config(mut self, request_config: RequestConfig) -> Self {
        self.request_config = request_config;
        self
    }

    /// Set how the sync loop retries failed requests.
    pub fn sync_retry_policy(mut self, policy: SyncRetryPolicy) -> Self {
        self.sync_retry_policy = policy;
        self
    }

    /// Set the proxy through which all the HTTP requests should go.
    ///
    /// Note, only HTTP proxies are supported.
    ///
    /// # Arguments
    ///
    /// * `proxy` - The HTTP URL of the proxy.
    pub fn proxy(mut self, proxy: impl AsRef<str>) -> Self {
        self.http_settings().proxy = Some(proxy.as_ref().to_owned());
        self
    }

    /// Disable SSL verification for the HTTP requests.
    pub fn disable_ssl_verification(mut self) -> Self {
        self.http_settings().disable_ssl_verification = true;
        self
    }

    /// Set a custom HTTP user agent for the session.
    pub fn user_agent(mut self, user_agent: impl AsRef<str>) -> Self {
        self.http_settings().user_agent = Some(user_agent.as_ref().to_owned());
        self
    }

    /// Specify the transport that sends requests and receives responses.
    ///
    /// This method is mutually exclusive with
    /// [`proxy()`][SessionBuilder::proxy],
    /// [`disable_ssl_verification`][SessionBuilder::disable_ssl_verification]
    /// and [`user_agent()`][SessionBuilder::user_agent].
    pub fn http_client(mut self, client: Arc<dyn HttpSend>) -> Self {
        self.http_cfg = Some(HttpConfig::Custom(client));
        self
    }

    /// Set the primitives the key store of the device uses.
    ///
    /// Defaults to [`VodozemacProvider`].
    pub fn crypto_provider(mut self, provider: Arc<dyn CryptoProvider>) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Set how many one-time keys the device may hold at once.
    pub fn one_time_key_capacity(mut self, capacity: usize) -> Self {
        self.one_time_key_capacity = capacity;
        self
    }

    fn http_settings(&mut self) -> &mut HttpSettings {
        self.http_cfg.get_or_insert_with(Default::default).settings()
    }

    /// Create a [`Session`] with the options set on this builder.
    ///
    /// # Errors
    ///
    /// This method can fail for two general reasons:
    ///
    /// * Invalid input: a missing or invalid homeserver URL.
    /// * The HTTP client couldn't be configured, for example because of an
    ///   invalid proxy URL.
    pub fn build(self) -> Result<Session, SessionBuildError> {
        let homeserver_url = self.homeserver_url.ok_or(SessionBuildError::MissingHomeserver)?;
        let homeserver = Url::parse(&homeserver_url)?;

        debug!(homeserver = homeserver.as_str(), "Building the session");

        let http_client: Arc<dyn HttpSend> = match self.http_cfg.unwrap_or_default() {
            HttpConfig::Settings(mut settings) => {
                settings.timeout = self.request_config.timeout;
                Arc::new(settings.make_client()?)
            }
            HttpConfig::Custom(client) => client,
        };

        let dispatcher =
            Dispatcher::new(homeserver, HttpClient::new(http_client, self.request_config));
        let identity = IdentityHandle::default();
        let sync = SyncEngine::new(dispatcher.clone(), identity.clone(), self.sync_retry_policy);

        let crypto_provider =
            self.crypto_provider.unwrap_or_else(|| Arc::new(VodozemacProvider::new()));

        Ok(Session {
            inner: Arc::new(SessionInner {
                dispatcher,
                identity,
                sync,
                key_manager: Default::default(),
                crypto_provider,
                one_time_key_capacity: self.one_time_key_capacity,
            }),
        })
    }
}

#[derive(Clone)]
enum HttpConfig {
    Settings(HttpSettings),
    Custom(Arc<dyn HttpSend>),
}

impl HttpConfig {
    fn settings(&mut self) -> &mut HttpSettings {
        if let Self::Custom(_) = self {
            *self = Self::default();
        }

        match self {
            Self::Settings(s) => s,
            Self::Custom(_) => unreachable!(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self::Settings(HttpSettings::default())
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for HttpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Settings(settings) => f.debug_tuple("Settings").field(settings).finish(),
            Self::Custom(client) => f.debug_tuple("Custom").field(client).finish(),
        }
    }
}
