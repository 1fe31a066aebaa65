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
    any::type_name,
    borrow::Cow,
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use matrix_engine_common::AsyncTraitDeps;
use ruma::api::{
    auth_scheme::{AuthScheme, SendAccessToken},
    path_builder::PathBuilder,
    MatrixVersion, OutgoingRequest, SupportedVersions,
};
use tracing::trace;
use url::Url;

use crate::{config::RequestConfig, error::HttpError};

mod native;

pub(crate) use native::HttpSettings;

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstraction around the http layer. The allows implementors to use different
/// http libraries.
#[async_trait]
pub trait HttpSend: AsyncTraitDeps {
    /// The method abstracting sending request types and receiving response
    /// types.
    ///
    /// This is called by the dispatcher every time it wants to send anything
    /// to a homeserver. Any response the server produced, including error
    /// responses, has to be returned as `Ok`, an `Err` means no response
    /// arrived.
    ///
    /// # Arguments
    ///
    /// * `request` - The http request that has been converted from a ruma
    ///   [`OutgoingRequest`].
    ///
    /// * `timeout` - A timeout for the full request > response cycle.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use matrix_engine::{async_trait, bytes::Bytes, HttpError, HttpSend};
    ///
    /// #[derive(Debug)]
    /// struct Client(reqwest::Client);
    ///
    /// impl Client {
    ///     async fn response_to_http_response(
    ///         &self,
    ///         mut response: reqwest::Response,
    ///     ) -> Result<http::Response<Bytes>, HttpError> {
    ///         // Convert the reqwest response to a http one.
    ///         todo!()
    ///     }
    /// }
    ///
    /// #[async_trait]
    /// impl HttpSend for Client {
    ///     async fn send_request(
    ///         &self,
    ///         request: http::Request<Bytes>,
    ///         timeout: Duration,
    ///     ) -> Result<http::Response<Bytes>, HttpError> {
    ///         Ok(self
    ///             .response_to_http_response(
    ///                 self.0
    ///                     .execute(reqwest::Request::try_from(request)?)
    ///                     .await?,
    ///             )
    ///             .await?)
    ///     }
    /// }
    /// ```
    async fn send_request(
        &self,
        request: http::Request<Bytes>,
        timeout: Duration,
    ) -> Result<http::Response<Bytes>, HttpError>;
}

/// Identifier of a request that was handed to the [`Dispatcher`].
///
/// [`Dispatcher`]: crate::Dispatcher
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "REQ-{}", self.0)
    }
}

#[derive(Debug)]
pub(crate) struct HttpClient {
    pub(crate) inner: Arc<dyn HttpSend>,
    pub(crate) request_config: RequestConfig,
    /// Every request is sent to the stable `v3` endpoints.
    supported_versions: SupportedVersions,
    next_request_id: Arc<AtomicU64>,
}

impl HttpClient {
    pub(crate) fn new(inner: Arc<dyn HttpSend>, request_config: RequestConfig) -> Self {
        let supported_versions = SupportedVersions {
            versions: [MatrixVersion::V1_1].into_iter().collect(),
            features: Default::default(),
        };

        HttpClient {
            inner,
            request_config,
            supported_versions,
            next_request_id: AtomicU64::new(0).into(),
        }
    }

    pub(crate) fn get_request_id(&self) -> RequestId {
        RequestId(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn serialize_request<R>(
        &self,
        request: R,
        config: RequestConfig,
        homeserver: &Url,
        access_token: Option<&str>,
    ) -> Result<http::Request<Bytes>, HttpError>
    where
        R: OutgoingRequest + Debug,
        for<'a> R::Authentication: AuthScheme<Input<'a> = SendAccessToken<'a>>,
        for<'a> R::PathBuilder: PathBuilder<Input<'a> = Cow<'a, SupportedVersions>>,
    {
        trace!(request_type = type_name::<R>(), "Serializing request");

        let send_access_token = match access_token {
            Some(access_token) => {
                if config.force_auth {
                    SendAccessToken::Always(access_token)
                } else {
                    SendAccessToken::IfRequired(access_token)
                }
            }
            None => SendAccessToken::None,
        };

        let request = request
            .try_into_http_request::<BytesMut>(
                homeserver.as_str(),
                send_access_token,
                Cow::Borrowed(&self.supported_versions),
            )?
            .map(|body| body.freeze());

        Ok(request)
    }
}
