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

//! Correlation of in-flight requests with their continuations.
//!
//! Every request handed to the [`Dispatcher`] becomes a pending call that is
//! resolved exactly once: by the response of the server, by a transport
//! error, by its deadline passing or by an explicit cancellation, whichever
//! happens first. Every later outcome for the same call is dropped.

use std::{
    any::type_name,
    borrow::Cow,
    collections::BTreeMap,
    fmt::{self, Debug},
    sync::{Arc, Mutex},
};

use bytes::Bytes;
use matrix_engine_common::{
    executor::{spawn, AbortHandle},
    timeout::timeout_at,
};
use ruma::api::{
    auth_scheme::{AuthScheme, SendAccessToken},
    error::FromHttpResponseError,
    path_builder::PathBuilder,
    IncomingResponse, OutgoingRequest, SupportedVersions,
};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, field::display, instrument, trace, Instrument, Span};
use url::Url;

use crate::{
    config::RequestConfig,
    error::{HttpError, HttpResult},
    http_client::{HttpClient, RequestId},
};

type Completion = Box<dyn FnOnce(HttpResult<http::Response<Bytes>>) + Send>;

struct PendingCall {
    endpoint: &'static str,
    deadline: Instant,
    completion: Completion,
    task: Option<AbortHandle>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("endpoint", &self.endpoint)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct DispatcherInner {
    homeserver: Url,
    http_client: HttpClient,
    pending: Mutex<BTreeMap<RequestId, PendingCall>>,
}

impl DispatcherInner {
    /// Resolve a pending call with the given outcome.
    ///
    /// Returns `false` if the call was already resolved, in which case the
    /// outcome is dropped.
    fn complete(&self, request_id: RequestId, result: HttpResult<http::Response<Bytes>>) -> bool {
        // The continuation runs outside of the lock so it can submit or
        // cancel other requests.
        let call = self.pending.lock().unwrap().remove(&request_id);

        match call {
            Some(call) => {
                match &result {
                    Ok(response) => debug!(
                        request_id = %request_id,
                        endpoint = call.endpoint,
                        status = response.status().as_u16(),
                        response_size = response.body().len(),
                        "Got response"
                    ),
                    Err(error) => debug!(
                        request_id = %request_id,
                        endpoint = call.endpoint,
                        "Request failed: {error}"
                    ),
                }

                (call.completion)(result);
                true
            }
            None => {
                trace!(request_id = %request_id, "Dropping the outcome of a resolved request");
                false
            }
        }
    }
}

/// Sends requests to the homeserver and hands each outcome to the
/// continuation that was registered with the request.
///
/// The dispatcher never retries and gives no ordering guarantees across
/// requests, responses are delivered in the order they arrive.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("homeserver", &self.inner.homeserver.as_str())
            .field("pending", &self.inner.pending.lock().unwrap().len())
            .finish()
    }
}

impl Dispatcher {
    pub(crate) fn new(homeserver: Url, http_client: HttpClient) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                homeserver,
                http_client,
                pending: Default::default(),
            }),
        }
    }

    /// The homeserver requests are sent to.
    pub fn homeserver(&self) -> &Url {
        &self.inner.homeserver
    }

    /// The configuration used for requests that don't bring their own.
    pub fn request_config(&self) -> RequestConfig {
        self.inner.http_client.request_config
    }

    /// Send a request without waiting for its outcome.
    ///
    /// The continuation is called exactly once, from a spawned task, with the
    /// decoded response or the error that ended the request. That includes
    /// errors that happen before anything was sent, like a missing access
    /// token.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `request` - The request to send.
    ///
    /// * `access_token` - The access token to authenticate the request with,
    ///   read once at submission time.
    ///
    /// * `config` - Overrides the default [`RequestConfig`]. The timeout is
    ///   measured from this call on.
    ///
    /// * `continuation` - Receives the outcome of the request.
    #[instrument(skip_all, fields(request_type = type_name::<R>(), request_id))]
    pub fn submit<R, F>(
        &self,
        request: R,
        access_token: Option<&str>,
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
        let config = config.unwrap_or(self.inner.http_client.request_config);
        let request_id = self.inner.http_client.get_request_id();

        let span = Span::current();
        span.record("request_id", display(request_id));

        let http_request = self.inner.http_client.serialize_request(
            request,
            config,
            &self.inner.homeserver,
            access_token,
        );

        let deadline = Instant::now() + config.timeout;
        let completion: Completion = Box::new(move |result| {
            continuation(result.and_then(|response| {
                R::IncomingResponse::try_from_http_response(response).map_err(HttpError::from)
            }));
        });

        self.inner.pending.lock().unwrap().insert(
            request_id,
            PendingCall { endpoint: type_name::<R>(), deadline, completion, task: None },
        );

        let inner = self.inner.clone();
        let task = spawn(
            async move {
                let result = match http_request {
                    Ok(http_request) => {
                        debug!(
                            method = %http_request.method(),
                            uri = %http_request.uri().path(),
                            request_size = http_request.body().len(),
                            "Sending request"
                        );

                        let transport = inner.http_client.inner.clone();
                        timeout_at(deadline, transport.send_request(http_request, config.timeout))
                            .await
                            .unwrap_or(Err(HttpError::Timeout))
                    }
                    Err(error) => Err(error),
                };

                inner.complete(request_id, result);
            }
            .instrument(span),
        );

        if let Some(call) = self.inner.pending.lock().unwrap().get_mut(&request_id) {
            call.task = Some(task.abort_handle());
        }

        request_id
    }

    /// Send a request and wait for its outcome.
    ///
    /// Dropping the returned future cancels the request.
    pub async fn send<R>(
        &self,
        request: R,
        access_token: Option<&str>,
        config: Option<RequestConfig>,
    ) -> HttpResult<R::IncomingResponse>
    where
        R: OutgoingRequest + Debug,
        for<'a> R::Authentication: AuthScheme<Input<'a> = SendAccessToken<'a>>,
        for<'a> R::PathBuilder: PathBuilder<Input<'a> = Cow<'a, SupportedVersions>>,
        HttpError: From<FromHttpResponseError<R::EndpointError>>,
        R::IncomingResponse: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let request_id = self.submit(request, access_token, config, move |result| {
            // The receiver is gone if the caller stopped waiting.
            let _ = sender.send(result);
        });

        let guard = CancelOnDrop { dispatcher: self, request_id: Some(request_id) };
        let result = receiver.await.unwrap_or(Err(HttpError::Cancelled));
        guard.defuse();

        result
    }

    /// Cancel a pending request.
    ///
    /// The continuation of the request is called with
    /// [`HttpError::Cancelled`]. Returns `false`, and does nothing, if the
    /// request was already resolved.
    pub fn cancel(&self, request_id: RequestId) -> bool {
        let Some(call) = self.inner.pending.lock().unwrap().remove(&request_id) else {
            trace!(request_id = %request_id, "Not cancelling an already resolved request");
            return false;
        };

        debug!(request_id = %request_id, endpoint = call.endpoint, "Cancelling request");

        if let Some(task) = &call.task {
            task.abort();
        }

        (call.completion)(Err(HttpError::Cancelled));
        true
    }

    /// Cancel every pending request.
    pub fn cancel_all(&self) {
        let calls = std::mem::take(&mut *self.inner.pending.lock().unwrap());

        if !calls.is_empty() {
            debug!(count = calls.len(), "Cancelling all pending requests");
        }

        for (_, call) in calls {
            if let Some(task) = &call.task {
                task.abort();
            }

            (call.completion)(Err(HttpError::Cancelled));
        }
    }

    /// The requests that haven't been resolved yet, in submission order.
    pub fn pending_requests(&self) -> Vec<RequestId> {
        self.inner.pending.lock().unwrap().keys().copied().collect()
    }
}

struct CancelOnDrop<'a> {
    dispatcher: &'a Dispatcher,
    request_id: Option<RequestId>,
}

impl CancelOnDrop<'_> {
    fn defuse(mut self) {
        self.request_id = None;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(request_id) = self.request_id.take() {
            self.dispatcher.cancel(request_id);
        }
    }
}
