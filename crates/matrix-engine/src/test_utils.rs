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

//! Testing utilities, only available in `#[cfg(test)]`.

use std::{
    future,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{header::AUTHORIZATION, StatusCode};
use matrix_engine_common::sleep::sleep;
use ruma::{device_id, user_id};
use serde_json::{json, Value as JsonValue};
use url::Url;

use crate::{
    config::SyncRetryPolicy, error::HttpError, HttpSend, Identity, Session, SessionBuilder,
};

/// What the [`MockTransport`] does with a request.
#[derive(Clone, Debug)]
pub(crate) enum MockReply {
    /// Answer with a JSON body, optionally after a delay.
    Json { status: StatusCode, body: JsonValue, delay: Duration },
    /// Fail as if the connection broke.
    ConnectionLost,
    /// Never answer.
    Hang,
}

impl MockReply {
    pub(crate) fn ok(body: &JsonValue) -> Self {
        Self::Json { status: StatusCode::OK, body: body.clone(), delay: Duration::ZERO }
    }

    pub(crate) fn error(status: u16, body: &JsonValue) -> Self {
        Self::Json {
            status: StatusCode::from_u16(status).expect("The status code should be valid"),
            body: body.clone(),
            delay: Duration::ZERO,
        }
    }

    /// Answer only after `delay` passed.
    pub(crate) fn delayed(self, delay: Duration) -> Self {
        match self {
            Self::Json { status, body, .. } => Self::Json { status, body, delay },
            other => other,
        }
    }
}

/// A request the [`MockTransport`] received.
#[derive(Clone, Debug)]
pub(crate) struct RecordedRequest {
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) access_token: Option<String>,
    pub(crate) body: Bytes,
}

impl RecordedRequest {
    /// The value of a query parameter.
    pub(crate) fn query_param(&self, name: &str) -> Option<String> {
        let url = Url::parse(&format!("http://localhost/?{}", self.query.as_deref()?)).ok()?;
        url.query_pairs().find(|(key, _)| key == name).map(|(_, value)| value.into_owned())
    }

    pub(crate) fn json_body(&self) -> JsonValue {
        serde_json::from_slice(&self.body).expect("The request body should be JSON")
    }
}

#[derive(Debug, Default)]
struct MockTransportState {
    queued: Vec<(String, MockReply)>,
    persistent: Vec<(String, MockReply)>,
    requests: Vec<RecordedRequest>,
}

/// A transport that answers requests from a script instead of a network.
///
/// Replies are matched by the suffix of the request path, ignoring a trailing
/// slash on either side. Queued replies are
/// used once, in order, persistent replies answer every request that no
/// queued reply matched. Everything else gets a `404`.
#[derive(Clone, Debug, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer the next request to `path` with `reply`.
    pub(crate) fn queue(&self, path: &str, reply: MockReply) -> &Self {
        self.state.lock().unwrap().queued.push((path.to_owned(), reply));
        self
    }

    /// Answer every request to `path` that has no queued reply with `reply`.
    pub(crate) fn respond_always(&self, path: &str, reply: MockReply) -> &Self {
        self.state.lock().unwrap().persistent.push((path.to_owned(), reply));
        self
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// The requests that were sent to `path`.
    pub(crate) fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| path_matches(&r.path, path)).collect()
    }

    fn next_reply(&self, request: &http::Request<Bytes>) -> Option<MockReply> {
        let mut state = self.state.lock().unwrap();
        let path = request.uri().path().to_owned();

        state.requests.push(RecordedRequest {
            path: path.clone(),
            query: request.uri().query().map(ToOwned::to_owned),
            access_token: request
                .headers()
                .get(AUTHORIZATION)
                .and_then(|h| h.to_str().ok())
                .and_then(|h| h.strip_prefix("Bearer "))
                .map(ToOwned::to_owned),
            body: request.body().clone(),
        });

        if let Some(position) = state.queued.iter().position(|(p, _)| path_matches(&path, p)) {
            return Some(state.queued.remove(position).1);
        }

        state
            .persistent
            .iter()
            .find(|(p, _)| path_matches(&path, p))
            .map(|(_, reply)| reply.clone())
    }
}

fn path_matches(path: &str, suffix: &str) -> bool {
    path.trim_end_matches('/').ends_with(suffix.trim_end_matches('/'))
}

#[async_trait]
impl HttpSend for MockTransport {
    async fn send_request(
        &self,
        request: http::Request<Bytes>,
        _timeout: Duration,
    ) -> Result<http::Response<Bytes>, HttpError> {
        let reply = self.next_reply(&request).unwrap_or_else(|| {
            MockReply::error(404, &json!({ "errcode": "M_UNRECOGNIZED", "error": "Unrecognized" }))
        });

        match reply {
            MockReply::Json { status, body, delay } => {
                if !delay.is_zero() {
                    sleep(delay).await;
                }

                Ok(http::Response::builder()
                    .status(status)
                    .body(Bytes::from(body.to_string()))
                    .expect("The mocked response should be valid"))
            }
            MockReply::ConnectionLost => {
                Err(HttpError::ConnectionLost("connection reset by peer".to_owned()))
            }
            MockReply::Hang => future::pending().await,
        }
    }
}

/// A [`SessionBuilder`] talking to the given transport, with deterministic
/// retry delays.
pub(crate) fn test_session_builder(transport: &MockTransport) -> SessionBuilder {
    let homeserver = Url::parse("http://localhost").expect("The homeserver URL should be valid");

    Session::builder()
        .homeserver_url(homeserver)
        .http_client(Arc::new(transport.clone()))
        .sync_retry_policy(SyncRetryPolicy::new().randomization_factor(0.0))
}

/// A session that is already logged in as `@example:localhost`.
pub(crate) fn logged_in_session(transport: &MockTransport) -> Session {
    let session = test_session_builder(transport).build().expect("The session should build");

    session
        .restore_session(Identity::new(
            user_id!("@example:localhost").to_owned(),
            device_id!("DEVICEID").to_owned(),
            "1234".to_owned(),
        ))
        .expect("Restoring the session should succeed");

    session
}
