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

use std::{
    fmt::{self, Debug},
    time::Duration,
};

use crate::http_client::DEFAULT_REQUEST_TIMEOUT;

/// Configuration for a single request the [`Dispatcher`] sends.
///
/// The dispatcher never retries on its own, a request completes exactly once
/// with either a response or an error. Retrying is up to the caller, the sync
/// loop does it according to its [`SyncRetryPolicy`].
///
/// # Examples
///
/// ```
/// use matrix_engine::config::RequestConfig;
/// use std::time::Duration;
///
/// let request_config = RequestConfig::new()
///     .timeout(Duration::from_secs(10))
///     .force_auth();
/// ```
///
/// [`Dispatcher`]: crate::Dispatcher
/// [`SyncRetryPolicy`]: crate::config::SyncRetryPolicy
#[derive(Copy, Clone)]
pub struct RequestConfig {
    pub(crate) timeout: Duration,
    pub(crate) force_auth: bool,
}

#[cfg(not(tarpaulin_include))]
impl Debug for RequestConfig {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { timeout, force_auth } = self;

        let mut res = fmt.debug_struct("RequestConfig");
        res.field("timeout", timeout);

        if *force_auth {
            res.field("force_auth", &true);
        }

        res.finish()
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout: DEFAULT_REQUEST_TIMEOUT, force_auth: false }
    }
}

impl RequestConfig {
    /// Create a new default `RequestConfig`.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the timeout duration of the request, measured from the moment it
    /// was submitted.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Force sending authorization even if the endpoint does not require it.
    /// Default is only sending authorization if it is required.
    #[must_use]
    pub fn force_auth(mut self) -> Self {
        self.force_auth = true;
        self
    }
}
