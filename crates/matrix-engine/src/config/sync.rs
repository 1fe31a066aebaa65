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

use std::{fmt, time::Duration};

use backoff::{backoff::Backoff, ExponentialBackoff};
use matrix_engine_common::debug::DebugStructExt;
use ruma::{api::client::sync::sync_events, presence::PresenceState};

const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Token to be used in the next sync request.
#[derive(Clone, Default, Debug)]
pub enum SyncToken {
    /// Provide a specific token.
    Specific(String),
    /// Enforce no tokens at all, the server will send a full snapshot.
    NoToken,
    /// Use a previous token if the session saw one in the past, and none
    /// otherwise.
    ///
    /// This is the default value.
    #[default]
    ReusePrevious,
}

impl<T> From<T> for SyncToken
where
    T: Into<String>,
{
    fn from(token: T) -> SyncToken {
        SyncToken::Specific(token.into())
    }
}

/// Settings for a sync call.
#[derive(Clone)]
pub struct SyncSettings {
    // Filter is pretty big at 1000 bytes, box it to reduce stack size
    pub(crate) filter: Option<Box<sync_events::v3::Filter>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) ignore_timeout_on_first_sync: bool,
    pub(crate) token: SyncToken,
    pub(crate) full_state: bool,
    pub(crate) set_presence: PresenceState,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for SyncSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            filter,
            timeout,
            ignore_timeout_on_first_sync,
            token: _,
            full_state,
            set_presence,
        } = self;
        f.debug_struct("SyncSettings")
            .maybe_field("filter", filter)
            .maybe_field("timeout", timeout)
            .field("ignore_timeout_on_first_sync", ignore_timeout_on_first_sync)
            .field("full_state", full_state)
            .field("set_presence", set_presence)
            .finish()
    }
}

impl SyncSettings {
    /// Create new default sync settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filter: None,
            timeout: Some(DEFAULT_SYNC_TIMEOUT),
            ignore_timeout_on_first_sync: false,
            token: SyncToken::default(),
            full_state: false,
            set_presence: PresenceState::Online,
        }
    }

    /// Set the sync token.
    ///
    /// # Arguments
    ///
    /// * `token` - The sync token that should be used for the sync call.
    #[must_use]
    pub fn token(mut self, token: impl Into<SyncToken>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the maximum time the server can wait before responding to the sync
    /// request.
    ///
    /// # Arguments
    ///
    /// * `timeout` - The time the server is allowed to wait.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether to ignore the `timeout` the first time that the `/sync` endpoint
    /// is called.
    ///
    /// If there is no new data to show, the server will wait until the end of
    /// `timeout` before returning a response. By not setting a `timeout` on
    /// the first request the homeserver replies immediately, whether the
    /// response is empty or not.
    #[must_use]
    pub fn ignore_timeout_on_first_sync(mut self, ignore: bool) -> Self {
        self.ignore_timeout_on_first_sync = ignore;
        self
    }

    /// Set the sync filter.
    /// It can be either the filter ID, or the definition for the filter.
    #[must_use]
    pub fn filter(mut self, filter: sync_events::v3::Filter) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// Should the server return the full state from the start of the timeline.
    ///
    /// This does nothing if no sync token is set.
    #[must_use]
    pub fn full_state(mut self, full_state: bool) -> Self {
        self.full_state = full_state;
        self
    }

    /// Set the presence state
    #[must_use]
    pub fn set_presence(mut self, presence: PresenceState) -> Self {
        self.set_presence = presence;
        self
    }
}

/// How the sync loop reacts to transient failures.
///
/// A failed long-poll is sent again with the same cursor after an
/// exponentially growing delay. If the server tells us how long to wait, its
/// value is used instead. After `max_retries` consecutive failures the loop
/// stops and reports the last error.
///
/// # Examples
///
/// ```
/// use matrix_engine::config::SyncRetryPolicy;
/// use std::time::Duration;
///
/// let policy = SyncRetryPolicy::new()
///     .max_retries(10)
///     .initial_interval(Duration::from_secs(1))
///     .max_interval(Duration::from_secs(60));
/// ```
#[derive(Clone, Copy, Debug)]
pub struct SyncRetryPolicy {
    pub(crate) max_retries: u32,
    pub(crate) initial_interval: Duration,
    pub(crate) max_interval: Duration,
    pub(crate) multiplier: f64,
    pub(crate) randomization_factor: f64,
}

impl Default for SyncRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            randomization_factor: 0.5,
        }
    }
}

impl SyncRetryPolicy {
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Report the first failure instead of retrying.
    #[must_use]
    pub fn disable_retry(mut self) -> Self {
        self.max_retries = 0;
        self
    }

    /// How many consecutive failures are retried before the loop gives up.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The delay before the first retry.
    #[must_use]
    pub fn initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// The upper bound of the delay between two retries.
    #[must_use]
    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// The factor the delay grows by after every failure.
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// How much random jitter is applied to every delay, `0.0` disables it.
    #[must_use]
    pub fn randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();

        backoff
    }
}
