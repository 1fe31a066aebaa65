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

//! The sync loop.
//!
//! The [`SyncEngine`] long-polls the `/sync` endpoint through the
//! [`Dispatcher`], one request at a time, and hands every batch to a handler.
//! The sync cursor moves past a batch once the handler returned.

use std::{
    fmt,
    sync::{Arc, Mutex, RwLock as StdRwLock},
};

use backoff::backoff::Backoff;
use eyeball::{SharedObservable, Subscriber};
use matrix_engine_common::{
    executor::{spawn, AbortHandle},
    sleep::sleep,
};
use ruma::{
    api::client::sync::sync_events::v3::{Request as SyncRequest, Response as SyncResponse},
    assign,
};
use tokio::sync::oneshot;
use tracing::{debug, debug_span, error, warn, Instrument};

use crate::{
    config::{SyncRetryPolicy, SyncSettings, SyncToken},
    dispatcher::Dispatcher,
    error::{Error, HttpError, HttpResult, Result},
    http_client::RequestId,
    session::IdentityHandle,
};

/// The state of the sync loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// The loop was never started.
    Idle,
    /// A sync request is in flight, or the loop waits before retrying one.
    Polling,
    /// The handler is processing a batch.
    Delivering,
    /// The loop was stopped, by [`SyncEngine::stop()`], by the handler or
    /// by a fatal error. It doesn't restart on its own.
    Stopped,
}

/// Tell the sync loop whether to keep going after a batch was handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopCtrl {
    Continue,
    Break,
}

#[derive(Debug, Default)]
struct RunState {
    /// Bumped on every start, a loop only acts while its generation is the
    /// current one.
    generation: u64,
    in_flight: Option<RequestId>,
    task: Option<AbortHandle>,
    one_shot: bool,
}

struct SyncEngineInner {
    dispatcher: Dispatcher,
    identity: IdentityHandle,
    retry_policy: SyncRetryPolicy,
    state: SharedObservable<SyncState>,
    cursor: StdRwLock<Option<String>>,
    /// Every state transition happens while this lock is held.
    run: Mutex<RunState>,
}

impl SyncEngineInner {
    fn is_running(&self) -> bool {
        matches!(self.state.get(), SyncState::Polling | SyncState::Delivering)
    }

    fn set_state(&self, state: SyncState) {
        if self.state.set_if_not_eq(state).is_some() {
            debug!(?state, "Sync state changed");
        }
    }

    fn apply_token(&self, token: &SyncToken) {
        match token {
            SyncToken::Specific(token) => *self.cursor.write().unwrap() = Some(token.clone()),
            SyncToken::NoToken => *self.cursor.write().unwrap() = None,
            SyncToken::ReusePrevious => {}
        }
    }

    fn sync_request(&self, settings: &SyncSettings, first: bool) -> SyncRequest {
        assign!(SyncRequest::new(), {
            filter: settings.filter.as_deref().cloned(),
            since: self.cursor.read().unwrap().clone(),
            full_state: settings.full_state,
            set_presence: settings.set_presence.clone(),
            timeout: if first && settings.ignore_timeout_on_first_sync {
                None
            } else {
                settings.timeout
            },
        })
    }

    /// Send the next sync request of the loop with the given generation.
    ///
    /// Returns `None` if the loop was stopped or replaced in the meantime.
    fn submit_poll(
        &self,
        generation: u64,
        settings: &SyncSettings,
        first: bool,
    ) -> Option<oneshot::Receiver<HttpResult<SyncResponse>>> {
        let mut run = self.run.lock().unwrap();

        if run.generation != generation || self.state.get() != SyncState::Polling {
            return None;
        }

        let request = self.sync_request(settings, first);

        // The server holds the request open for up to `timeout`, on top of
        // the usual time a request may take.
        let config = self.dispatcher.request_config();
        let config = config.timeout(config.timeout + request.timeout.unwrap_or_default());

        let (sender, receiver) = oneshot::channel();
        let access_token = self.identity.access_token();
        let request_id =
            self.dispatcher.submit(request, access_token.as_deref(), Some(config), move |r| {
                // The receiver is gone if the loop was aborted.
                let _ = sender.send(r);
            });

        run.in_flight = Some(request_id);
        Some(receiver)
    }

    /// Move from `Polling` to `Delivering`.
    ///
    /// Returns `false` if the loop was stopped or replaced, the outcome must
    /// not be delivered then.
    fn begin_delivery(&self, generation: u64) -> bool {
        let mut run = self.run.lock().unwrap();

        if run.generation != generation || self.state.get() != SyncState::Polling {
            return false;
        }

        run.in_flight = None;
        self.set_state(SyncState::Delivering);
        true
    }

    /// Move the cursor past a batch the handler processed.
    ///
    /// A loop that was stopped while its handler ran still records the
    /// batch, a loop that was replaced by a newer one doesn't.
    fn advance_cursor(&self, generation: u64, next_batch: String) {
        let run = self.run.lock().unwrap();

        if run.generation == generation {
            *self.cursor.write().unwrap() = Some(next_batch);
        }
    }

    fn end_delivery(&self, generation: u64) -> bool {
        let run = self.run.lock().unwrap();

        if run.generation != generation || self.state.get() != SyncState::Delivering {
            return false;
        }

        self.set_state(SyncState::Polling);
        true
    }

    fn clear_in_flight(&self, generation: u64) {
        let mut run = self.run.lock().unwrap();

        if run.generation == generation {
            run.in_flight = None;
        }
    }

    fn finish(&self, generation: u64) {
        let mut run = self.run.lock().unwrap();

        if run.generation == generation {
            run.in_flight = None;
            run.task = None;
            self.set_state(SyncState::Stopped);
        }
    }

    async fn run_loop<H>(self: Arc<Self>, generation: u64, settings: SyncSettings, mut handler: H)
    where
        H: FnMut(Result<SyncResponse>) -> LoopCtrl + Send + 'static,
    {
        let mut backoff = self.retry_policy.backoff();
        let mut failures = 0;
        let mut first = true;

        loop {
            let Some(receiver) = self.submit_poll(generation, &settings, first) else {
                return;
            };

            let result = receiver.await.unwrap_or(Err(HttpError::Cancelled));

            match result {
                Ok(response) => {
                    failures = 0;
                    first = false;
                    backoff.reset();

                    if !self.begin_delivery(generation) {
                        return;
                    }

                    let next_batch = response.next_batch.clone();
                    let control = handler(Ok(response));
                    self.advance_cursor(generation, next_batch);

                    match control {
                        LoopCtrl::Continue => {
                            if !self.end_delivery(generation) {
                                return;
                            }
                        }
                        LoopCtrl::Break => {
                            debug!("The sync handler asked to stop the loop");
                            self.finish(generation);
                            return;
                        }
                    }
                }

                Err(HttpError::Cancelled) => {
                    debug!("The sync request was cancelled");
                    self.finish(generation);
                    return;
                }

                Err(error) if error.is_transient() && failures < self.retry_policy.max_retries => {
                    self.clear_in_flight(generation);
                    failures += 1;

                    let delay = error
                        .retry_after()
                        .or_else(|| backoff.next_backoff())
                        .unwrap_or(self.retry_policy.max_interval);

                    warn!(
                        attempt = failures,
                        max_retries = self.retry_policy.max_retries,
                        "Sync failed, retrying in {delay:?}: {error}"
                    );

                    sleep(delay).await;
                }

                Err(error) => {
                    error!(failures, "Sync failed, stopping the loop: {error}");

                    if self.begin_delivery(generation) {
                        handler(Err(error.into()));
                    }

                    self.finish(generation);
                    return;
                }
            }
        }
    }
}

/// Drives the sync loop and owns the sync cursor.
///
/// At most one sync request is in flight per engine. Other requests going
/// through the same [`Dispatcher`] are not affected by the loop.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<SyncEngineInner>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.inner.state.get())
            .field("cursor", &self.inner.cursor.read().unwrap())
            .field("retry_policy", &self.inner.retry_policy)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub(crate) fn new(
        dispatcher: Dispatcher,
        identity: IdentityHandle,
        retry_policy: SyncRetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SyncEngineInner {
                dispatcher,
                identity,
                retry_policy,
                state: SharedObservable::new(SyncState::Idle),
                cursor: Default::default(),
                run: Default::default(),
            }),
        }
    }

    /// Start the sync loop.
    ///
    /// The loop runs on a spawned task. Every batch is handed to `handler`,
    /// once it returns the cursor moves past the batch and the return value
    /// decides whether the loop continues. Transient failures are retried
    /// with the same cursor according to the [`SyncRetryPolicy`], once the
    /// retries are exhausted, or on any other failure, the handler is called
    /// with the error and the loop stops.
    ///
    /// The token of `settings` decides where the loop starts: a specific
    /// token replaces the cursor, [`SyncToken::NoToken`] clears it to ask for
    /// a full snapshot and [`SyncToken::ReusePrevious`] keeps it.
    ///
    /// A stopped loop can be started again.
    ///
    /// # Errors
    ///
    /// [`Error::SyncAlreadyRunning`] if the loop or a [`sync_once()`] call
    /// is already running.
    ///
    /// [`sync_once()`]: Self::sync_once
    pub fn start<H>(&self, settings: SyncSettings, handler: H) -> Result<()>
    where
        H: FnMut(Result<SyncResponse>) -> LoopCtrl + Send + 'static,
    {
        let mut run = self.inner.run.lock().unwrap();

        if self.inner.is_running() || run.one_shot {
            return Err(Error::SyncAlreadyRunning);
        }

        self.inner.apply_token(&settings.token);

        run.generation += 1;
        let generation = run.generation;

        debug!(generation, ?settings, "Starting the sync loop");
        self.inner.set_state(SyncState::Polling);

        let task = spawn(
            self.inner
                .clone()
                .run_loop(generation, settings, handler)
                .instrument(debug_span!("sync_loop", generation)),
        );
        run.task = Some(task.abort_handle());

        Ok(())
    }

    /// Stop the sync loop.
    ///
    /// The in-flight sync request is cancelled and the handler won't be
    /// called again once this returns, unless it is running right now.
    pub fn stop(&self) {
        let (task, in_flight) = {
            let mut run = self.inner.run.lock().unwrap();
            self.inner.set_state(SyncState::Stopped);
            (run.task.take(), run.in_flight.take())
        };

        if let Some(task) = task {
            debug!("Stopping the sync loop");
            task.abort();
        }

        if let Some(request_id) = in_flight {
            self.inner.dispatcher.cancel(request_id);
        }
    }

    /// Send a single sync request outside of the loop, advancing the cursor
    /// on success.
    ///
    /// Nothing is retried.
    pub async fn sync_once(&self, settings: SyncSettings) -> Result<SyncResponse> {
        let guard = {
            let mut run = self.inner.run.lock().unwrap();

            if self.inner.is_running() || run.one_shot {
                return Err(Error::SyncAlreadyRunning);
            }

            run.one_shot = true;
            self.inner.apply_token(&settings.token);

            OneShotGuard(&self.inner)
        };

        let request = self.inner.sync_request(&settings, true);
        let mut config = self.inner.dispatcher.request_config();
        config = config.timeout(config.timeout + request.timeout.unwrap_or_default());
        let access_token = self.inner.identity.access_token();

        let response =
            self.inner.dispatcher.send(request, access_token.as_deref(), Some(config)).await?;

        *self.inner.cursor.write().unwrap() = Some(response.next_batch.clone());
        drop(guard);

        Ok(response)
    }

    /// The current state of the loop.
    pub fn state(&self) -> SyncState {
        self.inner.state.get()
    }

    /// Get notified about changes of the loop state.
    pub fn subscribe_state(&self) -> Subscriber<SyncState> {
        self.inner.state.subscribe()
    }

    /// The cursor the next sync request starts from.
    pub fn cursor(&self) -> Option<String> {
        self.inner.cursor.read().unwrap().clone()
    }

    /// Replace the cursor, `None` asks for a full snapshot with the next
    /// request.
    pub fn set_cursor(&self, cursor: Option<String>) {
        *self.inner.cursor.write().unwrap() = cursor;
    }
}

struct OneShotGuard<'a>(&'a SyncEngineInner);

impl Drop for OneShotGuard<'_> {
    fn drop(&mut self) {
        self.0.run.lock().unwrap().one_shot = false;
    }
}
