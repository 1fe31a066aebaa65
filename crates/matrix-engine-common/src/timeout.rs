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

use std::{error::Error, fmt, future::Future};

use tokio::time::Instant;

/// Error type notifying that a timeout has elapsed.
#[derive(Debug)]
pub struct ElapsedError(());

impl fmt::Display for ElapsedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timeout elapsed!")
    }
}

impl Error for ElapsedError {}

/// Wait for `future` to be completed, giving up at `deadline`.
///
/// A deadline computed at submission time is not extended by scheduling
/// delays.
pub async fn timeout_at<F, T>(deadline: Instant, future: F) -> Result<T, ElapsedError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout_at(deadline, future).await.map_err(|_| ElapsedError(()))
}
