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
#![doc = include_str!("../README.md")]
#![warn(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use async_trait::async_trait;
pub use bytes;
pub use matrix_engine_crypto as crypto;
pub use ruma;

pub mod config;
mod dispatcher;
mod error;
mod http_client;
mod session;
mod sync;

#[cfg(test)]
mod test_utils;

pub use dispatcher::Dispatcher;
pub use error::{Error, HttpError, HttpResult, Result, SessionBuildError};
pub use http_client::{HttpSend, RequestId};
pub use session::{Identity, Session, SessionBuilder};
pub use sync::{LoopCtrl, SyncEngine, SyncState};
