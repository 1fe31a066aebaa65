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

//! Error conditions.

use std::time::{Duration, SystemTime};

use as_variant::as_variant;
use http::StatusCode;
use matrix_engine_crypto::KeyManagerError;
use reqwest::Error as ReqwestError;
use ruma::api::{
    auth_scheme::AddRequiredTokenError,
    error::{
        ErrorBody, ErrorKind, FromHttpResponseError, IntoHttpError, LimitExceededErrorData,
        RetryAfter, StandardErrorBody,
    },
};
use thiserror::Error;
use url::ParseError as UrlParseError;

/// Result type of the matrix-engine.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Result type of a pure HTTP request.
pub type HttpResult<T> = std::result::Result<T, HttpError>;

/// An HTTP error, representing either a connection error or an error while
/// converting the raw HTTP response into a Matrix response.
#[derive(Error, Debug)]
pub enum HttpError {
    /// An error at the HTTP layer.
    #[error(transparent)]
    Reqwest(#[from] ReqwestError),

    /// The connection to the homeserver broke down before a response
    /// arrived.
    #[error("the connection to the homeserver was lost: {0}")]
    ConnectionLost(String),

    /// No response arrived before the deadline of the request.
    #[error("the request timed out")]
    Timeout,

    /// The request was cancelled before a response arrived.
    #[error("the request was cancelled")]
    Cancelled,

    /// Queried endpoint requires authentication but was called on an
    /// anonymous session.
    #[error("the queried endpoint requires authentication but was called before logging in")]
    AuthenticationRequired,

    /// The homeserver answered with an error, or with a body that couldn't
    /// be decoded.
    #[error(transparent)]
    Api(#[from] FromHttpResponseError<ruma::api::error::Error>),

    /// An error converting a request into an HTTP request.
    #[error(transparent)]
    IntoHttp(IntoHttpError),
}

impl From<IntoHttpError> for HttpError {
    fn from(error: IntoHttpError) -> Self {
        match error {
            IntoHttpError::Authentication(e)
                if matches!(
                    e.downcast_ref::<AddRequiredTokenError>(),
                    Some(AddRequiredTokenError::MissingAccessToken)
                ) =>
            {
                Self::AuthenticationRequired
            }
            error => Self::IntoHttp(error),
        }
    }
}

#[rustfmt::skip] // stop rustfmt breaking the `<code>` in docs across multiple lines
impl HttpError {
    /// If `self` is
    /// <code>[Api](Self::Api)([Server](FromHttpResponseError::Server)(e))</code>,
    /// returns `Some(e)`.
    ///
    /// Otherwise, returns `None`.
    pub fn as_client_api_error(&self) -> Option<&ruma::api::error::Error> {
        as_variant!(self, Self::Api(FromHttpResponseError::Server(e)) => e)
    }

    /// If `self` is a server error in the `errcode` + `error` format expected
    /// for client-API endpoints, returns the error kind (`errcode`).
    pub fn client_api_error_kind(&self) -> Option<&ErrorKind> {
        self.as_client_api_error().and_then(|e| e.error_kind())
    }

    /// The human readable message of a server error, if the body was in the
    /// standard format.
    pub fn client_api_error_message(&self) -> Option<&str> {
        self.as_client_api_error().and_then(|e| {
            as_variant!(&e.body, ErrorBody::Standard(StandardErrorBody { message, .. }) => message.as_str())
        })
    }

    /// How long the server asked us to wait before retrying, if it did.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.client_api_error_kind()? {
            ErrorKind::LimitExceeded(LimitExceededErrorData { retry_after: Some(RetryAfter::Delay(delay)), .. }) => Some(*delay),
            ErrorKind::LimitExceeded(LimitExceededErrorData { retry_after: Some(RetryAfter::DateTime(at)), .. }) => {
                Some(at.duration_since(SystemTime::now()).unwrap_or_default())
            }
            _ => None,
        }
    }

    /// Did the server tell us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self.client_api_error_kind(), Some(ErrorKind::LimitExceeded(_)))
            || self
                .as_client_api_error()
                .is_some_and(|e| e.status_code == StatusCode::TOO_MANY_REQUESTS)
    }

    /// Is it worth sending the same request again.
    ///
    /// Connection problems, timeouts, undecodable responses, rate limiting
    /// and server side failures are transient. Everything else will fail the
    /// same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Reqwest(_)
            | HttpError::ConnectionLost(_)
            | HttpError::Timeout
            | HttpError::Api(FromHttpResponseError::Deserialization(_)) => true,
            HttpError::Api(FromHttpResponseError::Server(e)) => {
                self.is_rate_limited() || e.status_code.is_server_error()
            }
            HttpError::Cancelled
            | HttpError::AuthenticationRequired
            | HttpError::IntoHttp(_)
            | HttpError::Api(_) => false,
        }
    }

    /// Is this an authentication failure, either locally or reported by the
    /// server.
    pub fn is_auth_error(&self) -> bool {
        if matches!(self, HttpError::AuthenticationRequired) {
            return true;
        }

        matches!(
            self.client_api_error_kind(),
            Some(
                ErrorKind::Forbidden { .. }
                    | ErrorKind::UnknownToken { .. }
                    | ErrorKind::MissingToken
                    | ErrorKind::UserDeactivated
            )
        ) || self.as_client_api_error().is_some_and(|e| e.status_code == StatusCode::UNAUTHORIZED)
    }
}

/// Internal representation of errors.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error doing an HTTP request.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Error managing the encryption keys of the device.
    #[error(transparent)]
    Crypto(#[from] KeyManagerError),

    /// The operation needs a logged in session.
    #[error("the operation requires a logged in session")]
    NotLoggedIn,

    /// `login` was called on a session that already has an identity.
    #[error("the session is already logged in")]
    AlreadyLoggedIn,

    /// `start_sync` was called while the sync loop is running.
    #[error("the sync loop is already running")]
    SyncAlreadyRunning,
}

impl Error {
    /// Shorthand for
    /// <code>[Http](Self::Http)(e)</code> and
    /// [`HttpError::as_client_api_error()`].
    pub fn as_client_api_error(&self) -> Option<&ruma::api::error::Error> {
        as_variant!(self, Self::Http).and_then(HttpError::as_client_api_error)
    }

    /// The error kind (`errcode`) of a server error, if any.
    pub fn client_api_error_kind(&self) -> Option<&ErrorKind> {
        as_variant!(self, Self::Http).and_then(HttpError::client_api_error_kind)
    }

    /// Is this an authentication failure, either locally or reported by the
    /// server.
    pub fn is_auth_error(&self) -> bool {
        match self {
            Error::NotLoggedIn => true,
            Error::Http(e) => e.is_auth_error(),
            _ => false,
        }
    }
}

/// Errors that can happen in [`SessionBuilder::build()`].
///
/// [`SessionBuilder::build()`]: crate::SessionBuilder::build
#[derive(Debug, Error)]
pub enum SessionBuildError {
    /// No homeserver URL was configured.
    #[error("no homeserver URL was configured")]
    MissingHomeserver,

    /// The homeserver URL can't be parsed.
    #[error(transparent)]
    Url(#[from] UrlParseError),

    /// The HTTP client couldn't be created.
    #[error(transparent)]
    Http(#[from] HttpError),
}
