// Copyright (c) Test Tube Contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors that may be encountered while calling processes on the compute network.

use reqwest::StatusCode;
use testtube_utils::backoff::RetryError;

use crate::{cache::CacheError, wallet::WalletError};

/// Error raised by the remote call layer and the wallet actions built on it.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ClientError {
    #[from]
    kind: Kind,
}

impl ClientError {
    /// Returns true if the error is related to connecting to a remote service.
    pub fn is_connect(&self) -> bool {
        let Kind::Transport(ref err) = self.kind else {
            return false;
        };
        err.is_connect()
    }

    /// Returns the HTTP status code associated with the error, if any.
    pub fn http_status_code(&self) -> Option<StatusCode> {
        match &self.kind {
            Kind::Transport(inner) => inner.status(),
            Kind::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if the process answered with an `Error` tag.
    ///
    /// Such rejections are final and are never retried.
    pub fn is_application_error(&self) -> bool {
        matches!(self.kind, Kind::Application(_))
    }

    /// Returns the message of the process' `Error` tag, if this is an application error.
    pub fn application_message(&self) -> Option<&str> {
        match &self.kind {
            Kind::Application(message) => Some(message),
            _ => None,
        }
    }

    /// Returns true if a response lacked a tag required by the caller.
    pub fn is_missing_tag(&self) -> bool {
        matches!(self.kind, Kind::MissingTag(_))
    }

    /// Returns true if a response body could not be decoded.
    pub fn is_decode(&self) -> bool {
        match &self.kind {
            Kind::Decode(_) => true,
            Kind::Transport(err) => err.is_decode(),
            _ => false,
        }
    }

    /// Returns true if the error came from the remote cache tier.
    pub fn is_remote_cache(&self) -> bool {
        matches!(self.kind, Kind::RemoteCache(_))
    }

    /// Returns true if every retry attempt was used up.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self.kind, Kind::RetriesExhausted { .. })
    }

    pub(crate) fn application(message: impl Into<String>) -> Self {
        Kind::Application(message.into()).into()
    }

    pub(crate) fn missing_tag(tag: &'static str) -> Self {
        Kind::MissingTag(tag).into()
    }

    pub(crate) fn status(status: StatusCode, message: String) -> Self {
        Kind::Status { status, message }.into()
    }

    pub(crate) fn send_failed(process_id: &str) -> Self {
        Kind::SendFailed {
            process_id: process_id.to_owned(),
        }
        .into()
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Kind::Transport(err).into()
    }
}

impl From<CacheError> for ClientError {
    fn from(err: CacheError) -> Self {
        Kind::RemoteCache(err).into()
    }
}

impl From<WalletError> for ClientError {
    fn from(err: WalletError) -> Self {
        Kind::Wallet(err).into()
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Kind::Decode(err).into()
    }
}

impl From<RetryError<ClientError>> for ClientError {
    fn from(err: RetryError<ClientError>) -> Self {
        Kind::RetriesExhausted {
            attempts: err.attempts,
            last_error: Box::new(err.last_error),
        }
        .into()
    }
}

/// The kinds of [`ClientError`].
#[derive(Debug, thiserror::Error)]
pub(crate) enum Kind {
    #[error(transparent)]
    Transport(reqwest::Error),
    #[error("request failed with status {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("failed to decode the response body: {0}")]
    Decode(serde_json::Error),
    #[error("remote cache operation failed: {0}")]
    RemoteCache(CacheError),
    #[error(transparent)]
    Wallet(WalletError),
    #[error("{0}")]
    Application(String),
    #[error("the response does not contain the `{0}` tag")]
    MissingTag(&'static str),
    #[error("failed to send message to process {process_id}")]
    SendFailed { process_id: String },
    #[error("Failed after {attempts} attempts. Last error: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<ClientError>,
    },
}
