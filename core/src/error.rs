//! Error types for the request pipeline.
//!
//! # Design
//! The transport layer and the business layer carry independent error
//! signals. `Transport` means no response arrived (and is the only kind the
//! retry policy looks at), `HttpStatus` means a non-2xx response arrived, and
//! `Business` means a 2xx response carried a failing envelope code.
//! `Cancelled` is an expected outcome for superseded requests; it is never
//! shown to the user.

use thiserror::Error;

use crate::envelope::Envelope;
use crate::http::HttpResponse;
use crate::messages;

/// Why a transport produced no usable response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Other,
    /// The request could not be encoded for the wire; nothing was sent.
    Request,
    /// The status line arrived but reading the body failed.
    Body,
}

impl TransportErrorKind {
    /// Only failures where no response arrived are worth redispatching.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::Connect | Self::Other)
    }
}

/// Failure reported by a `Transport` when no response was received.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct TransportFailure {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }
}

/// Errors returned by `Client` request methods.
#[derive(Debug, Error)]
pub enum RequestError {
    /// No response was received, after the retry budget ran out.
    #[error("transport failure after {attempts} attempt(s): {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: TransportFailure,
    },

    /// A response arrived with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        status: u16,
        message: String,
        response: HttpResponse,
    },

    /// A 2xx response carried a failing business code.
    #[error("business code {code}: {message}")]
    Business {
        code: i64,
        message: String,
        envelope: Envelope,
    },

    /// A 2xx response had no body where an envelope was expected.
    #[error("{url}: empty response, the server returned no data")]
    EmptyResponse { url: String },

    /// The request was cancelled, either superseded by an identical request
    /// or through `Client::cancel_all_pending`.
    #[error("request cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("invalid url {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid {name} header: {message}")]
    InvalidHeader { name: String, message: String },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl RequestError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled { .. })
    }

    /// Text shown to the user for this error. `None` for cancellations.
    pub fn user_message(&self) -> Option<String> {
        match self {
            RequestError::Transport { source, .. } => {
                Some(messages::transport_message(source.kind).to_string())
            }
            RequestError::HttpStatus { message, .. } | RequestError::Business { message, .. } => {
                Some(message.clone())
            }
            RequestError::EmptyResponse { .. } => Some(messages::EMPTY_RESPONSE.to_string()),
            RequestError::Cancelled { .. } => None,
            RequestError::InvalidUrl { .. }
            | RequestError::InvalidHeader { .. }
            | RequestError::Serialization(_)
            | RequestError::Deserialization(_) => Some(messages::UNKNOWN_ERROR.to_string()),
        }
    }
}
