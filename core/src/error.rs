//! Error types for request construction, transport and response parsing.
//!
//! # Design
//! Each stage of a fetch has its own error kind so callers can tell a
//! malformed command apart from a network failure or a rejected status code.
//! Nothing here retries or recovers; every error reaches the caller of
//! `execute` / `fetch_and_parse` unchanged.
//!
//! Errors that embed response content (`ResponseError`, `ApiCodeError`) live
//! in `response` and render messages capped at `ERR_MSG_LENGTH_LIMIT` bytes.

use thiserror::Error;

use crate::response::{ApiCodeError, ResponseError};

/// Boxed error used where callers supply their own failure type (hooks,
/// custom commands).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Maximum length, in bytes, of a rendered error message.
pub const ERR_MSG_LENGTH_LIMIT: usize = 512;

/// A command failed while mutating the fetcher context.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid method: {0}")]
    InvalidMethod(#[from] http::method::InvalidMethod),

    /// A command needed an origin (scheme and host) but none was set yet.
    #[error("no url set")]
    MissingUrl,

    /// The JSON body could not be encoded.
    #[error("serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Custom(BoxError),
}

/// The transport could not produce a response, or its body could not be read.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid proxy url {url:?}: {reason}")]
    InvalidProxy { url: String, reason: String },

    #[error("reading response body failed: {0}")]
    Body(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Other(BoxError),
}

/// A decoding parser could not interpret the response body.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Every failure a fetch can surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Materializing the request or running a pre-send hook failed.
    #[error("building request failed: {0}")]
    RequestBuild(#[source] BoxError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A status gate rejected the response. The body is already cached in
    /// the carried snapshot.
    #[error(transparent)]
    Status(#[from] ResponseError),

    #[error("decoding response failed: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    ApiCode(#[from] ApiCodeError),
}

impl Error {
    pub(crate) fn request_build(msg: impl Into<String>) -> Self {
        Error::RequestBuild(msg.into().into())
    }
}

/// Cut `msg` down to `ERR_MSG_LENGTH_LIMIT` bytes without splitting a
/// character. Applied to the fully assembled message only.
pub(crate) fn truncate_message(mut msg: String) -> String {
    if msg.len() > ERR_MSG_LENGTH_LIMIT {
        let mut end = ERR_MSG_LENGTH_LIMIT;
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        msg.truncate(end);
    }
    msg
}
