//! Composable HTTP request construction and response parsing.
//!
//! # Overview
//! Requests are described as `Preset`s: immutable, shareable sequences of
//! `Command`s that each mutate a request under construction. Executing a
//! preset replays it on a fresh `Fetcher`, sends the materialized request
//! through a `Doer` and hands back a `Response` for a `Parser` chain to judge
//! and decode.
//!
//! # Design
//! - Presets derive variants structurally; nothing already built is copied
//!   or mutated, so one base preset per service can be shared freely.
//! - The network sits behind the `Doer` trait. `UreqDoer` is the blocking
//!   default; tests and callers can supply their own.
//! - Status codes are judged by parsers, never by the transport. A rejected
//!   response becomes a `ResponseError` with its body already cached.
//! - Every error message that embeds a response body is capped at
//!   `ERR_MSG_LENGTH_LIMIT` bytes.

pub mod command;
pub mod doer;
pub mod error;
pub mod fetch;
pub mod fetcher;
pub mod parser;
pub mod preset;
pub mod response;
pub mod target;

pub use command::{Command, CommandRef, Multipart};
pub use doer::{default_doer, set_default_doer, Client, ClientConfig, Doer, UreqDoer};
pub use error::{BoxError, CommandError, DecodeError, Error, TransportError, ERR_MSG_LENGTH_LIMIT};
pub use fetch::{execute, fetch_and_parse, fetch_with_body_and_parse};
pub use fetcher::{Body, Fetcher, RequestBuilder};
pub use parser::{Parser, StatusCheck, StatusGate};
pub use preset::{Preset, PresetFactory, Server, ServerConfig, ServerInfo};
pub use response::{
    api_error_code, api_error_content, compare_api_error_code, compare_response_error_status,
    is_response_error, ApiCodeError, Response, ResponseBody, ResponseError,
};
pub use target::FetchUrl;
