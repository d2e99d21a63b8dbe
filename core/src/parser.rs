//! Status-gated response parsers.
//!
//! # Design
//! A `Parser` consumes or validates a `Response`. Gates check the status
//! code and either delegate to a nested parser or turn the response itself
//! into `Error::Status`, caching the body first so the caller can still read
//! it. Decoding parsers assume a gate already passed and only look at the
//! body.
//!
//! A gate built with `StatusGate::new` and no nested parser uses `ReadBody`:
//! the body is materialized and cached, then left for the caller.

use std::io::Write;

use serde::de::DeserializeOwned;

use crate::error::{DecodeError, Error};
use crate::response::Response;

/// Consumes or validates a response.
pub trait Parser {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error>;
}

impl<F> Parser for F
where
    F: FnMut(&mut Response) -> Result<(), Error>,
{
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        self(response)
    }
}

/// Status-code predicate used by `StatusGate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCheck {
    /// Only this status proceeds.
    Exact(u16),
    /// Inclusive range.
    Range(u16, u16),
    /// Strictly below this status.
    Below(u16),
}

impl StatusCheck {
    pub fn accepts(&self, status: u16) -> bool {
        match *self {
            StatusCheck::Exact(code) => status == code,
            StatusCheck::Range(low, high) => (low..=high).contains(&status),
            StatusCheck::Below(limit) => status < limit,
        }
    }
}

/// Runs `inner` only when the status passes `check`; otherwise the response
/// becomes the error.
#[derive(Debug, Clone)]
pub struct StatusGate<P = ReadBody> {
    check: StatusCheck,
    inner: P,
}

impl StatusGate {
    pub fn new(check: StatusCheck) -> Self {
        Self {
            check,
            inner: ReadBody,
        }
    }
}

impl<P> StatusGate<P> {
    /// Replace the nested parser.
    pub fn then<Q: Parser>(self, inner: Q) -> StatusGate<Q> {
        StatusGate {
            check: self.check,
            inner,
        }
    }

    pub fn check(&self) -> StatusCheck {
        self.check
    }
}

impl<P: Parser> Parser for StatusGate<P> {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        if !self.check.accepts(response.status().as_u16()) {
            return Err(Error::Status(response.to_error()?));
        }
        self.inner.parse(response)
    }
}

pub fn should_status<P: Parser>(code: u16, inner: P) -> StatusGate<P> {
    StatusGate::new(StatusCheck::Exact(code)).then(inner)
}

pub fn should_200<P: Parser>(inner: P) -> StatusGate<P> {
    should_status(200, inner)
}

pub fn should_status_range<P: Parser>(low: u16, high: u16, inner: P) -> StatusGate<P> {
    StatusGate::new(StatusCheck::Range(low, high)).then(inner)
}

/// Status below 300.
pub fn should_success<P: Parser>(inner: P) -> StatusGate<P> {
    StatusGate::new(StatusCheck::Below(300)).then(inner)
}

/// Status below 500.
pub fn should_no_error<P: Parser>(inner: P) -> StatusGate<P> {
    StatusGate::new(StatusCheck::Below(500)).then(inner)
}

/// Materialize and cache the body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadBody;

impl Parser for ReadBody {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        response.body_content()?;
        Ok(())
    }
}

/// Drain and close the body without keeping it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Parser for Discard {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        response.discard()?;
        Ok(())
    }
}

/// Copy the body into the target buffer.
pub struct AsBytes<'a>(pub &'a mut Vec<u8>);

impl Parser for AsBytes<'_> {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        let content = response.body_content()?;
        self.0.clear();
        self.0.extend_from_slice(&content);
        Ok(())
    }
}

pub fn as_bytes(target: &mut Vec<u8>) -> AsBytes<'_> {
    AsBytes(target)
}

/// Decode the body as UTF-8 into the target string.
pub struct AsString<'a>(pub &'a mut String);

impl Parser for AsString<'_> {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        let content = response.body_content()?;
        *self.0 = String::from_utf8(content.to_vec()).map_err(DecodeError::from)?;
        Ok(())
    }
}

pub fn as_string(target: &mut String) -> AsString<'_> {
    AsString(target)
}

/// Decode the body as JSON into the target value.
pub struct AsJson<'a, T>(pub &'a mut T);

impl<T: DeserializeOwned> Parser for AsJson<'_, T> {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        let content = response.body_content()?;
        *self.0 = serde_json::from_slice(&content).map_err(DecodeError::from)?;
        Ok(())
    }
}

pub fn as_json<T: DeserializeOwned>(target: &mut T) -> AsJson<'_, T> {
    AsJson(target)
}

/// Stream the body into a writer without caching it.
pub struct CopyTo<W>(pub W);

impl<W: Write> Parser for CopyTo<W> {
    fn parse(&mut self, response: &mut Response) -> Result<(), Error> {
        response.copy_body_to(&mut self.0)?;
        Ok(())
    }
}

pub fn copy_to<W: Write>(writer: W) -> CopyTo<W> {
    CopyTo(writer)
}
