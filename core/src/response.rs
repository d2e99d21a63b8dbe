//! Fetched responses and the errors built from them.
//!
//! # Design
//! `Response` reads its body from the network at most once: the first call
//! to `body_content` drains and drops the stream and caches the bytes, and
//! every later reader (parsers, error conversion) gets the cached copy.
//!
//! `ResponseError` is the "response as error" value a status gate returns.
//! It is a snapshot with the body already cached, so inspecting it never
//! touches the network. `ApiCodeError` carries an application-level error
//! code. The helpers at the bottom recognize both by downcasting, never by
//! parsing rendered messages.

use std::error::Error as StdError;
use std::fmt;
use std::io::{self, Read, Write};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};

use crate::error::{truncate_message, Error, TransportError};

/// Body stream handed over by a transport.
pub type ResponseBody = Box<dyn Read + Send>;

/// A transport response plus the identity of the request that produced it.
pub struct Response {
    method: Method,
    url: String,
    status: StatusCode,
    headers: HeaderMap,
    body: Option<ResponseBody>,
    content: Option<Bytes>,
}

impl Response {
    pub fn new(method: Method, url: impl Into<String>, response: http::Response<ResponseBody>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            method,
            url: url.into(),
            status: parts.status,
            headers: parts.headers,
            body: Some(body),
            content: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the body has been read into the cache.
    pub fn is_cached(&self) -> bool {
        self.content.is_some()
    }

    /// Body bytes, read from the stream on first call and cached after.
    pub fn body_content(&mut self) -> Result<Bytes, TransportError> {
        if let Some(content) = &self.content {
            return Ok(content.clone());
        }
        let mut buf = Vec::new();
        if let Some(mut body) = self.body.take() {
            body.read_to_end(&mut buf)?;
        }
        let content = Bytes::from(buf);
        self.content = Some(content.clone());
        Ok(content)
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&mut self) -> Result<String, TransportError> {
        let content = self.body_content()?;
        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    /// Copy the body into `writer`. An unread stream is copied straight
    /// through without being cached; afterwards the body is gone.
    pub fn copy_body_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> Result<u64, TransportError> {
        if let Some(content) = &self.content {
            writer.write_all(content)?;
            return Ok(content.len() as u64);
        }
        match self.body.take() {
            Some(mut body) => Ok(io::copy(&mut body, writer)?),
            None => Ok(0),
        }
    }

    /// Drain and close the stream without keeping the bytes.
    pub fn discard(&mut self) -> Result<(), TransportError> {
        if let Some(mut body) = self.body.take() {
            io::copy(&mut body, &mut io::sink())?;
        }
        Ok(())
    }

    /// Snapshot this response as an error value, caching the body first.
    pub fn to_error(&mut self) -> Result<ResponseError, TransportError> {
        let content = self.body_content()?;
        Ok(ResponseError {
            method: self.method.clone(),
            url: self.url.clone(),
            status: self.status,
            headers: self.headers.clone(),
            content,
        })
    }

    /// Build an `ApiCodeError` for this response with the given code.
    pub fn new_api_code_err(&mut self, code: impl fmt::Display) -> Result<ApiCodeError, TransportError> {
        let content = self.body_content()?;
        Ok(ApiCodeError::new(
            self.url.clone(),
            self.method.clone(),
            code,
            content,
        ))
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("content", &self.content)
            .finish_non_exhaustive()
    }
}

/// A response rejected by a status gate.
#[derive(Debug, Clone)]
pub struct ResponseError {
    pub method: Method,
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub content: Bytes,
}

impl ResponseError {
    pub fn new_api_code_err(&self, code: impl fmt::Display) -> ApiCodeError {
        ApiCodeError::new(self.url.clone(), self.method.clone(), code, self.content.clone())
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = format!(
            "http error [{} {}] {} : {}",
            self.method,
            self.url,
            self.status,
            String::from_utf8_lossy(&self.content)
        );
        f.write_str(&truncate_message(msg))
    }
}

impl StdError for ResponseError {}

/// An application-level error code extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiCodeError {
    pub uri: String,
    pub method: Method,
    /// The code, stored in its rendered form.
    pub code: String,
    /// Response body the code was extracted from.
    pub content: Bytes,
}

impl ApiCodeError {
    pub fn new(
        uri: impl Into<String>,
        method: Method,
        code: impl fmt::Display,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            uri: uri.into(),
            method,
            code: code.to_string(),
            content: content.into(),
        }
    }

    /// Whether this error carries `code`, compared in rendered form so `999`
    /// and `"999"` match.
    pub fn has_code(&self, code: impl fmt::Display) -> bool {
        self.code == code.to_string()
    }
}

impl fmt::Display for ApiCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = format!(
            "api error [{} {}] code {} : {}",
            self.method,
            self.uri,
            self.code,
            String::from_utf8_lossy(&self.content)
        );
        f.write_str(&truncate_message(msg))
    }
}

impl StdError for ApiCodeError {}

fn find<'a, T: StdError + 'static>(
    err: &'a (dyn StdError + 'static),
    project: impl Fn(&'a Error) -> Option<&'a T>,
) -> Option<&'a T> {
    err.downcast_ref::<T>()
        .or_else(|| err.downcast_ref::<Error>().and_then(project))
}

fn find_api_code<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ApiCodeError> {
    find(err, |e| match e {
        Error::ApiCode(api) => Some(api),
        _ => None,
    })
}

fn find_response<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a ResponseError> {
    find(err, |e| match e {
        Error::Status(resp) => Some(resp),
        _ => None,
    })
}

/// Code of an `ApiCodeError`, or `None` for any other error.
pub fn api_error_code<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a str> {
    find_api_code(err).map(|e| e.code.as_str())
}

/// Content of an `ApiCodeError`, or `None` for any other error.
pub fn api_error_content<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a [u8]> {
    find_api_code(err).map(|e| e.content.as_ref())
}

/// Whether `err` is an `ApiCodeError` carrying `code`.
pub fn compare_api_error_code(err: &(dyn StdError + 'static), code: impl fmt::Display) -> bool {
    find_api_code(err).is_some_and(|e| e.has_code(code))
}

/// Whether `err` is a response rejected by a status gate.
pub fn is_response_error(err: &(dyn StdError + 'static)) -> bool {
    find_response(err).is_some()
}

/// Whether `err` is a rejected response with status `code`.
pub fn compare_response_error_status(err: &(dyn StdError + 'static), code: u16) -> bool {
    find_response(err).is_some_and(|e| e.status.as_u16() == code)
}
