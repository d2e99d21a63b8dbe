//! Mutable request-construction state.
//!
//! # Design
//! A `Fetcher` is scratch space for exactly one request. Commands mutate it,
//! `raw` materializes an `http::Request` from it and runs the queued pre-send
//! hooks, and `fetch` hands the result to a transport. A fetcher is never
//! reused: each execution creates a fresh one and drops it when the
//! transport returns.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, Request};
use tracing::{debug, warn};

use crate::doer::{default_doer, Doer};
use crate::error::{BoxError, Error};
use crate::response::Response;
use crate::target::FetchUrl;

/// Request body staged on a fetcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    /// Raw bytes, sent verbatim.
    Raw(Bytes),
    /// A JSON-encoded value.
    Json(Bytes),
}

impl Body {
    pub fn bytes(&self) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Raw(bytes) | Body::Json(bytes) => bytes.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }
}

/// A hook run against the materialized request right before dispatch.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, request: &mut Request<Bytes>) -> Result<(), BoxError>;
}

impl<F> RequestBuilder for F
where
    F: Fn(&mut Request<Bytes>) -> Result<(), BoxError> + Send + Sync,
{
    fn build(&self, request: &mut Request<Bytes>) -> Result<(), BoxError> {
        self(request)
    }
}

/// In-progress state of one request.
///
/// Prefer `Command`s and `Preset`s over editing fields directly; the fields
/// are public so custom commands can reach them.
pub struct Fetcher {
    pub url: FetchUrl,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Body,
    /// Pre-send hooks, run in order by `raw`.
    pub builders: Vec<Arc<dyn RequestBuilder>>,
    /// Transport override. `None` selects the process-wide default.
    pub doer: Option<Arc<dyn Doer>>,
}

impl Fetcher {
    pub fn new() -> Self {
        Self {
            url: FetchUrl::default(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body: Body::Empty,
            builders: Vec::new(),
            doer: None,
        }
    }

    /// Queue a pre-send hook after the ones already queued.
    pub fn append_builder(&mut self, builder: Arc<dyn RequestBuilder>) {
        self.builders.push(builder);
    }

    /// Materialize the transport request and select the doer.
    pub fn raw(&self) -> Result<(Request<Bytes>, Arc<dyn Doer>), Error> {
        let url = self
            .url
            .to_url()
            .ok_or_else(|| Error::request_build("request has no url"))?;

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(url.as_str())
            .body(self.body.bytes())
            .map_err(|e| Error::RequestBuild(Box::new(e)))?;

        merge_headers(request.headers_mut(), &self.headers);
        if matches!(self.body, Body::Json(_)) && !request.headers().contains_key(CONTENT_TYPE) {
            request
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        for builder in &self.builders {
            builder.build(&mut request).map_err(Error::RequestBuild)?;
        }

        let doer = self.doer.clone().unwrap_or_else(default_doer);
        Ok((request, doer))
    }

    /// Materialize the request and send it.
    pub fn fetch(&self) -> Result<Response, Error> {
        let (request, doer) = self.raw()?;
        let method = request.method().clone();
        let url = request.uri().to_string();

        debug!(%method, %url, "sending request");
        let response = doer.send(request).map_err(|e| {
            warn!(%method, %url, error = %e, "transport failed");
            e
        })?;
        debug!(%method, %url, status = response.status().as_u16(), "received response");

        Ok(Response::new(method, url, response))
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetcher")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("builders", &self.builders.len())
            .field("doer", &self.doer.is_some())
            .finish()
    }
}

/// Merge `src` into `dst`: every key present in `src` replaces all of its
/// values in `dst`; other keys in `dst` are left alone.
pub fn merge_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for key in src.keys() {
        dst.remove(key);
        for value in src.get_all(key) {
            dst.append(key.clone(), value.clone());
        }
    }
}
