//! Echo endpoint for end-to-end tests of the fetcher core.
//!
//! Every request, whatever its method or path, is answered with its own
//! headers and body. The `statuscode` query parameter selects the response
//! status so callers can exercise status gates against a real transport.

use axum::{
    body::Bytes,
    extract::Query,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::debug;

pub const ECHO_METHOD: &str = "x-echo-method";
pub const ECHO_PATH: &str = "x-echo-path";

/// Hop-by-hop and framing headers that are not reflected.
const SKIPPED: [HeaderName; 4] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::HOST,
];

#[derive(Debug, Default, Deserialize)]
pub struct EchoParams {
    pub statuscode: Option<String>,
}

impl EchoParams {
    /// The requested status, or 200 when absent or not a valid code.
    pub fn status(&self) -> StatusCode {
        self.statuscode
            .as_deref()
            .and_then(|code| code.parse::<u16>().ok())
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::OK)
    }
}

pub fn app() -> Router {
    Router::new().fallback(echo)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn echo(
    method: Method,
    uri: Uri,
    Query(params): Query<EchoParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let status = params.status();
    debug!(%method, path = uri.path(), status = status.as_u16(), "echo");

    let mut response = (status, body).into_response();
    let out = response.headers_mut();
    out.remove(header::CONTENT_TYPE);
    for (name, value) in &headers {
        if !SKIPPED.contains(name) {
            out.append(name.clone(), value.clone());
        }
    }
    if let Ok(value) = HeaderValue::from_str(method.as_str()) {
        out.insert(ECHO_METHOD, value);
    }
    if let Ok(value) = HeaderValue::from_str(uri.path()) {
        out.insert(ECHO_PATH, value);
    }
    response
}
