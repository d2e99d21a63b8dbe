//! Commands: single, named mutations of a `Fetcher`.
//!
//! # Design
//! A command only reads its own captured parameters and only writes the
//! fetcher it is given, so one command value can be shared by any number of
//! presets and replayed concurrently. Order matters: a later `set_header`
//! wins over an earlier one, and path commands compose left to right.
//!
//! Constructors return `CommandRef` so commands of different kinds can sit
//! in the same preset. Any `Fn(&mut Fetcher) -> Result<(), CommandError>`
//! closure is a command too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request};
use serde::Serialize;
use url::Url;

use crate::doer::Doer;
use crate::error::{BoxError, CommandError};
use crate::fetcher::{merge_headers, Body, Fetcher, RequestBuilder};
use crate::target::FetchUrl;

/// One atomic mutation of a fetcher.
pub trait Command: Send + Sync {
    fn apply(&self, fetcher: &mut Fetcher) -> Result<(), CommandError>;
}

impl<F> Command for F
where
    F: Fn(&mut Fetcher) -> Result<(), CommandError> + Send + Sync,
{
    fn apply(&self, fetcher: &mut Fetcher) -> Result<(), CommandError> {
        self(fetcher)
    }
}

/// Shared handle to a command.
pub type CommandRef = Arc<dyn Command>;

/// Wrap a closure as a shareable command.
pub fn command_fn<F>(f: F) -> CommandRef
where
    F: Fn(&mut Fetcher) -> Result<(), CommandError> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Parse `u` and make it the request url.
pub fn url(u: impl Into<String>) -> CommandRef {
    let u = u.into();
    command_fn(move |f| {
        f.url = FetchUrl::parse(&u)?;
        Ok(())
    })
}

/// Make an already parsed url the request url.
pub fn parsed_url(u: Url) -> CommandRef {
    command_fn(move |f| {
        f.url = FetchUrl::from_url(u.clone());
        Ok(())
    })
}

/// Replace the host (optionally `host:port`) of the current url.
pub fn host(h: impl Into<String>) -> CommandRef {
    let h = h.into();
    command_fn(move |f| {
        if f.url.origin().is_none() {
            return Err(CommandError::MissingUrl);
        }
        f.url.set_host(&h)?;
        Ok(())
    })
}

pub fn path_prefix(prefix: impl Into<String>) -> CommandRef {
    let prefix = prefix.into();
    command_fn(move |f| {
        f.url.path.insert_str(0, &prefix);
        Ok(())
    })
}

pub fn path_suffix(suffix: impl Into<String>) -> CommandRef {
    let suffix = suffix.into();
    command_fn(move |f| {
        f.url.path.push_str(&suffix);
        Ok(())
    })
}

/// Append `segment` with exactly one `/` between it and the current path.
pub fn path_join(segment: impl Into<String>) -> CommandRef {
    let segment = segment.into();
    command_fn(move |f| {
        f.url.path = join_path(&f.url.path, &segment);
        Ok(())
    })
}

pub(crate) fn join_path(base: &str, segment: &str) -> String {
    let segment = segment.trim_start_matches('/');
    if segment.is_empty() {
        return base.to_string();
    }
    let trimmed = base.trim_end_matches('/');
    if trimmed.is_empty() && !base.starts_with('/') {
        segment.to_string()
    } else {
        format!("{trimmed}/{segment}")
    }
}

/// Replace every occurrence of `placeholder` in the path with `value`.
pub fn replace(placeholder: impl Into<String>, value: impl Into<String>) -> CommandRef {
    let placeholder = placeholder.into();
    let value = value.into();
    command_fn(move |f| {
        if !placeholder.is_empty() {
            f.url.path = f.url.path.replace(&placeholder, &value);
        }
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

pub fn method(m: Method) -> CommandRef {
    command_fn(move |f| {
        f.method = m.clone();
        Ok(())
    })
}

pub fn get() -> CommandRef {
    method(Method::GET)
}

pub fn post() -> CommandRef {
    method(Method::POST)
}

pub fn put() -> CommandRef {
    method(Method::PUT)
}

pub fn delete() -> CommandRef {
    method(Method::DELETE)
}

/// Set the method from a fallible callback, evaluated at replay time.
pub fn method_builder<F>(build: F) -> CommandRef
where
    F: Fn() -> Result<Method, CommandError> + Send + Sync + 'static,
{
    command_fn(move |f| {
        f.method = build()?;
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

/// Set `key` to `value`, replacing any existing values.
pub fn set_header(key: impl Into<String>, value: impl Into<String>) -> CommandRef {
    let key = key.into();
    let value = value.into();
    command_fn(move |f| {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| CommandError::InvalidHeader(format!("{key}: {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| CommandError::InvalidHeader(format!("{key}: {e}")))?;
        f.headers.insert(name, value);
        Ok(())
    })
}

/// Merge `headers` into the fetcher's headers; see `merge_headers`.
pub fn header(headers: HeaderMap) -> CommandRef {
    command_fn(move |f| {
        merge_headers(&mut f.headers, &headers);
        Ok(())
    })
}

pub fn header_builder<F>(build: F) -> CommandRef
where
    F: Fn(&mut HeaderMap) -> Result<(), CommandError> + Send + Sync + 'static,
{
    command_fn(move |f| build(&mut f.headers))
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

pub fn set_query(key: impl Into<String>, value: impl Into<String>) -> CommandRef {
    let key = key.into();
    let value = value.into();
    command_fn(move |f| {
        f.url.set_query(&key, &value);
        Ok(())
    })
}

/// Set every pair in `params`, replacing existing values of the same key.
pub fn params<I, K, V>(params: I) -> CommandRef
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let params: Vec<(String, String)> = params
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    command_fn(move |f| {
        for (key, value) in &params {
            f.url.set_query(key, value);
        }
        Ok(())
    })
}

pub fn params_builder<F>(build: F) -> CommandRef
where
    F: Fn(&mut Vec<(String, String)>) -> Result<(), CommandError> + Send + Sync + 'static,
{
    command_fn(move |f| build(&mut f.url.query))
}

// ---------------------------------------------------------------------------
// Body
// ---------------------------------------------------------------------------

/// Send `bytes` verbatim as the body.
pub fn body(bytes: impl Into<Bytes>) -> CommandRef {
    let bytes = bytes.into();
    command_fn(move |f| {
        f.body = Body::Raw(bytes.clone());
        Ok(())
    })
}

/// Encode a value as the JSON body at replay time.
///
/// A value that serializes to `null` (e.g. `None`) clears the body.
pub struct JsonBody<T>(pub T);

impl<T> Command for JsonBody<T>
where
    T: Serialize + Send + Sync,
{
    fn apply(&self, fetcher: &mut Fetcher) -> Result<(), CommandError> {
        let encoded = serde_json::to_vec(&self.0)?;
        fetcher.body = if encoded == b"null" {
            Body::Empty
        } else {
            Body::Json(Bytes::from(encoded))
        };
        Ok(())
    }
}

pub fn json_body<T>(value: T) -> CommandRef
where
    T: Serialize + Send + Sync + 'static,
{
    Arc::new(JsonBody(value))
}

/// A `multipart/form-data` body built up from fields and files.
///
/// Applying it stages the encoded form as the body and sets the matching
/// `Content-Type`, boundary included.
#[derive(Debug, Clone)]
pub struct Multipart {
    boundary: String,
    parts: Vec<u8>,
}

static BOUNDARY_SEQ: AtomicU64 = AtomicU64::new(0);

fn fresh_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as u64);
    let seq = BOUNDARY_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("fetcher-{nanos:016x}{seq:08x}")
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Multipart {
    pub fn new() -> Self {
        Self::with_boundary(fresh_boundary())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `multipart/form-data; boundary=...`
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Add a plain form field.
    pub fn field(mut self, name: &str, value: impl AsRef<[u8]>) -> Self {
        let disposition = format!("form-data; name=\"{}\"", escape_quotes(name));
        self.push_part(&disposition, None, value.as_ref());
        self
    }

    /// Add a file part sent as `application/octet-stream`.
    pub fn file(mut self, field: &str, filename: &str, data: impl AsRef<[u8]>) -> Self {
        let disposition = format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            escape_quotes(field),
            escape_quotes(filename)
        );
        self.push_part(&disposition, Some("application/octet-stream"), data.as_ref());
        self
    }

    /// The encoded form, closing delimiter included.
    pub fn body(&self) -> Bytes {
        let mut out = Vec::with_capacity(self.parts.len() + self.boundary.len() + 8);
        out.extend_from_slice(&self.parts);
        out.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Bytes::from(out)
    }

    fn push_part(&mut self, disposition: &str, content_type: Option<&str>, data: &[u8]) {
        let mut head = format!("--{}\r\nContent-Disposition: {disposition}\r\n", self.boundary);
        if let Some(content_type) = content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        head.push_str("\r\n");
        self.parts.extend_from_slice(head.as_bytes());
        self.parts.extend_from_slice(data);
        self.parts.extend_from_slice(b"\r\n");
    }
}

impl Default for Multipart {
    fn default() -> Self {
        Self::new()
    }
}

impl Command for Multipart {
    fn apply(&self, fetcher: &mut Fetcher) -> Result<(), CommandError> {
        let value = HeaderValue::from_str(&self.content_type())
            .map_err(|e| CommandError::InvalidHeader(format!("{}: {e}", self.boundary)))?;
        fetcher.headers.insert(CONTENT_TYPE, value);
        fetcher.body = Body::Raw(self.body());
        Ok(())
    }
}

pub fn multipart(form: Multipart) -> CommandRef {
    Arc::new(form)
}

// ---------------------------------------------------------------------------
// Pre-send hooks and transport
// ---------------------------------------------------------------------------

/// Queue `builder` to run against the materialized request.
pub fn request_builder<B>(builder: B) -> CommandRef
where
    B: RequestBuilder + 'static,
{
    let builder: Arc<dyn RequestBuilder> = Arc::new(builder);
    command_fn(move |f| {
        f.append_builder(Arc::clone(&builder));
        Ok(())
    })
}

/// Queue a hook that sets HTTP basic credentials.
pub fn basic_auth(username: impl Into<String>, password: impl Into<String>) -> CommandRef {
    let credentials = STANDARD.encode(format!("{}:{}", username.into(), password.into()));
    request_builder(move |r: &mut Request<Bytes>| -> Result<(), BoxError> {
        let mut value = HeaderValue::from_str(&format!("Basic {credentials}"))?;
        value.set_sensitive(true);
        r.headers_mut().insert(AUTHORIZATION, value);
        Ok(())
    })
}

/// Send through `doer` instead of the default transport.
pub fn set_doer(doer: Arc<dyn Doer>) -> CommandRef {
    command_fn(move |f| {
        f.doer = Some(Arc::clone(&doer));
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::response::ResponseBody;
    use std::collections::HashMap;

    fn fetcher_with_path(path: &str) -> Fetcher {
        let mut f = Fetcher::new();
        f.url.path = path.to_string();
        f
    }

    #[test]
    fn url_and_replace() {
        let mut f = Fetcher::new();
        url("http://127.0.0.1/{{path}}/").apply(&mut f).unwrap();
        assert_eq!(f.url.path, "/{{path}}/");

        replace("{{path}}", "replacement").apply(&mut f).unwrap();
        assert_eq!(f.url.path, "/replacement/");

        host("localhost").apply(&mut f).unwrap();
        assert_eq!(f.url.origin().unwrap().host_str(), Some("localhost"));
    }

    #[test]
    fn malformed_url_fails() {
        let mut f = Fetcher::new();
        let err = url("not a url").apply(&mut f).unwrap_err();
        assert!(matches!(err, CommandError::InvalidUrl(_)));
    }

    #[test]
    fn host_without_url_fails() {
        let err = host("localhost").apply(&mut Fetcher::new()).unwrap_err();
        assert!(matches!(err, CommandError::MissingUrl));
    }

    #[test]
    fn path_commands() {
        let mut f = fetcher_with_path("raw");
        path_prefix("prefix").apply(&mut f).unwrap();
        assert_eq!(f.url.path, "prefixraw");

        let mut f = fetcher_with_path("raw");
        path_suffix("suffix").apply(&mut f).unwrap();
        assert_eq!(f.url.path, "rawsuffix");

        let mut f = fetcher_with_path("raw");
        path_join("join").apply(&mut f).unwrap();
        assert_eq!(f.url.path, "raw/join");
    }

    #[test]
    fn join_path_normalizes_slashes() {
        assert_eq!(join_path("/api/", "/v1"), "/api/v1");
        assert_eq!(join_path("/", "v1"), "/v1");
        assert_eq!(join_path("", "v1"), "v1");
        assert_eq!(join_path("/api", ""), "/api");
    }

    #[test]
    fn prefix_suffix_and_placeholder_compose_in_order() {
        let mut f = fetcher_with_path("/{id}");
        for cmd in [path_prefix("/api"), path_suffix("/v1"), replace("{id}", "42")] {
            cmd.apply(&mut f).unwrap();
        }
        assert_eq!(f.url.path, "/api/42/v1");
    }

    #[test]
    fn method_commands() {
        let mut f = Fetcher::new();
        post().apply(&mut f).unwrap();
        assert_eq!(f.method, Method::POST);

        method_builder(|| Ok(Method::from_bytes(b"MethodBuilderProvider")?))
            .apply(&mut f)
            .unwrap();
        assert_eq!(f.method.as_str(), "MethodBuilderProvider");
    }

    #[test]
    fn header_merge_overrides_by_key() {
        let mut f = Fetcher::new();
        f.headers.insert("k1", HeaderValue::from_static("v1"));
        f.headers.insert("k2", HeaderValue::from_static("v2"));
        let mut extra = HeaderMap::new();
        extra.insert("k1", HeaderValue::from_static("newv1"));
        extra.insert("k3", HeaderValue::from_static("v3"));

        header(extra).apply(&mut f).unwrap();
        assert_eq!(f.headers["k1"], "newv1");
        assert_eq!(f.headers["k2"], "v2");
        assert_eq!(f.headers["k3"], "v3");
    }

    #[test]
    fn set_header_is_case_insensitive_and_last_wins() {
        let mut f = Fetcher::new();
        set_header("X-Token", "a").apply(&mut f).unwrap();
        set_header("x-token", "b").apply(&mut f).unwrap();
        assert_eq!(f.headers["x-token"], "b");
        assert_eq!(f.headers.len(), 1);
    }

    #[test]
    fn set_header_rejects_invalid_names() {
        let err = set_header("bad header", "v").apply(&mut Fetcher::new()).unwrap_err();
        assert!(matches!(err, CommandError::InvalidHeader(_)));
    }

    #[test]
    fn header_builder_edits_headers() {
        let mut f = Fetcher::new();
        header_builder(|h| {
            h.insert("k1", HeaderValue::from_static("v1"));
            Ok(())
        })
        .apply(&mut f)
        .unwrap();
        assert_eq!(f.headers["k1"], "v1");
    }

    #[test]
    fn query_commands() {
        let mut f = Fetcher::new();
        set_query("k1", "v1").apply(&mut f).unwrap();
        assert_eq!(f.url.query_get("k1"), Some("v1"));

        params([("k1", "v1b"), ("k2", "v2")]).apply(&mut f).unwrap();
        assert_eq!(f.url.query_get("k1"), Some("v1b"));
        assert_eq!(f.url.query_get("k2"), Some("v2"));

        params_builder(|q| {
            q.push(("id".to_string(), "test".to_string()));
            Ok(())
        })
        .apply(&mut f)
        .unwrap();
        assert_eq!(f.url.query_get("id"), Some("test"));
    }

    #[test]
    fn raw_body_is_kept_verbatim() {
        let mut f = Fetcher::new();
        body("buf").apply(&mut f).unwrap();
        assert_eq!(f.body, Body::Raw(Bytes::from_static(b"buf")));
    }

    #[test]
    fn json_body_encodes_and_none_clears() {
        let mut f = Fetcher::new();
        json_body("12345").apply(&mut f).unwrap();
        assert_eq!(f.body, Body::Json(Bytes::from_static(b"\"12345\"")));

        json_body(None::<String>).apply(&mut f).unwrap();
        assert!(f.body.is_empty());
    }

    #[test]
    fn json_body_reports_serialization_errors() {
        let mut map = HashMap::new();
        map.insert((1, 2), "tuple keys are not valid json keys");
        let err = json_body(map).apply(&mut Fetcher::new()).unwrap_err();
        assert!(matches!(err, CommandError::SerializationError(_)));
    }

    #[test]
    fn multipart_stages_form_and_content_type() {
        let form = Multipart::with_boundary("xyz")
            .field("name", "demo")
            .file("upload", "a.txt", b"file data");
        let mut f = Fetcher::new();
        multipart(form).apply(&mut f).unwrap();

        assert_eq!(f.headers[CONTENT_TYPE], "multipart/form-data; boundary=xyz");
        let expected = "--xyz\r\n\
            Content-Disposition: form-data; name=\"name\"\r\n\r\n\
            demo\r\n\
            --xyz\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            file data\r\n\
            --xyz--\r\n";
        assert_eq!(f.body, Body::Raw(Bytes::from(expected)));
    }

    #[test]
    fn multipart_escapes_names_and_picks_distinct_boundaries() {
        let form = Multipart::with_boundary("b").field("a\"b", "");
        let body = form.body();
        assert!(body.starts_with(b"--b\r\nContent-Disposition: form-data; name=\"a\\\"b\"\r\n"));

        assert_ne!(Multipart::new().boundary(), Multipart::new().boundary());
        let empty = Multipart::new();
        assert_eq!(empty.body(), format!("--{}--\r\n", empty.boundary()).into_bytes());
    }

    #[test]
    fn multipart_rejects_unencodable_boundary() {
        let err = Multipart::with_boundary("bad\nboundary")
            .apply(&mut Fetcher::new())
            .unwrap_err();
        assert!(matches!(err, CommandError::InvalidHeader(_)));
    }

    #[test]
    fn request_builders_accumulate() {
        let mut f = Fetcher::new();
        let noop = |_: &mut Request<Bytes>| -> Result<(), BoxError> { Ok(()) };
        request_builder(noop).apply(&mut f).unwrap();
        basic_auth("user", "pw").apply(&mut f).unwrap();
        assert_eq!(f.builders.len(), 2);
    }

    #[test]
    fn basic_auth_sets_authorization() {
        let mut f = Fetcher::new();
        url("http://127.0.0.1/").apply(&mut f).unwrap();
        basic_auth("user", "pw").apply(&mut f).unwrap();
        let (req, _) = f.raw().ok().unwrap();
        // base64("user:pw")
        assert_eq!(req.headers()[AUTHORIZATION], "Basic dXNlcjpwdw==");
    }

    #[test]
    fn set_doer_overrides_transport() {
        struct Refuse;
        impl Doer for Refuse {
            fn send(
                &self,
                _request: Request<Bytes>,
            ) -> Result<http::Response<ResponseBody>, TransportError> {
                Err(TransportError::Timeout)
            }
        }

        let mut f = Fetcher::new();
        assert!(f.doer.is_none());
        let doer: Arc<dyn Doer> = Arc::new(Refuse);
        set_doer(Arc::clone(&doer)).apply(&mut f).unwrap();
        assert!(Arc::ptr_eq(f.doer.as_ref().unwrap(), &doer));
    }

    #[test]
    fn closures_are_commands() {
        let cmd = command_fn(|f| {
            f.url.path = "/custom".to_string();
            Ok(())
        });
        let mut f = Fetcher::new();
        cmd.apply(&mut f).unwrap();
        assert_eq!(f.url.path, "/custom");
    }
}
