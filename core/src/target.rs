//! Decomposed request target.
//!
//! The path is kept decoded so commands can splice placeholders such as
//! `{id}` before anything is percent-encoded. Encoding happens once, in
//! `to_url`, when the request is materialized, and only for parts a command
//! changed: an untouched path or query goes out exactly as it was parsed.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

/// URL of a request under construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchUrl {
    /// Scheme, host and port. `None` until a url command runs.
    origin: Option<Url>,
    /// Decoded path.
    pub path: String,
    /// Decoded query pairs, in insertion order.
    pub query: Vec<(String, String)>,
    pub fragment: Option<String>,
    /// Decoded path and query as parsed, to detect later edits.
    parsed: Option<Parsed>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Parsed {
    path: String,
    query: Vec<(String, String)>,
}

impl FetchUrl {
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        Url::parse(input).map(Self::from_url)
    }

    pub fn from_url(url: Url) -> Self {
        let path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let fragment = url.fragment().map(str::to_string);
        Self {
            parsed: Some(Parsed {
                path: path.clone(),
                query: query.clone(),
            }),
            origin: Some(url),
            path,
            query,
            fragment,
        }
    }

    pub fn origin(&self) -> Option<&Url> {
        self.origin.as_ref()
    }

    /// Replace the host, keeping scheme and path. Accepts `host` or
    /// `host:port`.
    pub fn set_host(&mut self, host: &str) -> Result<(), url::ParseError> {
        let origin = self.origin.as_mut().ok_or(url::ParseError::EmptyHost)?;
        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) if !name.is_empty() && port.parse::<u16>().is_ok() => {
                (name, port.parse::<u16>().ok())
            }
            _ => (host, None),
        };
        origin.set_host(Some(name))?;
        if port.is_some() {
            origin
                .set_port(port)
                .map_err(|()| url::ParseError::InvalidPort)?;
        }
        Ok(())
    }

    /// First value for `key`, if any.
    pub fn query_get(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replace every value of `key` with `value`.
    pub fn set_query(&mut self, key: &str, value: &str) {
        self.query.retain(|(k, _)| k != key);
        self.query.push((key.to_string(), value.to_string()));
    }

    /// Assemble the final, encoded URL. `None` when no origin was set.
    pub fn to_url(&self) -> Option<Url> {
        let mut url = self.origin.clone()?;
        let parsed = self.parsed.as_ref();
        if parsed.map_or(true, |p| p.path != self.path) {
            url.set_path(&self.path);
        }
        if parsed.map_or(true, |p| p.query != self.query) {
            if self.query.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(self.query.iter());
            }
        }
        url.set_fragment(self.fragment.as_deref());
        Some(url)
    }
}

impl fmt::Display for FetchUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_url() {
            Some(url) => write!(f, "{url}"),
            None => f.write_str(&self.path),
        }
    }
}
