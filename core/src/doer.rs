//! Transports ("doers") that send materialized requests.
//!
//! # Design
//! `Doer` is the only seam to the network. The core never interprets status
//! codes here: 4xx/5xx responses come back as data and are judged by the
//! parser chain. `UreqDoer` is the blocking ureq-backed implementation;
//! `Client` builds one lazily from a `ClientConfig` and reuses it.
//!
//! The process-wide default doer is initialized once, either explicitly via
//! `set_default_doer` at startup or implicitly on first use.

use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use http::Request;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportError;
use crate::response::ResponseBody;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_IDLE_CONNS: usize = 20;
pub const DEFAULT_IDLE_CONN_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends a request and returns the raw response.
pub trait Doer: Send + Sync {
    fn send(&self, request: Request<Bytes>) -> Result<http::Response<ResponseBody>, TransportError>;
}

/// Transport settings. Zero values and an empty proxy select the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ClientConfig {
    pub timeout_in_second: u64,
    pub max_idle_conns: usize,
    pub idle_conn_timeout_in_second: u64,
    pub tls_handshake_timeout_in_second: u64,
    /// Proxy url. Empty uses the proxy from the environment, if any.
    pub proxy: String,
}

fn seconds_or(value: u64, default: Duration) -> Duration {
    if value == 0 {
        default
    } else {
        Duration::from_secs(value)
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        seconds_or(self.timeout_in_second, DEFAULT_TIMEOUT)
    }

    pub fn idle_conns(&self) -> usize {
        if self.max_idle_conns == 0 {
            DEFAULT_MAX_IDLE_CONNS
        } else {
            self.max_idle_conns
        }
    }

    pub fn idle_conn_timeout(&self) -> Duration {
        seconds_or(self.idle_conn_timeout_in_second, DEFAULT_IDLE_CONN_TIMEOUT)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        seconds_or(self.tls_handshake_timeout_in_second, DEFAULT_TLS_HANDSHAKE_TIMEOUT)
    }
}

/// A `Doer` backed by a blocking [`ureq`] agent.
#[derive(Debug, Clone)]
pub struct UreqDoer {
    agent: ureq::Agent,
}

impl UreqDoer {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let proxy = if config.proxy.is_empty() {
            None
        } else {
            let proxy = ureq::Proxy::new(&config.proxy).map_err(|e| TransportError::InvalidProxy {
                url: config.proxy.clone(),
                reason: e.to_string(),
            })?;
            Some(proxy)
        };
        Ok(Self::with_proxy(config, proxy))
    }

    fn with_proxy(config: &ClientConfig, proxy: Option<ureq::Proxy>) -> Self {
        let mut builder = ureq::Agent::config_builder()
            // Status codes are judged by the parser chain.
            .http_status_as_error(false)
            // Extension methods are valid `http::Method`s and are sent as-is.
            .allow_non_standard_methods(true)
            .timeout_global(Some(config.timeout()))
            // ureq has no separate TLS timeout; the connect phase covers the handshake.
            .timeout_connect(Some(config.tls_handshake_timeout()))
            .max_idle_connections(config.idle_conns())
            .max_idle_age(config.idle_conn_timeout());
        if proxy.is_some() {
            builder = builder.proxy(proxy);
        }
        Self {
            agent: builder.build().new_agent(),
        }
    }
}

impl Doer for UreqDoer {
    fn send(&self, request: Request<Bytes>) -> Result<http::Response<ResponseBody>, TransportError> {
        let (parts, body) = request.into_parts();
        let result = if body.is_empty() {
            self.agent.run(Request::from_parts(parts, ()))
        } else {
            self.agent.run(Request::from_parts(parts, body.to_vec()))
        };

        match result {
            Ok(response) => {
                Ok(response.map(|body| Box::new(body.into_reader()) as ResponseBody))
            }
            Err(ureq::Error::Timeout(_)) => Err(TransportError::Timeout),
            Err(ureq::Error::HostNotFound) => {
                Err(TransportError::Connection("host not found".to_owned()))
            }
            Err(ureq::Error::Io(e)) => Err(TransportError::Connection(e.to_string())),
            Err(e) => Err(TransportError::Other(Box::new(e))),
        }
    }
}

/// Transport configuration plus the doer built from it.
///
/// The doer is created on first use under a lock and shared afterwards.
/// Changing `config` after that has no effect on the cached doer.
#[derive(Default)]
pub struct Client {
    pub config: ClientConfig,
    doer: OnceLock<Arc<UreqDoer>>,
    init: Mutex<()>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            doer: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Build a fresh doer from the current config, bypassing the cache.
    pub fn create_doer(&self) -> Result<UreqDoer, TransportError> {
        UreqDoer::new(&self.config)
    }

    /// The cached doer, creating it on first call.
    pub fn doer(&self) -> Result<Arc<UreqDoer>, TransportError> {
        if let Some(doer) = self.doer.get() {
            return Ok(Arc::clone(doer));
        }
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(doer) = self.doer.get() {
            return Ok(Arc::clone(doer));
        }
        debug!(config = ?self.config, "creating transport");
        let doer = Arc::new(self.create_doer()?);
        let _ = self.doer.set(Arc::clone(&doer));
        Ok(doer)
    }

    /// Check that a doer can be built from the config.
    pub fn self_check(&self) -> Result<(), TransportError> {
        self.doer().map(|_| ())
    }
}

impl Clone for Client {
    /// Clones the config only; the clone builds its own doer.
    fn clone(&self) -> Self {
        Self::new(self.config.clone())
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("initialized", &self.doer.get().is_some())
            .finish()
    }
}

impl Doer for Client {
    fn send(&self, request: Request<Bytes>) -> Result<http::Response<ResponseBody>, TransportError> {
        self.doer()?.send(request)
    }
}

static DEFAULT_DOER: OnceLock<Arc<dyn Doer>> = OnceLock::new();

/// The process-wide doer used when a fetcher has no override.
pub fn default_doer() -> Arc<dyn Doer> {
    let doer = DEFAULT_DOER.get_or_init(|| Arc::new(UreqDoer::with_proxy(&ClientConfig::default(), None)));
    Arc::clone(doer)
}

/// Install the process-wide doer. Fails, returning `doer`, once a default is
/// already in place.
pub fn set_default_doer(doer: Arc<dyn Doer>) -> Result<(), Arc<dyn Doer>> {
    DEFAULT_DOER.set(doer)
}
