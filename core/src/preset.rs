//! Reusable, immutable command sequences and the descriptors that build them.
//!
//! # Design
//! A `Preset` is a persistent list. Each extension allocates one node that
//! points at the previous head and owns only the new batch of commands, so
//! deriving a variant never copies or mutates the original. Nodes are
//! reference counted and immutable, which makes a preset safe to replay from
//! many threads at once.
//!
//! `ServerInfo` and `Server` describe a remote service (base url, default
//! method and headers, optionally transport settings) and produce the base
//! preset for it through `PresetFactory`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use tracing::trace;
use url::Url;

use crate::command::{self, join_path, CommandRef};
use crate::doer::{Client, ClientConfig, Doer};
use crate::error::{CommandError, Error};
use crate::fetch;
use crate::fetcher::Fetcher;
use crate::parser::Parser;
use crate::response::Response;

struct Node {
    prev: Option<Arc<Node>>,
    commands: Vec<CommandRef>,
    /// Total number of commands up to and including this node.
    len: usize,
}

impl Drop for Node {
    // Unlink the chain iteratively; recursive drops overflow on long chains.
    fn drop(&mut self) {
        let mut prev = self.prev.take();
        while let Some(node) = prev {
            match Arc::try_unwrap(node) {
                Ok(mut node) => prev = node.prev.take(),
                Err(_) => break,
            }
        }
    }
}

/// An ordered, immutable, cheaply clonable sequence of commands.
#[derive(Clone, Default)]
pub struct Preset {
    head: Option<Arc<Node>>,
}

impl Preset {
    /// The empty preset. Replaying it is a no-op.
    pub fn new() -> Self {
        Self { head: None }
    }

    pub fn build(cmds: impl IntoIterator<Item = CommandRef>) -> Self {
        Self::new().concat(cmds)
    }

    /// A new preset with `cmd` after the receiver's commands.
    pub fn with(&self, cmd: CommandRef) -> Self {
        self.concat([cmd])
    }

    /// A new preset with `cmds`, in order, after the receiver's commands.
    pub fn concat(&self, cmds: impl IntoIterator<Item = CommandRef>) -> Self {
        let commands: Vec<CommandRef> = cmds.into_iter().collect();
        if commands.is_empty() {
            return self.clone();
        }
        let len = self.len() + commands.len();
        Self {
            head: Some(Arc::new(Node {
                prev: self.head.clone(),
                commands,
                len,
            })),
        }
    }

    /// A new preset with every command of each of `presets`, in argument
    /// order, after the receiver's commands.
    pub fn append<'a>(&self, presets: impl IntoIterator<Item = &'a Preset>) -> Self {
        presets.into_iter().fold(self.clone(), |acc, other| {
            if acc.is_empty() {
                other.clone()
            } else {
                acc.concat(other.commands())
            }
        })
    }

    /// A fresh snapshot of the command sequence.
    pub fn commands(&self) -> Vec<CommandRef> {
        let mut out = Vec::with_capacity(self.len());
        for node in self.nodes() {
            out.extend(node.commands.iter().cloned());
        }
        out
    }

    /// Apply every command to `fetcher` in order, stopping at the first error.
    pub fn replay(&self, fetcher: &mut Fetcher) -> Result<(), CommandError> {
        trace!(commands = self.len(), "replaying preset");
        for node in self.nodes() {
            for cmd in &node.commands {
                cmd.apply(fetcher)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |node| node.len)
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Derive the preset for one endpoint: `suffix` is appended to the path
    /// and `method` replaces the method, after everything already staged.
    pub fn endpoint(&self, method: Method, suffix: impl Into<String>) -> Self {
        self.concat([command::path_suffix(suffix), command::method(method)])
    }

    pub fn fetch(&self) -> Result<Response, Error> {
        fetch::execute(self, &[])
    }

    pub fn fetch_with(&self, extra: &[CommandRef]) -> Result<Response, Error> {
        fetch::execute(self, extra)
    }

    pub fn fetch_with_body(&self, body: impl Into<Bytes>) -> Result<Response, Error> {
        fetch::execute(self, &[command::body(body)])
    }

    pub fn fetch_and_parse<P: Parser>(&self, parser: P) -> Result<Response, Error> {
        fetch::fetch_and_parse(self, parser)
    }

    pub fn fetch_with_body_and_parse<P: Parser>(
        &self,
        body: impl Into<Bytes>,
        parser: P,
    ) -> Result<Response, Error> {
        fetch::fetch_with_body_and_parse(self, body, parser)
    }

    pub fn fetch_with_json_body_and_parse<T, P>(&self, value: T, parser: P) -> Result<Response, Error>
    where
        T: Serialize + Send + Sync + 'static,
        P: Parser,
    {
        fetch::fetch_and_parse(&self.with(command::json_body(value)), parser)
    }

    /// Nodes from oldest to newest.
    fn nodes(&self) -> Vec<&Node> {
        let mut nodes = Vec::new();
        let mut cursor = self.head.as_deref();
        while let Some(node) = cursor {
            nodes.push(node);
            cursor = node.prev.as_deref();
        }
        nodes.reverse();
        nodes
    }
}

impl FromIterator<CommandRef> for Preset {
    fn from_iter<I: IntoIterator<Item = CommandRef>>(iter: I) -> Self {
        Self::build(iter)
    }
}

impl fmt::Debug for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preset").field("len", &self.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// Service descriptors
// ---------------------------------------------------------------------------

/// Something that can produce the base preset for a service.
pub trait PresetFactory {
    fn create_preset(&self) -> Result<Preset, Error>;
}

/// Base url, default method and default headers of a service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub url: String,
    pub header: HeaderMap,
    pub method: Method,
}

impl ServerInfo {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn merge_method(&self, method: Method) -> Self {
        Self {
            method,
            ..self.clone()
        }
    }

    pub fn merge_url(&self, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..self.clone()
        }
    }

    /// A copy whose url path has `path` joined onto it.
    pub fn join(&self, path: &str) -> Result<Self, CommandError> {
        let mut url = Url::parse(&self.url)?;
        let joined = join_path(url.path(), path);
        url.set_path(&joined);
        Ok(Self {
            url: url.to_string(),
            ..self.clone()
        })
    }

    /// True when no url is set.
    pub fn is_empty(&self) -> bool {
        self.url.is_empty()
    }
}

impl PresetFactory for ServerInfo {
    fn create_preset(&self) -> Result<Preset, Error> {
        Ok(Preset::build([
            command::url(self.url.clone()),
            command::method(self.method.clone()),
            command::header(self.header.clone()),
        ]))
    }
}

/// A service descriptor with its own transport settings.
#[derive(Debug, Clone, Default)]
pub struct Server {
    pub info: ServerInfo,
    pub client: Client,
}

impl Server {
    pub fn new(info: ServerInfo, client: Client) -> Self {
        Self { info, client }
    }

    pub fn merge_url(&self, url: impl Into<String>) -> Self {
        Self::new(self.info.merge_url(url), self.client.clone())
    }

    pub fn merge_method(&self, method: Method) -> Self {
        Self::new(self.info.merge_method(method), self.client.clone())
    }

    pub fn join(&self, path: &str) -> Result<Self, CommandError> {
        Ok(Self::new(self.info.join(path)?, self.client.clone()))
    }
}

impl PresetFactory for Server {
    fn create_preset(&self) -> Result<Preset, Error> {
        let doer: Arc<dyn Doer> = self.client.doer()?;
        Ok(self.info.create_preset()?.with(command::set_doer(doer)))
    }
}

/// Serialized form of a `Server`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    pub url: String,
    /// Empty means GET.
    pub method: String,
    pub header: BTreeMap<String, String>,
    pub client: ClientConfig,
}

impl TryFrom<ServerConfig> for Server {
    type Error = CommandError;

    fn try_from(config: ServerConfig) -> Result<Self, Self::Error> {
        let method = if config.method.is_empty() {
            Method::GET
        } else {
            Method::from_bytes(config.method.as_bytes())?
        };

        let mut header = HeaderMap::new();
        for (key, value) in &config.header {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| CommandError::InvalidHeader(format!("{key}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CommandError::InvalidHeader(format!("{key}: {e}")))?;
            header.append(name, value);
        }

        Ok(Server::new(
            ServerInfo {
                url: config.url,
                header,
                method,
            },
            Client::new(config.client),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{command_fn, path_suffix, set_header};

    fn replayed(preset: &Preset) -> Fetcher {
        let mut f = Fetcher::new();
        preset.replay(&mut f).unwrap();
        f
    }

    fn path_of(preset: &Preset) -> String {
        replayed(preset).url.path
    }

    #[test]
    fn empty_preset_is_a_noop() {
        let empty = Preset::new();
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        assert!(empty.commands().is_empty());
        let f = replayed(&empty);
        assert_eq!(f.method, Method::GET);
        assert!(f.url.path.is_empty());
    }

    #[test]
    fn extending_never_mutates_the_original() {
        let base = Preset::build([path_suffix("a")]);
        let left = base.with(path_suffix("b"));
        let right = base.concat([path_suffix("c"), path_suffix("d")]);

        assert_eq!(path_of(&base), "a");
        assert_eq!(path_of(&left), "ab");
        assert_eq!(path_of(&right), "acd");
        assert_eq!(base.len(), 1);
        assert_eq!(right.len(), 3);
    }

    #[test]
    fn append_flattens_in_argument_order() {
        let first = Preset::build([path_suffix("1")]).with(path_suffix("2"));
        let second = Preset::build([path_suffix("3")]);
        let base = Preset::build([path_suffix("0")]);

        let joined = base.append([&first, &second]);
        assert_eq!(path_of(&joined), "0123");
        assert_eq!(joined.len(), 4);
        assert_eq!(path_of(&base), "0");
        assert_eq!(path_of(&Preset::new().append([&first])), "12");
    }

    #[test]
    fn append_with_empty_presets() {
        let base = Preset::build([path_suffix("a"), path_suffix("b")]);
        let empty = Preset::new();

        let joined = base.append([&empty]);
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.commands().len(), 2);
        assert_eq!(path_of(&joined), "ab");

        let joined = base.append([&empty, &base, &empty]);
        assert_eq!(joined.commands().len(), 4);
        assert_eq!(path_of(&joined), "abab");

        let both_empty = empty.append([&Preset::new()]);
        assert!(both_empty.is_empty());
        assert!(both_empty.commands().is_empty());
        let f = replayed(&both_empty);
        assert!(f.url.path.is_empty());
        assert_eq!(f.method, Method::GET);
    }

    #[test]
    fn deep_chains_replay_and_drop() {
        let mut preset = Preset::new();
        for _ in 0..100_000 {
            preset = preset.with(path_suffix(""));
        }
        let shared = preset.with(path_suffix("x"));
        assert_eq!(preset.len(), 100_000);
        assert_eq!(path_of(&shared), "x");

        drop(preset);
        assert_eq!(shared.len(), 100_001);
        drop(shared);
    }

    #[test]
    fn commands_returns_independent_snapshots() {
        let preset = Preset::build([path_suffix("a"), path_suffix("b")]);
        let mut snapshot = preset.commands();
        snapshot.clear();
        assert_eq!(preset.commands().len(), 2);
        assert_eq!(path_of(&preset), "ab");
        assert_eq!(path_of(&preset.commands().into_iter().collect()), "ab");
    }

    #[test]
    fn replay_stops_at_first_error() {
        let preset = Preset::build([
            path_suffix("a"),
            command_fn(|_| Err(CommandError::MissingUrl)),
            path_suffix("b"),
        ]);
        let mut f = Fetcher::new();
        assert!(matches!(preset.replay(&mut f), Err(CommandError::MissingUrl)));
        assert_eq!(f.url.path, "a");
    }

    #[test]
    fn replays_are_deterministic() {
        let preset = Preset::build([
            command::url("http://127.0.0.1/items"),
            set_header("k", "v"),
            command::json_body("hello"),
        ]);
        let a = replayed(&preset);
        let b = replayed(&preset);
        assert_eq!(a.url, b.url);
        assert_eq!(a.method, b.method);
        assert_eq!(a.headers, b.headers);
        assert_eq!(a.body, b.body);
    }

    #[test]
    fn endpoint_keeps_staged_commands() {
        let base = Preset::build([command::url("http://127.0.0.1/api"), set_header("x-token", "t")]);
        let endpoint = base.endpoint(Method::DELETE, "/items/{id}");
        let f = replayed(&endpoint.with(command::replace("{id}", "7")));
        assert_eq!(f.method, Method::DELETE);
        assert_eq!(f.url.path, "/api/items/7");
        assert_eq!(f.headers["x-token"], "t");

        let f = replayed(&base);
        assert_eq!(f.method, Method::GET);
        assert_eq!(f.url.path, "/api");
    }

    #[test]
    fn server_info_builds_base_preset() {
        let mut info = ServerInfo::new("http://127.0.0.1:8000/api").merge_method(Method::POST);
        info.header.insert("x-app", HeaderValue::from_static("demo"));
        assert!(!info.is_empty());
        assert!(ServerInfo::default().is_empty());

        let f = replayed(&info.create_preset().unwrap());
        assert_eq!(f.method, Method::POST);
        assert_eq!(f.url.to_string(), "http://127.0.0.1:8000/api");
        assert_eq!(f.headers["x-app"], "demo");
        assert!(f.doer.is_none());
    }

    #[test]
    fn server_info_join_and_merge_url() {
        let info = ServerInfo::new("http://127.0.0.1/api/");
        assert_eq!(info.join("/v1").unwrap().url, "http://127.0.0.1/api/v1");
        assert_eq!(info.merge_url("http://other/").url, "http://other/");
        assert_eq!(info.url, "http://127.0.0.1/api/");
        assert!(matches!(
            ServerInfo::new("not a url").join("x"),
            Err(CommandError::InvalidUrl(_))
        ));
    }

    #[test]
    fn server_preset_carries_transport() {
        let server = Server::new(ServerInfo::new("http://127.0.0.1/"), Client::default());
        let f = replayed(&server.create_preset().unwrap());
        assert!(f.doer.is_some());
        assert_eq!(server.join("v2").unwrap().info.url, "http://127.0.0.1/v2");
    }

    #[test]
    fn server_with_bad_proxy_fails_to_create_preset() {
        let server = Server::new(
            ServerInfo::new("http://127.0.0.1/"),
            Client::new(ClientConfig {
                proxy: "::not a proxy::".to_string(),
                ..ClientConfig::default()
            }),
        );
        assert!(matches!(server.create_preset(), Err(Error::Transport(_))));
    }

    #[test]
    fn server_config_deserializes() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "url": "http://127.0.0.1:9000",
                "method": "PUT",
                "header": {"x-app": "demo"},
                "client": {"timeout-in-second": 3}
            }"#,
        )
        .unwrap();
        let server = Server::try_from(config).unwrap();
        assert_eq!(server.info.method, Method::PUT);
        assert_eq!(server.info.header["x-app"], "demo");
        assert_eq!(server.client.config.timeout_in_second, 3);

        let bad = ServerConfig {
            header: BTreeMap::from([("bad header".to_string(), "v".to_string())]),
            ..ServerConfig::default()
        };
        assert!(matches!(Server::try_from(bad), Err(CommandError::InvalidHeader(_))));
    }
}
