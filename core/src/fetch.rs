//! Preset execution.
//!
//! Every call builds a fresh `Fetcher`, replays the preset and then the
//! extra commands, and sends the result. The first failing command aborts
//! the call before anything reaches the transport.

use bytes::Bytes;
use tracing::{instrument, trace};

use crate::command::{self, CommandRef};
use crate::error::Error;
use crate::fetcher::Fetcher;
use crate::parser::Parser;
use crate::preset::Preset;
use crate::response::Response;

/// Replay `preset` then `extra` on a fresh fetcher and send the request.
#[instrument(level = "debug", skip_all, fields(commands = preset.len(), extra = extra.len()))]
pub fn execute(preset: &Preset, extra: &[CommandRef]) -> Result<Response, Error> {
    let mut fetcher = Fetcher::new();
    preset.replay(&mut fetcher)?;
    for cmd in extra {
        cmd.apply(&mut fetcher)?;
    }
    trace!(?fetcher, "fetcher ready");
    fetcher.fetch()
}

/// Execute `preset` and run `parser` on the response.
///
/// The response is returned only when parsing succeeds. A status rejection
/// carries a snapshot of the response in `Error::Status`.
pub fn fetch_and_parse<P: Parser>(preset: &Preset, mut parser: P) -> Result<Response, Error> {
    let mut response = execute(preset, &[])?;
    parser.parse(&mut response)?;
    Ok(response)
}

/// Like [`fetch_and_parse`], with `body` sent as the raw request body.
pub fn fetch_with_body_and_parse<P: Parser>(
    preset: &Preset,
    body: impl Into<Bytes>,
    parser: P,
) -> Result<Response, Error> {
    fetch_and_parse(&preset.with(command::body(body)), parser)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{command_fn, set_doer, url};
    use crate::doer::Doer;
    use crate::error::{CommandError, TransportError};
    use crate::parser::{as_string, should_success};
    use crate::response::ResponseBody;
    use http::Request;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Doer that answers every request with its path as the body.
    #[derive(Default)]
    struct PathDoer {
        calls: AtomicUsize,
    }

    impl Doer for PathDoer {
        fn send(&self, request: Request<Bytes>) -> Result<http::Response<ResponseBody>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body: ResponseBody = Box::new(io::Cursor::new(request.uri().path().as_bytes().to_vec()));
            Ok(http::Response::builder().status(200).body(body).unwrap())
        }
    }

    fn preset_for(doer: &Arc<PathDoer>) -> Preset {
        let doer: Arc<dyn Doer> = doer.clone();
        Preset::build([url("http://127.0.0.1/base"), set_doer(doer)])
    }

    #[test]
    fn extra_commands_run_after_preset() {
        let doer = Arc::new(PathDoer::default());
        let preset = preset_for(&doer);
        let mut out = String::new();
        let mut resp = execute(&preset, &[command::path_suffix("/extra")]).unwrap();
        as_string(&mut out).parse(&mut resp).unwrap();
        assert_eq!(out, "/base/extra");
    }

    #[test]
    fn command_error_never_reaches_transport() {
        let doer = Arc::new(PathDoer::default());
        let failing = command_fn(|_| Err(CommandError::MissingUrl));
        let err = execute(&preset_for(&doer), &[failing]).unwrap_err();
        assert!(matches!(err, Error::Command(CommandError::MissingUrl)));
        assert_eq!(doer.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn fetch_and_parse_returns_parsed_response() {
        let doer = Arc::new(PathDoer::default());
        let mut out = String::new();
        let resp = fetch_and_parse(&preset_for(&doer), should_success(as_string(&mut out))).unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(out, "/base");
        assert_eq!(doer.calls.load(Ordering::SeqCst), 1);
    }
}
