//! Realtime-database REST client.
//!
//! [`RtdbChannel`] implements [`DataChannel`] against a hosted realtime
//! JSON database that exposes:
//!
//! * `GET {db}/{path}.json` with `Accept: text/event-stream` – a
//!   server-sent-event stream of `put` / `patch` deltas relative to `path`;
//! * `PUT {db}/{path}.json` – replace the value at `path`.
//!
//! Both requests carry the signed-in user's id token as the `auth` query
//! parameter.
//!
//! The stream protocol is decoded in two pure steps so it can be tested
//! without a network:
//!
//! 1. [`SseDecoder`] turns raw body chunks into [`SseEvent`]s.
//! 2. [`apply_stream_event`] folds each event into a local copy of the
//!    watched subtree.
//!
//! After every successful fold the full subtree is yielded on the watch
//! stream, so consumers always see complete values, never deltas.
//!
//! A watch survives the connection it was opened on.  When the body ends,
//! the transport fails or the server sends `cancel`, the subscription is
//! re-opened after a [`Backoff`] delay; the server's first `put` on the new
//! connection re-seeds the subtree.  Only a rejected credential
//! (`auth_revoked`, or HTTP 401/403 on re-open) ends the stream, with a
//! final [`CareError::Auth`] item.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carewatch_types::CareError;
use futures_util::stream::{self, BoxStream};
use futures_util::{FutureExt, StreamExt, future::BoxFuture};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::channel::{DataChannel, ValueStream, segments, write_at};

// ─────────────────────────────────────────────────────────────────────────────
// Server-sent events
// ─────────────────────────────────────────────────────────────────────────────

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field; `"message"` when the server omitted it.
    pub event: String,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Chunks may split lines (and UTF-8 sequences) anywhere; partial input is
/// buffered until its terminating newline arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    event: String,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a body chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            if let Some(event) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.event.is_empty() && self.data.is_empty() {
                return None;
            }
            let event = std::mem::take(&mut self.event);
            return Some(SseEvent {
                event: if event.is_empty() { "message".to_string() } else { event },
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream protocol
// ─────────────────────────────────────────────────────────────────────────────

/// What a stream event did to the local subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamAction {
    /// The subtree changed; yield it.
    Updated,
    /// Nothing to do (keep-alive, unknown event, malformed payload).
    Ignored,
    /// The server dropped the subscription; it may be opened again.
    Cancelled,
    /// The credential is no longer valid; re-opening will not help.
    Revoked(String),
}

#[derive(Deserialize)]
struct StreamBody {
    path: String,
    #[serde(default)]
    data: Value,
}

/// Fold one realtime-database stream event into `tree`.
///
/// | Event | Effect |
/// |---|---|
/// | `put` | replace the value at `path` (relative to the watched location) |
/// | `patch` | replace each child of `path` named in `data` |
/// | `keep-alive` | none |
/// | `cancel` | subscription dropped, re-open |
/// | `auth_revoked` | credential rejected, stop |
pub fn apply_stream_event(tree: &mut Value, event: &SseEvent) -> StreamAction {
    match event.event.as_str() {
        kind @ ("put" | "patch") => {
            let body: StreamBody = match serde_json::from_str(&event.data) {
                Ok(body) => body,
                Err(e) => {
                    warn!(kind, error = %e, "malformed stream payload");
                    return StreamAction::Ignored;
                }
            };
            let base = segments(&body.path);
            if kind == "put" {
                write_at(tree, &base, body.data);
                return StreamAction::Updated;
            }
            let Value::Object(children) = body.data else {
                warn!("patch payload is not an object");
                return StreamAction::Ignored;
            };
            for (key, value) in children {
                let mut path = base.clone();
                path.extend(segments(&key));
                write_at(tree, &path, value);
            }
            StreamAction::Updated
        }
        "keep-alive" => StreamAction::Ignored,
        "cancel" => StreamAction::Cancelled,
        "auth_revoked" => StreamAction::Revoked("credential no longer valid".to_string()),
        other => {
            debug!(event = other, "ignoring unknown stream event");
            StreamAction::Ignored
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RtdbChannel
// ─────────────────────────────────────────────────────────────────────────────

/// [`DataChannel`] backed by the realtime database's REST streaming API.
#[derive(Clone)]
pub struct RtdbChannel {
    client: reqwest::Client,
    database_url: String,
    id_token: Option<String>,
}

impl RtdbChannel {
    /// `database_url` is the database root, e.g.
    /// `"https://my-project.firebaseio.com"`.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            database_url: database_url.into().trim_end_matches('/').to_string(),
            id_token: None,
        }
    }

    /// Authenticate every request with the signed-in user's id token.
    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        let token = id_token.into();
        self.id_token = (!token.is_empty()).then_some(token);
        self
    }

    /// REST URL of `path`.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}.json", self.database_url, segments(path).join("/"))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, self.url_for(path));
        match &self.id_token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resubscribing watch
// ─────────────────────────────────────────────────────────────────────────────

/// Raw body chunks of one stream connection.
pub type BodyStream = BoxStream<'static, Result<Vec<u8>, CareError>>;

/// Opens a fresh connection for a watched location.
///
/// [`CareError::Auth`] is final; any other error is retried.
pub type Opener = Arc<dyn Fn() -> BoxFuture<'static, Result<BodyStream, CareError>> + Send + Sync>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Doubling reconnect delay, capped at [`MAX_BACKOFF`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }

    /// Start over after a connection delivered data.
    pub fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

struct WatchState {
    path: String,
    open: Opener,
    body: Option<BodyStream>,
    decoder: SseDecoder,
    tree: Value,
    ready: VecDeque<Result<Value, CareError>>,
    backoff: Backoff,
    done: bool,
}

impl WatchState {
    fn connected(&mut self, body: BodyStream) {
        self.body = Some(body);
        self.decoder = SseDecoder::new();
        self.tree = Value::Null;
    }

    fn revoked(&mut self, reason: String) {
        warn!(path = %self.path, %reason, "stream credential rejected");
        self.ready.push_back(Err(CareError::Auth(reason)));
        self.body = None;
        self.done = true;
    }
}

/// Turn an already-open `body` into a [`ValueStream`] that re-opens itself
/// through `open` whenever the connection drops.
pub fn resubscribing(path: &str, open: Opener, body: BodyStream) -> ValueStream {
    let state = WatchState {
        path: path.to_string(),
        open,
        body: Some(body),
        decoder: SseDecoder::new(),
        tree: Value::Null,
        ready: VecDeque::new(),
        backoff: Backoff::default(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            if state.body.is_none() {
                let delay = state.backoff.next_delay();
                debug!(path = %state.path, delay_ms = delay.as_millis() as u64, "re-opening stream");
                tokio::time::sleep(delay).await;
                match (state.open)().await {
                    Ok(body) => {
                        info!(path = %state.path, "stream subscription re-opened");
                        state.connected(body);
                    }
                    Err(CareError::Auth(reason)) => state.revoked(reason),
                    Err(e) => warn!(path = %state.path, error = %e, "stream re-open failed"),
                }
                continue;
            }
            let Some(body) = state.body.as_mut() else {
                continue;
            };

            match body.next().await {
                Some(Ok(chunk)) => {
                    for event in state.decoder.feed(&chunk) {
                        match apply_stream_event(&mut state.tree, &event) {
                            StreamAction::Updated => {
                                state.backoff.reset();
                                if !state.tree.is_null() {
                                    state.ready.push_back(Ok(state.tree.clone()));
                                }
                            }
                            StreamAction::Ignored => {}
                            StreamAction::Cancelled => {
                                warn!(path = %state.path, "stream cancelled by server");
                                state.body = None;
                                break;
                            }
                            StreamAction::Revoked(reason) => {
                                state.revoked(reason);
                                break;
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(path = %state.path, error = %e, "stream transport error");
                    state.body = None;
                }
                None => {
                    debug!(path = %state.path, "stream ended");
                    state.body = None;
                }
            }
        }
    })
    .boxed()
}

impl RtdbChannel {
    async fn open_stream(&self, path: &str) -> Result<BodyStream, CareError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| CareError::Channel(format!("watch {path}: {e}")))?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CareError::Auth(format!("watch {path}: {status}")));
        }
        let response = response
            .error_for_status()
            .map_err(|e| CareError::Channel(format!("watch {path}: {e}")))?;
        let path = path.to_string();
        Ok(response
            .bytes_stream()
            .map(move |chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| CareError::Channel(format!("watch {path}: {e}")))
            })
            .boxed())
    }
}

#[async_trait]
impl DataChannel for RtdbChannel {
    async fn watch(&self, path: &str) -> Result<ValueStream, CareError> {
        let open: Opener = {
            let channel = self.clone();
            let path = path.to_string();
            Arc::new(move || {
                let channel = channel.clone();
                let path = path.clone();
                async move { channel.open_stream(&path).await }.boxed()
            })
        };
        let body = open().await?;
        debug!(path, "stream subscription open");
        Ok(resubscribing(path, open, body))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), CareError> {
        self.request(reqwest::Method::PUT, path)
            .json(&value)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| CareError::Channel(format!("set {path}: {e}")))?;
        Ok(())
    }
}
