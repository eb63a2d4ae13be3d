//! Client session: the foreground object applications hold.
//!
//! The session owns the router's lifecycle and every cache (available
//! streams, subscriptions, per-stream receive buffers, error list). All cache
//! mutation happens on the caller's thread inside `process_messages`, so the
//! caches need no locking; the router only produces to the inbound channel
//! and consumes from the outbound channel.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crossbeam::channel::TryRecvError;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::{self, OwnedFormatItem};

use crate::config::ClientConfig;
use crate::error::Transience;
use crate::proto::{Message, Mode, OkBody, ProtoError};
use crate::router::{Inbound, Router, RouterError, RouterHandle};

/// Age past which a cached general status is treated as stale.
pub const STATUS_LIFETIME: Duration = Duration::from_secs(120);

/// Sleep between polling rounds in the blocking helpers.
const POLL_SLEEP: Duration = Duration::from_secs(1);

/// How long `read_stream` drains inbound before returning the buffer.
const READ_DRAIN: Duration = Duration::from_millis(300);

/// Short grace wait when the drain hint says more frames are in flight.
const DRAIN_GRACE: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid call: {0}")]
    Config(String),
    #[error(transparent)]
    Connect(#[from] RouterError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),
    #[error("unknown stream: {0}")]
    UnknownStream(String),
    #[error("subscribe {stream} failed: {reason}")]
    Subscribe { stream: String, reason: String },
    #[error("stream {0} is not subscribed for write")]
    NotSubscribed(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    pub fn transience(&self) -> Transience {
        match self {
            ClientError::Config(_)
            | ClientError::Protocol(_)
            | ClientError::UnknownStream(_)
            | ClientError::NotSubscribed(_) => Transience::Permanent,
            ClientError::Connect(err) => err.transience(),
            ClientError::ConnectionLost | ClientError::Timeout(_) => Transience::Retryable,
            ClientError::Subscribe { .. } => Transience::Unknown,
        }
    }
}

/// Cached server-side status of one stream.
#[derive(Debug, Clone)]
pub struct StreamStatus {
    /// When the most recent status for this stream arrived.
    pub last_update: Instant,
    pub listener_count: u64,
    /// Identifier of the current writer, or empty.
    pub writer: String,
}

impl StreamStatus {
    fn empty() -> Self {
        Self {
            last_update: Instant::now(),
            listener_count: 0,
            writer: String::new(),
        }
    }
}

#[derive(Debug)]
struct RecvBuffer {
    data: String,
    /// Whether the next received byte starts a line (timestamp injection).
    at_line_start: bool,
}

impl Default for RecvBuffer {
    fn default() -> Self {
        Self {
            data: String::new(),
            at_line_start: true,
        }
    }
}

pub struct Session {
    config: ClientConfig,
    timestamp_format: Option<OwnedFormatItem>,
    router: Option<RouterHandle>,
    streams: BTreeMap<String, StreamStatus>,
    subscribed: BTreeMap<String, Mode>,
    buffers: BTreeMap<String, RecvBuffer>,
    /// Queued `fail` strings and asynchronous errors, drained by `get_error`.
    fail_log: Vec<String>,
    /// Most recent synchronous-misuse error, drained by `get_error`.
    last_error: Option<String>,
    last_general_status: Option<Instant>,
    uptime: Option<u64>,
    client_count: Option<u64>,
}

impl Session {
    /// Allocate a session and, unless `no_connect` is set, establish the
    /// connection and wait for the first general status.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let timestamp_format = if config.timestamp_data {
            let parsed = format_description::parse_owned::<2>(&config.timestamp_fmt)
                .map_err(|err| {
                    ClientError::Config(format!(
                        "bad timestamp format {:?}: {err}",
                        config.timestamp_fmt
                    ))
                })?;
            Some(parsed)
        } else {
            None
        };

        let mut session = Self {
            config,
            timestamp_format,
            router: None,
            streams: BTreeMap::new(),
            subscribed: BTreeMap::new(),
            buffers: BTreeMap::new(),
            fail_log: Vec::new(),
            last_error: None,
            last_general_status: None,
            uptime: None,
            client_count: None,
        };
        if !session.config.no_connect {
            session.connect(None)?;
        }
        Ok(session)
    }

    /// Reachability probe: open a TCP connection to the server port and
    /// immediately drop it.
    pub fn check_server(host: &str, port: u16) -> bool {
        crate::router::check_server(host, port)
    }

    /// Start the router and wait for the first general status. A no-op when
    /// already connected.
    pub fn connect(&mut self, host: Option<&str>) -> Result<(), ClientError> {
        if self.connected() {
            return Ok(());
        }
        if let Some(host) = host {
            self.config.server = host.to_string();
        }
        if let Some(stale) = self.router.take() {
            stale.stop(Duration::from_millis(100));
        }
        // The wait below must see a status from the new connection, not a
        // cache left over from a lost one.
        self.clear_caches();

        let handle = Router::start(&self.config.server, self.config.port, self.config.debug)
            .map_err(|err| self.fail(ClientError::Connect(err)))?;
        self.router = Some(handle);

        let deadline = Instant::now() + self.config.timeout();
        loop {
            self.process_messages(Some(POLL_SLEEP));
            if self.last_general_status.is_some() {
                tracing::info!(target: "session", server = %self.config.server, "session established");
                return Ok(());
            }
            if Instant::now() >= deadline {
                if let Some(router) = self.router.take() {
                    router.stop(self.config.timeout());
                }
                self.clear_caches();
                return Err(self.fail(ClientError::Timeout(self.config.timeout())));
            }
        }
    }

    /// Close every subscription, stop the router, and clear the caches.
    /// Cleanup runs on every path, including router-stop escalation.
    pub fn disconnect(&mut self) {
        if let Some(router) = self.router.take() {
            for name in self.subscribed.keys() {
                let _ = router.send(Message::Close {
                    stream: name.clone(),
                });
            }
            router.stop(self.config.timeout());
        }
        self.clear_caches();
    }

    pub fn connected(&self) -> bool {
        self.router.as_ref().is_some_and(RouterHandle::connected)
    }

    /// Drain queued inbound frames, dispatching each by identifier. The first
    /// frame is awaited up to `timeout` (the configured blocking timeout when
    /// `None`); the rest drain without blocking, with a short grace wait
    /// while the router reports more frames in flight. Returns the number of
    /// frames processed.
    pub fn process_messages(&mut self, timeout: Option<Duration>) -> usize {
        let inbound = match self.router.as_ref() {
            Some(router) => router.inbound().clone(),
            None => return 0,
        };
        let wait = timeout.unwrap_or_else(|| self.config.timeout());

        let mut processed = 0usize;
        let mut first = true;
        let mut hint = 0usize;
        loop {
            let event = if first {
                match inbound.recv_timeout(wait) {
                    Ok(event) => event,
                    Err(_) => break,
                }
            } else {
                match inbound.try_recv() {
                    Ok(event) => event,
                    Err(TryRecvError::Empty) if hint > 0 => {
                        match inbound.recv_timeout(DRAIN_GRACE) {
                            Ok(event) => event,
                            Err(_) => break,
                        }
                    }
                    Err(_) => break,
                }
            };
            first = false;
            match event {
                Inbound::Frame { message, queued } => {
                    hint = queued;
                    self.dispatch(message);
                    processed += 1;
                }
                Inbound::ProtocolError(error) => {
                    tracing::warn!(target: "session", "{error}");
                    self.fail_log.push(error);
                }
                Inbound::Disconnected => {
                    tracing::warn!(target: "session", "connection lost");
                    self.fail_log.push("connection lost".to_string());
                    break;
                }
            }
        }
        processed
    }

    /// Ask the server for a fresh general status.
    pub fn req_available_streams(&mut self) -> Result<(), ClientError> {
        self.send(Message::Status)
    }

    /// The cached list of stream names.
    pub fn read_available_streams(&self) -> Vec<String> {
        self.streams.keys().cloned().collect()
    }

    /// The list of stream names, refreshed first when the cached general
    /// status is absent or older than [`STATUS_LIFETIME`]. A refresh that
    /// never arrives is recorded as an error; the stale cache is kept.
    pub fn available_streams(&mut self) -> Vec<String> {
        let stale = self
            .last_general_status
            .is_none_or(|at| at.elapsed() > STATUS_LIFETIME);
        if stale && self.req_available_streams().is_ok() {
            let requested_at = Instant::now();
            let deadline = requested_at + 2 * self.config.timeout();
            loop {
                self.process_messages(Some(POLL_SLEEP));
                if self
                    .last_general_status
                    .is_some_and(|at| at >= requested_at)
                {
                    break;
                }
                if Instant::now() >= deadline {
                    tracing::warn!(target: "session", "status refresh timed out");
                    self.fail_log.push("status refresh timed out".to_string());
                    break;
                }
            }
        }
        self.read_available_streams()
    }

    /// Send an open request. The stream must appear in the cached status.
    pub fn req_open_stream(&mut self, name: &str, mode: Mode) -> Result<(), ClientError> {
        if name.is_empty() {
            return Err(self.fail(ClientError::Config("stream name is required".into())));
        }
        let stream = name.to_uppercase();
        if !self.streams.contains_key(&stream) {
            return Err(self.fail(ClientError::UnknownStream(stream)));
        }
        let mode = if mode.is_empty() { Mode::READ } else { mode };
        self.send(Message::Open {
            stream,
            mode: mode.to_string(),
        })
    }

    /// Send a close request. A no-op for streams that are not subscribed.
    pub fn req_close_stream(&mut self, name: &str) -> Result<(), ClientError> {
        if name.is_empty() {
            return Err(self.fail(ClientError::Config("stream name is required".into())));
        }
        let stream = name.to_uppercase();
        if !self.subscribed.contains_key(&stream) {
            return Ok(());
        }
        self.send(Message::Close { stream })
    }

    /// Subscribe to a stream and wait for the acknowledgement. Every
    /// requested permission must appear in the server-confirmed mode.
    pub fn subscribe(&mut self, name: &str, mode: Mode) -> Result<(), ClientError> {
        let mode = if mode.is_empty() { Mode::READ } else { mode };
        let stream = name.to_uppercase();

        self.available_streams();
        let failures_before = self.fail_log.len();
        self.req_open_stream(&stream, mode)?;

        let deadline = Instant::now() + self.config.timeout();
        loop {
            self.process_messages(Some(POLL_SLEEP));
            if let Some(confirmed) = self.subscribed.get(&stream).copied() {
                if confirmed.contains(mode) {
                    tracing::debug!(target: "session", stream = %stream, mode = %confirmed, "subscribed");
                    return Ok(());
                }
                let err = ClientError::Subscribe {
                    stream: stream.clone(),
                    reason: format!("server granted \"{confirmed}\", wanted \"{mode}\""),
                };
                self.fail_log.push(err.to_string());
                return Err(err);
            }
            if self.fail_log.len() > failures_before {
                return Err(ClientError::Subscribe {
                    stream,
                    reason: "server refused".to_string(),
                });
            }
            if Instant::now() >= deadline {
                let err = ClientError::Timeout(self.config.timeout());
                self.fail_log.push(format!("subscribe {stream}: {err}"));
                return Err(err);
            }
        }
    }

    /// Drain inbound briefly, then return and clear the stream's receive
    /// buffer. With `timestamp_data` on, CR CR LF and CR LF are normalized to
    /// LF and a timestamp is injected at each line start; line starts are
    /// tracked across reads, so a buffer ending in LF never gets a trailing
    /// timestamp.
    pub fn read_stream(&mut self, name: &str) -> Result<String, ClientError> {
        if name.is_empty() {
            return Err(self.fail(ClientError::Config("stream name is required".into())));
        }
        let stream = name.to_uppercase();
        self.process_messages(Some(READ_DRAIN));

        let stamp = if self.config.timestamp_data {
            Some(self.current_stamp())
        } else {
            None
        };
        let Some(buffer) = self.buffers.get_mut(&stream) else {
            return Err(self.fail(ClientError::NotSubscribed(stream)));
        };
        let data = std::mem::take(&mut buffer.data);
        match stamp {
            Some(stamp) if !data.is_empty() => {
                let (stamped, at_line_start) = stamp_lines(&data, buffer.at_line_start, &stamp);
                buffer.at_line_start = at_line_start;
                Ok(stamped)
            }
            _ => Ok(data),
        }
    }

    /// Inject data into a stream. Requires a subscription with `write`; the
    /// CR LF line terminator is appended here.
    pub fn write_stream(&mut self, name: &str, data: &str) -> Result<(), ClientError> {
        if name.is_empty() {
            return Err(self.fail(ClientError::Config("stream name is required".into())));
        }
        let stream = name.to_uppercase();
        match self.subscribed.get(&stream) {
            Some(mode) if mode.write => {}
            _ => return Err(self.fail(ClientError::NotSubscribed(stream))),
        }
        self.send(Message::Write {
            stream,
            data: format!("{data}\r\n"),
        })
    }

    /// The most recent single-shot error plus any queued fail strings,
    /// concatenated. Read-and-clear.
    pub fn get_error(&mut self) -> String {
        let mut parts = Vec::new();
        if let Some(error) = self.last_error.take() {
            parts.push(error);
        }
        parts.append(&mut self.fail_log);
        parts.join("\n")
    }

    pub fn uptime(&self) -> Option<u64> {
        self.uptime
    }

    pub fn client_count(&self) -> Option<u64> {
        self.client_count
    }

    /// Current subscriptions by uppercase stream name.
    pub fn subscriptions(&self) -> &BTreeMap<String, Mode> {
        &self.subscribed
    }

    pub fn stream_status(&self, name: &str) -> Option<&StreamStatus> {
        self.streams.get(&name.to_uppercase())
    }

    fn send(&mut self, message: Message) -> Result<(), ClientError> {
        let sent = match self.router.as_ref() {
            Some(router) if router.connected() => router.send(message).is_ok(),
            _ => false,
        };
        if sent {
            Ok(())
        } else {
            Err(self.fail(ClientError::ConnectionLost))
        }
    }

    /// Record a synchronous failure: logged immediately, kept as the
    /// single-shot error for `get_error`, and handed back to the caller.
    fn fail(&mut self, err: ClientError) -> ClientError {
        tracing::error!(target: "session", "{err}");
        self.last_error = Some(err.to_string());
        err
    }

    fn clear_caches(&mut self) {
        self.streams.clear();
        self.subscribed.clear();
        self.buffers.clear();
        self.last_general_status = None;
        self.uptime = None;
        self.client_count = None;
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::Data { stream, data } => {
                let stream = stream.to_uppercase();
                match self.buffers.get_mut(&stream) {
                    Some(buffer) => buffer.data.push_str(&data),
                    // Subscription may already be closed.
                    None => {
                        tracing::trace!(target: "session", stream = %stream, "dropping data for unsubscribed stream");
                    }
                }
            }
            Message::Ok(body) => self.dispatch_ok(body),
            Message::Fail { command, error } => {
                let entry = match command {
                    Some(command) => format!("{command}: {error}"),
                    None => error,
                };
                tracing::warn!(target: "session", "server failure: {entry}");
                self.fail_log.push(entry);
            }
            other => {
                tracing::debug!(target: "session", identifier = other.identifier(), "ignoring unexpected frame");
            }
        }
    }

    fn dispatch_ok(&mut self, body: OkBody) {
        match body.command.as_str() {
            "open" => {
                let Some(stream) = body.stream else {
                    tracing::debug!(target: "session", "open ack without stream");
                    return;
                };
                let stream = stream.to_uppercase();
                let mode = Mode::parse(body.mode.as_deref().unwrap_or("read"));
                self.subscribed.insert(stream.clone(), mode);
                self.buffers.entry(stream).or_default();
            }
            "close" => {
                let Some(stream) = body.stream else {
                    tracing::debug!(target: "session", "close ack without stream");
                    return;
                };
                let stream = stream.to_uppercase();
                self.subscribed.remove(&stream);
                self.buffers.remove(&stream);
            }
            "status" => match body.stream {
                Some(stream) => {
                    let stream = stream.to_uppercase();
                    let status = self
                        .streams
                        .entry(stream)
                        .or_insert_with(StreamStatus::empty);
                    status.listener_count = body.listener_count.unwrap_or(0);
                    status.writer = body.writer.unwrap_or_default();
                    status.last_update = Instant::now();
                }
                None => {
                    self.last_general_status = Some(Instant::now());
                    self.uptime = body.uptime;
                    self.client_count = body.client_count;
                    let names: Vec<String> = body
                        .streams
                        .unwrap_or_default()
                        .iter()
                        .map(|name| name.to_uppercase())
                        .collect();
                    // Descriptors for vanished streams go away; receive
                    // buffers stay until drained or closed.
                    self.streams.retain(|name, _| names.contains(name));
                    for name in names {
                        self.streams
                            .entry(name)
                            .or_insert_with(StreamStatus::empty);
                    }
                }
            },
            "write" => {}
            other => {
                tracing::debug!(target: "session", command = other, "ignoring unknown ok command");
            }
        }
    }

    fn current_stamp(&self) -> String {
        let Some(format) = self.timestamp_format.as_ref() else {
            return String::new();
        };
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        match now.format(format) {
            Ok(stamp) => stamp,
            Err(err) => {
                tracing::warn!(target: "session", "timestamp format failed: {err}");
                String::new()
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.router.is_some() {
            self.disconnect();
        }
    }
}

/// Normalize CR CR LF / CR LF to LF, strip stray CR, and inject `stamp` at
/// each line start. Returns the stamped text and whether the next byte of
/// this stream starts a line.
fn stamp_lines(data: &str, mut at_line_start: bool, stamp: &str) -> (String, bool) {
    let normalized = data
        .replace("\r\r\n", "\n")
        .replace("\r\n", "\n")
        .replace('\r', "");
    let mut out = String::with_capacity(normalized.len());
    for piece in normalized.split_inclusive('\n') {
        if at_line_start {
            out.push_str(stamp);
        }
        out.push_str(piece);
        at_line_start = piece.ends_with('\n');
    }
    (out, at_line_start)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn offline() -> Session {
        Session::new(ClientConfig {
            no_connect: true,
            ..ClientConfig::default()
        })
        .expect("session")
    }

    fn ok_open(stream: &str, mode: &str) -> Message {
        Message::Ok(OkBody {
            command: "open".into(),
            stream: Some(stream.into()),
            mode: Some(mode.into()),
            ..OkBody::default()
        })
    }

    fn general_status(streams: &[&str]) -> Message {
        Message::Ok(OkBody {
            command: "status".into(),
            streams: Some(streams.iter().map(|s| s.to_string()).collect()),
            uptime: Some(10),
            client_count: Some(1),
            ..OkBody::default()
        })
    }

    #[test]
    fn open_ack_inserts_subscription_and_buffer() {
        let mut session = offline();
        session.dispatch(ok_open("con1", "read write"));
        assert_eq!(
            session.subscriptions().get("CON1").copied(),
            Some(Mode::READ_WRITE)
        );
        assert!(session.buffers.contains_key("CON1"));
    }

    #[test]
    fn close_ack_removes_subscription_and_buffer() {
        let mut session = offline();
        session.dispatch(ok_open("CON1", "read"));
        session.dispatch(Message::Ok(OkBody {
            command: "close".into(),
            stream: Some("con1".into()),
            ..OkBody::default()
        }));
        assert!(session.subscriptions().is_empty());
        assert!(session.buffers.is_empty());
    }

    #[test]
    fn data_appends_in_order_for_subscribed_stream() {
        let mut session = offline();
        session.dispatch(ok_open("CON1", "read"));
        session.dispatch(Message::Data {
            stream: "con1".into(),
            data: "first\n".into(),
        });
        session.dispatch(Message::Data {
            stream: "CON1".into(),
            data: "second\n".into(),
        });
        assert_eq!(session.buffers["CON1"].data, "first\nsecond\n");
    }

    #[test]
    fn data_for_unknown_stream_is_dropped_without_creating_a_buffer() {
        let mut session = offline();
        session.dispatch(Message::Data {
            stream: "GHOST".into(),
            data: "boo".into(),
        });
        assert!(session.buffers.is_empty());
        assert!(session.get_error().is_empty());
    }

    #[test]
    fn general_status_prunes_vanished_streams_but_keeps_buffers() {
        let mut session = offline();
        session.dispatch(general_status(&["a", "b"]));
        assert_eq!(session.read_available_streams(), vec!["A", "B"]);
        assert_eq!(session.uptime(), Some(10));
        assert_eq!(session.client_count(), Some(1));

        session.dispatch(ok_open("A", "read"));
        session.dispatch(Message::Data {
            stream: "A".into(),
            data: "tail".into(),
        });
        session.dispatch(general_status(&["b"]));
        assert_eq!(session.read_available_streams(), vec!["B"]);
        // The undrained buffer survives the descriptor.
        assert_eq!(session.buffers["A"].data, "tail");
    }

    #[test]
    fn stream_status_upserts_descriptor() {
        let mut session = offline();
        session.dispatch(Message::Ok(OkBody {
            command: "status".into(),
            stream: Some("con1".into()),
            listener_count: Some(3),
            writer: Some("alice".into()),
            ..OkBody::default()
        }));
        let status = session.stream_status("con1").expect("descriptor");
        assert_eq!(status.listener_count, 3);
        assert_eq!(status.writer, "alice");
    }

    #[test]
    fn fail_frames_accumulate_and_drain() {
        let mut session = offline();
        session.dispatch(Message::Fail {
            command: Some("open".into()),
            error: "no such stream".into(),
        });
        session.dispatch(Message::Fail {
            command: None,
            error: "bare failure".into(),
        });
        let report = session.get_error();
        assert!(report.contains("open: no such stream"));
        assert!(report.contains("bare failure"));
        assert!(session.get_error().is_empty());
    }

    #[test]
    fn write_ack_is_a_no_op() {
        let mut session = offline();
        session.dispatch(Message::Ok(OkBody {
            command: "write".into(),
            ..OkBody::default()
        }));
        assert!(session.get_error().is_empty());
        assert!(session.subscriptions().is_empty());
    }

    #[test]
    fn write_without_write_permission_is_rejected() {
        let mut session = offline();
        session.dispatch(ok_open("CON1", "read"));
        let err = session.write_stream("con1", "x").expect_err("rejected");
        assert!(matches!(err, ClientError::NotSubscribed(_)));
        assert!(session.get_error().contains("not subscribed for write"));
    }

    #[test]
    fn req_close_on_unsubscribed_stream_is_a_no_op() {
        let mut session = offline();
        assert!(session.req_close_stream("CON1").is_ok());
        assert!(session.get_error().is_empty());
    }

    #[test]
    fn req_open_rejects_unknown_stream() {
        let mut session = offline();
        let err = session
            .req_open_stream("nowhere", Mode::READ)
            .expect_err("rejected");
        assert!(matches!(err, ClientError::UnknownStream(_)));
    }

    #[test]
    fn missing_stream_name_is_a_config_error() {
        let mut session = offline();
        assert!(matches!(
            session.req_open_stream("", Mode::READ),
            Err(ClientError::Config(_))
        ));
        assert!(matches!(
            session.read_stream(""),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn bad_timestamp_format_is_rejected_at_construction() {
        let result = Session::new(ClientConfig {
            no_connect: true,
            timestamp_data: true,
            timestamp_fmt: "[not-a-component]".into(),
            ..ClientConfig::default()
        });
        assert!(matches!(result, Err(ClientError::Config(_))));
    }

    #[test]
    fn stamp_lines_prefixes_line_starts_only() {
        let (out, at_start) = stamp_lines("one\ntwo\n", true, "T ");
        assert_eq!(out, "T one\nT two\n");
        assert!(at_start);
    }

    #[test]
    fn stamp_lines_tracks_partial_lines_across_reads() {
        let (out, at_start) = stamp_lines("par", true, "T ");
        assert_eq!(out, "T par");
        assert!(!at_start);
        let (out, at_start) = stamp_lines("tial\nnext\n", at_start, "T ");
        assert_eq!(out, "tial\nT next\n");
        assert!(at_start);
    }

    #[test]
    fn stamp_lines_normalizes_carriage_returns() {
        let (out, _) = stamp_lines("a\r\r\nb\r\nc\rd\n", true, "T ");
        assert_eq!(out, "T a\nT b\nT cd\n");
    }

    #[test]
    fn disconnect_clears_everything() {
        let mut session = offline();
        session.dispatch(general_status(&["A"]));
        session.dispatch(ok_open("A", "read"));
        session.disconnect();
        assert!(!session.connected());
        assert!(session.subscriptions().is_empty());
        assert!(session.buffers.is_empty());
        assert!(session.read_available_streams().is_empty());
    }
}
