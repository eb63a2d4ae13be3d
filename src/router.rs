//! Background router owning the TCP connection.
//!
//! The router hides all blocking socket I/O from the application. A reader
//! thread reassembles CR LF frames; the router thread multiplexes the reader
//! channel, the outbound channel, and a bounded tick so a shutdown signal is
//! observed within half a second. Server pings are answered here and never
//! reach the session.

use std::fs::File;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvError, RecvTimeoutError, Sender, after, bounded, unbounded};
use thiserror::Error;

use crate::error::Transience;
use crate::proto::{FRAME_TERMINATOR, Message, ProtoError, decode_frame, encode_frame};

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on one multiplex wait; keeps shutdown latency bounded.
const TICK: Duration = Duration::from_millis(500);

/// Raw inbound frames land here when debug logging is on. Truncated per run.
const RAW_LOG_FILE: &str = "raw.log";

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },
    #[error("{0} resolves to no addresses")]
    NoAddress(String),
    #[error("encode failed: {0}")]
    Encode(#[from] ProtoError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("router thread spawn failed: {0}")]
    Spawn(#[source] std::io::Error),
}

impl RouterError {
    pub fn transience(&self) -> Transience {
        match self {
            RouterError::Connect { .. }
            | RouterError::ConnectTimeout { .. }
            | RouterError::Io(_) => Transience::Retryable,
            RouterError::NoAddress(_) | RouterError::Encode(_) => Transience::Permanent,
            RouterError::Spawn(_) => Transience::Unknown,
        }
    }
}

/// What the router delivers to the session.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A decoded frame, plus how many more were queued behind it at the
    /// moment of delivery (drain hint).
    Frame { message: Message, queued: usize },
    /// An inbound frame that failed to decode or validate. Non-fatal; the
    /// offending frame was dropped.
    ProtocolError(String),
    /// The socket closed or errored; the router is exiting.
    Disconnected,
}

enum ReaderEvent {
    Frame(Vec<u8>),
    Closed(Option<std::io::Error>),
}

/// Reachability probe: connect to the server port, then immediately drop.
pub fn check_server(host: &str, port: u16) -> bool {
    connect(host, port).is_ok()
}

fn connect(host: &str, port: u16) -> Result<TcpStream, RouterError> {
    let addr = format!("{host}:{port}");
    let resolved = addr.to_socket_addrs().map_err(|source| RouterError::Connect {
        addr: addr.clone(),
        source,
    })?;

    let mut last_err = None;
    for socket_addr in resolved {
        match TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    match last_err {
        Some(err) if err.kind() == std::io::ErrorKind::TimedOut => {
            Err(RouterError::ConnectTimeout {
                addr,
                timeout: CONNECT_TIMEOUT,
            })
        }
        Some(err) => Err(RouterError::Connect { addr, source: err }),
        None => Err(RouterError::NoAddress(addr)),
    }
}

pub struct Router;

impl Router {
    /// Establish the connection and spawn the background threads.
    pub fn start(host: &str, port: u16, debug: bool) -> Result<RouterHandle, RouterError> {
        let stream = connect(host, port)?;
        stream.set_nodelay(true)?;
        tracing::info!(target: "router", server = %host, port, "connected");

        let raw_log = if debug {
            match File::create(RAW_LOG_FILE) {
                Ok(file) => Some(file),
                Err(err) => {
                    tracing::warn!(target: "router", "raw log unavailable: {err}");
                    None
                }
            }
        } else {
            None
        };

        let (outbound_tx, outbound_rx) = unbounded::<Message>();
        let (inbound_tx, inbound_rx) = unbounded::<Inbound>();
        let (reader_tx, reader_rx) = unbounded::<ReaderEvent>();
        let (done_tx, done_rx) = bounded::<()>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let connected = Arc::new(AtomicBool::new(true));

        let control = stream.try_clone()?;
        let reader_stream = stream.try_clone()?;
        let reader_handle = thread::Builder::new()
            .name("consoled-reader".into())
            .spawn(move || run_reader_loop(reader_stream, reader_tx))
            .map_err(RouterError::Spawn)?;

        let router = RouterLoop {
            stream,
            reader_rx,
            outbound_rx,
            inbound_tx,
            shutdown: Arc::clone(&shutdown),
            connected: Arc::clone(&connected),
            raw_log,
        };
        let join = match thread::Builder::new()
            .name("consoled-router".into())
            .spawn(move || {
                router.run();
                let _ = reader_handle.join();
                let _ = done_tx.send(());
            }) {
            Ok(join) => join,
            Err(err) => {
                // Unblock and reap the reader before reporting the failure.
                let _ = control.shutdown(Shutdown::Both);
                return Err(RouterError::Spawn(err));
            }
        };

        Ok(RouterHandle {
            outbound: outbound_tx,
            inbound: inbound_rx,
            shutdown,
            connected,
            done: done_rx,
            control,
            join,
        })
    }
}

/// The session's side of a running router.
pub struct RouterHandle {
    outbound: Sender<Message>,
    inbound: Receiver<Inbound>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    done: Receiver<()>,
    control: TcpStream,
    join: JoinHandle<()>,
}

impl RouterHandle {
    /// Queue a frame for the server. Fails only when the router has exited.
    pub fn send(&self, message: Message) -> Result<(), crossbeam::channel::SendError<Message>> {
        self.outbound.send(message)
    }

    pub fn inbound(&self) -> &Receiver<Inbound> {
        &self.inbound
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Signal shutdown and wait for the router to exit. Past `timeout` the
    /// socket is shut down to unblock the threads; a router that still does
    /// not exit is detached.
    pub fn stop(self, timeout: Duration) {
        self.shutdown.store(true, Ordering::Relaxed);
        if matches!(self.done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
            tracing::warn!(target: "router", "router did not stop in {timeout:?}; closing socket");
            let _ = self.control.shutdown(Shutdown::Both);
            if matches!(
                self.done.recv_timeout(Duration::from_secs(1)),
                Err(RecvTimeoutError::Timeout)
            ) {
                tracing::error!(target: "router", "router thread stuck; detaching");
                return;
            }
        }
        let _ = self.join.join();
    }
}

fn run_reader_loop(mut stream: TcpStream, reader_tx: Sender<ReaderEvent>) {
    let mut pending = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => {
                let _ = reader_tx.send(ReaderEvent::Closed(None));
                break;
            }
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                for frame in split_frames(&mut pending) {
                    if reader_tx.send(ReaderEvent::Frame(frame)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = reader_tx.send(ReaderEvent::Closed(Some(err)));
                break;
            }
        }
    }
}

/// Extract CR LF terminated frames; a partial tail stays in the buffer until
/// the next read.
fn split_frames(pending: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut frames = Vec::new();
    while let Some(pos) = pending
        .windows(FRAME_TERMINATOR.len())
        .position(|window| window == FRAME_TERMINATOR)
    {
        let mut frame: Vec<u8> = pending.drain(..pos + FRAME_TERMINATOR.len()).collect();
        frame.truncate(pos);
        frames.push(frame);
    }
    frames
}

enum Wake {
    Reader(Result<ReaderEvent, RecvError>),
    Outbound(Result<Message, RecvError>),
    Tick,
}

struct RouterLoop {
    stream: TcpStream,
    reader_rx: Receiver<ReaderEvent>,
    outbound_rx: Receiver<Message>,
    inbound_tx: Sender<Inbound>,
    shutdown: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    raw_log: Option<File>,
}

impl RouterLoop {
    fn run(mut self) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                tracing::debug!(target: "router", "shutdown signal observed");
                break;
            }

            let tick = after(TICK);
            let wake = crossbeam::select! {
                recv(self.reader_rx) -> event => Wake::Reader(event),
                recv(self.outbound_rx) -> message => Wake::Outbound(message),
                recv(tick) -> _ => Wake::Tick,
            };

            match wake {
                Wake::Reader(Ok(ReaderEvent::Frame(bytes))) => self.handle_frame(&bytes),
                Wake::Reader(Ok(ReaderEvent::Closed(err))) => {
                    match err {
                        Some(err) => {
                            tracing::warn!(target: "router", "connection lost: {err}");
                        }
                        None => tracing::info!(target: "router", "server closed the connection"),
                    }
                    break;
                }
                Wake::Reader(Err(_)) => break,
                Wake::Outbound(Ok(message)) => {
                    if let Err(err) = self.write_frame(&message) {
                        tracing::warn!(target: "router", "write failed: {err}");
                        break;
                    }
                }
                // The session dropped its handle.
                Wake::Outbound(Err(_)) => break,
                Wake::Tick => {}
            }
        }
        self.finish();
    }

    fn handle_frame(&mut self, bytes: &[u8]) {
        if let Some(raw_log) = self.raw_log.as_mut() {
            let _ = raw_log.write_all(bytes);
            let _ = raw_log.write_all(FRAME_TERMINATOR);
        }
        match decode_frame(bytes) {
            Ok(envelope) => match envelope.message {
                Message::PingRequest => {
                    tracing::trace!(target: "router", "ping");
                    if let Err(err) = self.write_frame(&Message::PingResponse) {
                        tracing::warn!(target: "router", "ping response failed: {err}");
                    }
                }
                message => {
                    let queued = self.reader_rx.len();
                    let _ = self.inbound_tx.send(Inbound::Frame { message, queued });
                }
            },
            Err(err) => {
                tracing::warn!(target: "router", "dropping undecodable frame: {err}");
                let _ = self.inbound_tx.send(Inbound::ProtocolError(err.to_string()));
            }
        }
    }

    fn write_frame(&mut self, message: &Message) -> Result<(), RouterError> {
        let bytes = encode_frame(message)?;
        self.stream.write_all(&bytes)?;
        Ok(())
    }

    fn finish(mut self) {
        // Flush whatever the session queued before the socket goes away;
        // close requests issued during disconnect ride this path.
        while let Ok(message) = self.outbound_rx.try_recv() {
            if self.write_frame(&message).is_err() {
                break;
            }
        }
        self.connected.store(false, Ordering::Relaxed);
        let _ = self.stream.shutdown(Shutdown::Both);
        let _ = self.inbound_tx.send(Inbound::Disconnected);
        tracing::debug!(target: "router", "router stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
