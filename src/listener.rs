//! Loopback TCP listeners for the producer's data and status streams.
//!
//! Each listener owns one fixed port, services one producer connection at a
//! time, and forwards decoded events to the session controller over a
//! bounded channel. The accept and read loops poll with short timeouts so a
//! shutdown flag is observed promptly.

use crate::protocol::{self, ChannelReadings, RelayStatus};
use crossbeam_channel::Sender;
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the accept loop sleeps between polls.
const ACCEPT_POLL: Duration = Duration::from_millis(200);

/// Read timeout on an accepted connection.
const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest unterminated line the read loop will buffer. Protocol lines are
/// under 200 bytes; anything beyond this is not our protocol.
const MAX_PENDING_LINE: usize = 64 * 1024;

/// Decoded event handed to the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// A successfully parsed measurement, in canonical channel order.
    Frame(ChannelReadings),
    /// An InfluxDB relay status notification.
    Relay(RelayStatus),
}

/// Which stream a listener services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    /// `SENSOR:` measurement lines.
    Data,
    /// `INFLUX:OK` / `INFLUX:ERROR` tokens.
    Status,
}

impl ListenerKind {
    fn label(&self) -> &'static str {
        match self {
            ListenerKind::Data => "data",
            ListenerKind::Status => "status",
        }
    }

    /// Decode one line into an event, or `None` for lines to discard.
    ///
    /// Malformed measurement lines are logged and dropped here; they never
    /// reach the controller and never terminate the listener.
    fn decode(&self, line: &str) -> Option<IngestEvent> {
        match self {
            ListenerKind::Data => {
                if !line.starts_with(protocol::SENSOR_PREFIX) {
                    return None;
                }
                match protocol::parse_sensor_line(line) {
                    Ok(readings) => Some(IngestEvent::Frame(readings)),
                    Err(e) => {
                        tracing::debug!("discarding malformed measurement line: {e}");
                        None
                    }
                }
            }
            ListenerKind::Status => protocol::parse_status_line(line).map(IngestEvent::Relay),
        }
    }
}

/// Errors from listener setup and lifecycle.
#[derive(Debug)]
pub enum ListenerError {
    AlreadyRunning,
    Bind { addr: SocketAddr, message: String },
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerError::AlreadyRunning => write!(f, "listener is already running"),
            ListenerError::Bind { addr, message } => {
                write!(f, "failed to bind {addr}: {message}")
            }
        }
    }
}

impl std::error::Error for ListenerError {}

/// One of the two always-on ingestion listeners.
#[derive(Debug)]
pub struct IngestListener {
    kind: ListenerKind,
    local_addr: SocketAddr,
    socket: Option<TcpListener>,
    sender: Sender<IngestEvent>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl IngestListener {
    /// Bind the listener port. Binding eagerly lets startup fail fast when a
    /// required port is taken.
    pub fn bind(
        addr: SocketAddr,
        kind: ListenerKind,
        sender: Sender<IngestEvent>,
    ) -> Result<Self, ListenerError> {
        let socket = TcpListener::bind(addr).map_err(|e| ListenerError::Bind {
            addr,
            message: e.to_string(),
        })?;
        let local_addr = socket.local_addr().map_err(|e| ListenerError::Bind {
            addr,
            message: e.to_string(),
        })?;

        Ok(Self {
            kind,
            local_addr,
            socket: Some(socket),
            sender,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        })
    }

    /// The bound address (useful when binding port 0 in tests).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start servicing connections in a background thread.
    pub fn start(&mut self) -> Result<(), ListenerError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ListenerError::AlreadyRunning);
        }
        let socket = self.socket.take().ok_or(ListenerError::AlreadyRunning)?;
        if let Err(e) = socket.set_nonblocking(true) {
            return Err(ListenerError::Bind {
                addr: self.local_addr,
                message: e.to_string(),
            });
        }

        self.running.store(true, Ordering::SeqCst);

        let kind = self.kind;
        let sender = self.sender.clone();
        let running = self.running.clone();
        let addr = self.local_addr;

        let handle = thread::spawn(move || {
            tracing::info!("{} listener accepting on {addr}", kind.label());
            run_accept_loop(socket, kind, sender, &running);
            running.store(false, Ordering::SeqCst);
        });

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the listener and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Whether the background thread is servicing connections.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for IngestListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Accept connections sequentially until the shutdown flag clears.
fn run_accept_loop(
    socket: TcpListener,
    kind: ListenerKind,
    sender: Sender<IngestEvent>,
    running: &Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match socket.accept() {
            Ok((stream, peer)) => {
                tracing::info!("{} listener: producer connected from {peer}", kind.label());
                if let Err(e) = service_connection(stream, kind, &sender, running) {
                    tracing::warn!("{} listener: connection error: {e}", kind.label());
                }
                tracing::info!("{} listener: producer disconnected", kind.label());
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                // Transport error on accept. Non-fatal; keep servicing.
                tracing::warn!("{} listener: accept failed: {e}", kind.label());
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

/// Read newline-delimited lines from one producer connection.
///
/// A single read may carry zero, one, or several lines; each complete line
/// is decoded and dispatched independently. A zero-byte read means the peer
/// disconnected, which returns control to the accept loop.
fn service_connection(
    stream: TcpStream,
    kind: ListenerKind,
    sender: &Sender<IngestEvent>,
    running: &Arc<AtomicBool>,
) -> std::io::Result<()> {
    let mut stream = stream;
    // The accepted socket must block with a bounded timeout regardless of
    // what it inherited from the nonblocking listener.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut carry = String::new();
    let mut buf = [0u8; 1024];

    while running.load(Ordering::SeqCst) {
        match stream.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                carry.push_str(&String::from_utf8_lossy(&buf[..n]));
                while let Some(pos) = carry.find('\n') {
                    let line: String = carry.drain(..=pos).collect();
                    dispatch_line(line.trim_end(), kind, sender);
                }
                // A peer that never sends a newline must not grow the
                // buffer without bound.
                if carry.len() > MAX_PENDING_LINE {
                    tracing::warn!(
                        "{} listener: dropping {} unterminated bytes",
                        kind.label(),
                        carry.len()
                    );
                    carry.clear();
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(e) => return Err(e),
        }
    }

    // Shutdown requested; a trailing unterminated line is dropped on purpose.
    Ok(())
}

fn dispatch_line(line: &str, kind: ListenerKind, sender: &Sender<IngestEvent>) {
    if line.is_empty() {
        return;
    }
    if let Some(event) = kind.decode(line) {
        // Don't block the read loop if the controller falls behind.
        if sender.try_send(event).is_err() {
            tracing::warn!("{} listener: event channel full, dropping event", kind.label());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_data_decode_accepts_sensor_lines_only() {
        let kind = ListenerKind::Data;
        assert!(matches!(
            kind.decode("SENSOR:1,2,3,4,5,6,7"),
            Some(IngestEvent::Frame(_))
        ));
        assert_eq!(kind.decode("INFLUX:OK"), None);
        assert_eq!(kind.decode("SENSOR:1,2,3"), None);
        assert_eq!(kind.decode("garbage"), None);
    }

    #[test]
    fn test_status_decode_matches_exact_tokens() {
        let kind = ListenerKind::Status;
        assert_eq!(
            kind.decode("INFLUX:OK"),
            Some(IngestEvent::Relay(RelayStatus::Ok))
        );
        assert_eq!(
            kind.decode("INFLUX:ERROR"),
            Some(IngestEvent::Relay(RelayStatus::Error))
        );
        assert_eq!(kind.decode("SENSOR:1,2,3,4,5,6,7"), None);
        assert_eq!(kind.decode("INFLUX:MAYBE"), None);
    }

    #[test]
    fn test_bind_failure_reported() {
        let (tx, _rx) = bounded(16);
        let mut first = IngestListener::bind(
            "127.0.0.1:0".parse().unwrap(),
            ListenerKind::Data,
            tx.clone(),
        )
        .unwrap();
        let taken = first.local_addr();
        let err = IngestListener::bind(taken, ListenerKind::Data, tx).unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        first.stop();
    }

    #[test]
    fn test_double_start_rejected() {
        let (tx, _rx) = bounded(16);
        let mut listener =
            IngestListener::bind("127.0.0.1:0".parse().unwrap(), ListenerKind::Data, tx).unwrap();
        listener.start().unwrap();
        assert!(matches!(
            listener.start(),
            Err(ListenerError::AlreadyRunning)
        ));
        listener.stop();
        assert!(!listener.is_running());
    }
}
