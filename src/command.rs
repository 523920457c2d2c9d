//! Fire-and-forget command channel to the producer.
//!
//! The producer's command protocol is connect, write one literal directive,
//! disconnect. No acknowledgement is read or expected; the only outcome is
//! the success or failure of the transport send.

use crate::protocol::CommandRequest;
use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Default connect timeout. Bounded so a dead producer cannot hang an
/// interactive caller.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Errors from a command send.
#[derive(Debug)]
pub enum CommandError {
    Connect { addr: SocketAddr, message: String },
    Send { addr: SocketAddr, message: String },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Connect { addr, message } => {
                write!(f, "could not connect to producer at {addr}: {message}")
            }
            CommandError::Send { addr, message } => {
                write!(f, "could not send command to producer at {addr}: {message}")
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Client for the producer's command port.
#[derive(Debug, Clone)]
pub struct CommandClient {
    addr: SocketAddr,
    connect_timeout: Duration,
}

impl CommandClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Transmit one directive and close the connection.
    ///
    /// A failure here is reported synchronously and must not be taken as a
    /// state transition; only the session controller decides that, on
    /// success.
    pub fn send(&self, request: CommandRequest) -> Result<(), CommandError> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.connect_timeout).map_err(
            |e| CommandError::Connect {
                addr: self.addr,
                message: e.to_string(),
            },
        )?;

        stream
            .write_all(request.as_wire().as_bytes())
            .map_err(|e| CommandError::Send {
                addr: self.addr,
                message: e.to_string(),
            })?;

        let _ = stream.shutdown(Shutdown::Both);
        tracing::info!("command sent to producer: {}", request.as_wire());
        Ok(())
    }
}
