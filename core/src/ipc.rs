//! IPC client for communicating with the Typedcode daemon.
//!
//! This module provides a synchronous client for sending messages to the
//! daemon over a Unix socket. It's designed to be used by the hook (which
//! needs sync I/O, since its whole job is to finish fast inside an
//! editor's event loop) and by CLI commands.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{IpcMessage, IpcResponse};

/// Default socket path: `~/.typedcode/typedcode.sock`.
pub fn socket_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".typedcode")
        .join("typedcode.sock")
}

/// Error type for IPC operations.
#[derive(Debug)]
pub enum IpcError {
    /// Daemon is not running (socket doesn't exist or connection refused).
    DaemonNotRunning,
    ConnectionFailed(std::io::Error),
    SendFailed(std::io::Error),
    ReceiveFailed(std::io::Error),
    InvalidResponse(String),
    DaemonError(String),
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::DaemonNotRunning => write!(f, "daemon not running"),
            IpcError::ConnectionFailed(e) => write!(f, "connection failed: {e}"),
            IpcError::SendFailed(e) => write!(f, "send failed: {e}"),
            IpcError::ReceiveFailed(e) => write!(f, "receive failed: {e}"),
            IpcError::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            IpcError::DaemonError(msg) => write!(f, "daemon error: {msg}"),
        }
    }
}

impl std::error::Error for IpcError {}

/// Synchronous client for sending one `IpcMessage` and reading back one
/// `IpcResponse` per connection (connect, send, read, close — no
/// persistent session).
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl IpcClient {
    pub fn new() -> Self {
        Self {
            socket_path: socket_path(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the daemon appears to be running (socket exists). Fast
    /// and racy by nature — a real answer only comes from attempting a
    /// connection, which `send` does.
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send a message to the daemon and wait for a response.
    pub fn send(&self, message: &IpcMessage) -> Result<IpcResponse, IpcError> {
        if !self.socket_path.exists() {
            return Err(IpcError::DaemonNotRunning);
        }

        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused || e.kind() == std::io::ErrorKind::NotFound {
                IpcError::DaemonNotRunning
            } else {
                IpcError::ConnectionFailed(e)
            }
        })?;

        stream.set_read_timeout(Some(self.timeout)).ok();
        stream.set_write_timeout(Some(self.timeout)).ok();

        let json = serde_json::to_string(message)
            .map_err(|e| IpcError::SendFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        writeln!(stream, "{json}").map_err(IpcError::SendFailed)?;
        stream.flush().map_err(IpcError::SendFailed)?;

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).map_err(IpcError::ReceiveFailed)?;

        let response: IpcResponse =
            serde_json::from_str(&response_line).map_err(|e| IpcError::InvalidResponse(e.to_string()))?;

        if let IpcResponse::Error(msg) = &response {
            return Err(IpcError::DaemonError(msg.clone()));
        }

        Ok(response)
    }

    /// Convenience method: ping the daemon.
    pub fn ping(&self) -> Result<(u64, u64), IpcError> {
        match self.send(&IpcMessage::Ping)? {
            IpcResponse::Pong { uptime_secs, tabs } => Ok((uptime_secs, tabs)),
            _ => Err(IpcError::InvalidResponse("unexpected response to Ping".into())),
        }
    }
}

/// Check if the daemon is running, by socket presence alone.
pub fn is_daemon_running() -> bool {
    IpcClient::new().daemon_available()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_points_at_typedcode_dir() {
        let path = socket_path();
        assert!(path.ends_with("typedcode.sock"));
        assert!(path.to_str().unwrap().contains(".typedcode"));
    }

    #[test]
    fn sending_to_a_nonexistent_socket_reports_daemon_not_running() {
        let client = IpcClient::with_socket_path(PathBuf::from("/nonexistent/path.sock"));
        assert!(!client.daemon_available());

        let result = client.ping();
        assert!(matches!(result, Err(IpcError::DaemonNotRunning)));
    }
}
