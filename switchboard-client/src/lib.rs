//! Client library for an app that is not the switchboard owner.
//!
//! A plain enum error type with manual `Display`/`Error` impls (no
//! `thiserror` here; this is the thin, dependency-light half of the
//! pair) and a background task that owns the socket half the caller
//! doesn't need to touch directly.

use std::path::PathBuf;

use switchboard_core::framing::LineReader;
use switchboard_core::wire::{ClientMessage, RegisterMsg, ServerMessage, UnregisterMsg};

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use switchboard_core::backoff::next_delay as backoff_delay;

const MAX_FRAME_BYTES: usize = 64 * 1024;

#[derive(Debug)]
pub enum ClientError {
    /// No switchboard is listening at the endpoint (missing file or
    /// connection refused) — the caller should attempt to become the
    /// owner instead.
    NotAvailable,
    /// The socket errored mid-session.
    Transport(String),
    /// A frame didn't parse as the expected message shape.
    Protocol(String),
    /// The server rejected the request (e.g. hostname already registered).
    Rejected(String),
    /// `disconnect`/send attempted with no active registration.
    NotConnected,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAvailable => write!(f, "switchboard not available"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Rejected(e) => write!(f, "{e}"),
            Self::NotConnected => write!(f, "not connected"),
        }
    }
}

impl std::error::Error for ClientError {}

/// `idle → dialing → registered`, with `error`/`disconnected` reachable
/// from either of the latter two.
enum ClientState {
    Idle,
    Registered(RegisteredConn),
}

struct RegisteredConn {
    origin: String,
    writer: BufWriter<OwnedWriteHalf>,
    reader_task: JoinHandle<()>,
    disconnected: watch::Receiver<Option<String>>,
}

/// Registers this app's origin with a running switchboard and keeps the
/// control connection open for liveness tracking.
pub struct SwitchboardClient {
    socket_path: PathBuf,
    state: ClientState,
}

impl SwitchboardClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            state: ClientState::Idle,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.state, ClientState::Registered(_))
    }

    /// Dial the switchboard and register `origin → host:port`. Resolves
    /// once the server's `ack` is observed.
    pub async fn connect(&mut self, origin: &str, host: &str, port: u16) -> Result<(), ClientError> {
        let stream = match UnixStream::connect(&self.socket_path).await {
            Ok(stream) => stream,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused) => {
                return Err(ClientError::NotAvailable);
            }
            Err(e) => return Err(ClientError::Transport(e.to_string())),
        };

        let (read_half, write_half) = stream.into_split();
        let mut writer = BufWriter::new(write_half);
        let mut reader = LineReader::new(read_half, MAX_FRAME_BYTES);

        let register = ClientMessage::Register(RegisterMsg {
            origin: origin.to_string(),
            host: host.to_string(),
            port,
        });
        write_line(&mut writer, &register).await.map_err(|e| ClientError::Transport(e.to_string()))?;

        let line = reader
            .read_line()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?
            .ok_or_else(|| ClientError::Transport("connection closed before ack".to_string()))?;

        let reply: ServerMessage =
            serde_json::from_str(&line).map_err(|e| ClientError::Protocol(format!("malformed ack: {e}")))?;

        let ack = match reply {
            ServerMessage::Ack(ack) => ack,
            ServerMessage::StatusAck(_) => {
                return Err(ClientError::Protocol("expected ack, got status_ack".to_string()));
            }
        };

        if !ack.success {
            return Err(ClientError::Rejected(ack.error.unwrap_or_else(|| "registration rejected".to_string())));
        }

        let (disconnect_tx, disconnect_rx) = watch::channel(None);
        let reader_task = tokio::spawn(watch_for_disconnect(reader, disconnect_tx));

        self.state = ClientState::Registered(RegisteredConn {
            origin: origin.to_string(),
            writer,
            reader_task,
            disconnected: disconnect_rx,
        });
        Ok(())
    }

    /// Block until the connection is observed to have dropped. A transport
    /// error while registered is terminal: the state resets to idle and the
    /// caller drives its own retry loop, using [`backoff_delay`] between
    /// attempts.
    pub async fn wait_for_disconnect(&mut self) -> ClientError {
        let ClientState::Registered(conn) = &mut self.state else {
            return ClientError::NotConnected;
        };
        let _ = conn.disconnected.changed().await;
        let reason = conn.disconnected.borrow().clone().unwrap_or_else(|| "connection closed".to_string());
        self.state = ClientState::Idle;
        ClientError::Transport(reason)
    }

    /// Send `unregister` and close the socket. Idempotent.
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        let ClientState::Registered(mut conn) = std::mem::replace(&mut self.state, ClientState::Idle) else {
            return Ok(());
        };

        conn.reader_task.abort();
        let unregister = ClientMessage::Unregister(UnregisterMsg {
            origin: conn.origin.clone(),
        });
        let result = write_line(&mut conn.writer, &unregister).await;
        let _ = conn.writer.shutdown().await;
        result.map_err(|e| ClientError::Transport(e.to_string()))
    }
}

async fn write_line(writer: &mut BufWriter<OwnedWriteHalf>, msg: &ClientMessage) -> std::io::Result<()> {
    let mut json = serde_json::to_vec(msg).expect("ClientMessage always serializes");
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await
}

/// Drains any further frames on the control connection (none are expected
/// in steady state, since the client never sends a second message besides
/// `unregister`) and reports the connection's eventual close as a
/// disconnect event.
async fn watch_for_disconnect(mut reader: LineReader<tokio::net::unix::OwnedReadHalf>, tx: watch::Sender<Option<String>>) {
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                debug!(%line, "unexpected frame on a registered control connection");
            }
            Ok(None) => {
                let _ = tx.send(Some("connection closed".to_string()));
                return;
            }
            Err(e) => {
                warn!("control connection read error: {e}");
                let _ = tx.send(Some(e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::registry::RegistryTable;
    use switchboard_core::ControlServer;
    use std::sync::Arc;

    async fn bound_server() -> (ControlServer, PathBuf, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.sock");
        let registry = Arc::new(RegistryTable::new());
        let server = ControlServer::bind(&path, registry, 65536, 200).await.unwrap();
        (server, path, dir)
    }

    #[tokio::test]
    async fn connect_succeeds_and_disconnect_unregisters() {
        let (server, path, _dir) = bound_server().await;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let serve_task = tokio::spawn(server.serve(async {
            let _ = shutdown_rx.await;
        }));

        let mut client = SwitchboardClient::new(path.clone());
        client.connect("https://app-a.localhost", "127.0.0.1", 4000).await.unwrap();
        assert!(client.is_registered());

        client.disconnect().await.unwrap();
        assert!(!client.is_registered());

        let _ = shutdown_tx.send(());
        serve_task.await.unwrap();
    }

    #[tokio::test]
    async fn connect_without_a_listening_switchboard_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.sock");
        let mut client = SwitchboardClient::new(path);
        let err = client.connect("https://app-a.localhost", "127.0.0.1", 4000).await.unwrap_err();
        assert!(matches!(err, ClientError::NotAvailable));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (server, path, _dir) = bound_server().await;
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let serve_task = tokio::spawn(server.serve(async {
            let _ = shutdown_rx.await;
        }));

        let mut first = SwitchboardClient::new(path.clone());
        first.connect("https://dup.localhost", "127.0.0.1", 4000).await.unwrap();

        let mut second = SwitchboardClient::new(path.clone());
        let err = second.connect("https://dup.localhost", "127.0.0.1", 5000).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected(_)));

        let _ = shutdown_tx.send(());
        serve_task.await.unwrap();
    }
}
