//! Control server — owns the inter-process registration endpoint and the
//! `RegistryTable` mutations that follow from it.
//!
//! Per-connection state machine: accept, read messages in a loop, ack
//! each one, clean up the registry on disconnect. The transport is a
//! Unix-domain socket carrying newline-delimited JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{Result, SwitchboardError};
use crate::framing::{FramingError, LineReader};
use crate::paths::ensure_parent_dir;
use crate::registry::{ConnectionId, ControlChannel, InsertOutcome, RegisteredApp, RegistryTable};
use crate::wire::{AckMsg, RegisterMsg, ServerMessage, StatusApp, StatusAckMsg, UnregisterMsg};

/// Owns the bound Unix listener and the accept loop that feeds the
/// `RegistryTable`.
pub struct ControlServer {
    listener: UnixListener,
    socket_path: PathBuf,
    registry: Arc<RegistryTable>,
    max_frame_bytes: usize,
}

impl ControlServer {
    /// Bind the control endpoint, performing the one permitted
    /// stale-socket recovery retry.
    pub async fn bind(
        socket_path: &Path,
        registry: Arc<RegistryTable>,
        max_frame_bytes: usize,
        stale_probe_ms: u64,
    ) -> Result<Self> {
        ensure_parent_dir(socket_path)?;

        match UnixListener::bind(socket_path) {
            Ok(listener) => {
                info!(path = %socket_path.display(), "control server bound");
                return Ok(Self {
                    listener,
                    socket_path: socket_path.to_path_buf(),
                    registry,
                    max_frame_bytes,
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                // Fall through to stale-endpoint recovery below.
            }
            Err(e) => return Err(SwitchboardError::Bind(e.to_string())),
        }

        if probe_is_alive(socket_path, stale_probe_ms).await {
            return Err(SwitchboardError::AlreadyRunning);
        }

        warn!(path = %socket_path.display(), "stale control socket, removing and retrying bind once");
        let _ = std::fs::remove_file(socket_path);
        let listener = UnixListener::bind(socket_path)
            .map_err(|e| SwitchboardError::Bind(format!("stale-recovery retry failed: {e}")))?;

        info!(path = %socket_path.display(), "control server bound after stale-socket recovery");
        Ok(Self {
            listener,
            socket_path: socket_path.to_path_buf(),
            registry,
            max_frame_bytes,
        })
    }

    /// Self-register the owner's own app with a null (`Owner`) control
    /// channel.
    pub fn self_register(&self, origin: &str, upstream_host: &str, upstream_port: u16) -> InsertOutcome {
        self.registry.insert(RegisteredApp {
            origin: origin.to_string(),
            upstream_host: upstream_host.to_string(),
            upstream_port,
            control_channel: ControlChannel::Owner,
        })
    }

    /// Accept connections until `shutdown` resolves. Every accepted
    /// connection runs as its own task; on `shutdown`, the listener stops
    /// accepting, in-flight connections are told to close, and the socket
    /// file is removed.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()>) {
        let (close_tx, _) = broadcast::channel::<()>(1);
        let mut tasks = JoinSet::new();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let registry = Arc::clone(&self.registry);
                            let max_frame_bytes = self.max_frame_bytes;
                            let close_rx = close_tx.subscribe();
                            tasks.spawn(handle_connection(stream, registry, max_frame_bytes, close_rx));
                        }
                        Err(e) => warn!("control server accept error: {e}"),
                    }
                }
                _ = &mut shutdown => {
                    info!("control server shutting down");
                    break;
                }
            }
        }

        let _ = close_tx.send(());
        while tasks.join_next().await.is_some() {}

        self.remove_socket_file();
    }

    /// Release the control endpoint without ever having accepted a
    /// connection. Used when a later bind elsewhere fails and this
    /// process turns out not to be the owner after all.
    pub fn abandon(self) {
        self.remove_socket_file();
    }

    fn remove_socket_file(&self) {
        use std::os::unix::fs::FileTypeExt;
        if let Ok(meta) = std::fs::symlink_metadata(&self.socket_path) {
            if meta.file_type().is_socket() {
                let _ = std::fs::remove_file(&self.socket_path);
            }
        }
    }
}

/// Connect-probe used to distinguish a stale socket file from a live
/// switchboard.
async fn probe_is_alive(socket_path: &Path, timeout_ms: u64) -> bool {
    matches!(
        tokio::time::timeout(Duration::from_millis(timeout_ms), UnixStream::connect(socket_path)).await,
        Ok(Ok(_))
    )
}

async fn handle_connection(
    stream: UnixStream,
    registry: Arc<RegistryTable>,
    max_frame_bytes: usize,
    mut close_rx: broadcast::Receiver<()>,
) {
    let conn_id = ConnectionId::new();
    let (read_half, write_half) = stream.into_split();
    let mut reader = LineReader::new(read_half, max_frame_bytes);
    let writer = Arc::new(Mutex::new(BufWriter::new(write_half)));

    loop {
        let line = tokio::select! {
            line = reader.read_line() => line,
            _ = close_rx.recv() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break, // clean disconnect
            Err(FramingError::FrameTooLarge(limit)) => {
                warn!(limit, "control connection sent an oversized frame, closing");
                break;
            }
            Err(FramingError::Io(e)) => {
                warn!("control connection read error: {e}");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match dispatch(&line, conn_id, &registry).await {
            Some(reply) => {
                if send(&writer, &reply).await.is_err() {
                    break;
                }
            }
            None => {
                // Malformed JSON or missing `type` — protocol error, close
                // the connection without a reply.
                break;
            }
        }
    }

    let removed = registry.remove_by_connection(conn_id);
    if !removed.is_empty() {
        info!(count = removed.len(), "control connection closed, unregistered apps");
    }
}

/// Parse one line and produce the reply, or `None` if the frame was
/// malformed enough to warrant closing the connection.
async fn dispatch(line: &str, conn_id: ConnectionId, registry: &RegistryTable) -> Option<ServerMessage> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            warn!("malformed control message: {e}");
            return None;
        }
    };

    let Some(type_field) = value.get("type").and_then(Value::as_str) else {
        warn!("control message missing `type` field");
        return None;
    };

    match type_field {
        "register" => {
            let msg: RegisterMsg = match serde_json::from_value(value) {
                Ok(m) => m,
                Err(e) => {
                    warn!("malformed register message: {e}");
                    return None;
                }
            };
            Some(ServerMessage::Ack(handle_register(msg, conn_id, registry)))
        }
        "unregister" => {
            let msg: UnregisterMsg = match serde_json::from_value(value) {
                Ok(m) => m,
                Err(e) => {
                    warn!("malformed unregister message: {e}");
                    return None;
                }
            };
            Some(ServerMessage::Ack(handle_unregister(msg, registry)))
        }
        "status" => Some(ServerMessage::StatusAck(handle_status(registry))),
        other => {
            warn!(r#type = other, "unknown control message type");
            Some(ServerMessage::Ack(AckMsg::err("unknown message type")))
        }
    }
}

fn handle_register(msg: RegisterMsg, conn_id: ConnectionId, registry: &RegistryTable) -> AckMsg {
    if msg.host.is_empty() || msg.port == 0 {
        return AckMsg::err("invalid host or port");
    }

    let app = RegisteredApp {
        origin: msg.origin.clone(),
        upstream_host: msg.host,
        upstream_port: msg.port,
        control_channel: ControlChannel::Peer(conn_id),
    };

    match registry.insert(app) {
        InsertOutcome::Inserted => {
            info!(origin = %msg.origin, "app registered");
            AckMsg::ok()
        }
        InsertOutcome::Conflict => AckMsg::err("hostname already registered"),
        InsertOutcome::InvalidOrigin => AckMsg::err("invalid origin"),
    }
}

fn handle_unregister(msg: UnregisterMsg, registry: &RegistryTable) -> AckMsg {
    let Some(key) = crate::registry::hostname_key_of(&msg.origin) else {
        return AckMsg::err("invalid origin");
    };
    registry.remove(&key);
    info!(origin = %msg.origin, "app unregistered");
    AckMsg::ok()
}

fn handle_status(registry: &RegistryTable) -> StatusAckMsg {
    let apps = registry
        .snapshot()
        .into_iter()
        .map(|(hostname, app)| StatusApp {
            hostname,
            upstream_host: app.upstream_host,
            upstream_port: app.upstream_port,
            owner: matches!(app.control_channel, ControlChannel::Owner),
        })
        .collect();
    StatusAckMsg { apps }
}

async fn send(
    writer: &Arc<Mutex<BufWriter<tokio::net::unix::OwnedWriteHalf>>>,
    msg: &ServerMessage,
) -> std::io::Result<()> {
    let mut json = serde_json::to_vec(msg).expect("ServerMessage always serializes");
    json.push(b'\n');
    let mut guard = writer.lock().await;
    guard.write_all(&json).await?;
    guard.flush().await
}
