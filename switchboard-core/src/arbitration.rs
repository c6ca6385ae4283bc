//! Ownership arbitration: decide whether this process becomes the
//! switchboard owner or falls back to a `SwitchboardClient`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::control::ControlServer;
use crate::error::{Result, SwitchboardError};
use crate::paths::control_socket_path;
use crate::proxy::ProxyServer;
use crate::registry::RegistryTable;
use crate::tls;

/// Outcome of attempting to become the switchboard owner.
pub enum Arbitration {
    /// This process owns the switchboard: both servers are bound (but not
    /// yet serving) and the registry is shared between them.
    Owner {
        control: ControlServer,
        proxy: ProxyServer,
        registry: Arc<RegistryTable>,
    },
    /// Another process already owns the switchboard; dial it as a client.
    Client { socket_path: PathBuf },
}

/// Bind the control endpoint, self-register this process's own app, then
/// bind the shared proxy port, in that order. Any "already running" /
/// "address in use" failure falls back to `Arbitration::Client`; other
/// bind failures are fatal.
///
/// `own_origin`/`own_upstream_host`/`own_upstream_port` describe the owning
/// process's *own* application backend — the thing the shared proxy port
/// forwards to for its own hostname, distinct from the proxy listener
/// address itself.
pub async fn arbitrate(
    config: &Config,
    own_origin: &str,
    own_upstream_host: &str,
    own_upstream_port: u16,
) -> Result<Arbitration> {
    let socket_path = control_socket_path(&config.product_dir)?;
    let registry = Arc::new(RegistryTable::new());

    let control = match ControlServer::bind(
        &socket_path,
        Arc::clone(&registry),
        config.max_frame_bytes,
        config.stale_probe_ms,
    )
    .await
    {
        Ok(control) => control,
        Err(SwitchboardError::AlreadyRunning) => {
            info!("switchboard already running, falling back to client");
            return Ok(Arbitration::Client { socket_path });
        }
        Err(e) => return Err(e),
    };

    let addr: SocketAddr = match config.proxy_addr().parse() {
        Ok(addr) => addr,
        Err(e) => {
            control.abandon();
            return Err(SwitchboardError::Bind(format!("invalid listen address: {e}")));
        }
    };

    let tls_acceptor = if config.tls_enabled() {
        let cert = config.tls_cert.as_deref().expect("checked by tls_enabled");
        let key = config.tls_key.as_deref().expect("checked by tls_enabled");
        match tls::load_acceptor(cert.as_ref(), key.as_ref()) {
            Ok(acceptor) => Some(acceptor),
            Err(e) => {
                control.abandon();
                return Err(e);
            }
        }
    } else {
        None
    };

    let proxy = match ProxyServer::bind(addr, Arc::clone(&registry), tls_acceptor).await {
        Ok(proxy) => proxy,
        Err(SwitchboardError::Bind(msg)) if msg.contains("already in use") => {
            warn!("proxy port unavailable, abandoning control endpoint and falling back to client");
            control.abandon();
            return Ok(Arbitration::Client { socket_path });
        }
        Err(e) => {
            control.abandon();
            return Err(e);
        }
    };

    control.self_register(own_origin, own_upstream_host, own_upstream_port);
    info!(origin = %own_origin, "switchboard owner established");

    Ok(Arbitration::Owner {
        control,
        proxy,
        registry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // XDG_DATA_HOME is process-global; serialize tests that touch it.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn test_config(product_dir: &str) -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0, // ephemeral: avoid colliding with anything else in CI
            tls_cert: None,
            tls_key: None,
            product_dir: product_dir.to_string(),
            log_filter: "off".to_string(),
            max_frame_bytes: 65536,
            stale_probe_ms: 200,
            app_origin: "http://owner.localhost".to_string(),
            app_upstream_host: "127.0.0.1".to_string(),
            app_upstream_port: 4000,
        }
    }

    #[tokio::test]
    async fn second_arbitration_falls_back_to_client_when_control_already_running() {
        let _guard = ENV_LOCK.lock().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_DATA_HOME", tmp.path());

        let config = test_config("switchboard-arbitration-test");

        let first = arbitrate(&config, "http://owner.localhost", "127.0.0.1", 4000).await.unwrap();
        let Arbitration::Owner { control, proxy, .. } = first else {
            panic!("expected this process to win ownership");
        };

        let second = arbitrate(&config, "http://other.localhost", "127.0.0.1", 4001).await.unwrap();
        assert!(matches!(second, Arbitration::Client { .. }));

        drop(control);
        drop(proxy);
        std::env::remove_var("XDG_DATA_HOME");
    }
}
