//! switchboardd — the switchboard daemon.
//!
//! Wires config → tracing → ownership arbitration → serve.

use switchboard_client::SwitchboardClient;
use switchboard_core::arbitration::Arbitration;
use switchboard_core::config::Config;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_filter)
        .with_target(true)
        .init();

    info!("switchboardd starting");
    info!(origin = %config.app_origin, "own application identity");

    match switchboard_core::arbitrate(
        &config,
        &config.app_origin,
        &config.app_upstream_host,
        config.app_upstream_port,
    )
    .await
    {
        Ok(Arbitration::Owner { control, proxy, registry: _ }) => {
            info!("acquired switchboard ownership");
            run_owner(control, proxy).await;
        }
        Ok(Arbitration::Client { socket_path }) => {
            info!(path = %socket_path.display(), "running as switchboard client");
            run_client(socket_path, config).await;
        }
        Err(e) => {
            error!("failed to start switchboard: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_owner(control: switchboard_core::ControlServer, proxy: switchboard_core::ProxyServer) {
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    let mut control_shutdown_rx = shutdown_tx.subscribe();
    let control_task = tokio::spawn(control.serve(async move {
        let _ = control_shutdown_rx.recv().await;
    }));

    let mut proxy_shutdown_rx = shutdown_tx.subscribe();
    let proxy_task = tokio::spawn(proxy.serve(async move {
        let _ = proxy_shutdown_rx.recv().await;
    }));

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
    let _ = shutdown_tx.send(());

    let _ = tokio::join!(control_task, proxy_task);
    info!("switchboardd stopped");
}

/// Register as a peer of the existing owner, retrying with backoff if the
/// owner is transiently unavailable.
async fn run_client(socket_path: std::path::PathBuf, config: Config) {
    let mut client = SwitchboardClient::new(socket_path);
    let mut attempt = 0u32;

    loop {
        match client
            .connect(&config.app_origin, &config.app_upstream_host, config.app_upstream_port)
            .await
        {
            Ok(()) => {
                info!("registered with switchboard owner");
                attempt = 0;
            }
            Err(e) => {
                warn!("registration failed: {e}");
                tokio::time::sleep(switchboard_client::backoff_delay(attempt)).await;
                attempt = attempt.saturating_add(1);
                continue;
            }
        }

        tokio::select! {
            err = client.wait_for_disconnect() => {
                warn!("lost connection to switchboard owner: {err}");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, unregistering");
                let _ = client.disconnect().await;
                return;
            }
        }

        tokio::time::sleep(switchboard_client::backoff_delay(attempt)).await;
        attempt = attempt.saturating_add(1);
    }
}
