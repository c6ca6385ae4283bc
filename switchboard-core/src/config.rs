//! Switchboard configuration — all from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host the proxy listener binds.
    pub host: String,
    /// Port the proxy listener binds.
    pub port: u16,
    /// Optional PEM certificate path; both this and `tls_key` must be set
    /// together for TLS to be enabled.
    pub tls_cert: Option<String>,
    /// Optional PEM private-key path.
    pub tls_key: Option<String>,
    /// Subdirectory name under the XDG data dir for the control socket.
    pub product_dir: String,
    /// Tracing `EnvFilter` directive string.
    pub log_filter: String,
    /// ControlServer's oversized-frame bound, in bytes.
    pub max_frame_bytes: usize,
    /// ControlServer's stale-endpoint connect-probe timeout, in milliseconds.
    pub stale_probe_ms: u64,
    /// This process's own application origin, registered with an `Owner`
    /// control channel if this process wins arbitration, or sent in a
    /// `register` message if it falls back to a client.
    pub app_origin: String,
    /// This process's own application's upstream host.
    pub app_upstream_host: String,
    /// This process's own application's upstream port.
    pub app_upstream_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        let tls_cert = non_empty_env("SWITCHBOARD_TLS_CERT");
        let tls_key = non_empty_env("SWITCHBOARD_TLS_KEY");
        let default_port: u16 = if tls_cert.is_some() && tls_key.is_some() {
            8443
        } else {
            8080
        };

        Self {
            host: env::var("SWITCHBOARD_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env::var("SWITCHBOARD_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_port),
            tls_cert,
            tls_key,
            product_dir: env::var("SWITCHBOARD_PRODUCT_DIR").unwrap_or_else(|_| "switchboard".into()),
            log_filter: env::var("SWITCHBOARD_LOG")
                .unwrap_or_else(|_| "switchboard=info,switchboardd=info".into()),
            max_frame_bytes: env::var("SWITCHBOARD_MAX_FRAME_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(64 * 1024),
            stale_probe_ms: env::var("SWITCHBOARD_STALE_PROBE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1000),
            app_origin: env::var("SWITCHBOARD_APP_ORIGIN").unwrap_or_else(|_| "http://app.localhost".into()),
            app_upstream_host: env::var("SWITCHBOARD_APP_UPSTREAM_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            app_upstream_port: env::var("SWITCHBOARD_APP_UPSTREAM_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
        }
    }

    /// Whether the proxy listener should be TLS-wrapped.
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
