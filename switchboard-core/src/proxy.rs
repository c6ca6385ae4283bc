//! Reverse proxy: terminate inbound HTTP(S) on the shared port, route by
//! `Host` header through the `RegistryTable`, forward to the matched
//! upstream over plain HTTP/1.1.
//!
//! Uses a long-lived, connection-pooling `hyper_util::client::legacy`
//! client built once at bind time, rewrites the outbound authority, and
//! streams the response body through rather than buffering it whole.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, HOST};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::error::{missing_host_response, no_app_registered_response, proxy_error_response, Result, SwitchboardError};
use crate::registry::{hostname_key_from_host_header, RegistryTable};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type ProxyBody = BoxBody<Bytes, BoxError>;

/// The reverse proxy's accept loop and routing table handle.
pub struct ProxyServer {
    listener: TcpListener,
    registry: Arc<RegistryTable>,
    client: LegacyClient<HttpConnector, Incoming>,
    tls: Option<TlsAcceptor>,
}

impl ProxyServer {
    /// Bind the shared listening port. The caller decides, via ownership
    /// arbitration, whether to call this at all.
    pub async fn bind(addr: SocketAddr, registry: Arc<RegistryTable>, tls: Option<TlsAcceptor>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => SwitchboardError::Bind(format!("port {} already in use", addr.port())),
            std::io::ErrorKind::PermissionDenied => {
                SwitchboardError::Bind(format!("permission denied binding {addr} (privileged port?)"))
            }
            _ => SwitchboardError::Bind(e.to_string()),
        })?;

        let client = LegacyClient::builder(TokioExecutor::new()).build(HttpConnector::new());

        Ok(Self {
            listener,
            registry,
            client,
            tls,
        })
    }

    /// Accept connections until `shutdown` resolves, then drain in-flight
    /// connections before returning.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()>) {
        let (close_tx, _) = broadcast::channel::<()>(1);
        let mut tasks = JoinSet::new();
        let is_tls = self.tls.is_some();

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let registry = Arc::clone(&self.registry);
                            let client = self.client.clone();
                            let tls = self.tls.clone();
                            let mut close_rx = close_tx.subscribe();
                            tasks.spawn(async move {
                                tokio::select! {
                                    () = serve_connection(stream, registry, client, tls, is_tls) => {}
                                    _ = close_rx.recv() => {
                                        debug!(%peer, "proxy connection told to close on shutdown");
                                    }
                                }
                            });
                        }
                        Err(e) => warn!("proxy accept error: {e}"),
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("proxy server shutting down");
                    break;
                }
            }
        }

        let _ = close_tx.send(());
        while tasks.join_next().await.is_some() {}
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    registry: Arc<RegistryTable>,
    client: LegacyClient<HttpConnector, Incoming>,
    tls: Option<TlsAcceptor>,
    is_tls: bool,
) {
    let ctx = Arc::new(ProxyContext {
        registry,
        client,
        is_tls,
    });

    let service = service_fn(move |req| {
        let ctx = Arc::clone(&ctx);
        async move { handle(req, ctx).await }
    });

    let result = if let Some(acceptor) = tls {
        match acceptor.accept(stream).await {
            Ok(tls_stream) => http1::Builder::new().serve_connection(TokioIo::new(tls_stream), service).await,
            Err(e) => {
                debug!("TLS handshake failed: {e}");
                return;
            }
        }
    } else {
        http1::Builder::new().serve_connection(TokioIo::new(stream), service).await
    };

    if let Err(e) = result {
        debug!("proxy connection error: {e}");
    }
}

struct ProxyContext {
    registry: Arc<RegistryTable>,
    client: LegacyClient<HttpConnector, Incoming>,
    is_tls: bool,
}

/// Per-request forwarding: validate the Host header, look up the
/// registered upstream, rewrite and forward the request, stream back
/// the response.
async fn handle(req: Request<Incoming>, ctx: Arc<ProxyContext>) -> std::result::Result<Response<ProxyBody>, Infallible> {
    let host_header = req.headers().get(HOST).cloned();

    let Some(host_header) = host_header else {
        return Ok(missing_host_response().map(|b| b.map_err(|never: Infallible| match never {}).boxed()));
    };
    let host_str = host_header.to_str().unwrap_or("").to_string();

    let Some(hostname_key) = hostname_key_from_host_header(&host_str) else {
        return Ok(missing_host_response().map(|b| b.map_err(|never: Infallible| match never {}).boxed()));
    };

    let Some(app) = ctx.registry.lookup(&hostname_key) else {
        return Ok(no_app_registered_response(&hostname_key).map(|b| b.map_err(|never: Infallible| match never {}).boxed()));
    };

    let (mut parts, body) = req.into_parts();

    let path_and_query = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();
    let outbound_uri: Uri = match format!("http://{}:{}{path_and_query}", app.upstream_host, app.upstream_port).parse() {
        Ok(uri) => uri,
        Err(e) => return Ok(boxed_error_response(&e.to_string())),
    };
    parts.uri = outbound_uri;

    let forwarded_proto = if ctx.is_tls { "https" } else { "http" };
    parts.headers.insert(
        "x-forwarded-host",
        host_header,
    );
    parts
        .headers
        .insert("x-forwarded-proto", HeaderValue::from_static(forwarded_proto));

    let outbound = Request::from_parts(parts, body);

    match ctx.client.request(outbound).await {
        Ok(upstream_resp) => {
            let (parts, body) = upstream_resp.into_parts();
            let body = body.map_err(|e| Box::new(e) as BoxError).boxed();
            Ok(Response::from_parts(parts, body))
        }
        Err(e) => {
            warn!(upstream = %app.upstream_host, port = app.upstream_port, "upstream request failed: {e}");
            Ok(boxed_error_response(&e.to_string()))
        }
    }
}

fn boxed_error_response(message: &str) -> Response<ProxyBody> {
    let resp = proxy_error_response(message);
    resp.map(|b| b.map_err(|never: Infallible| match never {}).boxed())
}
