//! Error taxonomy for the switchboard: one `thiserror` variant per kind,
//! plus literal HTTP response builders for the variants the proxy
//! surfaces directly to clients.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum SwitchboardError {
    #[error("{0}")]
    Bind(String),

    #[error("endpoint file exists but nothing is listening")]
    StaleEndpoint,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("hostname already registered")]
    RegistrationConflict,

    #[error("switchboard already running")]
    AlreadyRunning,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SwitchboardError>;

/// Build the literal `502` proxy error response for an upstream failure.
pub fn proxy_error_response(message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Full::new(Bytes::from(format!("Proxy Error: {message}"))))
        .expect("building a response from static parts never fails")
}

/// Build the literal `502` no-app-registered response.
pub fn no_app_registered_response(hostname: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .body(Full::new(Bytes::from(format!(
            "No app registered for {hostname}"
        ))))
        .expect("building a response from static parts never fails")
}

/// Build the literal `400` missing-Host response.
pub fn missing_host_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .body(Full::new(Bytes::from_static(
            b"Bad Request: Missing Host header",
        )))
        .expect("building a response from static parts never fails")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn missing_host_response_has_exact_body() {
        let resp = missing_host_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Bad Request: Missing Host header");
    }

    #[tokio::test]
    async fn no_app_registered_response_embeds_hostname() {
        let resp = no_app_registered_response("unknown.localhost");
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"No app registered for unknown.localhost");
    }
}
