//! Request logging middleware.
//!
//! One line per request with method, path, status, and latency. Polling
//! endpoints fire every few seconds, so `/health` and the WS upgrade are
//! muted and anything slower than a second is flagged.

use axum::{body::Body, extract::ConnectInfo, http::Request, middleware::Next, response::Response};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SLOW_REQUEST: Duration = Duration::from_secs(1);

pub async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if matches!(path.as_str(), "/health" | "/ws") {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        warn!(
            %method,
            %path,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            client = %addr.ip(),
            "request failed"
        );
    } else if latency >= SLOW_REQUEST {
        warn!(
            %method,
            %path,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "slow request"
        );
    } else {
        info!(
            %method,
            %path,
            status = status.as_u16(),
            latency_ms = latency.as_millis() as u64,
            "request"
        );
    }

    response
}
