//! Per-caller request throttling.

use crate::error::AppError;
use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Limiter keyed by caller IP.
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Build a limiter admitting `max_requests` per `window_seconds` for
/// each caller, refilling smoothly across the window instead of
/// resetting at its edge.
pub fn build_ip_rate_limiter(max_requests: u32, window_seconds: u64) -> IpRateLimiter {
    let burst = NonZeroU32::new(max_requests.max(1)).expect("clamped to at least one request");
    let refill =
        Duration::from_millis(window_seconds.max(1) * 1000 / u64::from(burst.get()));
    let quota = Quota::with_period(refill)
        .expect("refill period is non-zero")
        .allow_burst(burst);

    Arc::new(RateLimiter::dashmap(quota))
}

/// The caller's IP: the first `x-forwarded-for` hop when a proxy is in
/// front, otherwise the socket peer.
fn caller_ip(request: &Request) -> Option<IpAddr> {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|hop| hop.trim().parse().ok());

    forwarded.or_else(|| {
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    })
}

pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ip) = caller_ip(&request) else {
        tracing::warn!("Could not determine caller IP, admitting request unthrottled");
        return Ok(next.run(request).await);
    };

    match limiter.check_key(&ip) {
        Ok(_) => Ok(next.run(request).await),
        Err(denied) => {
            let retry_after = denied.wait_time_from(DefaultClock::default().now());
            Err(AppError::TooManyRequests(
                "Rate limit exceeded. Please retry later.".to_string(),
                Some(retry_after.as_secs().max(1)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn limiter_denies_once_the_window_is_spent() {
        let limiter = build_ip_rate_limiter(2, 3600);
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_err());

        // A different caller has its own budget.
        let other: IpAddr = "203.0.113.8".parse().unwrap();
        assert!(limiter.check_key(&other).is_ok());
    }

    #[test]
    fn zero_max_requests_is_clamped_to_one() {
        let limiter = build_ip_rate_limiter(0, 60);
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        assert!(limiter.check_key(&ip).is_ok());
    }

    #[test]
    fn forwarded_header_wins_over_socket_peer() {
        let request = axum::http::Request::builder()
            .uri("/")
            .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(
            caller_ip(&request),
            Some("198.51.100.4".parse::<IpAddr>().unwrap())
        );
    }

    #[test]
    fn unknown_caller_yields_none() {
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        assert_eq!(caller_ip(&request), None);
    }
}
