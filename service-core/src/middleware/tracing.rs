use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Correlation id for one request. Stored in request extensions so
/// handlers can tie log lines (and audit writes they trigger) back to
/// the originating call, and echoed on the response.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

impl RequestId {
    /// Inherit a sane id from the caller or mint a fresh one. Ids over
    /// 128 bytes are treated as absent rather than propagated into
    /// logs.
    fn extract_or_mint(req: &Request) -> Self {
        req.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty() && value.len() <= 128)
            .map(|value| Self(value.to_string()))
            .unwrap_or_else(|| Self(Uuid::new_v4().to_string()))
    }
}

/// Resolve a request id, run the rest of the stack inside a span
/// carrying it, and echo it back to the caller.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = RequestId::extract_or_mint(&req);
    req.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!("request", request_id = %request_id.0);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&request_id.0) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with_id(id: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().uri("/");
        if let Some(id) = id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        builder.body(Body::empty()).expect("valid test request")
    }

    #[test]
    fn inherits_a_caller_supplied_id() {
        let req = request_with_id(Some("upstream-42"));
        assert_eq!(RequestId::extract_or_mint(&req).0, "upstream-42");
    }

    #[test]
    fn mints_when_absent_or_empty() {
        let minted = RequestId::extract_or_mint(&request_with_id(None));
        assert!(Uuid::parse_str(&minted.0).is_ok());

        let minted = RequestId::extract_or_mint(&request_with_id(Some("")));
        assert!(Uuid::parse_str(&minted.0).is_ok());
    }

    #[test]
    fn oversized_ids_are_replaced() {
        let oversized = "x".repeat(200);
        let minted = RequestId::extract_or_mint(&request_with_id(Some(&oversized)));
        assert_ne!(minted.0, oversized);
        assert!(Uuid::parse_str(&minted.0).is_ok());
    }
}
