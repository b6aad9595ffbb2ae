use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use qrc_ratelimit::RateLimitDecision;
use std::net::SocketAddr;

use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;

/// `X-RateLimit-*` headers for a decision, plus `Retry-After` on denial.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
    if let Some(retry_after) = decision.retry_after {
        headers.insert("retry-after", HeaderValue::from(retry_after));
    }
    headers
}

/// Client identity for rate limiting: the peer address, or the first
/// `X-Forwarded-For` hop when the proxy in front is trusted.
pub fn client_key(req: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(req).await;
    };

    let client = client_key(&req, state.config.rate_limit.trust_forwarded_for);
    let path = req.uri().path().to_string();
    let decision = limiter.allow(&client, &path, Utc::now()).await;
    let headers = rate_limit_headers(&decision);

    if !decision.allowed {
        let window_secs = limiter.rules().resolve(&path).rule.window_secs;
        let mut response = ApiErrorResponse {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: ApiError::rate_limited(
                decision.limit,
                window_secs,
                decision.retry_after.unwrap_or(window_secs),
            ),
        }
        .into_response();
        response.headers_mut().extend(headers);
        return response;
    }

    let mut response = next.run(req).await;
    response.headers_mut().extend(headers);
    response
}
