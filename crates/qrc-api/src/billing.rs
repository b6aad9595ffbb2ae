use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;

pub fn extract_bearer_from_headers(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub(crate) fn constant_time_eq(expected: &[u8], actual: &[u8]) -> bool {
    if expected.len() != actual.len() {
        return false;
    }
    let mut diff = 0u8;
    for (lhs, rhs) in expected.iter().zip(actual.iter()) {
        diff |= lhs ^ rhs;
    }
    diff == 0
}

/// Guards the routes only the billing integration may call. The account
/// identity header grants nothing here.
pub async fn billing_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiErrorResponse> {
    let Some(expected) = state.config.billing_token.as_deref() else {
        return Err(ApiErrorResponse {
            status: StatusCode::FORBIDDEN,
            error: ApiError::new(
                "billing_disabled",
                "Plan changes are disabled: no billing token is configured",
            ),
        });
    };

    let token = extract_bearer_from_headers(req.headers()).ok_or_else(|| ApiErrorResponse {
        status: StatusCode::UNAUTHORIZED,
        error: ApiError::unauthorized("Authorization"),
    })?;

    if !constant_time_eq(expected.as_bytes(), token.as_bytes()) {
        tracing::warn!("Rejected plan change with invalid billing token");
        return Err(ApiErrorResponse {
            status: StatusCode::UNAUTHORIZED,
            error: ApiError::new("invalid_token", "Invalid billing token"),
        });
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer whsec_abc".parse().unwrap());
        assert_eq!(extract_bearer_from_headers(&headers), Some("whsec_abc"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        assert!(extract_bearer_from_headers(&headers).is_none());
        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert!(extract_bearer_from_headers(&headers).is_none());
    }

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"short", b"longer"));
    }
}
