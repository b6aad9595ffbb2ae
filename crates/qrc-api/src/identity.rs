use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{ApiError, ApiErrorResponse};
use crate::state::AppState;

/// Account id asserted by the upstream gateway after it verified the
/// caller's token. This service does not verify tokens itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

const MAX_ACCOUNT_ID_LEN: usize = 128;

pub fn extract_account_id(headers: &HeaderMap, header: &str) -> Option<AccountId> {
    let value = headers.get(header)?.to_str().ok()?.trim();
    if value.is_empty()
        || value.len() > MAX_ACCOUNT_ID_LEN
        || value.chars().any(|c| c.is_control() || c.is_whitespace())
    {
        return None;
    }
    Some(AccountId(value.to_string()))
}

pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiErrorResponse> {
    let header = state.config.identity_header.as_str();
    let account = extract_account_id(req.headers(), header).ok_or_else(|| ApiErrorResponse {
        status: StatusCode::UNAUTHORIZED,
        error: ApiError::unauthorized(header),
    })?;

    req.extensions_mut().insert(account);
    Ok(next.run(req).await)
}

impl<S> FromRequestParts<S> for AccountId
where
    S: Send + Sync,
{
    type Rejection = ApiErrorResponse;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccountId>()
            .cloned()
            .ok_or_else(|| ApiErrorResponse {
                status: StatusCode::UNAUTHORIZED,
                error: ApiError::new("unauthorized", "Authentication required"),
            })
    }
}
