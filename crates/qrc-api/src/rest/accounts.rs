use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use qrc_quota::Account;
use serde::Deserialize;

use crate::error::ApiErrorResponse;
use crate::identity::AccountId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    pub account_id: String,
    pub plan: String,
}

/// First authenticated contact. Always creates a free account; returns 201
/// when the account was created, 200 when it already existed.
pub async fn register(
    State(state): State<AppState>,
    account_id: AccountId,
) -> Result<(StatusCode, Json<Account>), ApiErrorResponse> {
    let existed = state.accounts.find(account_id.as_str()).await?.is_some();
    let account = state
        .accounts
        .register(account_id.as_str(), Utc::now())
        .await?;

    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(account)))
}

/// Plan change pushed by the billing integration.
pub async fn set_plan(
    State(state): State<AppState>,
    Json(body): Json<SetPlanRequest>,
) -> Result<Json<Account>, ApiErrorResponse> {
    if body.account_id.trim().is_empty() {
        return Err(ApiErrorResponse::bad_request("account_id must not be empty"));
    }
    let account = state
        .accounts
        .set_plan(body.account_id.trim(), &body.plan, Utc::now())
        .await?;
    Ok(Json(account))
}
