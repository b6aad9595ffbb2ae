use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use qrc_quota::{QuotaDecision, QuotaPeriod, QuotaUsage, ResourceKind, UsageReport};
use serde::{Deserialize, Serialize};

use crate::error::ApiErrorResponse;
use crate::identity::AccountId;
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 12;
const MAX_HISTORY_LIMIT: usize = 120;

#[derive(Debug, Serialize)]
pub struct QuotaStatusResponse {
    pub allowed: bool,
    #[serde(flatten)]
    pub usage: QuotaUsage,
    pub remaining: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub kind: ResourceKind,
    pub current: u64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

fn parse_kind(raw: &str) -> Result<ResourceKind, ApiErrorResponse> {
    raw.parse()
        .map_err(|e: qrc_quota::UnknownResourceKind| ApiErrorResponse::bad_request(e.to_string()))
}

fn into_status(
    state: &AppState,
    decision: QuotaDecision,
) -> Result<Json<QuotaStatusResponse>, ApiErrorResponse> {
    match decision {
        QuotaDecision::Allow(usage) => Ok(Json(QuotaStatusResponse {
            allowed: true,
            remaining: usage.remaining(),
            usage,
        })),
        QuotaDecision::Deny(denial) => Err(ApiErrorResponse::quota_exceeded(
            &denial,
            &state.config.upgrade_url,
        )),
        QuotaDecision::Unavailable(kind) => Err(ApiErrorResponse::quota_unavailable(Some(kind))),
    }
}

/// Would one more action of this kind be allowed? Consumes nothing.
pub async fn check(
    State(state): State<AppState>,
    account_id: AccountId,
    Path(kind): Path<String>,
) -> Result<Json<QuotaStatusResponse>, ApiErrorResponse> {
    let kind = parse_kind(&kind)?;
    let decision = state.gate.check(account_id.as_str(), kind, Utc::now()).await?;
    into_status(&state, decision)
}

/// Check and count in one step.
pub async fn consume(
    State(state): State<AppState>,
    account_id: AccountId,
    Path(kind): Path<String>,
) -> Result<Json<QuotaStatusResponse>, ApiErrorResponse> {
    let kind = parse_kind(&kind)?;
    let decision = state
        .gate
        .try_acquire(account_id.as_str(), kind, Utc::now())
        .await?;
    into_status(&state, decision)
}

/// Count an action that already happened after a successful check.
pub async fn record(
    State(state): State<AppState>,
    account_id: AccountId,
    Path(kind): Path<String>,
) -> Result<Json<RecordResponse>, ApiErrorResponse> {
    let kind = parse_kind(&kind)?;
    let current = state
        .gate
        .record(account_id.as_str(), kind, Utc::now())
        .await?;
    Ok(Json(RecordResponse { kind, current }))
}

pub async fn usage(
    State(state): State<AppState>,
    account_id: AccountId,
) -> Result<Json<UsageReport>, ApiErrorResponse> {
    let report = state.gate.usage(account_id.as_str(), Utc::now()).await?;
    Ok(Json(report))
}

pub async fn history(
    State(state): State<AppState>,
    account_id: AccountId,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<QuotaPeriod>>, ApiErrorResponse> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let periods = state.gate.history(account_id.as_str(), limit).await?;
    Ok(Json(periods))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kind_accepts_names_and_limit_keys() {
        assert_eq!(parse_kind("export").unwrap(), ResourceKind::Export);
        assert_eq!(parse_kind("qr_month").unwrap(), ResourceKind::QrGeneration);
        let err = parse_kind("pdf_pages").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn status_response_flattens_usage() {
        let usage = QuotaUsage {
            kind: ResourceKind::Export,
            limit: Some(10),
            current: 3,
            degraded: false,
        };
        let json = serde_json::to_value(QuotaStatusResponse {
            allowed: true,
            remaining: usage.remaining(),
            usage,
        })
        .unwrap();
        assert_eq!(json["allowed"], true);
        assert_eq!(json["kind"], "export");
        assert_eq!(json["limit"], 10);
        assert_eq!(json["current"], 3);
        assert_eq!(json["remaining"], 7);
        assert!(json.get("degraded").is_none());
    }
}
