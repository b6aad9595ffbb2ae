use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use qrc_quota::{QuotaDenial, QuotaError, ResourceKind};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// JSON error body. `details` fields are flattened next to `error` and
/// `message` so clients can read e.g. `limit` at the top level.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(rename = "error")]
    pub code: String,
    pub message: String,
    #[serde(flatten)]
    pub details: Option<Map<String, Value>>,
    pub retryable: bool,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        if let Value::Object(map) = details {
            self.details = Some(map);
        }
        self
    }

    pub fn unauthorized(header: &str) -> Self {
        Self::new(
            "unauthorized",
            format!("Missing or invalid {header} header"),
        )
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    pub fn quota_exceeded(denial: &QuotaDenial, upgrade_url: &str) -> Self {
        Self::new(denial.reason_code(), denial_message(denial)).with_details(json!({
            "quota_type": denial.kind.limit_key(),
            "resource_kind": denial.kind,
            "limit": denial.limit,
            "current": denial.current,
            "resets_at": denial.resets_at,
            "upgrade_url": upgrade_url,
        }))
    }

    pub fn quota_unavailable(kind: Option<ResourceKind>) -> Self {
        let err = Self::new(
            "quota_unavailable",
            "Usage limits cannot be verified right now. Please retry shortly.",
        )
        .retryable();
        match kind {
            Some(kind) => err.with_details(json!({ "quota_type": kind.limit_key() })),
            None => err,
        }
    }

    pub fn rate_limited(limit: u64, window_secs: u64, retry_after: u64) -> Self {
        Self::new(
            "rate_limit_exceeded",
            format!(
                "Rate limit exceeded. Maximum {} requests per {} seconds.",
                limit, window_secs
            ),
        )
        .with_details(json!({ "limit": limit, "retry_after": retry_after }))
        .retryable()
    }
}

fn denial_message(denial: &QuotaDenial) -> String {
    match denial.kind {
        ResourceKind::QrGeneration => format!(
            "Monthly QR generation limit reached ({}). Please upgrade your plan.",
            denial.limit
        ),
        ResourceKind::Export => format!(
            "Daily export limit reached ({}). Please upgrade your plan or try again tomorrow.",
            denial.limit
        ),
        ResourceKind::TemplateApplication => format!(
            "Template application limit reached ({}). Please upgrade your plan.",
            denial.limit
        ),
    }
}

#[derive(Debug)]
pub struct ApiErrorResponse {
    pub status: StatusCode,
    pub error: ApiError,
}

impl ApiErrorResponse {
    pub fn quota_exceeded(denial: &QuotaDenial, upgrade_url: &str) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: ApiError::quota_exceeded(denial, upgrade_url),
        }
    }

    pub fn quota_unavailable(kind: Option<ResourceKind>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: ApiError::quota_unavailable(kind),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::bad_request(message),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self.error).unwrap_or_default();
        let retry_after = match &self.error.details {
            Some(details) if self.status == StatusCode::TOO_MANY_REQUESTS => details
                .get("retry_after")
                .and_then(Value::as_u64)
                .and_then(|secs| HeaderValue::from_str(&secs.to_string()).ok()),
            _ => None,
        };
        let mut response =
            (self.status, [("content-type", "application/json")], body).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert("retry-after", value);
        }
        response
    }
}

impl From<QuotaError> for ApiErrorResponse {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::AccountNotFound(_) => Self {
                status: StatusCode::NOT_FOUND,
                error: ApiError::new("account_not_found", "Account not found"),
            },
            QuotaError::UnknownPlan(plan) => Self {
                status: StatusCode::BAD_REQUEST,
                error: ApiError::new("unknown_plan", format!("Unknown plan: {plan}")),
            },
            QuotaError::StoreUnavailable(store) => {
                tracing::warn!(error = %store, code = store.error_code(), "Quota store unavailable");
                Self::quota_unavailable(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use chrono::{TimeZone, Utc};
    use qrc_quota::StoreError;

    fn denial() -> QuotaDenial {
        QuotaDenial {
            kind: ResourceKind::QrGeneration,
            limit: 50,
            current: 50,
            resets_at: Utc.with_ymd_and_hms(2026, 11, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn api_error_new() {
        let err = ApiError::new("CODE", "message");
        assert_eq!(err.code, "CODE");
        assert_eq!(err.message, "message");
        assert!(!err.retryable);
        assert!(err.details.is_none());
    }

    #[test]
    fn api_error_json_serialization() {
        let err = ApiError::new("test", "test message");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "test");
        assert_eq!(json["message"], "test message");
        assert_eq!(json["retryable"], false);
    }

    #[test]
    fn quota_exceeded_body_is_flat() {
        let json = serde_json::to_value(ApiError::quota_exceeded(&denial(), "/pricing")).unwrap();
        assert_eq!(json["error"], "quota_exceeded");
        assert_eq!(json["quota_type"], "qr_month");
        assert_eq!(json["resource_kind"], "qr_generation");
        assert_eq!(json["limit"], 50);
        assert_eq!(json["current"], 50);
        assert_eq!(json["resets_at"], "2026-11-01T00:00:00Z");
        assert_eq!(json["upgrade_url"], "/pricing");
        assert!(json["message"].as_str().unwrap().contains("(50)"));
    }

    #[test]
    fn rate_limited_response_sets_retry_after() {
        let resp = ApiErrorResponse {
            status: StatusCode::TOO_MANY_REQUESTS,
            error: ApiError::rate_limited(10, 60, 42),
        };
        let response = resp.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "42");
    }

    #[test]
    fn store_failure_hides_raw_error() {
        let resp = ApiErrorResponse::from(QuotaError::StoreUnavailable(StoreError::Task(
            "database is locked".into(),
        )));
        assert_eq!(resp.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.error.code, "quota_unavailable");
        assert!(resp.error.retryable);
        assert!(!resp.error.message.contains("locked"));
    }

    #[test]
    fn quota_errors_map_to_statuses() {
        let not_found = ApiErrorResponse::from(QuotaError::AccountNotFound("a".into()));
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        let unknown = ApiErrorResponse::from(QuotaError::UnknownPlan("gold".into()));
        assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
        assert_eq!(unknown.error.code, "unknown_plan");
    }
}
