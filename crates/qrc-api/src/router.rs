use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::middleware;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::billing::billing_auth_middleware;
use crate::identity::identity_middleware;
use crate::rate_limit::rate_limit_middleware;
use crate::rest::{accounts, health, plans, quota};
use crate::state::AppState;

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid allowed origin");
                None
            }
        })
        .collect();

    let identity = HeaderName::from_bytes(state.config.identity_header.as_bytes())
        .unwrap_or(HeaderName::from_static("x-account-id"));

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, identity])
        .expose_headers([
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderName::from_static("x-ratelimit-reset"),
            header::RETRY_AFTER,
        ])
}

pub fn build_router(state: AppState) -> Router {
    // Public routes (no identity required)
    let public_routes = Router::new()
        .route("/health", get(health::health))
        .route("/api/v1/plans", get(plans::list_plans));

    // Routes acting on the caller's account
    let account_routes = Router::new()
        .route("/api/v1/accounts", post(accounts::register))
        .route("/api/v1/quota/usage", get(quota::usage))
        .route("/api/v1/quota/history", get(quota::history))
        .route("/api/v1/quota/{kind}", get(quota::check))
        .route("/api/v1/quota/{kind}/consume", post(quota::consume))
        .route("/api/v1/quota/{kind}/record", post(quota::record))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            identity_middleware,
        ));

    // Plan changes come from the billing integration, never from end users
    let billing_routes = Router::new()
        .route("/api/v1/accounts/plan", put(accounts::set_plan))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            billing_auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(account_routes)
        .merge(billing_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
