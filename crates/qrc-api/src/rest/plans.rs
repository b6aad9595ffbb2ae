use axum::extract::State;
use axum::Json;
use qrc_quota::Plan;

use crate::state::AppState;

pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<Plan>> {
    Json(state.catalog.plans().to_vec())
}
