use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Serialize;

use gavel_criteria::{CriteriaConfig, CriteriaPatch};

use super::AppState;

/// Field-level detail for a rejected update.
#[derive(Serialize)]
pub struct ValidationDetail {
    pub error: String,
    pub field: String,
}

pub async fn get_criteria(State(state): State<AppState>) -> Json<CriteriaConfig> {
    Json((*state.registry.snapshot()).clone())
}

/// Merge a partial update onto the active criteria configuration.
/// All-or-nothing: a rejected update leaves the prior config in force and
/// reports which field failed.
pub async fn update_criteria(
    State(state): State<AppState>,
    Json(patch): Json<CriteriaPatch>,
) -> Result<Json<CriteriaConfig>, (StatusCode, Json<ValidationDetail>)> {
    match state.registry.update(patch) {
        Ok(config) => Ok(Json((*config).clone())),
        Err(err) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ValidationDetail {
                field: err.field(),
                error: err.to_string(),
            }),
        )),
    }
}
