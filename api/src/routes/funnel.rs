use axum::extract::State;
use axum::{Json, Router, routing::get};

use funnel_core::funnel::Stage;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/funnel", get(list_stages))
}

/// Funnel stages in order, each with its checklist template
#[utoipa::path(
    get,
    path = "/api/funnel",
    responses(
        (status = 200, description = "Ordered funnel stages", body = Vec<Stage>)
    ),
    tag = "funnel"
)]
pub async fn list_stages(State(state): State<AppState>) -> Json<Vec<Stage>> {
    Json(state.deals.funnel().stages().to_vec())
}
