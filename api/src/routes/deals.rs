use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};

use funnel_core::deals::{
    ChecklistItem, CreateDealRequest, Deal, ToggleChecklistRequest, UpdateStatusRequest,
};
use funnel_core::error::ApiError;

use crate::auth::AuthenticatedAgent;
use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/deals", get(list_deals).post(create_deal))
        .route("/api/deals/{id}/status", post(update_status))
        .route("/api/deals/{id}/checklist", post(toggle_checklist))
}

/// Treat absent and blank fields alike.
fn required(value: Option<String>, field: &str) -> Result<String, AppError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::missing_field(field)),
    }
}

/// List the caller's deals, newest first
#[utoipa::path(
    get,
    path = "/api/deals",
    responses(
        (status = 200, description = "Deals owned by the caller", body = Vec<Deal>),
        (status = 401, description = "Missing or invalid launch credential", body = ApiError)
    ),
    security(("launch_auth" = [])),
    tag = "deals"
)]
pub async fn list_deals(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
) -> Result<Json<Vec<Deal>>, AppError> {
    Ok(Json(state.deals.list_deals(&agent).await?))
}

/// Create a deal at the initial stage
///
/// One creation per agent per minute; a second attempt inside the window gets
/// 429 with a `Retry-After` header.
#[utoipa::path(
    post,
    path = "/api/deals",
    request_body = CreateDealRequest,
    responses(
        (status = 200, description = "Deal created", body = Deal),
        (status = 400, description = "Missing client name", body = ApiError),
        (status = 401, description = "Missing or invalid launch credential", body = ApiError),
        (status = 429, description = "Created another deal less than a minute ago", body = ApiError)
    ),
    security(("launch_auth" = [])),
    tag = "deals"
)]
pub async fn create_deal(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    AppJson(req): AppJson<CreateDealRequest>,
) -> Result<Json<Deal>, AppError> {
    let client_name = required(req.client_name, "clientName")?;
    Ok(Json(state.deals.create_deal(&agent, &client_name).await?))
}

/// Move a deal to another stage and reset its checklist
#[utoipa::path(
    post,
    path = "/api/deals/{id}/status",
    params(("id" = i64, Path, description = "Deal id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Deal with its new stage and checklist", body = Deal),
        (status = 400, description = "Missing status or non-numeric id", body = ApiError),
        (status = 401, description = "Missing or invalid launch credential", body = ApiError),
        (status = 404, description = "Deal not found", body = ApiError)
    ),
    security(("launch_auth" = [])),
    tag = "deals"
)]
pub async fn update_status(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    AppPath(deal_id): AppPath<i64>,
    AppJson(req): AppJson<UpdateStatusRequest>,
) -> Result<Json<Deal>, AppError> {
    let status = required(req.status, "status")?;
    Ok(Json(state.deals.set_stage(&agent, deal_id, &status).await?))
}

/// Toggle one checklist item by its label
#[utoipa::path(
    post,
    path = "/api/deals/{id}/checklist",
    params(("id" = i64, Path, description = "Deal id")),
    request_body = ToggleChecklistRequest,
    responses(
        (status = 200, description = "Full updated checklist", body = Vec<ChecklistItem>),
        (status = 400, description = "Missing text or non-numeric id", body = ApiError),
        (status = 401, description = "Missing or invalid launch credential", body = ApiError),
        (status = 404, description = "Deal or checklist item not found", body = ApiError)
    ),
    security(("launch_auth" = [])),
    tag = "deals"
)]
pub async fn toggle_checklist(
    State(state): State<AppState>,
    AuthenticatedAgent(agent): AuthenticatedAgent,
    AppPath(deal_id): AppPath<i64>,
    AppJson(req): AppJson<ToggleChecklistRequest>,
) -> Result<Json<Vec<ChecklistItem>>, AppError> {
    let text = required(req.text, "text")?;
    Ok(Json(
        state
            .deals
            .toggle_checklist_item(&agent, deal_id, &text)
            .await?,
    ))
}
