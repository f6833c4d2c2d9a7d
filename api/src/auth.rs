use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use funnel_core::deals::Agent;
use funnel_core::launch::{self, LaunchError};

use crate::error::AppError;
use crate::state::AppState;

const AUTH_DOCS_HINT: &str =
    "Send 'Authorization: tma <initData>' using the launch data the WebApp received.";

/// Agent resolved from the `Authorization: tma <init-data>` header.
///
/// Resolution fails closed: a missing header, a foreign scheme, a bad
/// signature, a stale payload or an unregistered platform id all reject with
/// 401. Agents are only ever created by the bot's /start handler.
#[derive(Debug, Clone)]
pub struct AuthenticatedAgent(pub Agent);

impl FromRequestParts<AppState> for AuthenticatedAgent {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing Authorization header"))?;

        let data = launch::strip_scheme(header)
            .and_then(|payload| state.verifier.verify(payload, Utc::now()))
            .map_err(|err| {
                tracing::debug!(error = %err, "launch credential rejected");
                unauthorized_from(err)
            })?;

        let agent = state
            .store
            .find_agent(data.user.id)
            .await?
            .ok_or_else(|| {
                tracing::debug!(telegram_id = data.user.id, "launch credential for unknown agent");
                unauthorized("Unknown agent. Open the bot and send /start first.")
            })?;

        Ok(AuthenticatedAgent(agent))
    }
}

fn unauthorized(message: &str) -> AppError {
    AppError::Unauthorized {
        message: message.to_string(),
        docs_hint: Some(AUTH_DOCS_HINT.to_string()),
    }
}

fn unauthorized_from(err: LaunchError) -> AppError {
    unauthorized(&err.to_string())
}
