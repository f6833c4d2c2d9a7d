use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use chrono::TimeDelta;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use funnel_core::funnel::Funnel;
use funnel_core::launch::LaunchVerifier;

mod auth;
mod bot;
mod config;
mod deals;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;
mod supervisor;

use bot::{Bot, LaunchButton, TelegramTransport, TransportError};
use config::Config;
use deals::{CreationLimiter, DealService};
use store::PgStore;
use supervisor::{Shutdown, Supervisor, SupervisorError};

const LAUNCH_BUTTON_TEXT: &str = "Open deals";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Deal Funnel API",
        version = "0.1.0",
        description = "Sales pipeline for Telegram agents. Authenticate with the WebApp launch data: 'Authorization: tma <initData>'."
    ),
    paths(
        routes::health::health_check,
        routes::funnel::list_stages,
        routes::deals::list_deals,
        routes::deals::create_deal,
        routes::deals::update_status,
        routes::deals::toggle_checklist,
    ),
    components(schemas(
        HealthResponse,
        funnel_core::error::ApiError,
        funnel_core::funnel::Stage,
        funnel_core::deals::Deal,
        funnel_core::deals::ChecklistItem,
        funnel_core::deals::CreateDealRequest,
        funnel_core::deals::UpdateStatusRequest,
        funnel_core::deals::ToggleChecklistRequest,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "launch_auth",
            utoipa::openapi::security::SecurityScheme::ApiKey(
                utoipa::openapi::security::ApiKey::Header(
                    utoipa::openapi::security::ApiKeyValue::with_description(
                        "Authorization",
                        "tma <initData>",
                    ),
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("LAUNCH_MAX_AGE_SECS is out of range")]
    LaunchMaxAge,
    #[error("failed to build Bot API client: {0}")]
    Transport(#[from] TransportError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
}

/// The full HTTP surface over `state`.
pub fn app(state: state::AppState) -> Router {
    Router::new()
        .route("/api-doc/openapi.json", get(openapi_json))
        .merge(routes::health::router())
        .merge(routes::funnel::router())
        .merge(routes::deals::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funnel_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Configuration errors abort before anything binds.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(?config, "configuration loaded");

    match run(config).await {
        Ok(()) => {
            tracing::info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));

    let mut supervisor = Supervisor::new(config.shutdown_grace);
    supervisor.apply_schema(store.apply_schema()).await?;

    let max_age = config
        .launch_max_age
        .map(TimeDelta::from_std)
        .transpose()
        .map_err(|_| StartupError::LaunchMaxAge)?;

    let funnel = Arc::new(Funnel::default());
    let app_state = state::AppState {
        store: store.clone(),
        deals: Arc::new(DealService::new(
            store.clone(),
            funnel,
            CreationLimiter::default(),
        )),
        verifier: Arc::new(LaunchVerifier::new(&config.bot_token, max_age)),
    };

    let bot = Bot::new(
        Arc::new(TelegramTransport::new(&config.bot_token)?),
        store,
        LaunchButton {
            text: LAUNCH_BUTTON_TEXT.to_string(),
            url: config.webapp_url.clone(),
        },
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;
    tracing::info!("Deal Funnel API listening on {}", addr);

    let app = app(app_state);
    let outcome = supervisor
        .run(
            move |shutdown| bot.run(shutdown),
            move |shutdown| async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(stop_signal(shutdown))
                    .await
            },
        )
        .await;
    tracing::info!(phase = ?supervisor.phase(), ok = outcome.is_ok(), "supervisor finished");
    outcome?;
    Ok(())
}

/// Resolves on SIGINT, SIGTERM (unix) or supervisor cancellation.
async fn stop_signal(mut shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c; shutting down"),
        _ = terminate => tracing::info!("received SIGTERM; shutting down"),
        _ = shutdown.cancelled() => tracing::info!("shutdown requested by supervisor"),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::routes::deals::tests::fixture;

    #[tokio::test]
    async fn openapi_document_lists_deal_routes() {
        let fx = fixture().await;
        let response = fx
            .app()
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(doc["paths"]["/api/deals"]["post"].is_object());
        assert!(doc["paths"]["/api/deals/{id}/status"]["post"].is_object());
        assert!(doc["components"]["securitySchemes"]["launch_auth"].is_object());
    }
}
