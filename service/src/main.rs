use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod dispatch;
mod error;
mod notify;
mod platform;
mod proposals;
mod reaper;
mod routes;
mod state;
mod store;
mod sweeps;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Caseflow Orchestration API",
        version = "0.1.0",
        description = "Run orchestration core for correspondence cases: idempotent dispatch, \
                       case-exclusivity locks with a reaper, and the scheduling sweeps."
    ),
    paths(
        routes::health::health_check,
        routes::cases::dispatch_case,
        routes::runs::get_run,
        routes::runs::list_case_runs,
        routes::runs::run_started,
        routes::runs::run_heartbeat,
        routes::runs::run_completed,
        routes::runs::run_failed,
        routes::sweeps::run_sweep,
        routes::proposals::list_case_proposals,
        routes::proposals::record_decision,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::cases::DispatchRequest,
        routes::runs::RunTransitionResponse,
        routes::runs::RunFailedRequest,
        routes::proposals::DecisionRequest,
        routes::proposals::DecisionResponse,
        dispatch::DispatchOutcome,
        sweeps::SweepOutcome,
        platform::StatusBucket,
        caseflow_core::error::ApiError,
        caseflow_core::case::Case,
        caseflow_core::case::CaseStatus,
        caseflow_core::run::AgentRun,
        caseflow_core::run::RunStatus,
        caseflow_core::run::TriggerKind,
        caseflow_core::proposal::Proposal,
        caseflow_core::proposal::ProposalStatus,
        caseflow_core::proposal::ActionKind,
        caseflow_core::follow_up::FollowUpSchedule,
        caseflow_core::follow_up::FollowUpStatus,
        caseflow_core::intent::MessageIntent,
        caseflow_core::intent::AssessedIntent,
    ))
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "caseflow_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let config = Arc::new(config::Config::from_env());

    let platform: Arc<dyn platform::ExecutionPlatform> = Arc::new(platform::HttpPlatform::new(
        config.platform_base_url.clone(),
        config.platform_token.clone(),
    ));

    let notifier: Arc<dyn notify::Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(notify::WebhookNotifier::new(url.clone())),
        None => Arc::new(notify::NoopNotifier),
    };

    let app_state = state::AppState {
        db: pool,
        platform,
        notifier,
        config,
    };

    // Periodic sweeps run in-process; any instance may run any sweep.
    sweeps::spawn_all(&app_state);

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::cases::router())
        .merge(routes::runs::router())
        .merge(routes::sweeps::router())
        .merge(routes::proposals::router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Caseflow service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
