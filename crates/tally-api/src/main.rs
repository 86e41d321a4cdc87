//! Tally ingestion API server entry point.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tally_core::clock::{Clock, SystemClock};
use tally_core::rng::{DeterministicRng, SystemRng};
use tally_generator::EventGenerator;
use tally_transport::pg_transport::PgTransport;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tally_api::config::Config;
use tally_api::error::AppError;
use tally_api::routes;
use tally_api::shutdown;
use tally_api::state::AppState;
use tally_api::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    let telemetry = Telemetry::init("tally-api", config.otlp_endpoint.as_deref())?;

    tracing::info!("Starting Tally ingestion API server");

    // Create database connection pool and bring the schema up to date.
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(AppError::from)?;
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;

    // Build application state.
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(SystemRng::new()));
    let mut generator = EventGenerator::new(
        Arc::new(PgTransport::new(pool.clone())),
        config.topic.clone(),
        clock,
        rng,
    );
    if let Some(limit) = config.max_in_flight {
        generator = generator.with_max_in_flight(limit);
    }
    let app_state = AppState::new(Arc::new(generator), config.default_batch.clone())
        .with_oracle_stub_delay(config.oracle_stub_delay);

    // Build router.
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::ingest::router())
        .merge(routes::oracle::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server.
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| AppError::Config(format!("invalid HOST:PORT combination: {e}")))?;
    tracing::info!(%addr, topic = %config.topic, "Listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(AppError::from)?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .map_err(AppError::from)?;

    tracing::info!("Shutting down");
    pool.close().await;
    telemetry.shutdown();
    Ok(())
}
