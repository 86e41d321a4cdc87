//! Tally forwarder process: drains the transport into the aggregation store.

use std::error::Error;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tally_core::transport::EventPublisher;
use tally_forwarder::Forwarder;
use tally_oracle::http_oracle::HttpStatusOracle;
use tally_store::pg_aggregation_store::PgAggregationStore;
use tally_transport::pg_transport::{PgTransport, SubscriptionConfig};

use tally_api::config::Config;
use tally_api::error::AppError;
use tally_api::shutdown;
use tally_api::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    let telemetry = Telemetry::init("tally-forwarder", config.otlp_endpoint.as_deref())?;

    tracing::info!(
        group_id = %config.group_id,
        consumer_id = %config.consumer_id,
        "Starting Tally forwarder"
    );

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(AppError::from)?;
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(AppError::from)?;

    // A subscription that cannot be established is fatal.
    let transport = PgTransport::new(pool.clone());
    let mut subscription_config =
        SubscriptionConfig::new(&config.topic, &config.group_id, &config.consumer_id);
    subscription_config.lease = config.lease;
    let subscription = transport
        .subscribe(subscription_config)
        .await
        .map_err(AppError::from)?;

    let oracle = HttpStatusOracle::new(&config.oracle_url, config.oracle_timeout)
        .map_err(AppError::from)?;
    let store = PgAggregationStore::new(pool.clone());

    let mut forwarder = Forwarder::new(
        subscription,
        Arc::new(oracle),
        Arc::new(store),
        shutdown::token(),
    )
    .with_poll_timeout(config.poll_timeout);
    if let Some(topic) = &config.dead_letter_topic {
        let publisher: Arc<dyn EventPublisher> = Arc::new(transport.clone());
        forwarder = forwarder.with_dead_letter(publisher, topic.clone());
    }

    let stats = forwarder.run().await?;
    tracing::info!(
        received = stats.received,
        aggregated = stats.aggregated,
        dropped = stats.oracle_failures + stats.store_failures,
        "Forwarder stopped"
    );

    pool.close().await;
    telemetry.shutdown();
    Ok(())
}
