use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use image_import::{
    app_state::AppState,
    config::AppConfig,
    db::{self, repository::PgImageRepository},
    routes::{self, metrics::MetricsState},
    services::{
        queue::{QueueSettings, RedisJobQueue},
        storage::S3ObjectStore,
    },
};

#[tokio::main]
async fn main() {
    image_import::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image-import API server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "import_jobs_submitted_total",
        "Import jobs accepted by the queue"
    );
    metrics::describe_counter!(
        "reconcile_removed_total",
        "Image records removed because their stored object was missing"
    );
    metrics::describe_gauge!("import_queue_jobs", "Jobs in the import queue by state");

    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Initializing object storage client");
    let storage = S3ObjectStore::new(
        &config.storage_bucket,
        &config.storage_region,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
        &config.storage_public_url,
    )
    .expect("Failed to initialize object storage client");

    tracing::info!("Connecting to Redis job queue");
    let queue = RedisJobQueue::connect(&config.redis_url, QueueSettings::default())
        .await
        .expect("Failed to connect to job queue");
    let queue = Arc::new(queue);

    let state = AppState::new(
        Arc::new(PgImageRepository::new(db_pool.clone())),
        Arc::new(storage),
        queue.clone(),
        config.job_options(),
        config.reconcile_batch_size,
    );

    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue,
    };

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting image-import on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(image_import::shutdown_signal())
        .await
        .expect("Server error");

    db_pool.close().await;
    tracing::info!("Server stopped");
}
