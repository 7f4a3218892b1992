use image_import::{
    config::AppConfig,
    db::{self, repository::PgImageRepository},
    services::{
        google_drive::GoogleDriveClient,
        pipeline::ImportPipeline,
        queue::{QueueSettings, RedisJobQueue},
        storage::S3ObjectStore,
        worker::{WorkerConfig, WorkerPool},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    image_import::init_tracing();

    tracing::info!("Starting image import worker");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    if let Some(addr) = config.worker_metrics_addr.as_deref() {
        let addr: SocketAddr = addr.parse().expect("Invalid WORKER_METRICS_ADDR");
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .expect("Failed to install Prometheus exporter");
        tracing::info!(%addr, "Prometheus exporter listening");
    }

    let api_key = config
        .google_api_key
        .clone()
        .expect("GOOGLE_API_KEY is required by the worker");

    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Initializing services");
    let storage = S3ObjectStore::new(
        &config.storage_bucket,
        &config.storage_region,
        &config.storage_endpoint,
        &config.storage_access_key,
        &config.storage_secret_key,
        &config.storage_public_url,
    )
    .expect("Failed to initialize object storage client");

    let drive = GoogleDriveClient::new(api_key).expect("Failed to initialize Google Drive client");

    tracing::info!("Connecting to Redis job queue");
    let queue_settings = QueueSettings::default();
    let queue = RedisJobQueue::connect(&config.redis_url, queue_settings)
        .await
        .expect("Failed to connect to job queue");

    let pipeline = ImportPipeline::new(
        Arc::new(drive),
        Arc::new(storage),
        Arc::new(PgImageRepository::new(db_pool.clone())),
    );
    let worker_config = WorkerConfig {
        lease_renew_interval: queue_settings.lease_renew_interval(),
        ..config.worker_config()
    };
    let pool = WorkerPool::new(Arc::new(queue), Arc::new(pipeline), worker_config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        image_import::shutdown_signal().await;
        signal_token.cancel();
    });

    tracing::info!("Worker ready, starting job processing loop");
    pool.run(shutdown).await;

    db_pool.close().await;
    tracing::info!("Worker stopped");
}
