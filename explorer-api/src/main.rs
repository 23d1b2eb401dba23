pub(crate) mod config;
pub(crate) mod dataset;
pub(crate) mod error;
pub(crate) mod routes;
pub(crate) mod storage;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::Context as _;
use dataset::{PgWarehouse, QueryGateway};
use explorer_vision::{Classifier as _, OnnxClassifier};
use poem::{Server, listener::TcpListener};
use routes::AppState;
use storage::BucketStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = config::parse_config()?;
    tracing::info!(
        "Serving dataset {} of project {}",
        config.dataset.as_str(),
        config.project
    );

    explorer_vision::init_runtime().context("Failed to initialize ONNX runtime")?;
    let classifier = OnnxClassifier::load(
        &config.classifier.model_path,
        &config.classifier.dictionary_path,
        config.classifier.options,
    )
    .context("Failed to load the classifier")?;
    tracing::info!("Loaded classifier with {} labels", classifier.labels().len());

    let warehouse = PgWarehouse::connect(&config.database_url).await?;
    let storage = BucketStore::from_config(&config.storage)?;
    tracing::info!("Storing images in bucket {}", config.storage.bucket);

    let state = AppState {
        gateway: QueryGateway::new(Arc::new(warehouse), config.dataset),
        storage: Arc::new(storage),
        classifier: Arc::new(classifier),
        url_expiry: config.signed_url_expiry,
    };

    tracing::info!(
        "To browse the dataset, visit http://127.0.0.1:{port}",
        port = config.bind_addr.port()
    );

    Server::new(TcpListener::bind(config.bind_addr))
        .run(routes::router(state))
        .await?;

    Ok(())
}
