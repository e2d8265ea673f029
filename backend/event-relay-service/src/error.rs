use thiserror::Error;

/// Startup and wiring failures. Failures inside the pipeline are handled by
/// the libraries and only logged here.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("Failed to start server: {0}")]
    StartServer(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
