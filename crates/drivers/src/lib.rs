//! Read-only drivers over the source (Cosmos DB) and target (MongoDB)
//! document stores, expressed as capability sets. Source queries retry
//! transient throttling with exponential backoff; every other failure
//! surfaces to the caller.

mod cosmos_mongo;
mod cosmos_sql;
mod env;
mod mongo_target;
mod preflight;
mod retry;

pub use cosmos_mongo::CosmosMongoSource;
pub use cosmos_sql::CosmosSqlSource;
pub use mongo_target::MongoTarget;
pub use retry::with_throttle_retry;

use bson::{Bson, Document};
use docdiff::FieldPath;
use futures::stream::BoxStream;
use models::{Config, CosmosApi};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request was throttled by the server")]
    Throttled { retry_after: Option<Duration> },
    #[error("the source backend does not support server-side random sampling")]
    Unsupported,
    #[error("{context}")]
    Unavailable {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("cosmos request failed with status {status}: {message}")]
    CosmosStatus { status: u16, message: String },
    #[error("unexpected response from cosmos: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read-only capability set over source collections.
#[async_trait::async_trait]
pub trait SourceDriver: Send + Sync {
    /// All collection names, sorted.
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn count_documents(&self, collection: &str) -> Result<u64>;

    /// Up to `sample_size` documents in unspecified order, using the
    /// backend's native random sampling. Fails with [`Error::Unsupported`]
    /// when the backend has no such operator.
    async fn sample_documents(&self, collection: &str, sample_size: usize)
        -> Result<Vec<Document>>;

    /// Up to `sample_size` documents whose `bucket_field` value is one of
    /// `buckets`. Fails with [`Error::Unsupported`] when unavailable.
    async fn sample_documents_by_buckets(
        &self,
        collection: &str,
        bucket_field: &FieldPath,
        buckets: &[u32],
        sample_size: usize,
    ) -> Result<Vec<Document>>;

    /// Lazily stream every defined business-key value of the collection.
    /// No ordering is promised, and the stream may fail mid-way.
    async fn iter_business_keys(
        &self,
        collection: &str,
        business_key: &FieldPath,
    ) -> Result<BoxStream<'_, Result<Bson>>>;

    /// The unique document whose business key equals `key_value`, if any.
    async fn find_by_business_key(
        &self,
        collection: &str,
        business_key: &FieldPath,
        key_value: &Bson,
    ) -> Result<Option<Document>>;

    /// Release connections. Idempotent; called on every exit path.
    async fn close(&self);
}

/// Read-only capability set over target collections.
#[async_trait::async_trait]
pub trait TargetDriver: Send + Sync {
    async fn count_documents(&self, collection: &str) -> Result<u64>;

    async fn find_by_business_key(
        &self,
        collection: &str,
        business_key: &FieldPath,
        key_value: &Bson,
    ) -> Result<Option<Document>>;

    async fn close(&self);
}

/// Build the configured source driver.
pub async fn connect_source(config: &Config) -> Result<Box<dyn SourceDriver>> {
    match &config.cosmos.api {
        CosmosApi::Mongo { uri } => Ok(Box::new(
            CosmosMongoSource::connect(uri, &config.cosmos.database, config.sampling.retry).await?,
        )),
        CosmosApi::Sql { endpoint, key } => Ok(Box::new(CosmosSqlSource::connect(
            endpoint,
            key,
            &config.cosmos.database,
            config.sampling.retry,
        )?)),
    }
}

/// Build the target driver.
pub async fn connect_target(config: &Config) -> Result<Box<dyn TargetDriver>> {
    Ok(Box::new(
        MongoTarget::connect(&config.mongodb.uri, &config.mongodb.database).await?,
    ))
}
