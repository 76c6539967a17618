use crate::retry::with_throttle_retry;
use crate::{Error, Result, SourceDriver};
use bson::{doc, Bson, Document};
use docdiff::FieldPath;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use lazy_static::lazy_static;
use models::RetryConfig;
use mongodb::error::ErrorKind;
use mongodb::options::FindOptions;
use mongodb::{Client, Database};
use regex::Regex;

// Cosmos DB surfaces request-rate throttling through this command error code.
const COSMOS_THROTTLE_CODE: i32 = 16500;

lazy_static! {
    static ref RETRY_AFTER_RE: Regex = Regex::new(r"RetryAfterMs=(\d+)").unwrap();
}

/// Cosmos DB reached over its MongoDB-compatible API.
pub struct CosmosMongoSource {
    client: Client,
    db: Database,
    retry: RetryConfig,
}

impl CosmosMongoSource {
    pub async fn connect(uri: &str, database: &str, retry: RetryConfig) -> Result<Self> {
        let options = crate::mongo_target::client_options(uri).await?;
        let host = options
            .hosts
            .first()
            .map(ToString::to_string)
            .unwrap_or_else(|| "<unknown-host>".to_string());
        tracing::info!(host, database, "creating cosmos mongo source client");

        let client = Client::with_options(options).map_err(classify)?;
        let db = client.database(database);

        client
            .database("admin")
            .run_command(doc! {"ping": 1}, None)
            .await
            .map_err(classify)?;
        tracing::info!(host, database, "cosmos mongo source ping succeeded");

        Ok(Self { client, db, retry })
    }
}

#[async_trait::async_trait]
impl SourceDriver for CosmosMongoSource {
    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = with_throttle_retry(self.retry, "list_collections", || async move {
            self.db.list_collection_names(None).await.map_err(classify)
        })
        .await?;
        names.sort();
        Ok(names)
    }

    async fn count_documents(&self, collection: &str) -> Result<u64> {
        with_throttle_retry(self.retry, "count_documents", || async move {
            self.db
                .collection::<Document>(collection)
                .count_documents(None, None)
                .await
                .map_err(classify)
        })
        .await
    }

    async fn sample_documents(
        &self,
        collection: &str,
        sample_size: usize,
    ) -> Result<Vec<Document>> {
        let pipeline = vec![doc! {"$sample": {"size": sample_size as i64}}];
        with_throttle_retry(self.retry, "sample_documents", || {
            let pipeline = pipeline.clone();
            async move {
                let cursor = self
                    .db
                    .collection::<Document>(collection)
                    .aggregate(pipeline, None)
                    .await
                    .map_err(classify)?;
                cursor.try_collect().await.map_err(classify)
            }
        })
        .await
    }

    async fn sample_documents_by_buckets(
        &self,
        collection: &str,
        bucket_field: &FieldPath,
        buckets: &[u32],
        sample_size: usize,
    ) -> Result<Vec<Document>> {
        if buckets.is_empty() || sample_size == 0 {
            return Ok(Vec::new());
        }
        tracing::info!(
            collection,
            bucket_field = %bucket_field,
            ?buckets,
            sample_size,
            "running cosmos mongo bucket sample"
        );

        let bucket_values: Vec<Bson> = buckets.iter().map(|b| Bson::Int64(i64::from(*b))).collect();
        let matcher = doc! {bucket_field.as_str(): {"$in": bucket_values}};
        let pipeline = vec![
            doc! {"$match": matcher},
            doc! {"$sample": {"size": sample_size as i64}},
        ];

        with_throttle_retry(self.retry, "sample_documents_by_buckets", || {
            let pipeline = pipeline.clone();
            async move {
                let cursor = self
                    .db
                    .collection::<Document>(collection)
                    .aggregate(pipeline, None)
                    .await
                    .map_err(classify)?;
                cursor.try_collect().await.map_err(classify)
            }
        })
        .await
    }

    async fn iter_business_keys(
        &self,
        collection: &str,
        business_key: &FieldPath,
    ) -> Result<BoxStream<'_, Result<Bson>>> {
        let filter = doc! {business_key.as_str(): {"$exists": true}};
        let mut projection = doc! {business_key.as_str(): 1};
        if business_key.as_str() != "_id" {
            projection.insert("_id", 0);
        }
        let options = FindOptions::builder()
            .projection(projection)
            .batch_size(10_000)
            .build();

        let cursor = with_throttle_retry(self.retry, "iter_business_keys", || {
            let (filter, options) = (filter.clone(), options.clone());
            async move {
                self.db
                    .collection::<Document>(collection)
                    .find(filter, options)
                    .await
                    .map_err(classify)
            }
        })
        .await?;

        let business_key = business_key.clone();
        let keys = cursor.map(move |item| match item {
            Ok(doc) => Ok(business_key.lookup(&doc).cloned().unwrap_or(Bson::Null)),
            Err(err) => Err(classify(err)),
        });
        Ok(keys.boxed())
    }

    async fn find_by_business_key(
        &self,
        collection: &str,
        business_key: &FieldPath,
        key_value: &Bson,
    ) -> Result<Option<Document>> {
        let filter = doc! {business_key.as_str(): key_value.clone()};
        with_throttle_retry(self.retry, "find_by_business_key", || {
            let filter = filter.clone();
            async move {
                self.db
                    .collection::<Document>(collection)
                    .find_one(filter, None)
                    .await
                    .map_err(classify)
            }
        })
        .await
    }

    async fn close(&self) {
        self.client.clone().shutdown().await;
    }
}

/// Map a driver error onto the typed error model, recognizing Cosmos
/// throttling (command error 16500, optionally carrying `RetryAfterMs=N`).
pub(crate) fn classify(err: mongodb::error::Error) -> Error {
    if let ErrorKind::Command(command) = &*err.kind {
        if command.code == COSMOS_THROTTLE_CODE {
            let retry_after = RETRY_AFTER_RE
                .captures(&command.message)
                .and_then(|caps| caps[1].parse::<u64>().ok())
                .map(std::time::Duration::from_millis);
            return Error::Throttled { retry_after };
        }
    }
    Error::Mongo(err)
}
