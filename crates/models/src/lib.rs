//! Typed, validated configuration for a compare run. Loaded once from a YAML
//! or JSON file, with `${VAR}` expansion and environment overrides for
//! secrets, and immutable thereafter.

mod load;
mod raw;

pub use load::load_config;

use docdiff::FieldPath;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("missing required config key: {0}")]
    MissingKey(String),
    #[error("missing environment variable {var} referenced at {at}")]
    MissingEnvVar { var: String, at: String },
    #[error("{0}")]
    Invalid(String),
}

/// The root configuration of a compare run.
#[derive(Debug, Clone)]
pub struct Config {
    pub cosmos: CosmosConfig,
    pub mongodb: MongoConfig,
    pub sampling: SamplingConfig,
    pub logging: LoggingConfig,
    pub collection_defaults: CollectionConfig,
    pub collections: BTreeMap<String, CollectionConfig>,
}

impl Config {
    /// Resolve the policy for a collection: its explicit entry, or the
    /// configured defaults.
    pub fn collection_policy(&self, name: &str) -> &CollectionConfig {
        self.collections
            .get(name)
            .unwrap_or(&self.collection_defaults)
    }
}

/// Source database: Azure Cosmos DB, reached over one of its two APIs.
#[derive(Debug, Clone)]
pub struct CosmosConfig {
    pub database: String,
    pub api: CosmosApi,
}

#[derive(Debug, Clone)]
pub enum CosmosApi {
    Mongo { uri: String },
    Sql { endpoint: String, key: String },
}

impl CosmosApi {
    pub fn name(&self) -> &'static str {
        match self {
            CosmosApi::Mongo { .. } => "mongo",
            CosmosApi::Sql { .. } => "sql",
        }
    }
}

/// Target database: MongoDB.
#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

/// How many documents to sample per collection: a percentage of the source
/// total, or an absolute count. Exactly one is configured.
#[derive(Debug, Copy, Clone)]
pub enum SampleSpec {
    Percentage(f64),
    Count(u64),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SamplingMode {
    Auto,
    Deterministic,
    Fast,
    Bucket,
}

#[derive(Debug, Clone)]
pub struct SamplingConfig {
    pub spec: SampleSpec,
    pub seed: Option<u64>,
    pub mode: SamplingMode,
    pub deterministic_scan_log_every: u64,
    pub deterministic_max_scan_keys: Option<u64>,
    pub source_lookup_concurrency: usize,
    pub compare_concurrency: usize,
    pub compare_log_every: u64,
    pub bucket: Option<BucketConfig>,
    pub retry: RetryConfig,
}

/// Bucket-partitioned sampling: documents carry an integer bucket id in
/// `[0, modulus)` under `field`; the sampler asks the source for documents
/// from `count` bucket ids at a time.
#[derive(Debug, Clone)]
pub struct BucketConfig {
    pub field: FieldPath,
    pub modulus: u32,
    pub count: u32,
}

/// Retry policy for throttled source calls.
#[derive(Debug, Copy, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub main_log: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub enabled: bool,
    pub business_key: Option<FieldPath>,
    pub exclude_fields: Vec<String>,
    pub array_order_insensitive_paths: Vec<String>,
}
