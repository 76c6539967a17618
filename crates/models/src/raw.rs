//! Serde-level shapes of the config file, prior to validation. Every leaf is
//! optional here so that validation can produce precise errors and apply
//! defaults and environment overrides in one place.

use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    pub cosmos: Option<RawCosmos>,
    pub mongodb: Option<RawMongo>,
    #[serde(default)]
    pub sampling: RawSampling,
    pub logging: Option<RawLogging>,
    #[serde(default)]
    pub collection_defaults: RawCollection,
    #[serde(default)]
    pub collections: BTreeMap<String, RawCollection>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCosmos {
    pub api: Option<String>,
    pub database: Option<String>,
    pub uri: Option<String>,
    pub endpoint: Option<String>,
    pub key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMongo {
    pub uri: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSampling {
    pub percentage: Option<f64>,
    pub count: Option<u64>,
    pub seed: Option<u64>,
    pub mode: Option<String>,
    pub deterministic_scan_log_every: Option<u64>,
    pub deterministic_max_scan_keys: Option<u64>,
    pub source_lookup_concurrency: Option<u64>,
    pub compare_concurrency: Option<u64>,
    pub compare_log_every: Option<u64>,
    pub bucket_field: Option<String>,
    pub bucket_modulus: Option<u32>,
    pub bucket_count: Option<u32>,
    pub cosmos_retry_max_attempts: Option<u32>,
    pub cosmos_retry_base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawLogging {
    pub main_log: Option<String>,
    pub output_dir: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawCollection {
    pub enabled: Option<bool>,
    pub business_key: Option<String>,
    pub exclude_fields: Option<Vec<String>>,
    pub array_order_insensitive_paths: Option<Vec<String>>,
}
