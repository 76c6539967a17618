use crate::raw::{RawCollection, RawConfig, RawSampling};
use crate::{
    BucketConfig, CollectionConfig, Config, ConfigError, CosmosApi, CosmosConfig, LoggingConfig,
    MongoConfig, RetryConfig, SampleSpec, SamplingConfig, SamplingMode,
};
use docdiff::FieldPath;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

lazy_static! {
    static ref ENV_VAR_RE: Regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Load and validate a YAML or JSON config file. `${VAR}` occurrences in any
/// string value are expanded from the environment (a missing or empty
/// variable is fatal), and selected secrets are overridden by non-empty
/// environment variables.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let display = path.display().to_string();
    let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;

    let raw: Value = if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: display.clone(),
            message: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&data).map_err(|e| ConfigError::Parse {
            path: display.clone(),
            message: e.to_string(),
        })?
    };

    let raw = expand_env(raw, "root")?;
    let raw: RawConfig = serde_json::from_value(raw)
        .map_err(|e| ConfigError::Invalid(format!("invalid config structure: {e}")))?;

    validate(raw)
}

fn env_nonempty(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn expand_env(value: Value, at: &str) -> Result<Value, ConfigError> {
    Ok(match value {
        Value::String(s) if s.contains("${") => Value::String(expand_str(&s, at)?),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(i, v)| expand_env(v, &format!("{at}[{i}]")))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let expanded = expand_env(v, &format!("{at}.{k}"))?;
                    Ok((k, expanded))
                })
                .collect::<Result<_, ConfigError>>()?,
        ),
        other => other,
    })
}

fn expand_str(s: &str, at: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(s.len());
    let mut tail = 0;

    for caps in ENV_VAR_RE.captures_iter(s) {
        let matched = caps.get(0).expect("capture 0 always present");
        let var = &caps[1];

        out.push_str(&s[tail..matched.start()]);
        match env_nonempty(var) {
            Some(value) => out.push_str(&value),
            None => {
                return Err(ConfigError::MissingEnvVar {
                    var: var.to_string(),
                    at: at.to_string(),
                })
            }
        }
        tail = matched.end();
    }
    out.push_str(&s[tail..]);
    Ok(out)
}

fn validate(raw: RawConfig) -> Result<Config, ConfigError> {
    let cosmos = {
        let raw = raw
            .cosmos
            .ok_or_else(|| ConfigError::MissingKey("root.cosmos".to_string()))?;

        let api = require_str(env_nonempty("COSMOS_API").or(raw.api), "cosmos.api")?.to_lowercase();
        let database = require_str(
            env_nonempty("COSMOS_DATABASE").or(raw.database),
            "cosmos.database",
        )?;

        let api = match api.as_str() {
            "mongo" => CosmosApi::Mongo {
                uri: require_str(env_nonempty("COSMOS_URI").or(raw.uri), "cosmos.uri")?,
            },
            "sql" => CosmosApi::Sql {
                endpoint: require_str(
                    env_nonempty("COSMOS_ENDPOINT").or(raw.endpoint),
                    "cosmos.endpoint",
                )?,
                key: require_str(env_nonempty("COSMOS_KEY").or(raw.key), "cosmos.key")?,
            },
            _ => {
                return Err(ConfigError::Invalid(
                    "cosmos.api must be 'mongo' or 'sql'".to_string(),
                ))
            }
        };
        CosmosConfig { database, api }
    };

    let mongodb = {
        let raw = raw
            .mongodb
            .ok_or_else(|| ConfigError::MissingKey("root.mongodb".to_string()))?;
        MongoConfig {
            uri: require_str(env_nonempty("MONGODB_URI").or(raw.uri), "mongodb.uri")?,
            database: require_str(
                env_nonempty("MONGODB_DATABASE").or(raw.database),
                "mongodb.database",
            )?,
        }
    };

    let sampling = validate_sampling(raw.sampling)?;

    let logging = {
        let raw = raw
            .logging
            .ok_or_else(|| ConfigError::MissingKey("root.logging".to_string()))?;
        LoggingConfig {
            main_log: PathBuf::from(require_str(raw.main_log, "logging.main_log")?),
            output_dir: PathBuf::from(require_str(raw.output_dir, "logging.output_dir")?),
        }
    };

    let collection_defaults =
        validate_collection(raw.collection_defaults, "collection_defaults", false)?;

    let mut collections = BTreeMap::new();
    for (name, raw) in raw.collections {
        if name.is_empty() {
            return Err(ConfigError::Invalid(
                "collection names must be non-empty strings".to_string(),
            ));
        }
        let at = format!("collections.{name}");
        let enabled = raw.enabled.unwrap_or(true);
        let collection = validate_collection(raw, &at, enabled)?;
        collections.insert(name, collection);
    }

    Ok(Config {
        cosmos,
        mongodb,
        sampling,
        logging,
        collection_defaults,
        collections,
    })
}

fn validate_sampling(raw: RawSampling) -> Result<SamplingConfig, ConfigError> {
    let spec = match (raw.percentage, raw.count) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::Invalid(
                "sampling.percentage and sampling.count are mutually exclusive".to_string(),
            ))
        }
        (None, None) => {
            return Err(ConfigError::Invalid(
                "provide either sampling.percentage or sampling.count".to_string(),
            ))
        }
        (Some(percentage), None) => {
            if percentage <= 0.0 || percentage > 100.0 {
                return Err(ConfigError::Invalid(
                    "sampling.percentage must be >0 and <=100".to_string(),
                ));
            }
            SampleSpec::Percentage(percentage)
        }
        (None, Some(count)) => {
            require_positive(count, "sampling.count")?;
            SampleSpec::Count(count)
        }
    };

    let mode = match raw.mode.as_deref().map(str::to_lowercase).as_deref() {
        None | Some("auto") => SamplingMode::Auto,
        Some("deterministic") => SamplingMode::Deterministic,
        Some("fast") => SamplingMode::Fast,
        Some("bucket") => SamplingMode::Bucket,
        Some(_) => {
            return Err(ConfigError::Invalid(
                "sampling.mode must be one of: auto, deterministic, fast, bucket".to_string(),
            ))
        }
    };

    let deterministic_scan_log_every = raw.deterministic_scan_log_every.unwrap_or(10_000);
    require_positive(
        deterministic_scan_log_every,
        "sampling.deterministic_scan_log_every",
    )?;
    if let Some(max) = raw.deterministic_max_scan_keys {
        require_positive(max, "sampling.deterministic_max_scan_keys")?;
    }

    let source_lookup_concurrency = raw.source_lookup_concurrency.unwrap_or(8);
    require_positive(
        source_lookup_concurrency,
        "sampling.source_lookup_concurrency",
    )?;
    let compare_concurrency = raw.compare_concurrency.unwrap_or(8);
    require_positive(compare_concurrency, "sampling.compare_concurrency")?;
    let compare_log_every = raw.compare_log_every.unwrap_or(1_000);
    require_positive(compare_log_every, "sampling.compare_log_every")?;

    let bucket_field = raw
        .bucket_field
        .map(|f| {
            FieldPath::parse(&f)
                .map_err(|e| ConfigError::Invalid(format!("sampling.bucket_field: {e}")))
        })
        .transpose()?;
    if let Some(modulus) = raw.bucket_modulus {
        if modulus <= 1 {
            return Err(ConfigError::Invalid(
                "sampling.bucket_modulus must be >1".to_string(),
            ));
        }
    }
    let bucket_count = raw.bucket_count.unwrap_or(8);
    require_positive(u64::from(bucket_count), "sampling.bucket_count")?;

    let bucket = match (bucket_field, raw.bucket_modulus) {
        (Some(field), Some(modulus)) => {
            if bucket_count > modulus {
                return Err(ConfigError::Invalid(
                    "sampling.bucket_count cannot be greater than sampling.bucket_modulus"
                        .to_string(),
                ));
            }
            Some(BucketConfig {
                field,
                modulus,
                count: bucket_count,
            })
        }
        (None, None) => None,
        _ => {
            return Err(ConfigError::Invalid(
                "sampling.bucket_field and sampling.bucket_modulus must be provided together"
                    .to_string(),
            ))
        }
    };
    if mode == SamplingMode::Bucket && bucket.is_none() {
        return Err(ConfigError::Invalid(
            "sampling.mode='bucket' requires sampling.bucket_field and sampling.bucket_modulus"
                .to_string(),
        ));
    }

    let max_attempts = raw.cosmos_retry_max_attempts.unwrap_or(6);
    require_positive(u64::from(max_attempts), "sampling.cosmos_retry_max_attempts")?;
    let base_delay = Duration::from_millis(raw.cosmos_retry_base_delay_ms.unwrap_or(500));

    Ok(SamplingConfig {
        spec,
        seed: raw.seed,
        mode,
        deterministic_scan_log_every,
        deterministic_max_scan_keys: raw.deterministic_max_scan_keys,
        source_lookup_concurrency: source_lookup_concurrency as usize,
        compare_concurrency: compare_concurrency as usize,
        compare_log_every,
        bucket,
        retry: RetryConfig {
            max_attempts,
            base_delay,
        },
    })
}

fn validate_collection(
    raw: RawCollection,
    at: &str,
    key_required: bool,
) -> Result<CollectionConfig, ConfigError> {
    let business_key = match (raw.business_key, key_required) {
        (Some(key), _) => Some(
            FieldPath::parse(&key)
                .map_err(|e| ConfigError::Invalid(format!("{at}.business_key: {e}")))?,
        ),
        (None, true) => return Err(ConfigError::MissingKey(format!("{at}.business_key"))),
        (None, false) => None,
    };

    Ok(CollectionConfig {
        enabled: raw.enabled.unwrap_or(true),
        business_key,
        exclude_fields: raw.exclude_fields.unwrap_or_default(),
        array_order_insensitive_paths: raw.array_order_insensitive_paths.unwrap_or_default(),
    })
}

fn require_str(value: Option<String>, at: &str) -> Result<String, ConfigError> {
    match value {
        Some(s) if !s.is_empty() => Ok(s),
        Some(_) => Err(ConfigError::Invalid(format!(
            "expected non-empty string at {at}"
        ))),
        None => Err(ConfigError::MissingKey(at.to_string())),
    }
}

fn require_positive(value: u64, at: &str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{at} must be >0")));
    }
    Ok(())
}
