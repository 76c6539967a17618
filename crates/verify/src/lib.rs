//! Compare orchestrator: drives counts, sampling, the bounded compare pool
//! and stat accumulation for each collection, and guarantees driver teardown
//! on every exit path.

use anyhow::Context;
use bson::{Bson, Document};
use docdiff::{Diff, FieldPath};
use drivers::{SourceDriver, TargetDriver};
use futures::StreamExt;
use journal::{CollectionStats, MismatchJournal};
use models::{CollectionConfig, Config};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Which collections a run covers.
#[derive(Debug, Clone)]
pub enum RunMode {
    /// One collection; its name must exist in the config.
    Single(String),
    /// Every collection listed by the source that has a config entry.
    AllCollections,
    /// Every collection with a config entry.
    Configured,
}

/// Compare the selected collections, returning per-collection stats.
/// Drivers are closed before returning, on success, failure and
/// cancellation alike.
pub async fn run(
    config: &Config,
    source: Box<dyn SourceDriver>,
    target: Box<dyn TargetDriver>,
    mode: RunMode,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<CollectionStats>> {
    let result = run_inner(config, source.as_ref(), target.as_ref(), mode, &cancel).await;
    source.close().await;
    target.close().await;
    result
}

async fn run_inner(
    config: &Config,
    source: &dyn SourceDriver,
    target: &dyn TargetDriver,
    mode: RunMode,
    cancel: &CancellationToken,
) -> anyhow::Result<Vec<CollectionStats>> {
    let collections: Vec<String> = match mode {
        RunMode::Single(name) => {
            if !config.collections.contains_key(&name) {
                anyhow::bail!("collection '{name}' is not present in the config");
            }
            vec![name]
        }
        RunMode::AllCollections => source
            .list_collections()
            .await
            .context("failed to list source collections")?
            .into_iter()
            .filter(|name| config.collections.contains_key(name))
            .collect(),
        RunMode::Configured => config.collections.keys().cloned().collect(),
    };

    let mut all_stats = Vec::with_capacity(collections.len());
    for name in collections {
        if cancel.is_cancelled() {
            anyhow::bail!("run interrupted");
        }
        let policy = config.collection_policy(&name);
        if !policy.enabled {
            tracing::info!(collection = %name, "skipping disabled collection");
            continue;
        }
        let Some(business_key) = &policy.business_key else {
            if config.collections.contains_key(&name) {
                anyhow::bail!("collection '{name}' is enabled but has no business_key configured");
            }
            anyhow::bail!(
                "collection '{name}' has no config entry and collection_defaults.business_key is not set"
            );
        };

        let stats = run_collection(config, source, target, &name, policy, business_key, cancel)
            .await
            .with_context(|| format!("comparing collection '{name}' failed"))?;
        all_stats.push(stats);
    }
    Ok(all_stats)
}

enum Outcome {
    MissingInTarget,
    Matched,
    Mismatched {
        target_doc: Document,
        diffs: Vec<Diff>,
    },
}

async fn run_collection(
    config: &Config,
    source: &dyn SourceDriver,
    target: &dyn TargetDriver,
    name: &str,
    policy: &CollectionConfig,
    business_key: &FieldPath,
    cancel: &CancellationToken,
) -> anyhow::Result<CollectionStats> {
    let total_started = Instant::now();
    let mut journal = MismatchJournal::new(&config.logging.output_dir, name);
    journal.clear()?;

    let count_started = Instant::now();
    let (source_total, target_total) =
        tokio::try_join!(source.count_documents(name), target.count_documents(name))?;
    let count_elapsed = count_started.elapsed();

    let sample_size = sampling::compute_sample_size(source_total, &config.sampling.spec);
    let sample_started = Instant::now();
    let sampled =
        sampling::sample_documents(source, name, business_key, sample_size, &config.sampling)
            .await?;
    let sample_elapsed = sample_started.elapsed();

    let mut stats = CollectionStats::new(name, source_total, target_total, sampled.len() as u64);

    // Pair each sampled document with its business-key value; documents
    // without one are counted and dropped before the compare pool.
    let mut candidates: Vec<(Bson, Document)> = Vec::with_capacity(sampled.len());
    for document in sampled {
        match business_key.lookup(&document) {
            Some(key) if *key != Bson::Null => {
                let key = key.clone();
                candidates.push((key, document));
            }
            _ => stats.source_missing_business_key += 1,
        }
    }

    let compare_started = Instant::now();
    let total_candidates = candidates.len();
    let exclude = policy.exclude_fields.as_slice();
    let insensitive = policy.array_order_insensitive_paths.as_slice();

    let mut results = futures::stream::iter(candidates.into_iter().map(|(key, source_doc)| {
        async move {
            let outcome = match target.find_by_business_key(name, business_key, &key).await? {
                None => Outcome::MissingInTarget,
                Some(target_doc) => {
                    let diffs = docdiff::diff(&source_doc, &target_doc, exclude, insensitive);
                    if diffs.is_empty() {
                        Outcome::Matched
                    } else {
                        Outcome::Mismatched { target_doc, diffs }
                    }
                }
            };
            Ok::<_, drivers::Error>((key, source_doc, outcome))
        }
    }))
    .buffer_unordered(config.sampling.compare_concurrency.max(1));

    // Single drainer: the only writer of stats and the journal.
    let mut compared: u64 = 0;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = results.next() => next,
        };
        let Some(result) = next else { break };
        let (key, source_doc, outcome) = result?;
        compared += 1;

        match outcome {
            Outcome::MissingInTarget => stats.missing_in_target += 1,
            Outcome::Matched => {
                stats.found_in_both += 1;
                stats.matched += 1;
            }
            Outcome::Mismatched { target_doc, diffs } => {
                stats.found_in_both += 1;
                stats.mismatched += 1;
                journal.append(business_key, &key, &source_doc, &target_doc, &diffs)?;
            }
        }

        if compared % config.sampling.compare_log_every == 0 {
            let elapsed = compare_started.elapsed().as_secs_f64();
            tracing::info!(
                collection = name,
                compared,
                total = total_candidates,
                elapsed_secs = format!("{elapsed:.1}"),
                docs_per_sec = format!("{:.0}", compared as f64 / elapsed.max(f64::EPSILON)),
                "compare progress"
            );
        }
    }
    drop(results);
    if cancel.is_cancelled() {
        anyhow::bail!("interrupted while comparing collection '{name}'");
    }
    let compare_elapsed = compare_started.elapsed();

    tracing::info!("{}", stats.to_log_line());
    tracing::info!(
        collection = name,
        count_secs = format!("{:.2}", count_elapsed.as_secs_f64()),
        sample_secs = format!("{:.2}", sample_elapsed.as_secs_f64()),
        compare_secs = format!("{:.2}", compare_elapsed.as_secs_f64()),
        total_secs = format!("{:.2}", total_started.elapsed().as_secs_f64()),
        "collection phase timings"
    );
    Ok(stats)
}
