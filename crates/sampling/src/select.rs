use crate::score::{key_text, stable_score};
use bson::Bson;
use docdiff::FieldPath;
use drivers::SourceDriver;
use futures::TryStreamExt;
use models::SamplingConfig;
use std::collections::BinaryHeap;

/// A scored candidate in the top-k heap. Ordering is by (score, text) so
/// that selection is a pure function of the key multiset, independent of the
/// order in which keys stream in.
struct ScoredKey {
    score: u64,
    text: String,
    key: Bson,
}

impl PartialEq for ScoredKey {
    fn eq(&self, other: &Self) -> bool {
        (self.score, &self.text) == (other.score, &other.text)
    }
}
impl Eq for ScoredKey {}

impl PartialOrd for ScoredKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.score, &self.text).cmp(&(other.score, &other.text))
    }
}

/// Stream the collection's business keys and keep the `sample_size` keys
/// with the smallest deterministic scores, using a bounded max-heap so the
/// full key set is never materialized. Null keys are skipped. The result is
/// ordered ascending by score.
pub async fn select_deterministic_keys(
    source: &dyn SourceDriver,
    collection: &str,
    business_key: &FieldPath,
    sample_size: usize,
    seed: u64,
    policy: &SamplingConfig,
) -> drivers::Result<Vec<Bson>> {
    if sample_size == 0 {
        return Ok(Vec::new());
    }

    let mut keys = source.iter_business_keys(collection, business_key).await?;
    let mut heap: BinaryHeap<ScoredKey> = BinaryHeap::with_capacity(sample_size + 1);
    let mut scanned: u64 = 0;

    while let Some(key) = keys.try_next().await? {
        scanned += 1;

        if key != Bson::Null {
            let text = key_text(&key);
            let candidate = ScoredKey {
                score: stable_score(seed, &text),
                text,
                key,
            };
            if heap.len() < sample_size {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|max| candidate < *max) {
                heap.pop();
                heap.push(candidate);
            }
        }

        if scanned % policy.deterministic_scan_log_every == 0 {
            tracing::info!(
                collection,
                scanned,
                selected = heap.len(),
                "deterministic key scan progress"
            );
        }
        if let Some(max) = policy.deterministic_max_scan_keys {
            if scanned >= max {
                tracing::warn!(
                    collection,
                    scanned,
                    max_scan_keys = max,
                    "stopping deterministic key scan at configured cap"
                );
                break;
            }
        }
    }

    let mut selected = heap.into_vec();
    selected.sort();
    Ok(selected.into_iter().map(|s| s.key).collect())
}
