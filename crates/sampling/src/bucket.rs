use crate::score::{key_text, stable_score};
use bson::{Bson, Document};
use docdiff::FieldPath;
use drivers::SourceDriver;
use models::BucketConfig;
use std::collections::HashSet;

/// Sample by walking bucket ids in seed-scored order, asking the source for
/// documents from `bucket.count` ids at a time until `sample_size` unique
/// documents are collected or the ids run out. Documents deduplicate by
/// business-key value, first wins; documents without a key are kept (they
/// are counted downstream).
pub async fn sample_by_buckets(
    source: &dyn SourceDriver,
    collection: &str,
    business_key: &FieldPath,
    sample_size: usize,
    bucket: &BucketConfig,
    seed: u64,
) -> drivers::Result<Vec<Document>> {
    let mut ids: Vec<u32> = (0..bucket.modulus).collect();
    ids.sort_by_key(|id| (stable_score(seed, &id.to_string()), *id));

    let mut collected: Vec<Document> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for group in ids.chunks(bucket.count as usize) {
        if collected.len() >= sample_size {
            break;
        }
        let remaining = sample_size - collected.len();
        let documents = source
            .sample_documents_by_buckets(collection, &bucket.field, group, remaining)
            .await?;

        for document in documents {
            if collected.len() >= sample_size {
                break;
            }
            let keep = match business_key.lookup(&document) {
                Some(key) if *key != Bson::Null => seen.insert(key_text(key)),
                _ => true,
            };
            if keep {
                collected.push(document);
            }
        }
    }

    tracing::info!(
        collection,
        seed,
        collected = collected.len(),
        sample_size,
        "bucket sampling finished"
    );
    Ok(collected)
}
