use bson::Bson;
use sha2::{Digest, Sha256};

/// The deterministic score of a key under a seed: the first 8 bytes of
/// SHA-256(`"<seed>:<key>"`) read big-endian. Selection keeps the smallest
/// scores, so the score function alone fixes the chosen sample for a given
/// seed and key multiset.
pub fn stable_score(seed: u64, key_text: &str) -> u64 {
    let digest = Sha256::digest(format!("{seed}:{key_text}").as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest has 32 bytes"))
}

/// The textual form of a key value used for scoring and deduplication.
/// Strings render as their raw content; everything else by its canonical
/// encoding.
pub fn key_text(key: &Bson) -> String {
    match key {
        Bson::String(s) => s.clone(),
        other => docdiff::canonical_string(other),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_score_is_stable_and_seed_sensitive() {
        assert_eq!(stable_score(7, "42"), stable_score(7, "42"));
        assert_ne!(stable_score(7, "42"), stable_score(8, "42"));
        assert_ne!(stable_score(7, "42"), stable_score(7, "43"));
    }

    #[test]
    fn test_key_text_forms() {
        assert_eq!(key_text(&Bson::String("order-9".to_string())), "order-9");
        assert_eq!(key_text(&Bson::Int64(42)), "42");
        assert_eq!(
            key_text(&Bson::Document(bson::doc! {"b": 1, "a": 2})),
            r#"{"a":2,"b":1}"#
        );
    }
}
