/// Counters accumulated while comparing one collection.
///
/// Invariants, after a completed run: `matched + mismatched == found_in_both`
/// and `found_in_both + missing_in_target + source_missing_business_key ==
/// sampled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub collection: String,
    pub source_total: u64,
    pub target_total: u64,
    pub sampled: u64,
    pub found_in_both: u64,
    pub missing_in_target: u64,
    pub source_missing_business_key: u64,
    pub matched: u64,
    pub mismatched: u64,
}

impl CollectionStats {
    pub fn new(collection: &str, source_total: u64, target_total: u64, sampled: u64) -> Self {
        Self {
            collection: collection.to_string(),
            source_total,
            target_total,
            sampled,
            found_in_both: 0,
            missing_in_target: 0,
            source_missing_business_key: 0,
            matched: 0,
            mismatched: 0,
        }
    }

    pub fn missing_in_either(&self) -> u64 {
        self.missing_in_target + self.source_missing_business_key
    }

    /// The one-line summary logged after the collection completes.
    pub fn to_log_line(&self) -> String {
        format!(
            "{} | source_total={} target_total={} sampled={} found_in_both={} \
             missing_in_either={} missing_in_target={} source_missing_business_key={} \
             matched={} mismatched={}",
            self.collection,
            self.source_total,
            self.target_total,
            self.sampled,
            self.found_in_both,
            self.missing_in_either(),
            self.missing_in_target,
            self.source_missing_business_key,
            self.matched,
            self.mismatched,
        )
    }
}

#[cfg(test)]
mod test {
    use super::CollectionStats;

    #[test]
    fn test_log_line_format() {
        let mut stats = CollectionStats::new("orders", 100, 98, 10);
        stats.found_in_both = 8;
        stats.missing_in_target = 1;
        stats.source_missing_business_key = 1;
        stats.matched = 7;
        stats.mismatched = 1;

        assert_eq!(
            stats.to_log_line(),
            "orders | source_total=100 target_total=98 sampled=10 found_in_both=8 \
             missing_in_either=2 missing_in_target=1 source_missing_business_key=1 \
             matched=7 mismatched=1"
        );
    }
}
