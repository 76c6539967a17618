//! Reporting sink: per-collection counters with the summary log line, and
//! the append-only JSON-lines journal of mismatch records.

mod stats;
mod writer;

pub use stats::CollectionStats;
pub use writer::{journal_path, MismatchJournal};

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to write mismatch journal {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
