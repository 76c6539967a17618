use crate::JournalError;
use bson::{Bson, Document};
use chrono::SecondsFormat;
use docdiff::{document_to_json, to_json_value, Diff, FieldPath};
use lazy_static::lazy_static;
use regex::Regex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref FILENAME_UNSAFE_RE: Regex = Regex::new(r"[^A-Za-z0-9._-]+").unwrap();
}

/// The journal path for a collection: its name sanitized for the filesystem,
/// with the `_mismatches.jsonl` suffix, under the output directory.
pub fn journal_path(output_dir: &Path, collection: &str) -> PathBuf {
    let safe = FILENAME_UNSAFE_RE.replace_all(collection, "_");
    let safe = safe.trim_matches(|c| ".-_".contains(c));
    let safe = if safe.is_empty() { "collection" } else { safe };
    output_dir.join(format!("{safe}_mismatches.jsonl"))
}

/// The per-collection mismatch journal: cleared at the start of a
/// collection's run, then appended one JSON record per mismatched document.
/// Written by a single drainer; the file is only created once there is a
/// record to write.
pub struct MismatchJournal {
    path: PathBuf,
    file: Option<File>,
}

impl MismatchJournal {
    pub fn new(output_dir: &Path, collection: &str) -> Self {
        Self {
            path: journal_path(output_dir, collection),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove any journal left over from a previous run.
    pub fn clear(&mut self) -> Result<(), JournalError> {
        self.file = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    pub fn append(
        &mut self,
        business_key: &FieldPath,
        key_value: &Bson,
        source: &Document,
        target: &Document,
        differences: &[Diff],
    ) -> Result<(), JournalError> {
        let record = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "business_key": business_key.as_str(),
            "business_key_value": to_json_value(key_value),
            "differences": differences,
            "source": document_to_json(source),
            "target": document_to_json(target),
        });

        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| self.io_error(e))?;
            self.file = Some(file);
        }
        let path = self.path.clone();
        let file = self.file.as_mut().expect("file was just opened");

        let mut line = record.to_string();
        line.push('\n');
        file.write_all(line.as_bytes())
            .map_err(|e| JournalError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
        file.flush().map_err(|e| JournalError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    fn io_error(&self, source: std::io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}
