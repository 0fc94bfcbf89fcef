use crate::error::SqlbakError;
use crate::Result;
use chrono::NaiveDateTime;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// chrono format of the timestamp segment; hyphens instead of colons keep it filesystem-safe
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

const TIMESTAMP_PATTERN: &str = r"\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}";
const SQL_EXTENSION: &str = ".sql";
const GZIP_EXTENSION: &str = ".gz";

/// Name of a single backup artifact: `<logical_name>[_<timestamp>].sql[.gz]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupName {
    pub logical_name: String,
    pub timestamp: Option<NaiveDateTime>,
    pub compressed: bool,
}

impl BackupName {
    /// Name stamped with the given time, as produced by an export
    pub fn stamped(logical_name: &str, timestamp: NaiveDateTime, compressed: bool) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            timestamp: Some(truncate_to_seconds(timestamp)),
            compressed,
        }
    }

    /// Name without a timestamp segment
    pub fn plain(logical_name: &str, compressed: bool) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            timestamp: None,
            compressed,
        }
    }

    pub fn file_name(&self) -> String {
        let mut name = self.logical_name.clone();
        if let Some(timestamp) = &self.timestamp {
            name.push('_');
            name.push_str(&timestamp.format(TIMESTAMP_FORMAT).to_string());
        }
        name.push_str(SQL_EXTENSION);
        if self.compressed {
            name.push_str(GZIP_EXTENSION);
        }
        name
    }

    /// Full path of this backup inside `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }

    /// Recover a timestamped name from a candidate file name.
    ///
    /// Returns `None` unless `file_name` is a candidate for
    /// `(logical_name, compressed)`.
    pub fn parse(file_name: &str, logical_name: &str, compressed: bool) -> Option<Self> {
        if !is_candidate(file_name, logical_name, compressed) {
            return None;
        }

        let rest = &file_name[logical_name.len() + 1..];
        let timestamp_len = rest.find(SQL_EXTENSION)?;
        let timestamp =
            NaiveDateTime::parse_from_str(&rest[..timestamp_len], TIMESTAMP_FORMAT).ok()?;

        Some(Self {
            logical_name: logical_name.to_string(),
            timestamp: Some(timestamp),
            compressed,
        })
    }
}

/// Build the anchored matcher for timestamped backups of `logical_name`.
///
/// The name is escaped, so metacharacters in it match literally.
pub fn candidate_pattern(logical_name: &str, compressed: bool) -> Regex {
    let extension = if compressed { r"\.sql\.gz" } else { r"\.sql" };
    let pattern = format!(
        "^{}_{TIMESTAMP_PATTERN}{extension}$",
        regex::escape(logical_name)
    );
    // Every piece is either escaped or a fixed literal above
    Regex::new(&pattern).unwrap_or_else(|e| unreachable!("invalid candidate pattern: {e}"))
}

pub fn is_candidate(file_name: &str, logical_name: &str, compressed: bool) -> bool {
    candidate_pattern(logical_name, compressed).is_match(file_name)
}

/// List candidate backups in `dir`, oldest first.
///
/// The fixed-width timestamp makes name order equal to chronological order.
pub fn list_candidates(dir: &Path, logical_name: &str, compressed: bool) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(SqlbakError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let pattern = candidate_pattern(logical_name, compressed);
    let mut matches = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if pattern.is_match(&file_name) && entry.file_type()?.is_file() {
            matches.push(file_name);
        }
    }

    matches.sort();
    Ok(matches)
}

/// Validate a logical name supplied on the command line or in config
pub fn validate_logical_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SqlbakError::validation("Backup name must not be empty"));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(SqlbakError::validation(format!(
            "Backup name must not contain path separators: {name}"
        )));
    }

    if name == "." || name == ".." {
        return Err(SqlbakError::validation(format!("Invalid backup name: {name}")));
    }

    if name.chars().any(|c| c.is_control()) {
        return Err(SqlbakError::validation(
            "Backup name must not contain control characters",
        ));
    }

    Ok(())
}

fn truncate_to_seconds(timestamp: NaiveDateTime) -> NaiveDateTime {
    use chrono::Timelike;
    timestamp.with_nanosecond(0).unwrap_or(timestamp)
}
