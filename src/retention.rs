use crate::error::{DeleteFailure, SqlbakError};
use crate::naming::list_candidates;
use crate::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Backups that `prune` would delete, oldest first
pub fn plan_prune(
    directory: &Path,
    logical_name: &str,
    compressed: bool,
    keep_count: i64,
) -> Result<Vec<PathBuf>> {
    let candidates = list_candidates(directory, logical_name, compressed)?;

    // Zero or negative keeps nothing
    let keep = usize::try_from(keep_count.max(0)).unwrap_or(usize::MAX);
    let delete_count = candidates.len().saturating_sub(keep);

    debug!(
        candidates = candidates.len(),
        keep,
        delete = delete_count,
        "planned retention"
    );

    Ok(candidates[..delete_count]
        .iter()
        .map(|name| directory.join(name))
        .collect())
}

/// Delete all but the newest `keep_count` backups of one family.
///
/// Every planned deletion is attempted. If any of them fail the result is
/// `PartialDeleteFailure`, carrying both the deleted paths and the failures.
pub fn prune(
    directory: &Path,
    logical_name: &str,
    compressed: bool,
    keep_count: i64,
) -> Result<Vec<PathBuf>> {
    prune_with(directory, logical_name, compressed, keep_count, |path| {
        fs::remove_file(path)
    })
}

fn prune_with<F>(
    directory: &Path,
    logical_name: &str,
    compressed: bool,
    keep_count: i64,
    mut remove: F,
) -> Result<Vec<PathBuf>>
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let planned = plan_prune(directory, logical_name, compressed, keep_count)?;

    let mut deleted = Vec::with_capacity(planned.len());
    let mut failures = Vec::new();

    for path in planned {
        match remove(&path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted backup");
                deleted.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not delete backup");
                failures.push(DeleteFailure {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(deleted)
    } else {
        Err(SqlbakError::PartialDeleteFailure { deleted, failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const FAMILY: [&str; 5] = [
        "db_2024-01-01T00-00-00.sql",
        "db_2024-01-02T00-00-00.sql",
        "db_2024-01-03T00-00-00.sql",
        "db_2024-01-04T00-00-00.sql",
        "db_2024-01-05T00-00-00.sql",
    ];

    fn populate(dir: &Path) {
        for name in FAMILY {
            fs::write(dir.join(name), "-- dump").unwrap();
        }
        // Not part of the family
        fs::write(dir.join("db_2023-12-31T00-00-00.sql.gz"), "").unwrap();
        fs::write(dir.join("db2_2023-12-31T00-00-00.sql"), "").unwrap();
        fs::write(dir.join("db.sql"), "").unwrap();
    }

    fn remaining(dir: &Path) -> Vec<String> {
        list_candidates(dir, "db", false).unwrap()
    }

    #[test]
    fn test_prune_keeps_newest() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let deleted = prune(dir.path(), "db", false, 2).unwrap();

        assert_eq!(
            deleted,
            FAMILY[..3]
                .iter()
                .map(|name| dir.path().join(name))
                .collect::<Vec<_>>()
        );
        assert_eq!(remaining(dir.path()), FAMILY[3..].to_vec());
        // Other families and the untimestamped file are untouched
        assert!(dir.path().join("db_2023-12-31T00-00-00.sql.gz").exists());
        assert!(dir.path().join("db2_2023-12-31T00-00-00.sql").exists());
        assert!(dir.path().join("db.sql").exists());
    }

    #[test]
    fn test_prune_keep_zero_deletes_all() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let deleted = prune(dir.path(), "db", false, 0).unwrap();
        assert_eq!(deleted.len(), 5);
        assert!(remaining(dir.path()).is_empty());
    }

    #[test]
    fn test_prune_negative_keep_deletes_all() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        assert_eq!(prune(dir.path(), "db", false, -3).unwrap().len(), 5);
    }

    #[test]
    fn test_prune_keep_more_than_available() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        assert!(prune(dir.path(), "db", false, 10).unwrap().is_empty());
        assert_eq!(remaining(dir.path()).len(), 5);
    }

    #[test]
    fn test_prune_compressed_family() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let deleted = prune(dir.path(), "db", true, 0).unwrap();
        assert_eq!(
            deleted,
            vec![dir.path().join("db_2023-12-31T00-00-00.sql.gz")]
        );
        assert_eq!(remaining(dir.path()).len(), 5);
    }

    #[test]
    fn test_prune_missing_directory() {
        let dir = tempdir().unwrap();
        let result = prune(&dir.path().join("missing"), "db", false, 2);

        assert!(matches!(result, Err(SqlbakError::DirectoryNotFound { .. })));
    }

    #[test]
    fn test_plan_prune_does_not_delete() {
        let dir = tempdir().unwrap();
        populate(dir.path());

        let planned = plan_prune(dir.path(), "db", false, 4).unwrap();
        assert_eq!(planned, vec![dir.path().join(FAMILY[0])]);
        assert_eq!(remaining(dir.path()).len(), 5);
    }

    #[test]
    fn test_prune_reports_partial_failure() {
        let dir = tempdir().unwrap();
        populate(dir.path());
        let stuck = dir.path().join(FAMILY[1]);

        let result = prune_with(dir.path(), "db", false, 2, |path| {
            if path == stuck {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            } else {
                fs::remove_file(path)
            }
        });

        match result {
            Err(SqlbakError::PartialDeleteFailure { deleted, failures }) => {
                assert_eq!(
                    deleted,
                    vec![dir.path().join(FAMILY[0]), dir.path().join(FAMILY[2])]
                );
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].path, stuck);
                assert!(failures[0].reason.contains("denied"));
            }
            other => panic!("Expected PartialDeleteFailure, got {other:?}"),
        }
        // The rest of the plan still ran
        assert_eq!(
            remaining(dir.path()),
            vec![FAMILY[1], FAMILY[3], FAMILY[4]]
        );
    }
}
