use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Tracks temporary files that must not outlive an interrupted run.
///
/// Scoped owners (temp export file, credentials file) delete their own files
/// on drop. The registry covers the one path where destructors never run:
/// the interrupt handler calling `process::exit`.
#[derive(Clone)]
pub struct CleanupRegistry {
    interrupt_flag: Arc<AtomicBool>,
    tracked: Arc<Mutex<HashSet<PathBuf>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self {
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            tracked: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Check if an interrupt has been requested
    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::SeqCst)
    }

    pub fn set_interrupted(&self, interrupted: bool) {
        self.interrupt_flag.store(interrupted, Ordering::SeqCst);
    }

    /// Track a temporary path until the returned guard is completed or dropped
    pub fn track(&self, path: &Path) -> TempFileGuard {
        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.insert(path.to_path_buf());
        }
        TempFileGuard {
            path: path.to_path_buf(),
            registry: self.clone(),
            completed: false,
        }
    }

    /// Snapshot of the currently tracked paths
    pub fn tracked_paths(&self) -> Vec<PathBuf> {
        self.tracked
            .lock()
            .map(|tracked| tracked.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every tracked file and clear the registry
    pub fn cleanup(&self) {
        for path in self.tracked_paths() {
            if !path.exists() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed temporary file"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove temporary file"),
            }
        }

        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.clear();
        }
    }

    fn untrack(&self, path: &Path) {
        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.remove(path);
        }
    }
}

impl Default for CleanupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a tracked temporary path
pub struct TempFileGuard {
    path: PathBuf,
    registry: CleanupRegistry,
    completed: bool,
}

impl TempFileGuard {
    /// The file was renamed or removed by its owner; stop tracking it
    pub fn complete(mut self) {
        self.registry.untrack(&self.path);
        self.completed = true;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        // Leave interrupted paths tracked so the handler still removes them
        if !self.completed && !self.registry.is_interrupted() {
            self.registry.untrack(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_guard_completion_untracks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".sqlbak-part");
        fs::write(&path, "partial").unwrap();

        let registry = CleanupRegistry::new();
        let guard = registry.track(&path);
        assert!(registry.tracked_paths().contains(&path));

        guard.complete();
        assert!(registry.tracked_paths().is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_guard_drop_untracks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".sqlbak-part");

        let registry = CleanupRegistry::new();
        {
            let _guard = registry.track(&path);
            assert_eq!(registry.tracked_paths(), vec![path.clone()]);
        }
        assert!(registry.tracked_paths().is_empty());
    }

    #[test]
    fn test_cleanup_removes_tracked_files() {
        let dir = tempdir().unwrap();
        let export_part = dir.path().join(".sqlbak-export.part");
        let options_file = dir.path().join(".sqlbak-my-cnf");
        let untouched = dir.path().join("db_2024-01-01T00-00-00.sql");
        fs::write(&export_part, "-- partial").unwrap();
        fs::write(&options_file, "[client]").unwrap();
        fs::write(&untouched, "-- complete").unwrap();

        let registry = CleanupRegistry::new();
        let _g1 = registry.track(&export_part);
        let _g2 = registry.track(&options_file);

        registry.cleanup();

        assert!(!export_part.exists());
        assert!(!options_file.exists());
        assert!(untouched.exists());
        assert!(registry.tracked_paths().is_empty());
    }

    #[test]
    fn test_cleanup_tolerates_missing_files() {
        let dir = tempdir().unwrap();
        let registry = CleanupRegistry::new();
        let _guard = registry.track(&dir.path().join("gone"));

        registry.cleanup();
        assert!(registry.tracked_paths().is_empty());
    }

    #[test]
    fn test_interrupted_guard_stays_tracked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".sqlbak-export.part");
        fs::write(&path, "-- partial").unwrap();

        let registry = CleanupRegistry::new();
        {
            let _guard = registry.track(&path);
            registry.set_interrupted(true);
            assert!(registry.is_interrupted());
        }

        assert!(registry.tracked_paths().contains(&path));

        registry.cleanup();
        assert!(!path.exists());
        assert!(registry.tracked_paths().is_empty());
    }
}
