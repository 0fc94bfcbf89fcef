use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A single file the retention pass could not remove
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for DeleteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.reason)
    }
}

#[derive(Debug, Error)]
pub enum SqlbakError {
    #[error("Backup already exists: {path}")]
    AlreadyExists { path: PathBuf },

    #[error("Directory does not exist: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("No backup found for '{logical_name}' in {directory}")]
    NotFound {
        directory: PathBuf,
        logical_name: String,
    },

    #[error("Dump tool failed with {}: {stderr}", describe_exit(.exit_code))]
    DumpToolFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Restore tool failed with {}: {stderr}", describe_exit(.exit_code))]
    RestoreToolFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error(
        "Listing tables (SHOW TABLES) through the client tool failed with {}: {stderr}",
        describe_exit(.exit_code)
    )]
    CatalogQueryFailure {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error(
        "Could not delete {} of {} backups: {}",
        .failures.len(),
        .failures.len() + .deleted.len(),
        join_failures(.failures)
    )]
    PartialDeleteFailure {
        deleted: Vec<PathBuf>,
        failures: Vec<DeleteFailure>,
    },

    #[error("Could not start '{program}': {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match *exit_code {
        Some(code) => format!("exit status {code}"),
        None => "termination by signal".to_string(),
    }
}

fn join_failures(failures: &[DeleteFailure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl SqlbakError {
    /// Create a configuration error with a custom message
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a validation error with a custom message
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SqlbakError::Validation { .. } => 2,
            SqlbakError::Config { .. } => 2,
            _ => 1,
        }
    }

    /// Provide helpful suggestions for resolving the error
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            SqlbakError::AlreadyExists { .. } => vec![
                "Wait a second and run the export again".to_string(),
                "Drop --omit-timestamp so every export gets a unique name".to_string(),
            ],
            SqlbakError::DirectoryNotFound { path } => vec![
                format!("Create the directory: mkdir -p {}", path.display()),
                "Pass a different directory with --dir".to_string(),
            ],
            SqlbakError::NotFound { .. } => vec![
                "Check the backup name passed with --file".to_string(),
                "Toggle --compress if the backups are (not) gzipped".to_string(),
                "Pass the backup explicitly with --path".to_string(),
            ],
            SqlbakError::CatalogQueryFailure { .. } => vec![
                "Check client_binary and the credentials in the [database] config section".to_string(),
                "Pass --include-cache-data to skip the table lookup".to_string(),
            ],
            SqlbakError::ToolSpawn { program, .. } => vec![
                format!("Make sure '{program}' is installed and on PATH"),
                "Set dump_binary / client_binary in the [database] config section".to_string(),
            ],
            SqlbakError::PartialDeleteFailure { .. } => vec![
                "Check file permissions in the backup directory".to_string(),
                "Run the delete command again".to_string(),
            ],
            _ => vec![],
        }
    }
}
