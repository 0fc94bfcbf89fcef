pub mod backup;
pub mod config;
pub mod dump;
pub mod error;
pub mod naming;
pub mod progress;
pub mod retention;
pub mod signal;
pub mod tools;
pub mod utils;

pub use backup::{
    locate_backup, BackupPipeline, BackupSelection, ExportRequest, ExportResult, ImportRequest,
    ImportResult,
};
pub use config::{default_config, dump_config, load_config, load_config_from, Config, DatabaseConfig};
pub use dump::{DumpPass, DumpSpec, ExclusionOptions, TableCatalog};
pub use error::{DeleteFailure, SqlbakError};
pub use naming::{list_candidates, validate_logical_name, BackupName};
pub use retention::{plan_prune, prune};
pub use signal::CleanupRegistry;
pub use tools::{DatabaseClient, SqlTool, ToolOutcome};

/// Main library result type
pub type Result<T> = std::result::Result<T, SqlbakError>;
