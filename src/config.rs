use crate::dump::{ExclusionOptions, DEFAULT_CACHE_TABLE_PREFIX, DEFAULT_NO_DATA_TABLES};
use crate::error::SqlbakError;
use crate::Result;
use configparser::ini::Ini;
use std::path::{Path, PathBuf};

const SECTION: &str = "sqlbak";
const DATABASE_SECTION: &str = "database";

/// Connection settings handed to the dump and restore tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: String,
    pub dump_binary: String,
    pub client_binary: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 3306,
            user: None,
            password: None,
            dbname: String::new(),
            dump_binary: "mysqldump".to_string(),
            client_binary: "mysql".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub default_dir: PathBuf,
    pub default_file: String,
    pub compress: bool,
    pub keep_count: i64,
    pub export_enabled: bool,
    pub import_enabled: bool,
    pub delete_enabled: bool,
    pub no_data: Vec<String>,
    pub cache_table_prefix: String,
    pub default_no_data: Vec<String>,
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_dir: PathBuf::from("backups"),
            default_file: "db".to_string(),
            compress: false,
            keep_count: 7,
            export_enabled: true,
            import_enabled: false,
            delete_enabled: false,
            no_data: Vec::new(),
            cache_table_prefix: DEFAULT_CACHE_TABLE_PREFIX.to_string(),
            default_no_data: DEFAULT_NO_DATA_TABLES.iter().map(|t| t.to_string()).collect(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Exclusion settings for an export, before command line overrides
    pub fn exclusion_options(&self) -> ExclusionOptions {
        ExclusionOptions {
            no_data_tables: self.no_data.clone(),
            include_cache_data: false,
            include_default_no_data: false,
            cache_table_prefix: self.cache_table_prefix.clone(),
            default_no_data_tables: self.default_no_data.clone(),
        }
    }
}

/// Get default configuration
pub fn default_config() -> Config {
    Config::default()
}

/// Load configuration from the per-user config file, falling back to defaults
pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        return Ok(default_config());
    }

    load_config_from(&config_path)
}

/// Load configuration from an explicit INI file
pub fn load_config_from(path: &Path) -> Result<Config> {
    let mut conf = Ini::new();
    // Only full-line comments; values like passwords may contain '#' or ';'
    let mut defaults = conf.defaults();
    defaults.enable_inline_comments = false;
    conf.load_defaults(defaults);
    conf.load(path).map_err(|e| {
        SqlbakError::config(format!(
            "Failed to parse config file {}: {e}",
            path.display()
        ))
    })?;

    let mut config = default_config();

    if let Some(value) = conf.get(SECTION, "default_dir") {
        config.default_dir = PathBuf::from(value);
    }
    if let Some(value) = conf.get(SECTION, "default_file") {
        config.default_file = value;
    }
    if let Some(value) = conf.get(SECTION, "cache_table_prefix") {
        config.cache_table_prefix = value;
    }

    // Invalid booleans keep the default
    if let Some(value) = conf.get(SECTION, "compress") {
        config.compress = parse_bool(&value).unwrap_or(config.compress);
    }
    if let Some(value) = conf.get(SECTION, "export_enabled") {
        config.export_enabled = parse_bool(&value).unwrap_or(config.export_enabled);
    }
    if let Some(value) = conf.get(SECTION, "import_enabled") {
        config.import_enabled = parse_bool(&value).unwrap_or(config.import_enabled);
    }
    if let Some(value) = conf.get(SECTION, "delete_enabled") {
        config.delete_enabled = parse_bool(&value).unwrap_or(config.delete_enabled);
    }

    if let Some(value) = conf.get(SECTION, "keep_count") {
        config.keep_count = value
            .trim()
            .parse()
            .map_err(|_| SqlbakError::config(format!("Invalid keep_count: {value}")))?;
    }

    if let Some(value) = conf.get(SECTION, "no_data") {
        config.no_data = parse_list(&value);
    }
    if let Some(value) = conf.get(SECTION, "default_no_data") {
        config.default_no_data = parse_list(&value);
    }

    let database = &mut config.database;
    if let Some(value) = conf.get(DATABASE_SECTION, "host") {
        database.host = value;
    }
    if let Some(value) = conf.get(DATABASE_SECTION, "port") {
        database.port = value
            .trim()
            .parse()
            .map_err(|_| SqlbakError::config(format!("Invalid port: {value}")))?;
    }
    if let Some(value) = conf.get(DATABASE_SECTION, "user") {
        database.user = Some(value).filter(|v| !v.is_empty());
    }
    if let Some(value) = conf.get(DATABASE_SECTION, "password") {
        database.password = Some(value).filter(|v| !v.is_empty());
    }
    if let Some(value) = conf.get(DATABASE_SECTION, "dbname") {
        database.dbname = value;
    }
    if let Some(value) = conf.get(DATABASE_SECTION, "dump_binary") {
        database.dump_binary = value;
    }
    if let Some(value) = conf.get(DATABASE_SECTION, "client_binary") {
        database.client_binary = value;
    }

    Ok(config)
}

/// Get the configuration file path for the current platform
pub fn get_config_path() -> Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return Ok(PathBuf::from(appdata).join("sqlbak").join("config.ini"));
        }
    }

    if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
        Ok(PathBuf::from(config_dir).join("sqlbak").join("config.ini"))
    } else if let Some(home) = std::env::var_os("HOME") {
        Ok(PathBuf::from(home)
            .join(".config")
            .join("sqlbak")
            .join("config.ini"))
    } else {
        Err(SqlbakError::config("Could not determine config directory"))
    }
}

/// Parse a boolean value from INI string
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a comma separated table list
fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Create a sample configuration file
pub fn create_sample_config() -> String {
    format!(
        r#"[sqlbak]
# Directory holding the backups
default_dir = backups

# Logical backup name; files are <name>_YYYY-MM-DDTHH-mm-ss.sql[.gz]
default_file = db

# Gzip backups on export and expect gzipped backups on import/delete
compress = false

# Number of backups the delete command keeps
keep_count = 7

# Each operation has to be switched on explicitly
export_enabled = true
import_enabled = false
delete_enabled = false

# Tables whose rows are never exported (comma separated)
no_data =

# Tables starting with this prefix are exported without rows.
# Leave empty to export the rows of every table (no catalog lookup).
cache_table_prefix = {DEFAULT_CACHE_TABLE_PREFIX}

# Session/log tables exported without rows unless --include-default-no-data
default_no_data = {}

[database]
host = localhost
port = 3306
user =
password =
dbname =
dump_binary = mysqldump
client_binary = mysql
"#,
        DEFAULT_NO_DATA_TABLES.join(", ")
    )
}

/// Display the current configuration in a user-friendly format
pub fn dump_config(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let config_path = match config_path {
        Some(path) => path.to_path_buf(),
        None => get_config_path()?,
    };

    println!("sqlbak Configuration");
    println!("====================");
    println!();

    if config_path.exists() {
        println!("Config file: {} (found)", config_path.display());
    } else {
        println!(
            "Config file: {} (not found, using defaults)",
            config_path.display()
        );
    }
    println!();

    println!("Current Settings:");
    println!("----------------");
    println!("default_dir        = {}", config.default_dir.display());
    println!("default_file       = {}", config.default_file);
    println!("compress           = {}", config.compress);
    println!("keep_count         = {}", config.keep_count);
    println!("export_enabled     = {}", config.export_enabled);
    println!("import_enabled     = {}", config.import_enabled);
    println!("delete_enabled     = {}", config.delete_enabled);
    println!("no_data            = {}", config.no_data.join(", "));
    println!("cache_table_prefix = {}", config.cache_table_prefix);
    println!("default_no_data    = {}", config.default_no_data.join(", "));
    println!();

    let database = &config.database;
    println!("Database:");
    println!("---------");
    println!("host          = {}", database.host);
    println!("port          = {}", database.port);
    println!("user          = {}", database.user.as_deref().unwrap_or(""));
    println!(
        "password      = {}",
        if database.password.is_some() { "********" } else { "" }
    );
    println!("dbname        = {}", database.dbname);
    println!("dump_binary   = {}", database.dump_binary);
    println!("client_binary = {}", database.client_binary);
    println!();

    println!("Example backup names with current settings:");
    println!("------------------------------------------");
    let extension = if config.compress { ".sql.gz" } else { ".sql" };
    println!(
        "{}_YYYY-MM-DDTHH-mm-ss{extension}",
        config.default_file
    );
    println!();

    if !config_path.exists() {
        println!("To create a configuration file:");
        println!("------------------------------");
        if let Some(parent) = config_path.parent() {
            println!("1. Create directory: mkdir -p {}", parent.display());
        }
        println!("2. Save the sample below as {}", config_path.display());
        println!("3. Use 'sqlbak --dump-config' again to verify");
        println!();
        print!("{}", create_sample_config());
    }

    Ok(())
}
