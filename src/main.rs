use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use sqlbak::utils::{format_duration, format_size};
use sqlbak::{
    dump_config, load_config, load_config_from, plan_prune, prune, validate_logical_name,
    BackupPipeline, BackupSelection, CleanupRegistry, Config, DatabaseClient, ExportRequest,
    ImportRequest, SqlbakError,
};
use std::path::PathBuf;
use std::process;
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn main() {
    let result = run();
    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(error) => {
            eprintln!("Error: {error}");

            // Show suggestions if available
            let suggestions = error.suggestions();
            if !suggestions.is_empty() {
                eprintln!("\nSuggestions:");
                for suggestion in suggestions {
                    eprintln!("  - {suggestion}");
                }
            }

            process::exit(error.exit_code());
        }
    }
}

fn cli() -> Command {
    Command::new("sqlbak")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Export, import and rotate MySQL database backups")
        .long_about(
            "sqlbak writes timestamped SQL dumps and restores the newest one.\n\
             Example: sqlbak export -f site → backups/site_2024-01-05T10-30-00.sql",
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("Read configuration from this file instead of the default location")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Show detailed progress information")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Suppress all output except errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .global(true),
        )
        .arg(
            Arg::new("dump-config")
                .long("dump-config")
                .help("Display current configuration settings and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            location_args(Command::new("export").about("Dump the database into a new backup file"))
                .arg(
                    Arg::new("no-data")
                        .long("no-data")
                        .help("Dump the structure of TABLE but none of its rows")
                        .value_name("TABLE")
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("include-cache-data")
                        .long("include-cache-data")
                        .help("Also dump rows of cache tables")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("include-default-no-data")
                        .long("include-default-no-data")
                        .help("Also dump rows of session, log and history tables")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("omit-timestamp")
                        .long("omit-timestamp")
                        .help("Write <name>.sql instead of a timestamped file")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            location_args(Command::new("import").about("Restore a backup into the database")).arg(
                Arg::new("path")
                    .long("path")
                    .help("Import this file if it exists")
                    .value_name("FILE")
                    .value_parser(value_parser!(PathBuf)),
            ),
        )
        .subcommand(
            location_args(Command::new("delete").about("Delete all but the newest backups"))
                .arg(
                    Arg::new("keep-count")
                        .short('k')
                        .long("keep-count")
                        .help("Number of newest backups to keep (zero or less keeps none)")
                        .value_name("N")
                        .allow_negative_numbers(true)
                        .value_parser(value_parser!(i64)),
                )
                .arg(
                    Arg::new("dry-run")
                        .short('n')
                        .long("dry-run")
                        .help("Show what would be deleted without doing it")
                        .action(ArgAction::SetTrue),
                ),
        )
}

/// Arguments every subcommand uses to find its backup family
fn location_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("dir")
                .short('d')
                .long("dir")
                .help("Backup directory")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .help("Logical backup name")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("compress")
                .long("compress")
                .help("Use gzip-compressed .sql.gz files")
                .action(ArgAction::SetTrue)
                .conflicts_with("no-compress"),
        )
        .arg(
            Arg::new("no-compress")
                .long("no-compress")
                .help("Use plain .sql files")
                .action(ArgAction::SetTrue),
        )
}

fn run() -> Result<i32, SqlbakError> {
    let matches = cli().get_matches();

    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    if let Err(e) = init_logging(verbose, quiet) {
        eprintln!("Warning: {e:#}");
    }

    let config_path = matches.get_one::<PathBuf>("config").cloned();
    let config = match &config_path {
        Some(path) => load_config_from(path)?,
        None => load_config().unwrap_or_else(|e| {
            warn!("Could not load config, using defaults: {e}");
            sqlbak::default_config()
        }),
    };

    if matches.get_flag("dump-config") {
        dump_config(&config, config_path.as_deref())?;
        return Ok(0);
    }

    let registry = CleanupRegistry::new();
    if let Err(e) = install_interrupt_handler(&registry) {
        warn!("{e:#}");
    }

    let output = Output { verbose, quiet };
    match matches.subcommand() {
        Some(("export", sub)) => run_export(sub, &config, &registry, output),
        Some(("import", sub)) => run_import(sub, &config, &registry, output),
        Some(("delete", sub)) => run_delete(sub, &config, output),
        _ => Err(SqlbakError::validation(
            "No command specified. Use --help for usage information.",
        )),
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Output {
    verbose: bool,
    quiet: bool,
}

/// Directory, logical name and compression, with config defaults filled in
fn resolve_location(sub: &ArgMatches, config: &Config) -> Result<(PathBuf, String, bool), SqlbakError> {
    let directory = sub
        .get_one::<PathBuf>("dir")
        .cloned()
        .unwrap_or_else(|| config.default_dir.clone());
    let logical_name = sub
        .get_one::<String>("file")
        .cloned()
        .unwrap_or_else(|| config.default_file.clone());
    validate_logical_name(&logical_name)?;

    let compress = if sub.get_flag("compress") {
        true
    } else if sub.get_flag("no-compress") {
        false
    } else {
        config.compress
    };

    Ok((directory, logical_name, compress))
}

fn run_export(
    sub: &ArgMatches,
    config: &Config,
    registry: &CleanupRegistry,
    output: Output,
) -> Result<i32, SqlbakError> {
    if !config.export_enabled {
        println!("Database export is disabled. Set export_enabled = true in the [sqlbak] config section.");
        return Ok(0);
    }

    let (directory, logical_name, compress) = resolve_location(sub, config)?;

    let mut exclusions = config.exclusion_options();
    if let Some(tables) = sub.get_many::<String>("no-data") {
        exclusions.no_data_tables.extend(tables.cloned());
    }
    exclusions.include_cache_data = sub.get_flag("include-cache-data");
    exclusions.include_default_no_data = sub.get_flag("include-default-no-data");

    let request = ExportRequest {
        directory,
        logical_name,
        stamp_timestamp: !sub.get_flag("omit-timestamp"),
        compress,
        exclusions,
    };

    let client = DatabaseClient::new(config.database.clone(), registry)?;
    let pipeline = BackupPipeline::new(client, registry.clone()).with_progress(!output.quiet);
    let result = pipeline.export(&request)?;

    if output.verbose {
        println!("Exported: {}", config.database.dbname);
        println!("  → {}", result.backup_path.display());
        println!("  Dumped: {}", format_size(result.bytes_dumped));
        println!("  Size: {}", format_size(result.file_size));
        println!("  No-data tables: {}", result.no_data_tables.join(", "));
        println!("  Duration: {}", format_duration(result.duration));
    } else if !output.quiet {
        println!("{}", result.summary());
    }

    Ok(0)
}

fn run_import(
    sub: &ArgMatches,
    config: &Config,
    registry: &CleanupRegistry,
    output: Output,
) -> Result<i32, SqlbakError> {
    if !config.import_enabled {
        println!("Database import is disabled. Set import_enabled = true in the [sqlbak] config section.");
        return Ok(0);
    }

    let (directory, logical_name, compressed) = resolve_location(sub, config)?;
    let request = ImportRequest {
        directory,
        logical_name,
        compressed,
        path_override: sub.get_one::<PathBuf>("path").cloned(),
    };

    let client = DatabaseClient::new(config.database.clone(), registry)?;
    let pipeline = BackupPipeline::new(client, registry.clone()).with_progress(!output.quiet);
    let result = pipeline.import(&request)?;

    if !output.quiet {
        if result.selection == BackupSelection::Latest {
            println!("Use '{}' for import.", result.backup_path.display());
        }
        println!("{}", result.summary());
        if output.verbose {
            println!("  Duration: {}", format_duration(result.duration));
        }
    }

    Ok(0)
}

fn run_delete(sub: &ArgMatches, config: &Config, output: Output) -> Result<i32, SqlbakError> {
    if !config.delete_enabled {
        println!("Backup deletion is disabled. Set delete_enabled = true in the [sqlbak] config section.");
        return Ok(0);
    }

    let (directory, logical_name, compressed) = resolve_location(sub, config)?;
    let keep_count = sub
        .get_one::<i64>("keep-count")
        .copied()
        .unwrap_or(config.keep_count);

    if sub.get_flag("dry-run") {
        for path in plan_prune(&directory, &logical_name, compressed, keep_count)? {
            println!("Would delete: {}", path.display());
        }
        return Ok(0);
    }

    let report = |deleted: &[PathBuf]| {
        if !output.quiet {
            for path in deleted {
                println!("Deleted: {}", path.display());
            }
        }
    };

    match prune(&directory, &logical_name, compressed, keep_count) {
        Ok(deleted) => {
            report(&deleted);
            if output.verbose && deleted.is_empty() {
                println!("Nothing to delete, {keep_count} newest backups are kept");
            }
            Ok(0)
        }
        Err(SqlbakError::PartialDeleteFailure { deleted, failures }) => {
            report(&deleted);
            Err(SqlbakError::PartialDeleteFailure { deleted, failures })
        }
        Err(e) => Err(e),
    }
}

fn init_logging(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    let default_level = if verbose {
        "info"
    } else if quiet {
        "error"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("failed to initialise logging")
}

fn install_interrupt_handler(registry: &CleanupRegistry) -> anyhow::Result<()> {
    let registry = registry.clone();

    ctrlc::set_handler(move || {
        registry.set_interrupted(true);
        eprintln!("\nInterrupted. Cleaning up...");
        registry.cleanup();
        process::exit(130);
    })
    .context("failed to install Ctrl-C handler")
}
