use crate::dump::{DumpSpec, ExclusionOptions, TableCatalog};
use crate::error::SqlbakError;
use crate::naming::{list_candidates, BackupName};
use crate::progress::{CountingReader, CountingWriter, TransferProgress};
use crate::signal::CleanupRegistry;
use crate::tools::SqlTool;
use crate::utils::format_size;
use crate::Result;
use chrono::{Local, NaiveDateTime};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything an export needs besides the database itself
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub directory: PathBuf,
    pub logical_name: String,
    pub stamp_timestamp: bool,
    pub compress: bool,
    pub exclusions: ExclusionOptions,
}

#[derive(Debug)]
pub struct ExportResult {
    pub backup_path: PathBuf,
    /// Uncompressed SQL bytes produced by both passes
    pub bytes_dumped: u64,
    /// Size of the file on disk
    pub file_size: u64,
    pub no_data_tables: Vec<String>,
    pub duration: Duration,
}

impl ExportResult {
    pub fn summary(&self) -> String {
        if self.file_size == self.bytes_dumped {
            format!(
                "Created backup: {} ({})",
                self.backup_path.display(),
                format_size(self.file_size)
            )
        } else {
            format!(
                "Created backup: {} ({}, {} uncompressed)",
                self.backup_path.display(),
                format_size(self.file_size),
                format_size(self.bytes_dumped)
            )
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportRequest {
    pub directory: PathBuf,
    pub logical_name: String,
    pub compressed: bool,
    /// Used verbatim when it exists
    pub path_override: Option<PathBuf>,
}

/// How the file for an import was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupSelection {
    /// The caller named the file
    Explicit,
    /// `<logical_name>.sql[.gz]` without a timestamp
    Untimestamped,
    /// Newest timestamped candidate in the directory
    Latest,
}

#[derive(Debug)]
pub struct ImportResult {
    pub backup_path: PathBuf,
    pub selection: BackupSelection,
    pub bytes_restored: u64,
    pub duration: Duration,
}

impl ImportResult {
    pub fn summary(&self) -> String {
        format!(
            "Imported backup: {} ({})",
            self.backup_path.display(),
            format_size(self.bytes_restored)
        )
    }
}

/// Runs exports and imports against one database
pub struct BackupPipeline<T> {
    tool: T,
    registry: CleanupRegistry,
    show_progress: bool,
}

impl<T: SqlTool + TableCatalog> BackupPipeline<T> {
    pub fn new(tool: T, registry: CleanupRegistry) -> Self {
        Self {
            tool,
            registry,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn tool(&self) -> &T {
        &self.tool
    }

    /// Export the database, stamping the file with the current local time
    pub fn export(&self, request: &ExportRequest) -> Result<ExportResult> {
        self.export_at(request, Local::now().naive_local())
    }

    /// Export the database as of `now`.
    ///
    /// Both dump passes go into a temporary file next to the destination,
    /// which is renamed onto the final path only after both passes succeed.
    /// On any failure the temporary file is removed and nothing appears at
    /// the final path.
    pub fn export_at(&self, request: &ExportRequest, now: NaiveDateTime) -> Result<ExportResult> {
        let start_time = Instant::now();

        let name = if request.stamp_timestamp {
            BackupName::stamped(&request.logical_name, now, request.compress)
        } else {
            BackupName::plain(&request.logical_name, request.compress)
        };
        let final_path = name.path_in(&request.directory);

        if final_path.exists() {
            return Err(SqlbakError::AlreadyExists { path: final_path });
        }

        if !request.directory.exists() {
            debug!(directory = %request.directory.display(), "creating backup directory");
            fs::create_dir_all(&request.directory)?;
        }

        report_stale_exports(&request.directory);

        let spec = DumpSpec::resolve(&self.tool, &request.exclusions)?;
        let database = self.tool.database_name().to_string();

        let mut temp = tempfile::Builder::new()
            .prefix(".sqlbak-")
            .suffix(".part")
            .tempfile_in(&request.directory)?;
        let guard = self.registry.track(temp.path());
        debug!(temp = %temp.path().display(), "writing export to temporary file");

        let mut progress =
            TransferProgress::new(&format!("Dumping {}", name.file_name()), self.show_progress);
        let mut sink = BackupWriter::new(temp.as_file_mut(), request.compress);

        for pass in spec.passes() {
            progress.set_message(&format!("Dumping {} ({})", name.file_name(), pass.label()));
            let outcome = {
                let mut counting = CountingWriter::new(&mut sink, &mut progress);
                self.tool.dump(&pass.args(&database), &mut counting)?
            };

            if !outcome.is_success() {
                warn!(pass = pass.label(), exit_code = ?outcome.exit_code, "dump tool failed");
                return Err(SqlbakError::DumpToolFailure {
                    exit_code: outcome.exit_code,
                    stderr: outcome.stderr,
                });
            }
            if !outcome.stderr.is_empty() {
                warn!(pass = pass.label(), "dump tool: {}", outcome.stderr);
            }
        }

        sink.finish()?;
        progress.finish();
        temp.as_file().sync_all()?;

        // A concurrent export may have claimed the name since the check above
        temp.persist_noclobber(&final_path).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                SqlbakError::AlreadyExists {
                    path: final_path.clone(),
                }
            } else {
                SqlbakError::Io(e.error)
            }
        })?;
        guard.complete();

        let file_size = fs::metadata(&final_path)?.len();
        info!(path = %final_path.display(), bytes = file_size, "created backup");

        Ok(ExportResult {
            backup_path: final_path,
            bytes_dumped: progress.bytes(),
            file_size,
            no_data_tables: spec.no_data_tables,
            duration: start_time.elapsed(),
        })
    }

    /// Feed a backup into the restore tool
    pub fn import(&self, request: &ImportRequest) -> Result<ImportResult> {
        let start_time = Instant::now();
        let (backup_path, selection) = locate_backup(request)?;

        if selection == BackupSelection::Latest {
            info!(path = %backup_path.display(), "using latest backup for import");
        }

        let file = File::open(&backup_path)?;
        let mut reader: Box<dyn Read> = if request.compressed {
            Box::new(GzDecoder::new(BufReader::new(file)))
        } else {
            Box::new(BufReader::new(file))
        };

        let mut progress =
            TransferProgress::new(&format!("Importing {}", backup_path.display()), self.show_progress);
        let outcome = {
            let mut counting = CountingReader::new(&mut reader, &mut progress);
            self.tool.restore(&mut counting)?
        };
        progress.finish();

        if !outcome.is_success() {
            return Err(SqlbakError::RestoreToolFailure {
                exit_code: outcome.exit_code,
                stderr: outcome.stderr,
            });
        }
        if !outcome.stderr.is_empty() {
            warn!("restore tool: {}", outcome.stderr);
        }

        info!(path = %backup_path.display(), bytes = progress.bytes(), "imported backup");

        Ok(ImportResult {
            backup_path,
            selection,
            bytes_restored: progress.bytes(),
            duration: start_time.elapsed(),
        })
    }
}

/// Pick the file an import should read.
///
/// An existing explicit path wins, then the untimestamped
/// `<logical_name>.sql[.gz]`, then the newest timestamped candidate.
pub fn locate_backup(request: &ImportRequest) -> Result<(PathBuf, BackupSelection)> {
    if let Some(path) = &request.path_override {
        if path.is_file() {
            return Ok((path.clone(), BackupSelection::Explicit));
        }
        warn!(path = %path.display(), "explicit backup file does not exist, searching directory");
    }

    let untimestamped =
        BackupName::plain(&request.logical_name, request.compressed).path_in(&request.directory);
    if untimestamped.is_file() {
        return Ok((untimestamped, BackupSelection::Untimestamped));
    }

    let candidates = list_candidates(&request.directory, &request.logical_name, request.compressed)?;
    match candidates.last() {
        Some(latest) => Ok((request.directory.join(latest), BackupSelection::Latest)),
        None => Err(SqlbakError::NotFound {
            directory: request.directory.clone(),
            logical_name: request.logical_name.clone(),
        }),
    }
}

/// Destination stream of an export, optionally gzip-compressed
enum BackupWriter<W: Write> {
    Plain(BufWriter<W>),
    Gzip(GzEncoder<BufWriter<W>>),
}

impl<W: Write> BackupWriter<W> {
    fn new(inner: W, compress: bool) -> Self {
        let buffered = BufWriter::new(inner);
        if compress {
            BackupWriter::Gzip(GzEncoder::new(buffered, Compression::default()))
        } else {
            BackupWriter::Plain(buffered)
        }
    }

    /// Write the gzip trailer and flush everything to the file
    fn finish(self) -> io::Result<()> {
        match self {
            BackupWriter::Plain(mut writer) => writer.flush(),
            BackupWriter::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl<W: Write> Write for BackupWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            BackupWriter::Plain(writer) => writer.write(buf),
            BackupWriter::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            BackupWriter::Plain(writer) => writer.flush(),
            BackupWriter::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Temporary files left behind by a killed export are never reused or removed
fn report_stale_exports(directory: &Path) {
    let Ok(entries) = fs::read_dir(directory) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if is_temp_export(&path) {
            warn!(path = %path.display(), "found leftover temporary export file");
        }
    }
}

/// Does `path` look like a leftover temporary export file?
pub fn is_temp_export(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(".sqlbak-") && name.ends_with(".part"))
        .unwrap_or(false)
}
