//! Subprocess plumbing for the external dump and restore tools.
//!
//! Tools are opaque: they get connection arguments plus mode flags, stream
//! SQL through stdout or stdin, and report success through their exit status.
//! Diagnostics on stderr are spooled to an anonymous temp file and returned
//! with the exit status once the process ends.

use crate::config::DatabaseConfig;
use crate::dump::TableCatalog;
use crate::error::SqlbakError;
use crate::signal::{CleanupRegistry, TempFileGuard};
use crate::Result;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use tempfile::NamedTempFile;
use tracing::debug;

/// Chunk size for streaming between the tools and backup files
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Exit status and captured diagnostics of one tool run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl ToolOutcome {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The dump and restore tools, seen from the backup pipeline
pub trait SqlTool {
    /// Run the dump tool with `args` after the connection arguments, streaming stdout into `sink`
    fn dump(&self, args: &[String], sink: &mut dyn Write) -> Result<ToolOutcome>;

    /// Run the restore tool, streaming `source` into its stdin
    fn restore(&self, source: &mut dyn Read) -> Result<ToolOutcome>;
}

/// Owner-only options file carrying the credentials.
///
/// Removed when dropped; tracked in the cleanup registry so an interrupt
/// removes it as well.
pub struct OptionsFile {
    file: NamedTempFile,
    guard: Option<TempFileGuard>,
}

impl OptionsFile {
    pub fn create(
        user: Option<&str>,
        password: Option<&str>,
        registry: &CleanupRegistry,
    ) -> Result<Self> {
        // NamedTempFile is created with mode 0600 on unix
        let mut file = tempfile::Builder::new()
            .prefix(".sqlbak-my-cnf-")
            .tempfile()?;
        let guard = registry.track(file.path());

        file.write_all(render_options(user, password).as_bytes())?;
        file.as_file().sync_all()?;

        Ok(Self {
            file,
            guard: Some(guard),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Drop for OptionsFile {
    fn drop(&mut self) {
        // The NamedTempFile field removes the file right after this
        if let Some(guard) = self.guard.take() {
            guard.complete();
        }
    }
}

fn render_options(user: Option<&str>, password: Option<&str>) -> String {
    let mut credentials = String::new();
    if let Some(user) = user.filter(|u| !u.is_empty()) {
        credentials.push_str(&format!("user=\"{}\"\n", escape_option(user)));
    }
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        credentials.push_str(&format!("password=\"{}\"\n", escape_option(password)));
    }

    format!("[mysqldump]\n{credentials}[client]\n{credentials}")
}

fn escape_option(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// MySQL/MariaDB access through `mysqldump` and `mysql`
pub struct DatabaseClient {
    config: DatabaseConfig,
    options_file: OptionsFile,
}

impl DatabaseClient {
    pub fn new(config: DatabaseConfig, registry: &CleanupRegistry) -> Result<Self> {
        if config.dbname.trim().is_empty() {
            return Err(SqlbakError::config(
                "No database name configured (set dbname in the [database] section)",
            ));
        }

        let options_file = OptionsFile::create(
            config.user.as_deref(),
            config.password.as_deref(),
            registry,
        )?;

        Ok(Self {
            config,
            options_file,
        })
    }

    pub fn options_file_path(&self) -> &Path {
        self.options_file.path()
    }

    /// `--defaults-file` has to come first for the MySQL tools to honour it
    fn connection_args(&self) -> Vec<String> {
        vec![
            format!("--defaults-file={}", self.options_file.path().display()),
            "-h".to_string(),
            self.config.host.clone(),
            "-P".to_string(),
            self.config.port.to_string(),
            self.config.dbname.clone(),
        ]
    }

    fn command(&self, program: &str, extra_args: &[String]) -> Command {
        let mut command = Command::new(program);
        command.args(self.connection_args()).args(extra_args);
        debug!(program, args = ?extra_args, "running database tool");
        command
    }

    fn spawn(&self, program: &str, mut command: Command) -> Result<(Child, File)> {
        let stderr = tempfile::tempfile()?;
        command.stderr(stderr.try_clone()?);
        let child = command.spawn().map_err(|source| SqlbakError::ToolSpawn {
            program: program.to_string(),
            source,
        })?;
        Ok((child, stderr))
    }
}

impl SqlTool for DatabaseClient {
    fn dump(&self, args: &[String], sink: &mut dyn Write) -> Result<ToolOutcome> {
        let program = &self.config.dump_binary;
        let mut command = self.command(program, args);
        command.stdin(Stdio::null()).stdout(Stdio::piped());

        let (mut child, stderr) = self.spawn(program, command)?;
        let copied = match child.stdout.take() {
            Some(mut stdout) => copy_chunked(&mut stdout, sink),
            None => Ok(0),
        };

        // Reap the child before reporting a sink error
        let status = child.wait()?;
        let bytes = copied?;
        debug!(program, bytes, ?status, "dump tool finished");

        outcome(status, stderr)
    }

    fn restore(&self, source: &mut dyn Read) -> Result<ToolOutcome> {
        let program = &self.config.client_binary;
        let mut command = self.command(program, &[]);
        command.stdin(Stdio::piped()).stdout(Stdio::null());

        let (mut child, stderr) = self.spawn(program, command)?;
        let copied = match child.stdin.take() {
            Some(mut stdin) => {
                // stdin is closed when dropped here, signalling end of input
                copy_chunked(source, &mut stdin)
            }
            None => Ok(0),
        };

        let status = child.wait()?;
        match copied {
            // The tool stopped reading; its exit status tells why
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(e.into()),
            Ok(bytes) => debug!(program, bytes, ?status, "restore tool finished"),
        }

        outcome(status, stderr)
    }
}

impl TableCatalog for DatabaseClient {
    fn database_name(&self) -> &str {
        &self.config.dbname
    }

    fn list_table_names(&self) -> Result<Vec<String>> {
        let program = &self.config.client_binary;
        let query = [
            "--batch".to_string(),
            "--skip-column-names".to_string(),
            "-e".to_string(),
            "SHOW TABLES".to_string(),
        ];
        let mut command = self.command(program, &query);
        command.stdin(Stdio::null()).stdout(Stdio::piped());

        let (mut child, stderr) = self.spawn(program, command)?;
        let mut listing = Vec::new();
        let copied = match child.stdout.take() {
            Some(mut stdout) => copy_chunked(&mut stdout, &mut listing),
            None => Ok(0),
        };
        let status = child.wait()?;
        copied?;

        let result = outcome(status, stderr)?;
        if !result.is_success() {
            return Err(SqlbakError::CatalogQueryFailure {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        Ok(String::from_utf8_lossy(&listing)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn outcome(status: ExitStatus, mut stderr: File) -> Result<ToolOutcome> {
    stderr.seek(SeekFrom::Start(0))?;
    let mut captured = Vec::new();
    stderr.read_to_end(&mut captured)?;

    Ok(ToolOutcome {
        exit_code: status.code(),
        stderr: String::from_utf8_lossy(&captured).trim_end().to_string(),
    })
}

/// Copy `reader` into `writer` in bounded chunks, returning the byte count
pub fn copy_chunked(reader: &mut dyn Read, writer: &mut dyn Write) -> io::Result<u64> {
    let mut buffer = vec![0u8; STREAM_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..read])?;
        total += read as u64;
    }

    writer.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_render_options_escapes() {
        let rendered = render_options(Some("backup"), Some(r#"p"a\ss"#));
        assert_eq!(
            rendered,
            "[mysqldump]\nuser=\"backup\"\npassword=\"p\\\"a\\\\ss\"\n\
             [client]\nuser=\"backup\"\npassword=\"p\\\"a\\\\ss\"\n"
        );
    }

    #[test]
    fn test_render_options_without_credentials() {
        assert_eq!(render_options(None, Some("")), "[mysqldump]\n[client]\n");
    }

    #[test]
    fn test_options_file_lifecycle() {
        let registry = CleanupRegistry::new();
        let options = OptionsFile::create(Some("root"), Some("secret"), &registry).unwrap();
        let path = options.path().to_path_buf();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("password=\"secret\""));
        assert!(registry.tracked_paths().contains(&path));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0, "options file must be owner-only");
        }

        drop(options);
        assert!(!path.exists());
        assert!(registry.tracked_paths().is_empty());
    }

    #[test]
    fn test_client_requires_database_name() {
        let registry = CleanupRegistry::new();
        let result = DatabaseClient::new(DatabaseConfig::default(), &registry);

        assert!(matches!(result, Err(SqlbakError::Config { .. })));
        assert!(registry.tracked_paths().is_empty());
    }

    #[test]
    fn test_connection_args_keep_password_off_command_line() {
        let registry = CleanupRegistry::new();
        let config = DatabaseConfig {
            host: "db.internal".to_string(),
            port: 3307,
            user: Some("backup".to_string()),
            password: Some("hunter2".to_string()),
            dbname: "site".to_string(),
            ..DatabaseConfig::default()
        };
        let client = DatabaseClient::new(config, &registry).unwrap();
        let args = client.connection_args();

        assert_eq!(
            args[0],
            format!("--defaults-file={}", client.options_file_path().display())
        );
        assert_eq!(&args[1..], ["-h", "db.internal", "-P", "3307", "site"]);
        assert!(!args.iter().any(|arg| arg.contains("hunter2")));
    }

    #[test]
    fn test_copy_chunked_large_input() {
        let data: Vec<u8> = (0..STREAM_CHUNK_SIZE * 3 + 17).map(|i| i as u8).collect();
        let mut sink = Vec::new();

        let copied = copy_chunked(&mut &data[..], &mut sink).unwrap();

        assert_eq!(copied, data.len() as u64);
        assert_eq!(sink, data);
    }

    #[test]
    fn test_tool_outcome() {
        assert!(ToolOutcome::success().is_success());
        assert!(!ToolOutcome::failure(2, "boom").is_success());
        assert!(!ToolOutcome {
            exit_code: None,
            stderr: String::new()
        }
        .is_success());
    }

    /// Shell scripts standing in for mysqldump and mysql
    #[cfg(unix)]
    mod scripted {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use std::sync::Mutex;
        use tempfile::{tempdir, TempDir};

        // Spawning while another test still holds a script open for writing fails with ETXTBSY
        static SPAWN_MUTEX: Mutex<()> = Mutex::new(());

        fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = dir.path().join(name);
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn client(dump: &Path, restore: &Path, registry: &CleanupRegistry) -> DatabaseClient {
            let config = DatabaseConfig {
                dbname: "site".to_string(),
                user: Some("backup".to_string()),
                password: Some("secret".to_string()),
                dump_binary: dump.display().to_string(),
                client_binary: restore.display().to_string(),
                ..DatabaseConfig::default()
            };
            DatabaseClient::new(config, registry).unwrap()
        }

        #[test]
        fn test_dump_streams_stdout_and_captures_stderr() {
            let _lock = SPAWN_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempdir().unwrap();
            let dump = script(
                &dir,
                "dump",
                r#"echo "-- args: $*"; echo "warning: using defaults" >&2"#,
            );
            let registry = CleanupRegistry::new();
            let client = client(&dump, &dump, &registry);

            let mut sink = Vec::new();
            let outcome = client
                .dump(&["--no-data".to_string()], &mut sink)
                .unwrap();

            assert!(outcome.is_success());
            assert_eq!(outcome.stderr, "warning: using defaults");
            let output = String::from_utf8(sink).unwrap();
            assert!(output.contains("--defaults-file="));
            assert!(output.contains("-h localhost -P 3306 site --no-data"));
            assert!(!output.contains("secret"));
        }

        #[test]
        fn test_dump_reports_failure() {
            let _lock = SPAWN_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempdir().unwrap();
            let dump = script(&dir, "dump", "echo 'Access denied' >&2; exit 2");
            let registry = CleanupRegistry::new();
            let client = client(&dump, &dump, &registry);

            let outcome = client.dump(&[], &mut Vec::new()).unwrap();

            assert_eq!(outcome, ToolOutcome::failure(2, "Access denied"));
        }

        #[test]
        fn test_restore_feeds_stdin() {
            let _lock = SPAWN_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempdir().unwrap();
            let received = dir.path().join("received.sql");
            let restore = script(&dir, "restore", &format!("cat > '{}'", received.display()));
            let registry = CleanupRegistry::new();
            let client = client(&restore, &restore, &registry);

            let sql = b"CREATE TABLE pages (uid int);\n".repeat(5000);
            let outcome = client.restore(&mut &sql[..]).unwrap();

            assert!(outcome.is_success());
            assert_eq!(fs::read(&received).unwrap(), sql);
        }

        #[test]
        fn test_restore_tool_exiting_early() {
            let _lock = SPAWN_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempdir().unwrap();
            let restore = script(&dir, "restore", "echo 'ERROR 1064 at line 1' >&2; exit 1");
            let registry = CleanupRegistry::new();
            let client = client(&restore, &restore, &registry);

            let sql = b"INSERT INTO pages VALUES (1);\n".repeat(50_000);
            let outcome = client.restore(&mut &sql[..]).unwrap();

            assert_eq!(outcome, ToolOutcome::failure(1, "ERROR 1064 at line 1"));
        }

        #[test]
        fn test_list_table_names() {
            let _lock = SPAWN_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempdir().unwrap();
            let mysql = script(&dir, "mysql", "printf 'cache_pages\\npages\\n\\nsys_log\\n'");
            let registry = CleanupRegistry::new();
            let client = client(&mysql, &mysql, &registry);

            assert_eq!(client.database_name(), "site");
            assert_eq!(
                client.list_table_names().unwrap(),
                vec!["cache_pages", "pages", "sys_log"]
            );
        }

        #[test]
        fn test_list_table_names_failure() {
            let _lock = SPAWN_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempdir().unwrap();
            let mysql = script(&dir, "mysql", "echo 'ERROR 1045: Access denied' >&2; exit 1");
            let registry = CleanupRegistry::new();
            let client = client(&mysql, &mysql, &registry);

            match client.list_table_names() {
                Err(error @ SqlbakError::CatalogQueryFailure { .. }) => {
                    let message = error.to_string();
                    assert!(message.contains("SHOW TABLES"));
                    assert!(message.contains("exit status 1"));
                    assert!(message.contains("Access denied"));
                }
                other => panic!("Expected CatalogQueryFailure, got {other:?}"),
            }
        }

        #[test]
        fn test_missing_binary() {
            let _lock = SPAWN_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let dir = tempdir().unwrap();
            let missing = dir.path().join("no-such-mysqldump");
            let registry = CleanupRegistry::new();
            let client = client(&missing, &missing, &registry);

            match client.dump(&[], &mut Vec::new()) {
                Err(SqlbakError::ToolSpawn { program, .. }) => {
                    assert!(program.ends_with("no-such-mysqldump"))
                }
                other => panic!("Expected ToolSpawn, got {other:?}"),
            }
        }
    }
}
