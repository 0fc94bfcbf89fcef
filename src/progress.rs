use std::io::{self, IsTerminal, Read, Write};

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};
#[cfg(feature = "progress")]
use std::time::Duration;

/// Byte counter for a dump or restore stream, drawn as a spinner when enabled
pub struct TransferProgress {
    bytes: u64,
    #[cfg(feature = "progress")]
    bar: Option<ProgressBar>,
}

impl TransferProgress {
    /// Create a counter; the spinner is only drawn on an interactive stderr
    pub fn new(message: &str, enabled: bool) -> Self {
        let visible = enabled && should_draw();
        #[cfg(not(feature = "progress"))]
        let _ = (message, visible);

        Self {
            bytes: 0,
            #[cfg(feature = "progress")]
            bar: visible.then(|| spinner(message)),
        }
    }

    pub fn hidden() -> Self {
        Self::new("", false)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn set_message(&self, message: &str) {
        #[cfg(feature = "progress")]
        {
            if let Some(bar) = &self.bar {
                bar.set_message(message.to_string());
            }
        }
        #[cfg(not(feature = "progress"))]
        let _ = message;
    }

    pub fn inc(&mut self, n: u64) {
        self.bytes += n;
        #[cfg(feature = "progress")]
        {
            if let Some(bar) = &self.bar {
                bar.inc(n);
            }
        }
    }

    pub fn finish(&mut self) {
        #[cfg(feature = "progress")]
        {
            if let Some(bar) = self.bar.take() {
                bar.finish_and_clear();
            }
        }
    }
}

impl Drop for TransferProgress {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(feature = "progress")]
fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} {msg} {bytes} ({bytes_per_sec})")
    {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn should_draw() -> bool {
    io::stderr().is_terminal() && !is_ci_environment()
}

/// Check if we're running in a CI environment
fn is_ci_environment() -> bool {
    std::env::var("CI").is_ok()
        || std::env::var("GITHUB_ACTIONS").is_ok()
        || std::env::var("GITLAB_CI").is_ok()
        || std::env::var("JENKINS_URL").is_ok()
        || std::env::var("BUILDKITE").is_ok()
}

/// Writer adapter that reports every written byte to a `TransferProgress`
pub struct CountingWriter<'a, W> {
    inner: W,
    progress: &'a mut TransferProgress,
}

impl<'a, W: Write> CountingWriter<'a, W> {
    pub fn new(inner: W, progress: &'a mut TransferProgress) -> Self {
        Self { inner, progress }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.progress.inc(written as u64);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Reader adapter that reports every read byte to a `TransferProgress`
pub struct CountingReader<'a, R> {
    inner: R,
    progress: &'a mut TransferProgress,
}

impl<'a, R: Read> CountingReader<'a, R> {
    pub fn new(inner: R, progress: &'a mut TransferProgress) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for CountingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.progress.inc(read as u64);
        Ok(read)
    }
}
