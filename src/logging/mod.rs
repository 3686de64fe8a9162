//! Logging and output control
//!
//! This module provides the [`Logger`] used by every component. A logger is cheap
//! to clone; all clones share one sink, and each message is written with a single
//! locked write so lines from concurrent workers never interleave.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Logger responsible for all user-visible diagnostics
#[derive(Clone)]
pub struct Logger {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Instant,
    sink: Sink,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("verbose", &self.verbose)
            .field("quiet", &self.quiet)
            .finish_non_exhaustive()
    }
}

impl Logger {
    pub fn new(verbose: bool) -> Self {
        Self::with_sink(verbose, Box::new(io::stderr()))
    }

    pub fn new_quiet() -> Self {
        let mut logger = Self::new(false);
        logger.quiet = true;
        logger
    }

    /// Logger writing into an arbitrary sink (files, test buffers)
    pub fn with_sink(verbose: bool, sink: Box<dyn Write + Send>) -> Self {
        Self {
            verbose,
            quiet: false,
            start_time: Instant::now(),
            sink: Arc::new(Mutex::new(sink)),
        }
    }

    /// Main section heading
    pub fn section(&self, title: &str) {
        if !self.quiet {
            self.emit(&format!("\n=== {} ===", title));
        }
    }

    // Structured logging levels
    pub fn trace(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit_leveled("TRACE", message);
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit_leveled("DEBUG", message);
        }
    }

    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit_leveled("INFO", message);
        }
    }

    /// Information message
    pub fn info(&self, message: &str) {
        if !self.quiet {
            self.emit_leveled("INFO", message);
        }
    }

    /// Success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            self.emit_leveled("OK", message);
        }
    }

    /// Warning message
    pub fn warning(&self, message: &str) {
        if !self.quiet {
            self.emit_leveled("WARN", message);
        }
    }

    /// Error message, never suppressed
    pub fn error(&self, message: &str) {
        self.emit_leveled("ERROR", message);
    }

    /// Detailed information (only shown in verbose mode)
    pub fn detail(&self, message: &str) {
        if self.verbose && !self.quiet {
            self.emit(&format!("      {}", message));
        }
    }

    /// Key-value pair summary display
    pub fn summary_kv(&self, title: &str, items: &[(&str, String)]) {
        if self.quiet {
            return;
        }
        // One write for the whole block keeps it contiguous.
        let mut block = format!("\n--- {} ---", title);
        for (key, value) in items {
            block.push_str(&format!("\n  {}: {}", key, value));
        }
        self.emit(&block);
    }

    /// Format duration in human-readable format
    pub fn format_duration(&self, duration: Duration) -> String {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{:.1}s", duration.as_secs_f64())
        } else if secs < 3600 {
            format!("{}m{:02}s", secs / 60, secs % 60)
        } else {
            format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
        }
    }

    fn emit_leveled(&self, level: &str, message: &str) {
        if self.verbose {
            let elapsed = self.start_time.elapsed().as_secs_f64();
            self.emit(&format!("[{:8.3}s] {:<5} {}", elapsed, level, message));
        } else {
            self.emit(&format!("{:<5} {}", level, message));
        }
    }

    fn emit(&self, line: &str) {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        // A poisoned sink still accepts writes; losing logs is worse.
        let mut sink = match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = sink.write_all(buf.as_bytes());
        let _ = sink.flush();
    }
}

/// In-memory sink, mostly for asserting on log output in tests
#[derive(Clone, Default)]
pub struct LogBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn contents(&self) -> String {
        let bytes = match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Written lines, without the trailing empty one
    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.lock() {
            Ok(mut guard) => guard.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
