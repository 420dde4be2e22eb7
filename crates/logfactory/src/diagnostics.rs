// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Internal trace stream describing what the resolver discovers.
//!
//! Diagnostics are meant for debugging problematic deployments. When no
//! destination is configured the sink is inert and [`Diagnostics::log`] costs a
//! single check. Every line is prefixed with `[LogFactory from <id>] ` so output
//! from several resolvers sharing a process can be told apart.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock, PoisonError};

type Sink = Mutex<Box<dyn Write + Send>>;

/// Where diagnostic lines are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticsDest {
    Stdout,
    Stderr,
    /// Opened in append mode.
    File(PathBuf),
}

impl DiagnosticsDest {
    /// `STDOUT` and `STDERR` are reserved (case-sensitive); anything else is a path.
    pub fn parse(value: &str) -> Self {
        match value {
            "STDOUT" => Self::Stdout,
            "STDERR" => Self::Stderr,
            path => Self::File(PathBuf::from(path)),
        }
    }

    fn open(&self) -> io::Result<Box<dyn Write + Send>> {
        match self {
            Self::Stdout => Ok(Box::new(io::stdout())),
            Self::Stderr => Ok(Box::new(io::stderr())),
            Self::File(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Box::new(file))
            }
        }
    }
}

impl fmt::Display for DiagnosticsDest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("STDOUT"),
            Self::Stderr => f.write_str("STDERR"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Lazily opened, shared diagnostics stream.
pub struct Diagnostics {
    dest: Option<DiagnosticsDest>,
    prefix: String,
    sink: OnceLock<Option<Sink>>,
}

impl Diagnostics {
    /// A sink that never writes anything.
    pub fn disabled() -> Self {
        Self {
            dest: None,
            prefix: String::new(),
            sink: OnceLock::from(None),
        }
    }

    /// A sink writing to `dest`, opened on first use. `tag` identifies the emitter.
    pub fn new(dest: Option<DiagnosticsDest>, tag: &str) -> Self {
        Self {
            dest,
            prefix: format!("[LogFactory from {tag}] "),
            sink: OnceLock::new(),
        }
    }

    /// A sink writing to an already-open writer.
    pub fn with_writer(writer: Box<dyn Write + Send>, tag: &str) -> Self {
        Self {
            dest: None,
            prefix: format!("[LogFactory from {tag}] "),
            sink: OnceLock::from(Some(Mutex::new(writer))),
        }
    }

    pub fn enabled(&self) -> bool {
        self.sink().is_some()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Write one prefixed line.
    pub fn log(&self, msg: impl fmt::Display) {
        if let Some(sink) = self.sink() {
            write_line(sink, format!("{}{msg}\n", self.prefix));
        }
    }

    /// Like [`Diagnostics::log`] but only builds the message when enabled.
    pub fn log_with(&self, msg: impl FnOnce() -> String) {
        if let Some(sink) = self.sink() {
            write_line(sink, format!("{}{}\n", self.prefix, msg()));
        }
    }

    fn sink(&self) -> Option<&Sink> {
        self.sink
            .get_or_init(|| {
                let dest = self.dest.as_ref()?;
                match dest.open() {
                    Ok(writer) => Some(Mutex::new(writer)),
                    Err(e) => {
                        tracing::warn!("Unable to open diagnostics destination {dest}: {e}");
                        None
                    }
                }
            })
            .as_ref()
    }
}

// The whole line goes out in one write so concurrent callers never interleave.
fn write_line(sink: &Sink, line: String) {
    let mut writer = sink.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = writer
        .write_all(line.as_bytes())
        .and_then(|()| writer.flush())
    {
        tracing::debug!("Failed to write diagnostics line: {e}");
    }
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("dest", &self.dest)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// In-memory writer for capturing diagnostics, mostly useful in tests.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
