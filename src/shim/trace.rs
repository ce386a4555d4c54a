// FILE: src/shim/trace.rs
//! Trace emission: one line per intercepted call.
//!
//! ```text
//! trace.xWrite(test.db,n=5,ofst=0) -> SQLITE_OK, replica=SQLITE_OK
//! trace.xLock(test.db,SHARED) -> SQLITE_OK
//! ```
//!
//! The verbosity is read at every call site, so a shim built with
//! `TraceLevel::Off` formats nothing at all.

use crate::core::Status;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// Where trace lines go. Lines carry no trailing newline.
pub trait TraceSink: Send + Sync {
    fn write_line(&self, line: &str);
}

impl<F> TraceSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn write_line(&self, line: &str) {
        self(line)
    }
}

/// Line-oriented text sink on standard error.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl TraceSink for StderrSink {
    fn write_line(&self, line: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
    }
}

/// Forwards every line as a `tracing` event on target `mirrorvfs::trace`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn write_line(&self, line: &str) {
        tracing::info!(target: "mirrorvfs::trace", "{}", line);
    }
}

/// Keeps lines in memory.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|lines| lines.clone()).unwrap_or_default()
    }

    /// Lines that start with `<shim>.<op>(`.
    pub fn calls(&self, shim: &str, op: &str) -> Vec<String> {
        let prefix = format!("{}.{}(", shim, op);
        self.lines().into_iter().filter(|line| line.starts_with(&prefix)).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.clear();
        }
    }
}

impl TraceSink for BufferSink {
    fn write_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Off,
    #[default]
    Calls,
    /// Also decodes sync flags, file-control requests and shm-lock flags.
    Full,
}

impl FromStr for TraceLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "0" => Ok(TraceLevel::Off),
            "calls" | "on" | "1" => Ok(TraceLevel::Calls),
            "full" | "2" => Ok(TraceLevel::Full),
            other => Err(format!("unknown trace level '{}'", other)),
        }
    }
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraceLevel::Off => "off",
            TraceLevel::Calls => "calls",
            TraceLevel::Full => "full",
        })
    }
}

/// Formats lines for one shim and hands them to its sink.
pub struct Tracer {
    shim: String,
    level: TraceLevel,
    sink: Arc<dyn TraceSink>,
}

impl Tracer {
    pub fn new(shim: &str, level: TraceLevel, sink: Arc<dyn TraceSink>) -> Self {
        Self { shim: shim.to_string(), level, sink }
    }

    pub fn shim(&self) -> &str {
        &self.shim
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    pub fn is_full(&self) -> bool {
        self.level == TraceLevel::Full
    }

    /// Build and emit one call line. `build` only runs when tracing is on.
    pub fn call<F>(&self, build: F)
    where
        F: FnOnce(&mut TraceLine),
    {
        if self.level == TraceLevel::Off {
            return;
        }
        let mut line = TraceLine::new(&self.shim);
        build(&mut line);
        self.sink.write_line(&line.finish());
    }

    /// Emit a pre-formatted line, prefixed with the shim name.
    pub fn note<F>(&self, build: F)
    where
        F: FnOnce() -> String,
    {
        if self.level == TraceLevel::Off {
            return;
        }
        self.sink.write_line(&format!("{}.{}", self.shim, build()));
    }
}

/// One `<shim>.<op>(<args>) -> <STATUS>...` line under construction.
pub struct TraceLine {
    head: String,
    status: Option<Status>,
    tail: String,
}

impl TraceLine {
    fn new(shim: &str) -> Self {
        Self { head: shim.to_string(), status: None, tail: String::new() }
    }

    pub fn op(&mut self, name: &str, args: impl fmt::Display) -> &mut Self {
        self.head = format!("{}.{}({})", self.head, name, args);
        self
    }

    pub fn status(&mut self, status: Status) -> &mut Self {
        self.status = Some(status);
        self
    }

    pub fn result<T>(&mut self, result: &crate::core::VfsResult<T>) -> &mut Self {
        self.status(Status::of(result))
    }

    /// Appends `, replica=<STATUS>` when a replica took part.
    pub fn replica<T>(&mut self, replica: Option<&crate::core::VfsResult<T>>) -> &mut Self {
        if let Some(result) = replica {
            self.field("replica", Status::of(result));
        }
        self
    }

    pub fn field(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.tail.push_str(&format!(", {}={}", key, value));
        self
    }

    fn finish(self) -> String {
        match self.status {
            Some(status) => format!("{} -> {}{}", self.head, status, self.tail),
            None => format!("{}{}", self.head, self.tail),
        }
    }
}
