//! Output sinks for child process streams
//!
//! Sinks receive raw chunks as soon as they are read from a child pipe.
//! They are shared (`Arc`) so one buffer can be fed by several commands
//! and a [`Tee`] can duplicate a stream to several destinations.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// Destination for bytes produced by a child process
pub trait OutputSink: Send + Sync {
    fn write(&self, chunk: &[u8]);
}

/// Shared handle to a sink
pub type SharedSink = Arc<dyn OutputSink>;

/// The controlling terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

impl OutputSink for Console {
    fn write(&self, chunk: &[u8]) {
        // Terminal write failures (closed pipe) must not fail the build
        let _ = match self {
            Self::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(chunk).and_then(|_| out.flush())
            }
            Self::Stderr => std::io::stderr().lock().write_all(chunk),
        };
    }
}

/// In-memory buffer that can be read back after the command finished
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captured bytes as (lossy) UTF-8
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().map(|b| b.is_empty()).unwrap_or(true)
    }
}

impl OutputSink for CaptureBuffer {
    fn write(&self, chunk: &[u8]) {
        let mut buf = self.buf.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(chunk);
    }
}

/// Duplicates every chunk to all of its outputs, in order
pub struct Tee {
    outputs: Vec<SharedSink>,
}

impl Tee {
    pub fn new(outputs: Vec<SharedSink>) -> Self {
        Self { outputs }
    }
}

impl OutputSink for Tee {
    fn write(&self, chunk: &[u8]) {
        for out in &self.outputs {
            out.write(chunk);
        }
    }
}

/// Drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl OutputSink for Discard {
    fn write(&self, _chunk: &[u8]) {}
}
