//! Activation log markers
//!
//! The platform's log collector splits an action's stdout and stderr into
//! activations at these sentinel lines. They are protocol output, not logs,
//! so they bypass `tracing` and go straight to the sink.
//!
//! Nothing about an activation may be logged once its markers are out: the
//! collector would file that line under the next activation.

use coracle_core::ACTIVATION_LOG_MARKER;
use std::io::{self, Write};
use std::sync::Arc;

/// Write one marker line to `out` and flush it
pub fn write_marker<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "{}", ACTIVATION_LOG_MARKER)?;
    out.flush()
}

/// Destination of the activation markers
pub trait MarkerSink: Send + Sync {
    /// Close the current activation on every stream the collector reads
    fn emit(&self) -> io::Result<()>;
}

/// The process's stdout and stderr
#[derive(Debug, Clone, Copy, Default)]
pub struct StdStreams;

impl MarkerSink for StdStreams {
    fn emit(&self) -> io::Result<()> {
        let stdout = write_marker(&mut io::stdout().lock());
        let stderr = write_marker(&mut io::stderr().lock());
        stdout.and(stderr)
    }
}

/// Emits the activation markers when dropped
///
/// Created at the start of an activation so that every exit path, early
/// returns and panics included, closes the activation's log output.
#[must_use = "markers are written when the guard is dropped"]
pub struct ActivationMarkers {
    sink: Arc<dyn MarkerSink>,
    armed: bool,
}

impl ActivationMarkers {
    pub fn new(sink: Arc<dyn MarkerSink>) -> Self {
        Self { sink, armed: true }
    }

    /// Drop without writing the markers
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ActivationMarkers {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = self.sink.emit() {
            tracing::warn!(error = %e, "Failed to write activation markers");
        }
    }
}
