// crates/mediator-core/src/runtime/telemetry.rs
// ============================================================================
// Module: Mediator Telemetry
// Description: Structured JSON-line operational events and sinks.
// Purpose: Emit accept/reject and tool outcomes without hard log dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Telemetry is operational logging, separate from the audit trail: losing a
//! telemetry line never changes a decision. Events carry identifiers, kinds,
//! and short details, never payload contents. Deployments pick a sink:
//! stderr, an append-only file, or nothing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

use crate::core::unix_millis;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Outcome of the operation a telemetry event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryOutcome {
    /// Operation succeeded.
    Ok,
    /// Input was refused by policy.
    Rejected,
    /// Operation failed for an operational reason.
    Error,
}

/// One telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Emitting component.
    pub component: &'static str,
    /// Operation outcome.
    pub outcome: TelemetryOutcome,
    /// Rejection or error kind label.
    pub kind: Option<&'static str>,
    /// Envelope concerned, when known.
    pub envelope_id: Option<String>,
    /// Session concerned, when known.
    pub session_id: Option<String>,
    /// Short, payload-free detail.
    pub detail: Option<String>,
}

impl TelemetryEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(component: &'static str, event: &'static str, outcome: TelemetryOutcome) -> Self {
        Self {
            event,
            timestamp_ms: unix_millis(),
            component,
            outcome,
            kind: None,
            envelope_id: None,
            session_id: None,
            detail: None,
        }
    }

    /// Sets the kind label.
    #[must_use]
    pub const fn with_kind(mut self, kind: &'static str) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Sets the envelope id.
    #[must_use]
    pub fn with_envelope(mut self, envelope_id: impl Into<String>) -> Self {
        self.envelope_id = Some(envelope_id.into());
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Sets the detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Destination for telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Records an event. Failures are swallowed.
    fn record(&self, event: &TelemetryEvent);
}

/// Sink that writes JSON lines to stderr.
pub struct StderrTelemetrySink;

impl TelemetrySink for StderrTelemetrySink {
    fn record(&self, event: &TelemetryEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Sink that appends JSON lines to a file.
pub struct FileTelemetrySink {
    /// Append-only file handle.
    file: Mutex<std::fs::File>,
}

impl FileTelemetrySink {
    /// Opens `path` for appending, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl TelemetrySink for FileTelemetrySink {
    fn record(&self, event: &TelemetryEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Sink that drops every event.
pub struct NoopTelemetrySink;

impl TelemetrySink for NoopTelemetrySink {
    fn record(&self, _event: &TelemetryEvent) {}
}
