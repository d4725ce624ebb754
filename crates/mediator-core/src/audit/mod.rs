// crates/mediator-core/src/audit/mod.rs
// ============================================================================
// Module: Audit Events
// Description: Append-only audit event model and in-memory log.
// Purpose: Record every acceptance, hop, rejection, and tool run.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An [`AuditEvent`] is one immutable row of the audit trail. Only the
//! `validated` kind is unique per envelope id; that uniqueness is what the
//! validator relies on to refuse replays. `forwarded` and `rejected` events
//! record hops and refusals and may repeat an envelope id freely.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::AgentId;
use crate::core::Envelope;
use crate::core::EnvelopeId;
use crate::core::SessionId;
use crate::core::TemplateId;
use crate::core::now_rfc3339;
use crate::core::unix_millis;

pub mod memory;

pub use memory::InMemoryAuditLog;

// ============================================================================
// SECTION: Event Kinds
// ============================================================================

/// Kinds of audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    /// Envelope passed every validator gate.
    Validated,
    /// Envelope was handed to the next hop.
    Forwarded,
    /// Envelope or plan was refused.
    Rejected,
    /// A tool ran under a verified plan.
    ToolExecuted,
    /// A template was published by the authority.
    Published,
}

impl AuditEventKind {
    /// Returns the stored label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validated => "validated",
            Self::Forwarded => "forwarded",
            Self::Rejected => "rejected",
            Self::ToolExecuted => "tool_executed",
            Self::Published => "published",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "validated" => Ok(Self::Validated),
            "forwarded" => Ok(Self::Forwarded),
            "rejected" => Ok(Self::Rejected),
            "tool_executed" => Ok(Self::ToolExecuted),
            "published" => Ok(Self::Published),
            other => Err(format!("unknown audit event kind: {other}")),
        }
    }
}

// ============================================================================
// SECTION: Events
// ============================================================================

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event kind.
    pub event_kind: AuditEventKind,
    /// Envelope the event concerns, when known.
    pub envelope_id: Option<EnvelopeId>,
    /// Session the event belongs to, when known.
    pub session_id: Option<SessionId>,
    /// Envelope sender, when known.
    pub sender_id: Option<AgentId>,
    /// Envelope receiver, when known.
    pub receiver_id: Option<AgentId>,
    /// Governing template, when known.
    pub template_id: Option<TemplateId>,
    /// Agent that recorded the event.
    pub agent_id: Option<AgentId>,
    /// RFC 3339 time of the event.
    pub timestamp_utc: String,
    /// Unix milliseconds of the event.
    pub timestamp_ms: i64,
    /// Structured, payload-free details.
    pub details: Value,
}

impl AuditEvent {
    /// Creates an event of `kind` stamped with the current time.
    #[must_use]
    pub fn new(kind: AuditEventKind) -> Self {
        Self {
            event_kind: kind,
            envelope_id: None,
            session_id: None,
            sender_id: None,
            receiver_id: None,
            template_id: None,
            agent_id: None,
            timestamp_utc: now_rfc3339(),
            timestamp_ms: unix_millis(),
            details: Value::Object(Map::new()),
        }
    }

    /// Copies the routing identity of `envelope` into the event.
    #[must_use]
    pub fn for_envelope(mut self, envelope: &Envelope) -> Self {
        self.envelope_id = Some(envelope.envelope_id.clone());
        self.session_id = Some(envelope.session_id.clone());
        self.sender_id = Some(envelope.sender_id.clone());
        self.receiver_id = Some(envelope.receiver_id.clone());
        self.template_id = Some(envelope.template_ref.template_id.clone());
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Sets the recording agent.
    #[must_use]
    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Sets the template id.
    #[must_use]
    pub fn with_template(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    /// Replaces the details object.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

/// Stored event with its append sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic sequence number assigned by the log.
    pub sequence: i64,
    /// The recorded event.
    pub event: AuditEvent,
}
