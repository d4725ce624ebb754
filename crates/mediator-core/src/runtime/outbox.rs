// crates/mediator-core/src/runtime/outbox.rs
// ============================================================================
// Module: Outbox
// Description: Signs envelopes and delivers them to a receiver's inbox.
// Purpose: Pair every delivered hop with a `forwarded` audit event.
// Dependencies: ed25519-dalek, crate::fs, crate::interfaces
// ============================================================================

//! ## Overview
//! An [`Outbox`] belongs to one agent. It signs with that agent's key, writes
//! the envelope atomically into the receiver's inbound directory as
//! `<envelope_id>.envelope.json`, and records a `forwarded` event. Forwarded
//! events never count toward replay, so every hop stays auditable.

use std::path::Path;
use std::sync::Arc;

use ed25519_dalek::SigningKey;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditEventKind;
use crate::core::AgentId;
use crate::core::Envelope;
use crate::core::EnvelopeDraft;
use crate::core::EnvelopeError;
use crate::core::SessionId;
use crate::core::TemplateRef;
use crate::fs::SafeFsError;
use crate::fs::write_atomic;
use crate::interfaces::AuditError;
use crate::interfaces::AuditLog;
use crate::runtime::quarantine::ENVELOPE_FILE_SUFFIX;
use crate::runtime::validator::AcceptedMessage;

/// Delivery failures.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// Envelope could not be built or signed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// Envelope could not be written.
    #[error(transparent)]
    Fs(#[from] SafeFsError),
    /// The `forwarded` event could not be recorded.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Signing and delivery for one agent.
pub struct Outbox {
    /// Sending agent.
    agent_id: AgentId,
    /// Agent signing key.
    signing_key: SigningKey,
    /// Audit trail.
    audit: Arc<dyn AuditLog>,
}

impl Outbox {
    /// Creates an outbox for `agent_id`.
    #[must_use]
    pub fn new(agent_id: AgentId, signing_key: SigningKey, audit: Arc<dyn AuditLog>) -> Self {
        Self {
            agent_id,
            signing_key,
            audit,
        }
    }

    /// Signs a new envelope and delivers it to `queue_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] when signing, writing, or auditing fails.
    pub fn send(
        &self,
        session_id: SessionId,
        receiver_id: AgentId,
        template_ref: TemplateRef,
        payload: Map<String, Value>,
        human_readable: &str,
        queue_dir: &Path,
    ) -> Result<Envelope, OutboxError> {
        let envelope = EnvelopeDraft::new(
            session_id,
            self.agent_id.clone(),
            receiver_id,
            template_ref,
            payload,
            human_readable,
        )?
        .sign(&self.signing_key)?;
        self.deliver(&envelope, queue_dir)?;
        Ok(envelope)
    }

    /// Re-signs an accepted message as the next hop and delivers it.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError`] when signing, writing, or auditing fails.
    pub fn forward(
        &self,
        accepted: &AcceptedMessage,
        receiver_id: AgentId,
        queue_dir: &Path,
    ) -> Result<Envelope, OutboxError> {
        let envelope =
            accepted.envelope.forward(self.agent_id.clone(), receiver_id, &self.signing_key)?;
        self.deliver(&envelope, queue_dir)?;
        Ok(envelope)
    }

    /// Writes `envelope` into `queue_dir` and records the hop.
    fn deliver(&self, envelope: &Envelope, queue_dir: &Path) -> Result<(), OutboxError> {
        let name = format!("{}{ENVELOPE_FILE_SUFFIX}", envelope.envelope_id);
        write_atomic(queue_dir, &name, &envelope.to_json_bytes()?)?;
        self.audit.emit(
            &AuditEvent::new(AuditEventKind::Forwarded)
                .for_envelope(envelope)
                .with_agent(self.agent_id.clone()),
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox").field("agent_id", &self.agent_id).finish_non_exhaustive()
    }
}
