// crates/mediator-core/src/audit/memory.rs
// ============================================================================
// Module: In-Memory Audit Log
// Description: Process-local audit log for tests and single-process runs.
// Purpose: Provide an AuditLog with the same replay constraint as durable logs.
// Dependencies: crate::audit, crate::interfaces
// ============================================================================

//! ## Overview
//! [`InMemoryAuditLog`] keeps events in a vector behind a mutex. The lookup of
//! an existing `validated` event and the append happen under one lock, so the
//! replay constraint holds for every thread sharing the log. It does not span
//! processes; use the SQLite store for that.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use crate::audit::AuditEvent;
use crate::audit::AuditEventKind;
use crate::audit::AuditRecord;
use crate::core::AgentId;
use crate::core::EnvelopeId;
use crate::interfaces::AuditError;
use crate::interfaces::AuditLog;

// ============================================================================
// SECTION: Log
// ============================================================================

/// Mutable state guarded by the log mutex.
#[derive(Debug, Default)]
struct LogState {
    /// Events in append order.
    records: Vec<AuditRecord>,
    /// Envelope ids that already have a `validated` event.
    validated: BTreeSet<EnvelopeId>,
}

/// In-memory audit log.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditLog {
    /// Shared log state.
    state: Arc<Mutex<LogState>>,
}

impl InMemoryAuditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event in append order.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Storage`] when the mutex is poisoned.
    pub fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        self.with_state(|state| state.records.iter().map(|record| record.event.clone()).collect())
    }

    /// Runs `f` with the locked state.
    fn with_state<T>(&self, f: impl FnOnce(&mut LogState) -> T) -> Result<T, AuditError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| AuditError::Storage("audit log mutex poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

impl AuditLog for InMemoryAuditLog {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.with_state(|state| {
            if event.event_kind == AuditEventKind::Validated {
                let Some(envelope_id) = &event.envelope_id else {
                    return Err(AuditError::Invalid(
                        "validated event requires an envelope id".to_string(),
                    ));
                };
                if !state.validated.insert(envelope_id.clone()) {
                    return Err(AuditError::ConstraintViolation(envelope_id.clone()));
                }
            }
            let sequence = i64::try_from(state.records.len()).unwrap_or(i64::MAX) + 1;
            state.records.push(AuditRecord {
                sequence,
                event: event.clone(),
            });
            Ok(())
        })?
    }

    fn has_envelope_id(&self, envelope_id: &EnvelopeId) -> Result<bool, AuditError> {
        self.with_state(|state| state.validated.contains(envelope_id))
    }

    fn count_validated_since(&self, sender: &AgentId, since_ms: i64) -> Result<u64, AuditError> {
        self.with_state(|state| {
            state
                .records
                .iter()
                .filter(|record| {
                    record.event.event_kind == AuditEventKind::Validated
                        && record.event.sender_id.as_ref() == Some(sender)
                        && record.event.timestamp_ms >= since_ms
                })
                .count() as u64
        })
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        self.with_state(|state| state.records.iter().rev().take(limit).cloned().collect())
    }

    fn events_for_envelope(
        &self,
        envelope_id: &EnvelopeId,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        self.with_state(|state| {
            state
                .records
                .iter()
                .filter(|record| record.event.envelope_id.as_ref() == Some(envelope_id))
                .cloned()
                .collect()
        })
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
