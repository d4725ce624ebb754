// crates/mediator-core/src/runtime/plan.rs
// ============================================================================
// Module: Execution Plans
// Description: Issuer-signed, ordered lists of tool calls.
// Purpose: Define the plan wire form and its signing discipline.
// Dependencies: ed25519-dalek, serde, serde_json
// ============================================================================

//! ## Overview
//! An [`ExecutionPlan`] authorizes an ordered list of [`ToolCall`]s. The
//! issuer signs the canonical encoding of every field except
//! `issuer_signature`, so one signature covers the whole call list and its
//! order. Plans are built from a [`PlanDraft`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use ed25519_dalek::SigningKey;
use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::AgentId;
use crate::core::EnvelopeError;
use crate::core::KeyError;
use crate::core::PlanId;
use crate::core::SessionId;
use crate::core::ToolCallId;
use crate::core::ToolName;
use crate::core::canonical_json_bytes;
use crate::core::now_rfc3339;
use crate::core::sign_bytes;
use crate::core::verify_bytes;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Plan wire format version.
pub const PLAN_SCHEMA_VERSION: &str = "1.0";

// ============================================================================
// SECTION: Types
// ============================================================================

/// One tool invocation inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCall {
    /// Call identifier, unique within the plan.
    pub tool_call_id: ToolCallId,
    /// Registered tool to invoke.
    pub tool_name: ToolName,
    /// Tool arguments, validated against the tool schema before invocation.
    pub args: Value,
}

impl ToolCall {
    /// Creates a call with a fresh call id.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Identifier`] when id generation fails.
    pub fn new(tool_name: impl Into<ToolName>, args: Value) -> Result<Self, EnvelopeError> {
        Ok(Self {
            tool_call_id: ToolCallId::generate()?,
            tool_name: tool_name.into(),
            args,
        })
    }
}

/// Unsigned plan contents.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDraft {
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Session the plan belongs to.
    pub session_id: SessionId,
    /// Issuing agent.
    pub issuer_id: AgentId,
    /// RFC 3339 creation time.
    pub timestamp_utc: String,
    /// Ordered calls.
    pub tool_calls: Vec<ToolCall>,
}

impl PlanDraft {
    /// Creates a draft with a fresh plan id and the current time.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Identifier`] when id generation fails.
    pub fn new(
        session_id: SessionId,
        issuer_id: AgentId,
        tool_calls: Vec<ToolCall>,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            plan_id: PlanId::generate()?,
            session_id,
            issuer_id,
            timestamp_utc: now_rfc3339(),
            tool_calls,
        })
    }

    /// Signs the draft with the issuer key.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Codec`] when canonical encoding fails.
    pub fn sign(self, key: &SigningKey) -> Result<ExecutionPlan, EnvelopeError> {
        let mut plan = ExecutionPlan {
            schema_version: PLAN_SCHEMA_VERSION.to_string(),
            plan_id: self.plan_id,
            session_id: self.session_id,
            issuer_id: self.issuer_id,
            timestamp_utc: self.timestamp_utc,
            tool_calls: self.tool_calls,
            issuer_signature: String::new(),
        };
        plan.issuer_signature = sign_bytes(key, &plan.signing_bytes()?);
        Ok(plan)
    }
}

/// Signed plan as delivered to `ToolGate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionPlan {
    /// Wire format version.
    pub schema_version: String,
    /// Plan identifier.
    pub plan_id: PlanId,
    /// Session the plan belongs to.
    pub session_id: SessionId,
    /// Issuing agent.
    pub issuer_id: AgentId,
    /// RFC 3339 creation time.
    pub timestamp_utc: String,
    /// Ordered calls.
    pub tool_calls: Vec<ToolCall>,
    /// Hex Ed25519 issuer signature over every other field.
    pub issuer_signature: String,
}

/// Borrowed view of the signed plan fields.
#[derive(Serialize)]
struct SignedPlanView<'a> {
    /// Wire format version.
    schema_version: &'a str,
    /// Plan identifier.
    plan_id: &'a PlanId,
    /// Session identifier.
    session_id: &'a SessionId,
    /// Issuer.
    issuer_id: &'a AgentId,
    /// Creation time.
    timestamp_utc: &'a str,
    /// Calls.
    tool_calls: &'a [ToolCall],
}

impl ExecutionPlan {
    /// Returns the canonical bytes covered by the issuer signature.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Codec`] when canonical encoding fails.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let view = SignedPlanView {
            schema_version: &self.schema_version,
            plan_id: &self.plan_id,
            session_id: &self.session_id,
            issuer_id: &self.issuer_id,
            timestamp_utc: &self.timestamp_utc,
            tool_calls: &self.tool_calls,
        };
        Ok(canonical_json_bytes(&view)?)
    }

    /// Verifies the issuer signature against `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] when the plan cannot be encoded or the signature
    /// is malformed or invalid.
    pub fn verify(&self, key: &VerifyingKey) -> Result<(), KeyError> {
        let bytes =
            self.signing_bytes().map_err(|err| KeyError::MalformedSignature(err.to_string()))?;
        verify_bytes(key, &bytes, &self.issuer_signature)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
