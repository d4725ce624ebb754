// crates/mediator-core/src/runtime/toolgate.rs
// ============================================================================
// Module: ToolGate
// Description: Signed-plan enforcement in front of registered tools.
// Purpose: Make every tool reachable only through a verified issuer plan.
// Dependencies: ed25519-dalek, serde_json, crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! [`ToolGate`] pins the plan issuer's key at construction and refuses to
//! exist under any other key. [`ToolGate::execute`] then:
//!
//! 1. verifies the plan signature once over the full ordered call list,
//! 2. checks every call names a registered tool with schema-valid arguments,
//! 3. invokes the calls in order, recording a `tool_executed` event for each.
//!
//! Step 2 covers the whole plan before step 3 begins, so a plan with one bad
//! call invokes nothing. A plan that fails steps 1 or 2 is recorded as a
//! `rejected` event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use ed25519_dalek::VerifyingKey;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::audit::AuditEvent;
use crate::audit::AuditEventKind;
use crate::core::ClosedSchema;
use crate::core::KeyError;
use crate::core::KeyPin;
use crate::core::RejectionKind;
use crate::core::ToolCallId;
use crate::core::ToolName;
use crate::core::assert_key_pin;
use crate::core::compile_closed_schema;
use crate::interfaces::AuditLog;
use crate::interfaces::Tool;
use crate::interfaces::ToolContext;
use crate::interfaces::ToolError;
use crate::runtime::plan::ExecutionPlan;
use crate::runtime::plan::ToolCall;
use crate::runtime::telemetry::NoopTelemetrySink;
use crate::runtime::telemetry::TelemetryEvent;
use crate::runtime::telemetry::TelemetryOutcome;
use crate::runtime::telemetry::TelemetrySink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Telemetry component name.
const COMPONENT: &str = "toolgate";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// ToolGate construction, registration, and execution failures.
#[derive(Debug, Error)]
pub enum ToolGateError {
    /// Issuer key fingerprint differs from the pin.
    #[error("issuer key pin mismatch: expected {expected}, found {actual}")]
    IssuerKeyMismatch {
        /// Pinned fingerprint.
        expected: String,
        /// Fingerprint of the supplied key.
        actual: String,
    },
    /// A tool was registered with an invalid argument schema.
    #[error("invalid argument schema for tool {tool}: {detail}")]
    InvalidToolSchema {
        /// Tool being registered.
        tool: ToolName,
        /// Compilation failure.
        detail: String,
    },
    /// Plan signature does not verify against the pinned issuer key.
    #[error("plan signature invalid: {0}")]
    PlanSignatureInvalid(String),
    /// Plan names a tool that is not registered.
    #[error("unknown tool: {0}")]
    UnknownTool(ToolName),
    /// Call arguments fail the tool schema.
    #[error("arguments for {tool} fail schema: {detail}")]
    ArgSchemaInvalid {
        /// Tool whose schema failed.
        tool: ToolName,
        /// First violation.
        detail: String,
    },
    /// A tool refused or failed while running.
    #[error("tool {tool} failed: {source}")]
    Tool {
        /// Failing tool.
        tool: ToolName,
        /// Tool failure.
        source: ToolError,
    },
    /// Audit store failed while recording an execution.
    #[error("audit unavailable: {0}")]
    AuditUnavailable(String),
}

impl ToolGateError {
    /// Returns the stable rejection kind.
    #[must_use]
    pub const fn kind(&self) -> RejectionKind {
        match self {
            Self::IssuerKeyMismatch {
                ..
            } => RejectionKind::IssuerKeyMismatch,
            Self::InvalidToolSchema {
                ..
            }
            | Self::ArgSchemaInvalid {
                ..
            } => RejectionKind::ArgSchemaInvalid,
            Self::PlanSignatureInvalid(_) => RejectionKind::PlanSignatureInvalid,
            Self::UnknownTool(_) => RejectionKind::UnknownTool,
            Self::Tool {
                source: ToolError::Path(err),
                ..
            } => match err.rejection_kind() {
                Some(kind) => kind,
                None => RejectionKind::ToolFailed,
            },
            Self::Tool {
                ..
            } => RejectionKind::ToolFailed,
            Self::AuditUnavailable(_) => RejectionKind::AuditUnavailable,
        }
    }
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Caller-supplied context for one plan execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext {
    /// Opaque JSON passed to every tool in the plan.
    pub extra: Value,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            extra: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Output of one executed call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Call that produced the output.
    pub tool_call_id: ToolCallId,
    /// Tool that ran.
    pub tool_name: ToolName,
    /// Tool output.
    pub output: Value,
}

/// Registry entry.
struct RegisteredTool {
    /// Tool implementation.
    tool: Arc<dyn Tool>,
    /// Compiled, closed argument schema.
    schema: ClosedSchema,
}

// ============================================================================
// SECTION: ToolGate
// ============================================================================

/// Signed-plan gate in front of a tool registry.
pub struct ToolGate {
    /// Pinned issuer verification key.
    issuer_key: VerifyingKey,
    /// Registered tools by name.
    tools: BTreeMap<ToolName, RegisteredTool>,
    /// Audit trail.
    audit: Arc<dyn AuditLog>,
    /// Operational event sink.
    telemetry: Arc<dyn TelemetrySink>,
}

impl ToolGate {
    /// Creates a gate once `issuer_key` matches `pin`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolGateError::IssuerKeyMismatch`] when the key is not the
    /// pinned one.
    pub fn new(
        issuer_key: VerifyingKey,
        pin: &KeyPin,
        audit: Arc<dyn AuditLog>,
    ) -> Result<Self, ToolGateError> {
        assert_key_pin(&issuer_key, pin).map_err(|err| match err {
            KeyError::PinMismatch {
                expected,
                actual,
            } => ToolGateError::IssuerKeyMismatch {
                expected,
                actual,
            },
            other => ToolGateError::IssuerKeyMismatch {
                expected: pin.digest().value.clone(),
                actual: other.to_string(),
            },
        })?;
        Ok(Self {
            issuer_key,
            tools: BTreeMap::new(),
            audit,
            telemetry: Arc::new(NoopTelemetrySink),
        })
    }

    /// Replaces the telemetry sink.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Registers `tool` under `name` with its argument schema.
    ///
    /// Registering an existing name replaces the previous tool.
    ///
    /// # Errors
    ///
    /// Returns [`ToolGateError::InvalidToolSchema`] when the schema does not
    /// compile.
    pub fn register_tool(
        &mut self,
        name: impl Into<ToolName>,
        tool: Arc<dyn Tool>,
        args_schema: &Value,
    ) -> Result<(), ToolGateError> {
        let name = name.into();
        let schema =
            compile_closed_schema(args_schema).map_err(|err| ToolGateError::InvalidToolSchema {
                tool: name.clone(),
                detail: err.to_string(),
            })?;
        self.tools.insert(name, RegisteredTool {
            tool,
            schema,
        });
        Ok(())
    }

    /// Returns the registered tool names in order.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&ToolName> {
        self.tools.keys().collect()
    }

    /// Verifies `plan` and runs its calls in order.
    ///
    /// # Errors
    ///
    /// Returns [`ToolGateError`] for the first verification, lookup, schema,
    /// tool, or audit failure. Calls after a failing call are not run.
    pub fn execute(
        &self,
        plan: &ExecutionPlan,
        context: &ExecutionContext,
    ) -> Result<Vec<ToolResult>, ToolGateError> {
        let prepared = match self.authorize(plan) {
            Ok(prepared) => prepared,
            Err(err) => {
                self.reject(plan, &err);
                return Err(err);
            }
        };
        let mut results = Vec::with_capacity(prepared.len());
        for (call, entry) in prepared {
            let ctx = ToolContext {
                plan_id: plan.plan_id.clone(),
                tool_call_id: call.tool_call_id.clone(),
                session_id: plan.session_id.clone(),
                issuer_id: plan.issuer_id.clone(),
                extra: context.extra.clone(),
            };
            match entry.tool.invoke(&call.args, &ctx) {
                Ok(output) => {
                    self.record_execution(plan, call, None)?;
                    results.push(ToolResult {
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        output,
                    });
                }
                Err(source) => {
                    let err = ToolGateError::Tool {
                        tool: call.tool_name.clone(),
                        source,
                    };
                    self.record_execution(plan, call, Some(&err))?;
                    return Err(err);
                }
            }
        }
        Ok(results)
    }

    /// Verifies the plan and resolves every call before any tool runs.
    fn authorize<'a>(
        &'a self,
        plan: &'a ExecutionPlan,
    ) -> Result<Vec<(&'a ToolCall, &'a RegisteredTool)>, ToolGateError> {
        plan.verify(&self.issuer_key)
            .map_err(|err| ToolGateError::PlanSignatureInvalid(err.to_string()))?;
        plan.tool_calls
            .iter()
            .map(|call| {
                let entry = self
                    .tools
                    .get(&call.tool_name)
                    .ok_or_else(|| ToolGateError::UnknownTool(call.tool_name.clone()))?;
                if let Some(detail) = entry.schema.first_violation(&call.args) {
                    return Err(ToolGateError::ArgSchemaInvalid {
                        tool: call.tool_name.clone(),
                        detail,
                    });
                }
                Ok((call, entry))
            })
            .collect()
    }

    /// Records a `tool_executed` event for one call.
    fn record_execution(
        &self,
        plan: &ExecutionPlan,
        call: &ToolCall,
        failure: Option<&ToolGateError>,
    ) -> Result<(), ToolGateError> {
        let mut details = json!({
            "plan_id": plan.plan_id,
            "tool_call_id": call.tool_call_id,
            "tool_name": call.tool_name,
            "outcome": "ok",
        });
        let mut telemetry = TelemetryEvent::new(COMPONENT, "tool_executed", TelemetryOutcome::Ok)
            .with_session(plan.session_id.as_str())
            .with_detail(call.tool_name.as_str());
        if let Some(err) = failure {
            details["outcome"] = json!("error");
            details["kind"] = json!(err.kind().as_str());
            details["detail"] = json!(err.to_string());
            telemetry.outcome = TelemetryOutcome::Error;
            telemetry = telemetry.with_kind(err.kind().as_str());
        }
        self.telemetry.record(&telemetry);
        let event = AuditEvent::new(AuditEventKind::ToolExecuted)
            .with_session(plan.session_id.clone())
            .with_agent(plan.issuer_id.clone())
            .with_details(details);
        self.audit.emit(&event).map_err(|err| ToolGateError::AuditUnavailable(err.to_string()))
    }

    /// Records a refused plan.
    fn reject(&self, plan: &ExecutionPlan, err: &ToolGateError) {
        let kind = err.kind();
        self.telemetry.record(
            &TelemetryEvent::new(COMPONENT, "plan_rejected", TelemetryOutcome::Rejected)
                .with_kind(kind.as_str())
                .with_session(plan.session_id.as_str())
                .with_detail(err.to_string()),
        );
        let event = AuditEvent::new(AuditEventKind::Rejected)
            .with_session(plan.session_id.clone())
            .with_agent(plan.issuer_id.clone())
            .with_details(json!({
                "kind": kind.as_str(),
                "detail": err.to_string(),
                "plan_id": plan.plan_id,
            }));
        if let Err(audit_err) = self.audit.emit(&event) {
            self.telemetry.record(
                &TelemetryEvent::new(COMPONENT, "rejection_unrecorded", TelemetryOutcome::Error)
                    .with_kind(RejectionKind::AuditUnavailable.as_str())
                    .with_detail(audit_err.to_string()),
            );
        }
    }
}

impl std::fmt::Debug for ToolGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGate")
            .field("issuer_key", &self.issuer_key)
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use ed25519_dalek::SigningKey;

    use super::*;
    use crate::audit::InMemoryAuditLog;
    use crate::core::AgentId;
    use crate::core::SessionId;
    use crate::runtime::plan::PlanDraft;

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl Tool for Counter {
        fn invoke(&self, args: &Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(args.clone())
        }
    }

    fn gate(issuer: &SigningKey, counter: Arc<Counter>) -> (ToolGate, Arc<InMemoryAuditLog>) {
        let audit = Arc::new(InMemoryAuditLog::new());
        let key = issuer.verifying_key();
        let mut gate = ToolGate::new(key, &KeyPin::for_key(&key), audit.clone()).unwrap();
        gate.register_tool(
            "echo",
            counter,
            &json!({"type": "object", "properties": {"n": {"type": "integer"}}, "required": ["n"]}),
        )
        .unwrap();
        (gate, audit)
    }

    fn plan(key: &SigningKey, calls: Vec<ToolCall>) -> ExecutionPlan {
        PlanDraft::new(SessionId::new("s-1"), AgentId::new("planner"), calls)
            .unwrap()
            .sign(key)
            .unwrap()
    }

    #[test]
    fn pin_mismatch_is_fatal() {
        let issuer = SigningKey::from_bytes(&[5_u8; 32]);
        let other = SigningKey::from_bytes(&[6_u8; 32]);
        let result = ToolGate::new(
            issuer.verifying_key(),
            &KeyPin::for_key(&other.verifying_key()),
            Arc::new(InMemoryAuditLog::new()),
        );
        assert_eq!(result.unwrap_err().kind(), RejectionKind::IssuerKeyMismatch);
    }

    #[test]
    fn bad_call_anywhere_prevents_every_invocation() {
        let issuer = SigningKey::from_bytes(&[5_u8; 32]);
        let counter = Arc::new(Counter::default());
        let (gate, audit) = gate(&issuer, Arc::clone(&counter));
        let calls = vec![
            ToolCall::new("echo", json!({"n": 1})).unwrap(),
            ToolCall::new("echo", json!({"n": 2, "extra": true})).unwrap(),
        ];
        let err = gate.execute(&plan(&issuer, calls), &ExecutionContext::default()).unwrap_err();
        assert_eq!(err.kind(), RejectionKind::ArgSchemaInvalid);
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        let events = audit.events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_kind, AuditEventKind::Rejected);
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let issuer = SigningKey::from_bytes(&[5_u8; 32]);
        let (gate, _audit) = gate(&issuer, Arc::new(Counter::default()));
        let calls = vec![ToolCall::new("shell", json!({})).unwrap()];
        let err = gate.execute(&plan(&issuer, calls), &ExecutionContext::default()).unwrap_err();
        assert!(matches!(err, ToolGateError::UnknownTool(name) if name.as_str() == "shell"));
    }

    #[test]
    fn executed_calls_are_audited_in_order() {
        let issuer = SigningKey::from_bytes(&[5_u8; 32]);
        let counter = Arc::new(Counter::default());
        let (gate, audit) = gate(&issuer, Arc::clone(&counter));
        let calls = vec![
            ToolCall::new("echo", json!({"n": 1})).unwrap(),
            ToolCall::new("echo", json!({"n": 2})).unwrap(),
        ];
        let plan = plan(&issuer, calls);
        let results = gate.execute(&plan, &ExecutionContext::default()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].output, json!({"n": 2}));
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        let events = audit.events().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|event| event.event_kind == AuditEventKind::ToolExecuted));
        assert_eq!(events[0].details["tool_call_id"], json!(plan.tool_calls[0].tool_call_id));
        assert_eq!(events[1].details["outcome"], "ok");
    }
}
