// crates/mediator-config/src/assembly.rs
// ============================================================================
// Module: Runtime Assembly
// Description: Builds mediator runtime components from validated config.
// Purpose: Wire keys, pins, limits, and backends from one source of truth.
// Dependencies: mediator-core, mediator-store-sqlite
// ============================================================================

//! ## Overview
//! Each helper turns one config section into a live component. Pins are
//! checked when a component is built, so a mismatched authority or issuer
//! key stops assembly before any message is processed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use mediator_core::AgeCli;
use mediator_core::AgentId;
use mediator_core::AuditLog;
use mediator_core::EnvelopeValidator;
use mediator_core::InMemoryAuditLog;
use mediator_core::KeyError;
use mediator_core::KeyPin;
use mediator_core::Outbox;
use mediator_core::Quarantine;
use mediator_core::ReadFileTool;
use mediator_core::SenderKeyring;
use mediator_core::TelemetrySink;
use mediator_core::ToolGate;
use mediator_core::ToolGateError;
use mediator_core::TrustStore;
use mediator_core::ValidatorConfig;
use mediator_core::Vault;
use mediator_core::VaultError;
use mediator_core::WriteFileTool;
use mediator_core::load_signing_key;
use mediator_core::load_verifying_key;
use mediator_core::runtime::FileTelemetrySink;
use mediator_core::runtime::NoopTelemetrySink;
use mediator_core::runtime::StderrTelemetrySink;
use mediator_core::verifying_key_from_hex;
use mediator_store_sqlite::SqliteAuditConfig;
use mediator_store_sqlite::SqliteAuditError;
use mediator_store_sqlite::SqliteAuditLog;
use thiserror::Error;

use crate::config::AgentConfig;
use crate::config::AuditBackend;
use crate::config::AuditConfig;
use crate::config::MediatorConfig;
use crate::config::QuarantineConfig;
use crate::config::SenderConfig;
use crate::config::TelemetryConfig;
use crate::config::TelemetrySinkType;
use crate::config::ToolGateConfig;
use crate::config::ValidatorSettings;
use crate::config::VaultConfig;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Registered name of the built-in read tool.
pub const READ_FILE_TOOL: &str = "read_file";
/// Registered name of the built-in write tool.
pub const WRITE_FILE_TOOL: &str = "write_file";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Failures while building runtime components.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// Configuration lacks a value a component needs.
    #[error("missing configuration: {0}")]
    Missing(String),
    /// Key material could not be loaded.
    #[error("key error for {field}: {source}")]
    Key {
        /// Config field naming the key.
        field: String,
        /// Underlying key failure.
        source: KeyError,
    },
    /// Audit store could not be opened.
    #[error(transparent)]
    Audit(#[from] SqliteAuditError),
    /// Vault could not be opened.
    #[error(transparent)]
    Vault(#[from] VaultError),
    /// `ToolGate` construction failed.
    #[error(transparent)]
    ToolGate(#[from] ToolGateError),
    /// Telemetry sink could not be opened.
    #[error("telemetry io error: {0}")]
    Telemetry(String),
}

/// Wraps a key failure with the config field it came from.
fn key_error(field: &str) -> impl FnOnce(KeyError) -> AssemblyError + '_ {
    move |source| AssemblyError::Key {
        field: field.to_string(),
        source,
    }
}

// ============================================================================
// SECTION: Components
// ============================================================================

/// Opens the configured audit log.
///
/// # Errors
///
/// Returns [`AssemblyError`] when the sqlite store cannot be opened.
pub fn open_audit_log(config: &AuditConfig) -> Result<Arc<dyn AuditLog>, AssemblyError> {
    match config.backend {
        AuditBackend::Memory => Ok(Arc::new(InMemoryAuditLog::new())),
        AuditBackend::Sqlite => {
            let path = config
                .path
                .clone()
                .ok_or_else(|| AssemblyError::Missing("audit.path".to_string()))?;
            let store = SqliteAuditLog::new(SqliteAuditConfig {
                path,
                busy_timeout_ms: config.busy_timeout_ms,
                journal_mode: config.journal_mode,
                sync_mode: config.sync_mode,
            })?;
            Ok(Arc::new(store))
        }
    }
}

/// Opens the age-encrypted vault and checks the authority pin.
///
/// # Errors
///
/// Returns [`AssemblyError::Vault`] on pin mismatch, a writable vault, or an
/// unusable identity file.
pub fn open_vault(config: &VaultConfig) -> Result<Arc<Vault>, AssemblyError> {
    let pin = KeyPin::from_hex(&config.authority_pin).map_err(key_error("vault.authority_pin"))?;
    let cli = AgeCli {
        binary: config.age_binary.clone(),
        timeout: Duration::from_millis(config.age_timeout_ms),
    };
    Ok(Arc::new(Vault::open(&config.dir, &config.identity_file, &pin, cli)?))
}

/// Loads every configured sender key.
///
/// # Errors
///
/// Returns [`AssemblyError::Key`] when a key is unreadable or malformed.
pub fn load_sender_keyring(senders: &[SenderConfig]) -> Result<SenderKeyring, AssemblyError> {
    let mut keyring = SenderKeyring::new();
    for sender in senders {
        let key = match (&sender.key_path, &sender.key_hex) {
            (Some(path), _) => load_verifying_key(path).map_err(key_error("senders.key_path"))?,
            (None, Some(text)) => {
                verifying_key_from_hex(text).map_err(key_error("senders.key_hex"))?
            }
            (None, None) => {
                return Err(AssemblyError::Missing(format!("key for sender {}", sender.agent_id)));
            }
        };
        keyring.insert(AgentId::new(sender.agent_id.as_str()), key);
    }
    Ok(keyring)
}

/// Opens the configured telemetry sink.
///
/// # Errors
///
/// Returns [`AssemblyError::Telemetry`] when the file sink cannot be opened.
pub fn telemetry_sink(config: &TelemetryConfig) -> Result<Arc<dyn TelemetrySink>, AssemblyError> {
    match config.sink {
        TelemetrySinkType::None => Ok(Arc::new(NoopTelemetrySink)),
        TelemetrySinkType::Stderr => Ok(Arc::new(StderrTelemetrySink)),
        TelemetrySinkType::File => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| AssemblyError::Missing("telemetry.path".to_string()))?;
            let sink = FileTelemetrySink::new(path)
                .map_err(|err| AssemblyError::Telemetry(err.to_string()))?;
            Ok(Arc::new(sink))
        }
    }
}

/// Builds the envelope validator for the local agent.
///
/// # Errors
///
/// Returns [`AssemblyError`] when a sender key cannot be loaded.
pub fn build_validator(
    config: &MediatorConfig,
    trust_store: Arc<dyn TrustStore>,
    audit: Arc<dyn AuditLog>,
    telemetry: Arc<dyn TelemetrySink>,
) -> Result<EnvelopeValidator, AssemblyError> {
    let senders = load_sender_keyring(&config.senders)?;
    let validator_config = validator_config(&config.agent, &config.validator);
    Ok(EnvelopeValidator::new(validator_config, trust_store, audit, senders)
        .with_telemetry(telemetry))
}

/// Returns validator settings for `agent`.
#[must_use]
pub fn validator_config(agent: &AgentConfig, settings: &ValidatorSettings) -> ValidatorConfig {
    ValidatorConfig {
        own_id: AgentId::new(agent.id.as_str()),
        max_envelope_bytes: settings.max_envelope_bytes,
        default_quota: settings.default_quota,
    }
}

/// Builds a `ToolGate` and registers the configured built-in tools.
///
/// # Errors
///
/// Returns [`AssemblyError`] when the issuer key is unreadable or does not
/// match its pin.
pub fn build_tool_gate(
    config: &ToolGateConfig,
    audit: Arc<dyn AuditLog>,
    telemetry: Arc<dyn TelemetrySink>,
) -> Result<ToolGate, AssemblyError> {
    let pin = KeyPin::from_hex(&config.issuer_pin).map_err(key_error("toolgate.issuer_pin"))?;
    let issuer_key =
        load_verifying_key(&config.issuer_key_path).map_err(key_error("toolgate.issuer_key_path"))?;
    let mut gate = ToolGate::new(issuer_key, &pin, audit)?.with_telemetry(telemetry);
    if let Some(root) = &config.read_root {
        let tool = ReadFileTool::new(root).with_max_bytes(config.max_read_bytes);
        gate.register_tool(READ_FILE_TOOL, Arc::new(tool), &ReadFileTool::args_schema())?;
    }
    if let Some(root) = &config.write_root {
        gate.register_tool(
            WRITE_FILE_TOOL,
            Arc::new(WriteFileTool::new(root)),
            &WriteFileTool::args_schema(),
        )?;
    }
    Ok(gate)
}

/// Builds the inbound quarantine.
///
/// Promotion reads at most one byte past the envelope limit. Larger inbound
/// files are refused with `TooLarge` before they are loaded and stay in the
/// inbox.
#[must_use]
pub fn open_quarantine(
    config: &QuarantineConfig,
    settings: &ValidatorSettings,
    telemetry: Arc<dyn TelemetrySink>,
) -> Quarantine {
    let read_cap = u64::try_from(settings.max_envelope_bytes).unwrap_or(u64::MAX).saturating_add(1);
    Quarantine::new(&config.inbound_dir, &config.quarantine_dir)
        .with_max_files(config.max_files)
        .with_max_read_bytes(read_cap)
        .with_telemetry(telemetry)
}

/// Builds the outbox for the local agent.
///
/// # Errors
///
/// Returns [`AssemblyError`] when no signing key is configured or it cannot
/// be loaded.
pub fn build_outbox(
    agent: &AgentConfig,
    audit: Arc<dyn AuditLog>,
) -> Result<Outbox, AssemblyError> {
    let path = agent
        .signing_key_path
        .as_ref()
        .ok_or_else(|| AssemblyError::Missing("agent.signing_key_path".to_string()))?;
    let signing_key = load_signing_key(path).map_err(key_error("agent.signing_key_path"))?;
    Ok(Outbox::new(AgentId::new(agent.id.as_str()), signing_key, audit))
}

// ============================================================================
// SECTION: Mediator
// ============================================================================

/// Every runtime component of one configured agent.
pub struct Mediator {
    /// Shared audit log.
    pub audit: Arc<dyn AuditLog>,
    /// Envelope validator.
    pub validator: EnvelopeValidator,
    /// Plan executor, when configured.
    pub tool_gate: Option<ToolGate>,
    /// Inbound quarantine, when configured.
    pub quarantine: Option<Quarantine>,
    /// Outbox, when a signing key is configured.
    pub outbox: Option<Outbox>,
}

impl Mediator {
    /// Assembles every configured component around `trust_store`.
    ///
    /// Use [`Mediator::open`] to open the configured age vault instead.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] when any component fails to build.
    pub fn with_trust_store(
        config: &MediatorConfig,
        trust_store: Arc<dyn TrustStore>,
    ) -> Result<Self, AssemblyError> {
        let telemetry = telemetry_sink(&config.telemetry)?;
        let audit = open_audit_log(&config.audit)?;
        let validator =
            build_validator(config, trust_store, Arc::clone(&audit), Arc::clone(&telemetry))?;
        let tool_gate = config
            .toolgate
            .as_ref()
            .map(|toolgate| build_tool_gate(toolgate, Arc::clone(&audit), Arc::clone(&telemetry)))
            .transpose()?;
        let quarantine = config
            .quarantine
            .as_ref()
            .map(|quarantine| {
                open_quarantine(quarantine, &config.validator, Arc::clone(&telemetry))
            });
        let outbox = if config.agent.signing_key_path.is_some() {
            Some(build_outbox(&config.agent, Arc::clone(&audit))?)
        } else {
            None
        };
        Ok(Self {
            audit,
            validator,
            tool_gate,
            quarantine,
            outbox,
        })
    }

    /// Opens the configured vault and assembles every component.
    ///
    /// # Errors
    ///
    /// Returns [`AssemblyError`] when the vault or any component fails.
    pub fn open(config: &MediatorConfig) -> Result<Self, AssemblyError> {
        let vault = open_vault(&config.vault)?;
        Self::with_trust_store(config, vault)
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("validator", &self.validator)
            .field("tool_gate", &self.tool_gate)
            .field("quarantine", &self.quarantine)
            .field("outbox", &self.outbox)
            .finish_non_exhaustive()
    }
}
