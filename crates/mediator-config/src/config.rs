// crates/mediator-config/src/config.rs
// ============================================================================
// Module: Mediator Configuration
// Description: Configuration loading and validation for one mediator agent.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: mediator-core, mediator-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every key pin is an explicit 64-character hex value and every limit must
//! be non-zero; anything missing or malformed fails closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use mediator_core::KeyPin;
use mediator_core::QuotaPolicy;
use mediator_core::runtime::quarantine::DEFAULT_MAX_QUARANTINE_FILES;
use mediator_core::runtime::tools::DEFAULT_READ_LIMIT;
use mediator_core::runtime::validator::DEFAULT_MAX_ENVELOPE_BYTES;
use mediator_store_sqlite::SqliteJournalMode;
use mediator_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "mediator.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "MEDIATOR_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of configured sender keys.
pub const MAX_SENDERS: usize = 256;
/// Length of a hex-encoded SHA-256 key pin.
const KEY_PIN_HEX_LENGTH: usize = 64;
/// Default `age` invocation budget in milliseconds.
const DEFAULT_AGE_TIMEOUT_MS: u64 = 10_000;
/// Default `SQLite` busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config Root
// ============================================================================

/// Mediator configuration loaded from TOML.
///
/// # Invariants
/// - [`MediatorConfig::validate`] has succeeded for any value returned by
///   [`MediatorConfig::load`] or [`MediatorConfig::parse`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediatorConfig {
    /// Identity of the agent running this mediator.
    pub agent: AgentConfig,
    /// Validator limits.
    #[serde(default)]
    pub validator: ValidatorSettings,
    /// Trust store location and authority pin.
    pub vault: VaultConfig,
    /// Audit log backend.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Optional `ToolGate` for executing signed plans.
    #[serde(default)]
    pub toolgate: Option<ToolGateConfig>,
    /// Verification keys of agents allowed to send envelopes.
    #[serde(default)]
    pub senders: Vec<SenderConfig>,
    /// Optional inbound quarantine.
    #[serde(default)]
    pub quarantine: Option<QuarantineConfig>,
    /// Operational telemetry sink.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl MediatorConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is `path` when given, then `MEDIATOR_CONFIG`, then
    /// `mediator.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path("config path", &resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::parse(content)
    }

    /// Parses and validates configuration text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.agent.validate()?;
        self.validator.validate()?;
        self.vault.validate()?;
        self.audit.validate()?;
        if let Some(toolgate) = &self.toolgate {
            toolgate.validate()?;
        }
        if self.senders.len() > MAX_SENDERS {
            return Err(ConfigError::Invalid("too many sender entries".to_string()));
        }
        let mut seen = BTreeSet::new();
        for sender in &self.senders {
            sender.validate()?;
            if !seen.insert(sender.agent_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate sender entry: {}",
                    sender.agent_id
                )));
            }
        }
        if let Some(quarantine) = &self.quarantine {
            quarantine.validate()?;
        }
        self.telemetry.validate()
    }
}

// ============================================================================
// SECTION: Agent
// ============================================================================

/// Identity of the local agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Agent id; gate 4 compares `receiver_id` against it.
    pub id: String,
    /// Ed25519 signing seed used when this agent sends or forwards.
    #[serde(default)]
    pub signing_key_path: Option<PathBuf>,
}

impl AgentConfig {
    /// Validates agent identity settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_id("agent.id", &self.id)?;
        if let Some(path) = &self.signing_key_path {
            validate_path("agent.signing_key_path", path)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Validator
// ============================================================================

/// Validator limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorSettings {
    /// Largest raw envelope accepted by the size gate.
    #[serde(default = "default_max_envelope_bytes")]
    pub max_envelope_bytes: usize,
    /// Quota applied when a capability set declares none.
    #[serde(default = "default_quota")]
    pub default_quota: QuotaPolicy,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            max_envelope_bytes: default_max_envelope_bytes(),
            default_quota: default_quota(),
        }
    }
}

impl ValidatorSettings {
    /// Validates validator limits.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_envelope_bytes == 0 {
            return Err(ConfigError::Invalid(
                "validator.max_envelope_bytes must be greater than zero".to_string(),
            ));
        }
        if self.default_quota.max_messages == 0 || self.default_quota.window_seconds == 0 {
            return Err(ConfigError::Invalid(
                "validator.default_quota values must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default raw envelope limit.
const fn default_max_envelope_bytes() -> usize {
    DEFAULT_MAX_ENVELOPE_BYTES
}

/// Default sender quota.
const fn default_quota() -> QuotaPolicy {
    QuotaPolicy::DEFAULT
}

// ============================================================================
// SECTION: Vault
// ============================================================================

/// Trust store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    /// Vault root holding `templates/`, `capsets/`, and `keys/`.
    pub dir: PathBuf,
    /// `age` identity file; must be owner-only.
    pub identity_file: PathBuf,
    /// Expected SHA-256 of the authority public key (64 hex chars).
    pub authority_pin: String,
    /// `age` executable; resolved through `PATH` when relative.
    #[serde(default = "default_age_binary")]
    pub age_binary: PathBuf,
    /// Wall-clock budget per `age` invocation.
    #[serde(default = "default_age_timeout_ms")]
    pub age_timeout_ms: u64,
}

impl VaultConfig {
    /// Validates vault settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path("vault.dir", &self.dir)?;
        validate_path("vault.identity_file", &self.identity_file)?;
        validate_pin("vault.authority_pin", &self.authority_pin)?;
        validate_path("vault.age_binary", &self.age_binary)?;
        if self.age_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "vault.age_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default `age` executable name.
fn default_age_binary() -> PathBuf {
    PathBuf::from("age")
}

/// Default `age` timeout.
const fn default_age_timeout_ms() -> u64 {
    DEFAULT_AGE_TIMEOUT_MS
}

// ============================================================================
// SECTION: Audit
// ============================================================================

/// Audit log settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Audit backend type.
    #[serde(rename = "type", default)]
    pub backend: AuditBackend,
    /// `SQLite` database path when using the sqlite backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            backend: AuditBackend::default(),
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

impl AuditConfig {
    /// Validates audit settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match self.backend {
            AuditBackend::Memory => {
                if self.path.is_some() {
                    return Err(ConfigError::Invalid("memory audit must not set path".to_string()));
                }
                Ok(())
            }
            AuditBackend::Sqlite => {
                let path = self.path.as_ref().ok_or_else(|| {
                    ConfigError::Invalid("sqlite audit requires path".to_string())
                })?;
                validate_path("audit.path", path)
            }
        }
    }
}

/// Audit log backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditBackend {
    /// Process-local log; replay protection ends with the process.
    #[default]
    Memory,
    /// Durable `SQLite` log shared across processes.
    Sqlite,
}

/// Default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: ToolGate
// ============================================================================

/// `ToolGate` settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolGateConfig {
    /// Plan issuer public key file (raw 32 bytes or 64 hex chars).
    pub issuer_key_path: PathBuf,
    /// Expected SHA-256 of the issuer public key (64 hex chars).
    pub issuer_pin: String,
    /// Base directory for the `read_file` tool; unset disables it.
    #[serde(default)]
    pub read_root: Option<PathBuf>,
    /// Base directory for the `write_file` tool; unset disables it.
    #[serde(default)]
    pub write_root: Option<PathBuf>,
    /// Largest file `read_file` returns.
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
}

impl ToolGateConfig {
    /// Validates `ToolGate` settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path("toolgate.issuer_key_path", &self.issuer_key_path)?;
        validate_pin("toolgate.issuer_pin", &self.issuer_pin)?;
        if let Some(path) = &self.read_root {
            validate_path("toolgate.read_root", path)?;
        }
        if let Some(path) = &self.write_root {
            validate_path("toolgate.write_root", path)?;
        }
        if self.max_read_bytes == 0 {
            return Err(ConfigError::Invalid(
                "toolgate.max_read_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default read cap for the `read_file` tool.
const fn default_max_read_bytes() -> u64 {
    DEFAULT_READ_LIMIT
}

// ============================================================================
// SECTION: Senders
// ============================================================================

/// One trusted sender verification key.
///
/// # Invariants
/// - Exactly one of `key_path` and `key_hex` is set.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SenderConfig {
    /// Sender agent id.
    pub agent_id: String,
    /// Public key file (raw 32 bytes or 64 hex chars).
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Inline hex public key.
    #[serde(default)]
    pub key_hex: Option<String>,
}

impl SenderConfig {
    /// Validates one sender entry.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_id("senders.agent_id", &self.agent_id)?;
        match (&self.key_path, &self.key_hex) {
            (Some(path), None) => validate_path("senders.key_path", path),
            (None, Some(hex)) => {
                if hex.trim().len() != KEY_PIN_HEX_LENGTH {
                    return Err(ConfigError::Invalid(format!(
                        "senders.key_hex for {} must be {KEY_PIN_HEX_LENGTH} hex characters",
                        self.agent_id
                    )));
                }
                Ok(())
            }
            _ => Err(ConfigError::Invalid(format!(
                "sender {} must set exactly one of key_path or key_hex",
                self.agent_id
            ))),
        }
    }
}

// ============================================================================
// SECTION: Quarantine
// ============================================================================

/// Inbound quarantine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuarantineConfig {
    /// Directory senders deliver envelopes into.
    pub inbound_dir: PathBuf,
    /// Directory files are moved into before validation.
    pub quarantine_dir: PathBuf,
    /// Rejected files retained before intake refuses new work.
    #[serde(default = "default_max_quarantine_files")]
    pub max_files: usize,
}

impl QuarantineConfig {
    /// Validates quarantine settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path("quarantine.inbound_dir", &self.inbound_dir)?;
        validate_path("quarantine.quarantine_dir", &self.quarantine_dir)?;
        if self.inbound_dir == self.quarantine_dir {
            return Err(ConfigError::Invalid(
                "quarantine.inbound_dir and quarantine_dir must differ".to_string(),
            ));
        }
        if self.max_files == 0 {
            return Err(ConfigError::Invalid(
                "quarantine.max_files must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default retained-file cap.
const fn default_max_quarantine_files() -> usize {
    DEFAULT_MAX_QUARANTINE_FILES
}

// ============================================================================
// SECTION: Telemetry
// ============================================================================

/// Telemetry sink settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Sink type.
    #[serde(default)]
    pub sink: TelemetrySinkType,
    /// Output path for the file sink.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl TelemetryConfig {
    /// Validates telemetry settings.
    fn validate(&self) -> Result<(), ConfigError> {
        match (self.sink, &self.path) {
            (TelemetrySinkType::File, Some(path)) => validate_path("telemetry.path", path),
            (TelemetrySinkType::File, None) => {
                Err(ConfigError::Invalid("file telemetry requires path".to_string()))
            }
            (_, Some(_)) => Err(ConfigError::Invalid(
                "telemetry.path is only valid for the file sink".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }
}

/// Telemetry sink type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySinkType {
    /// Discard events.
    #[default]
    None,
    /// JSON lines on stderr.
    Stderr,
    /// JSON lines appended to a file.
    File,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from the caller or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates a path against length constraints.
fn validate_path(field: &str, path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in path.components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a non-empty identifier without surrounding whitespace.
fn validate_id(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.trim() != value {
        return Err(ConfigError::Invalid(format!(
            "{field} must be non-empty without surrounding whitespace"
        )));
    }
    Ok(())
}

/// Validates a 64-character lowercase hex key pin.
fn validate_pin(field: &str, value: &str) -> Result<(), ConfigError> {
    let well_formed = value.len() == KEY_PIN_HEX_LENGTH
        && value.bytes().all(|byte| byte.is_ascii_digit() || (b'a' ..= b'f').contains(&byte));
    if !well_formed {
        return Err(ConfigError::Invalid(format!(
            "{field} must be {KEY_PIN_HEX_LENGTH} lowercase hex characters"
        )));
    }
    KeyPin::from_hex(value).map_err(|err| ConfigError::Invalid(format!("{field}: {err}")))?;
    Ok(())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
