// crates/mediator-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite Audit Log
// Description: Durable, append-only AuditLog backed by SQLite WAL.
// Purpose: Enforce one `validated` event per envelope id at the storage layer.
// Dependencies: mediator-core, rusqlite, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Events live in one append-only table. A partial unique index on
//! `envelope_id WHERE event_kind = 'validated'` is the replay guard: the
//! insert runs as a single `INSERT ... ON CONFLICT DO NOTHING`, and a
//! statement that changed no rows is reported as a typed constraint
//! violation. Because the check and the insert are one statement, two
//! processes racing on the same envelope id cannot both succeed.
//!
//! Update and delete are blocked by triggers. `details` is stored as
//! canonical JSON and bounded in size.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;

use mediator_core::AgentId;
use mediator_core::AuditError;
use mediator_core::AuditEvent;
use mediator_core::AuditEventKind;
use mediator_core::AuditLog;
use mediator_core::AuditRecord;
use mediator_core::EnvelopeId;
use mediator_core::SessionId;
use mediator_core::TemplateId;
use mediator_core::canonical_json_bytes;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::params;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the audit store.
const SCHEMA_VERSION: i64 = 1;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum canonical `details` size accepted per event.
pub const MAX_DETAILS_BYTES: usize = 64 * 1024;

/// Columns selected when reading events, in decode order.
const EVENT_COLUMNS: &str = "sequence, event_kind, envelope_id, session_id, sender_id, \
                             receiver_id, template_id, agent_id, timestamp_utc, timestamp_ms, \
                             details_json";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteJournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode.
    Delete,
}

impl SqliteJournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode (balanced).
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

/// Configuration for the `SQLite` audit log.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteAuditConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteJournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
}

impl SqliteAuditConfig {
    /// Creates a configuration with default pragmas for `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteJournalMode::default(),
            sync_mode: SqliteSyncMode::default(),
        }
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` audit store errors.
///
/// # Invariants
/// - Error messages avoid embedding event details.
#[derive(Debug, Error, Clone)]
pub enum SqliteAuditError {
    /// Store I/O error.
    #[error("sqlite audit io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite audit db error: {0}")]
    Db(String),
    /// Store schema version mismatch.
    #[error("sqlite audit version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store data or event.
    #[error("sqlite audit invalid data: {0}")]
    Invalid(String),
    /// Event details exceeded the size limit.
    #[error("sqlite audit details too large: {actual_bytes} bytes (max {max_bytes})")]
    TooLarge {
        /// Maximum allowed bytes.
        max_bytes: usize,
        /// Actual details size in bytes.
        actual_bytes: usize,
    },
}

impl From<SqliteAuditError> for AuditError {
    fn from(error: SqliteAuditError) -> Self {
        match error {
            SqliteAuditError::Invalid(_)
            | SqliteAuditError::TooLarge {
                ..
            } => Self::Invalid(error.to_string()),
            SqliteAuditError::Io(_)
            | SqliteAuditError::Db(_)
            | SqliteAuditError::VersionMismatch(_) => Self::Storage(error.to_string()),
        }
    }
}

/// Maps a `rusqlite` error into a store error.
#[allow(clippy::needless_pass_by_value, reason = "Used directly as a map_err adapter.")]
fn db_error(err: rusqlite::Error) -> SqliteAuditError {
    SqliteAuditError::Db(err.to_string())
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed audit log.
#[derive(Debug)]
pub struct SqliteAuditLog {
    /// Store configuration.
    config: SqliteAuditConfig,
    /// Serialized connection.
    connection: Mutex<Connection>,
}

impl SqliteAuditLog {
    /// Opens or creates the audit database.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAuditError`] when the database cannot be opened or
    /// initialized.
    pub fn new(config: SqliteAuditConfig) -> Result<Self, SqliteAuditError> {
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let mut connection = Connection::open_with_flags(&config.path, flags).map_err(db_error)?;
        apply_pragmas(&connection, &config)?;
        initialize_schema(&mut connection)?;
        Ok(Self {
            config,
            connection: Mutex::new(connection),
        })
    }

    /// Opens an existing audit database for reading only.
    ///
    /// Intended for viewers; [`AuditLog::emit`] on the returned log fails.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAuditError`] when the database is missing or has an
    /// unsupported schema version.
    pub fn open_read_only(path: &Path) -> Result<Self, SqliteAuditError> {
        validate_store_path(path)?;
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let connection = Connection::open_with_flags(path, flags).map_err(db_error)?;
        let config = SqliteAuditConfig::new(path);
        connection
            .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
            .map_err(db_error)?;
        let version: Option<i64> = connection
            .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
            .optional()
            .map_err(db_error)?;
        if version != Some(SCHEMA_VERSION) {
            return Err(SqliteAuditError::VersionMismatch(format!(
                "unsupported schema version: {version:?}"
            )));
        }
        Ok(Self {
            config,
            connection: Mutex::new(connection),
        })
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Verifies the store can execute a simple statement.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAuditError`] if the mutex is poisoned or the query
    /// fails.
    pub fn readiness(&self) -> Result<(), SqliteAuditError> {
        self.with_connection(|connection| {
            connection.query_row("SELECT 1", [], |_| Ok(())).map_err(db_error)
        })
    }

    /// Runs `f` with the locked connection.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SqliteAuditError>,
    ) -> Result<T, SqliteAuditError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| SqliteAuditError::Io("sqlite connection mutex poisoned".to_string()))?;
        f(&guard)
    }

    /// Runs a select over [`EVENT_COLUMNS`] and decodes every row.
    fn query_events(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AuditRecord>, SqliteAuditError> {
        self.with_connection(|connection| {
            let mut statement = connection.prepare(sql).map_err(db_error)?;
            let rows = statement.query_map(params, decode_row).map_err(db_error)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row.map_err(db_error)??);
            }
            Ok(records)
        })
    }

    /// Inserts `event`, returning false when the replay constraint held.
    fn insert(&self, event: &AuditEvent) -> Result<bool, SqliteAuditError> {
        if event.event_kind == AuditEventKind::Validated && event.envelope_id.is_none() {
            return Err(SqliteAuditError::Invalid(
                "validated event requires an envelope id".to_string(),
            ));
        }
        let details = canonical_json_bytes(&event.details)
            .map_err(|err| SqliteAuditError::Invalid(err.to_string()))?;
        if details.len() > MAX_DETAILS_BYTES {
            return Err(SqliteAuditError::TooLarge {
                max_bytes: MAX_DETAILS_BYTES,
                actual_bytes: details.len(),
            });
        }
        self.with_connection(|connection| {
            let changed = connection
                .execute(
                    "INSERT INTO audit_events (event_kind, envelope_id, session_id, sender_id, \
                     receiver_id, template_id, agent_id, timestamp_utc, timestamp_ms, \
                     details_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) ON CONFLICT \
                     DO NOTHING",
                    params![
                        event.event_kind.as_str(),
                        event.envelope_id.as_ref().map(EnvelopeId::as_str),
                        event.session_id.as_ref().map(SessionId::as_str),
                        event.sender_id.as_ref().map(AgentId::as_str),
                        event.receiver_id.as_ref().map(AgentId::as_str),
                        event.template_id.as_ref().map(TemplateId::as_str),
                        event.agent_id.as_ref().map(AgentId::as_str),
                        event.timestamp_utc,
                        event.timestamp_ms,
                        details,
                    ],
                )
                .map_err(db_error)?;
            Ok(changed == 1)
        })
    }
}

impl AuditLog for SqliteAuditLog {
    fn emit(&self, event: &AuditEvent) -> Result<(), AuditError> {
        if self.insert(event)? {
            return Ok(());
        }
        match &event.envelope_id {
            Some(envelope_id) => Err(AuditError::ConstraintViolation(envelope_id.clone())),
            None => Err(AuditError::Storage("insert changed no rows".to_string())),
        }
    }

    fn has_envelope_id(&self, envelope_id: &EnvelopeId) -> Result<bool, AuditError> {
        let found = self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT 1 FROM audit_events WHERE event_kind = 'validated' AND envelope_id = \
                     ?1 LIMIT 1",
                    params![envelope_id.as_str()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(db_error)
        })?;
        Ok(found.is_some())
    }

    fn count_validated_since(&self, sender: &AgentId, since_ms: i64) -> Result<u64, AuditError> {
        let count: i64 = self.with_connection(|connection| {
            connection
                .query_row(
                    "SELECT COUNT(1) FROM audit_events WHERE sender_id = ?1 AND event_kind = \
                     'validated' AND timestamp_ms >= ?2",
                    params![sender.as_str(), since_ms],
                    |row| row.get(0),
                )
                .map_err(db_error)
        })?;
        u64::try_from(count).map_err(|_| AuditError::Invalid(format!("negative count {count}")))
    }

    fn recent_events(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(self.query_events(
            &format!("SELECT {EVENT_COLUMNS} FROM audit_events ORDER BY sequence DESC LIMIT ?1"),
            params![limit],
        )?)
    }

    fn events_for_envelope(
        &self,
        envelope_id: &EnvelopeId,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        Ok(self.query_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM audit_events WHERE envelope_id = ?1 ORDER BY \
                 sequence ASC"
            ),
            params![envelope_id.as_str()],
        )?)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decodes one row selected with [`EVENT_COLUMNS`].
fn decode_row(row: &Row<'_>) -> rusqlite::Result<Result<AuditRecord, SqliteAuditError>> {
    let kind: String = row.get(1)?;
    let details: Vec<u8> = row.get(10)?;
    let event_kind = match kind.parse::<AuditEventKind>() {
        Ok(event_kind) => event_kind,
        Err(err) => return Ok(Err(SqliteAuditError::Invalid(err))),
    };
    let details = match serde_json::from_slice(&details) {
        Ok(details) => details,
        Err(err) => return Ok(Err(SqliteAuditError::Invalid(err.to_string()))),
    };
    Ok(Ok(AuditRecord {
        sequence: row.get(0)?,
        event: AuditEvent {
            event_kind,
            envelope_id: row.get::<_, Option<String>>(2)?.map(EnvelopeId::new),
            session_id: row.get::<_, Option<String>>(3)?.map(SessionId::new),
            sender_id: row.get::<_, Option<String>>(4)?.map(AgentId::new),
            receiver_id: row.get::<_, Option<String>>(5)?.map(AgentId::new),
            template_id: row.get::<_, Option<String>>(6)?.map(TemplateId::new),
            agent_id: row.get::<_, Option<String>>(7)?.map(AgentId::new),
            timestamp_utc: row.get(8)?,
            timestamp_ms: row.get(9)?,
            details,
        },
    }))
}

/// Ensures the parent directory for the store exists.
fn ensure_parent_dir(path: &Path) -> Result<(), SqliteAuditError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteAuditError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteAuditError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
fn validate_store_path(path: &Path) -> Result<(), SqliteAuditError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteAuditError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteAuditError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteAuditError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.is_dir() {
        return Err(SqliteAuditError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Applies `SQLite` pragmas required for durability and shared access.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteAuditConfig,
) -> Result<(), SqliteAuditError> {
    connection
        .busy_timeout(std::time::Duration::from_millis(config.busy_timeout_ms))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(db_error)?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(db_error)?;
    Ok(())
}

/// Initializes the schema or validates the existing version.
fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteAuditError> {
    let tx = connection
        .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
        .map_err(db_error)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(db_error)?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(db_error)?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(db_error)?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS audit_events (
                    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
                    event_kind TEXT NOT NULL,
                    envelope_id TEXT,
                    session_id TEXT,
                    sender_id TEXT,
                    receiver_id TEXT,
                    template_id TEXT,
                    agent_id TEXT,
                    timestamp_utc TEXT NOT NULL,
                    timestamp_ms INTEGER NOT NULL,
                    details_json BLOB NOT NULL
                );
                CREATE UNIQUE INDEX IF NOT EXISTS idx_audit_events_validated_envelope
                    ON audit_events (envelope_id) WHERE event_kind = 'validated';
                CREATE INDEX IF NOT EXISTS idx_audit_events_sender_window
                    ON audit_events (sender_id, event_kind, timestamp_ms);
                CREATE INDEX IF NOT EXISTS idx_audit_events_envelope
                    ON audit_events (envelope_id);
                CREATE TRIGGER IF NOT EXISTS audit_events_no_update
                    BEFORE UPDATE ON audit_events
                    BEGIN SELECT RAISE(ABORT, 'audit events are append-only'); END;
                CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
                    BEFORE DELETE ON audit_events
                    BEGIN SELECT RAISE(ABORT, 'audit events are append-only'); END;",
            )
            .map_err(db_error)?;
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteAuditError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(db_error)?;
    Ok(())
}
