// crates/mediator-store-sqlite/tests/sqlite_audit_unit.rs
// ============================================================================
// Module: SQLite Audit Log Unit Tests
// Description: Integrity tests for the SQLite audit log.
// Purpose: Validate the replay constraint, append-only guarantees, path
//          safety, schema versioning, and size limits.
// ============================================================================

//! ## Overview
//! Unit-level tests for `SQLite` audit invariants:
//! - One `validated` event per envelope id, across connections and threads
//! - `forwarded` and `rejected` events may repeat an envelope id
//! - Rows cannot be updated or deleted
//! - Path, version, and details-size checks fail closed

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Barrier;
use std::thread;

use mediator_core::AgentId;
use mediator_core::AuditError;
use mediator_core::AuditEvent;
use mediator_core::AuditEventKind;
use mediator_core::AuditLog;
use mediator_core::EnvelopeId;
use mediator_core::TemplateId;
use mediator_store_sqlite::MAX_DETAILS_BYTES;
use mediator_store_sqlite::SqliteAuditConfig;
use mediator_store_sqlite::SqliteAuditError;
use mediator_store_sqlite::SqliteAuditLog;
use mediator_store_sqlite::SqliteJournalMode;
use mediator_store_sqlite::SqliteSyncMode;
use rusqlite::Connection;
use rusqlite::params;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn config_in(dir: &TempDir) -> SqliteAuditConfig {
    SqliteAuditConfig {
        path: dir.path().join("audit").join("audit.db"),
        busy_timeout_ms: 5_000,
        journal_mode: SqliteJournalMode::Wal,
        sync_mode: SqliteSyncMode::Full,
    }
}

fn event(kind: AuditEventKind, envelope: &str, sender: &str) -> AuditEvent {
    let mut event = AuditEvent::new(kind)
        .with_template(TemplateId::new("blog_post_v1"))
        .with_details(json!({"template_version": "1"}));
    event.envelope_id = Some(EnvelopeId::new(envelope));
    event.sender_id = Some(AgentId::new(sender));
    event.receiver_id = Some(AgentId::new("sanitizer"));
    event
}

fn open(path: &Path) -> SqliteAuditLog {
    SqliteAuditLog::new(SqliteAuditConfig::new(path)).unwrap()
}

// ============================================================================
// SECTION: Replay Constraint
// ============================================================================

#[test]
fn second_validated_event_is_a_constraint_violation() {
    let dir = TempDir::new().unwrap();
    let log = SqliteAuditLog::new(config_in(&dir)).unwrap();
    log.emit(&event(AuditEventKind::Validated, "abc-1", "intake")).unwrap();

    let err = log.emit(&event(AuditEventKind::Validated, "abc-1", "intake")).unwrap_err();
    match err {
        AuditError::ConstraintViolation(id) => assert_eq!(id.as_str(), "abc-1"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(log.has_envelope_id(&EnvelopeId::new("abc-1")).unwrap());
    assert_eq!(log.events_for_envelope(&EnvelopeId::new("abc-1")).unwrap().len(), 1);
}

#[test]
fn forwarded_and_rejected_events_may_repeat() {
    let dir = TempDir::new().unwrap();
    let log = SqliteAuditLog::new(config_in(&dir)).unwrap();
    log.emit(&event(AuditEventKind::Validated, "abc-1", "intake")).unwrap();
    log.emit(&event(AuditEventKind::Forwarded, "abc-1", "intake")).unwrap();
    log.emit(&event(AuditEventKind::Forwarded, "abc-1", "sanitizer")).unwrap();
    log.emit(&event(AuditEventKind::Rejected, "abc-1", "intake")).unwrap();
    log.emit(&event(AuditEventKind::Rejected, "abc-1", "intake")).unwrap();

    let kinds: Vec<AuditEventKind> = log
        .events_for_envelope(&EnvelopeId::new("abc-1"))
        .unwrap()
        .into_iter()
        .map(|record| record.event.event_kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            AuditEventKind::Validated,
            AuditEventKind::Forwarded,
            AuditEventKind::Forwarded,
            AuditEventKind::Rejected,
            AuditEventKind::Rejected,
        ]
    );
}

#[test]
fn forwarded_event_does_not_block_first_validation() {
    let dir = TempDir::new().unwrap();
    let log = SqliteAuditLog::new(config_in(&dir)).unwrap();
    log.emit(&event(AuditEventKind::Forwarded, "abc-2", "intake")).unwrap();
    assert!(!log.has_envelope_id(&EnvelopeId::new("abc-2")).unwrap());
    log.emit(&event(AuditEventKind::Validated, "abc-2", "intake")).unwrap();
}

#[test]
fn validated_event_requires_envelope_id() {
    let dir = TempDir::new().unwrap();
    let log = SqliteAuditLog::new(config_in(&dir)).unwrap();
    let err = log.emit(&AuditEvent::new(AuditEventKind::Validated)).unwrap_err();
    assert!(matches!(err, AuditError::Invalid(_)));
}

#[test]
fn replay_race_across_connections_admits_exactly_one() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("audit.db");
    drop(open(&path));

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0 .. threads)
        .map(|_| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let log = open(&path);
                barrier.wait();
                log.emit(&event(AuditEventKind::Validated, "race-1", "intake"))
            })
        })
        .collect();

    let mut admitted = 0;
    let mut refused = 0;
    for handle in handles {
        match handle.join().unwrap() {
            Ok(()) => admitted += 1,
            Err(AuditError::ConstraintViolation(_)) => refused += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(admitted, 1);
    assert_eq!(refused, threads - 1);
}

// ============================================================================
// SECTION: Queries
// ============================================================================

#[test]
fn counts_validated_events_inside_window() {
    let dir = TempDir::new().unwrap();
    let log = SqliteAuditLog::new(config_in(&dir)).unwrap();
    let mut old = event(AuditEventKind::Validated, "old", "intake");
    old.timestamp_ms = 1_000;
    log.emit(&old).unwrap();
    log.emit(&event(AuditEventKind::Validated, "new-1", "intake")).unwrap();
    log.emit(&event(AuditEventKind::Validated, "new-2", "intake")).unwrap();
    log.emit(&event(AuditEventKind::Rejected, "new-3", "intake")).unwrap();
    log.emit(&event(AuditEventKind::Validated, "other", "planner")).unwrap();

    let sender = AgentId::new("intake");
    assert_eq!(log.count_validated_since(&sender, 2_000).unwrap(), 2);
    assert_eq!(log.count_validated_since(&sender, 0).unwrap(), 3);
}

#[test]
fn recent_events_are_newest_first_and_persist_across_reopen() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    {
        let log = SqliteAuditLog::new(config.clone()).unwrap();
        for id in ["e-1", "e-2", "e-3"] {
            log.emit(&event(AuditEventKind::Validated, id, "intake")).unwrap();
        }
    }
    let log = SqliteAuditLog::new(config.clone()).unwrap();
    let recent = log.recent_events(2).unwrap();
    let ids: Vec<&str> = recent
        .iter()
        .filter_map(|record| record.event.envelope_id.as_ref())
        .map(EnvelopeId::as_str)
        .collect();
    assert_eq!(ids, vec!["e-3", "e-2"]);
    assert!(recent[0].sequence > recent[1].sequence);
    assert_eq!(recent[0].event.details, json!({"template_version": "1"}));

    let err = log.emit(&event(AuditEventKind::Validated, "e-1", "intake")).unwrap_err();
    assert!(matches!(err, AuditError::ConstraintViolation(_)));

    let viewer = SqliteAuditLog::open_read_only(&config.path).unwrap();
    assert_eq!(viewer.recent_events(10).unwrap().len(), 3);
    assert!(viewer.emit(&event(AuditEventKind::Forwarded, "e-1", "intake")).is_err());
}

// ============================================================================
// SECTION: Integrity
// ============================================================================

#[test]
fn rows_cannot_be_updated_or_deleted() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    let log = SqliteAuditLog::new(config.clone()).unwrap();
    log.emit(&event(AuditEventKind::Validated, "abc-1", "intake")).unwrap();
    drop(log);

    let connection = Connection::open(&config.path).unwrap();
    let update = connection.execute(
        "UPDATE audit_events SET envelope_id = ?1 WHERE envelope_id = ?2",
        params!["abc-9", "abc-1"],
    );
    assert!(update.is_err());
    let delete = connection.execute("DELETE FROM audit_events", params![]);
    assert!(delete.is_err());
    let count: i64 = connection
        .query_row("SELECT COUNT(1) FROM audit_events", params![], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn oversized_details_are_rejected() {
    let dir = TempDir::new().unwrap();
    let log = SqliteAuditLog::new(config_in(&dir)).unwrap();
    let big = "x".repeat(MAX_DETAILS_BYTES + 1);
    let oversized =
        event(AuditEventKind::Rejected, "abc-1", "intake").with_details(json!({"detail": big}));
    let err = log.emit(&oversized).unwrap_err();
    assert!(matches!(err, AuditError::Invalid(_)));
    assert!(log.recent_events(10).unwrap().is_empty());
}

#[test]
fn directory_path_is_rejected() {
    let dir = TempDir::new().unwrap();
    let err = SqliteAuditLog::new(SqliteAuditConfig::new(dir.path())).unwrap_err();
    assert!(matches!(err, SqliteAuditError::Invalid(_)));
}

#[test]
fn overlong_path_component_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path: PathBuf = dir.path().join("a".repeat(300)).join("audit.db");
    let err = SqliteAuditLog::new(SqliteAuditConfig::new(path)).unwrap_err();
    assert!(matches!(err, SqliteAuditError::Invalid(_)));
}

#[test]
fn unknown_schema_version_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = config_in(&dir);
    drop(SqliteAuditLog::new(config.clone()).unwrap());

    let connection = Connection::open(&config.path).unwrap();
    connection.execute("UPDATE store_meta SET version = ?1", params![99]).unwrap();
    drop(connection);

    let err = SqliteAuditLog::new(config.clone()).unwrap_err();
    assert!(matches!(err, SqliteAuditError::VersionMismatch(_)));
    let err = SqliteAuditLog::open_read_only(&config.path).unwrap_err();
    assert!(matches!(err, SqliteAuditError::VersionMismatch(_)));
}

#[test]
fn config_parses_with_defaults() {
    let config: SqliteAuditConfig = toml::from_str("path = \"/tmp/audit.db\"").unwrap();
    assert_eq!(config.busy_timeout_ms, 5_000);
    assert_eq!(config.journal_mode, SqliteJournalMode::Wal);
    assert_eq!(config.sync_mode, SqliteSyncMode::Full);
}
