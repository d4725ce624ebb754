// crates/mediator-core/src/core/time.rs
// ============================================================================
// Module: Wall-Clock Helpers
// Description: RFC 3339 timestamps and unix millisecond clocks.
// Purpose: Keep every timestamp in the mediator in one format.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Envelopes carry RFC 3339 UTC timestamps as signed text. Audit events carry
//! both the text form and unix milliseconds; rolling quota windows are
//! computed on the millisecond form.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Returns the current UTC time formatted as RFC 3339.
#[must_use]
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

/// Returns the current unix epoch in milliseconds.
#[must_use]
pub fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}

/// Returns true when `value` is a well-formed RFC 3339 timestamp.
#[must_use]
pub fn is_rfc3339(value: &str) -> bool {
    OffsetDateTime::parse(value, &Rfc3339).is_ok()
}
