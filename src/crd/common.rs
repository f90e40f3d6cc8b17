//! # Common Status Helpers
//!
//! Pieces shared by the Bucket and Asset status types.

use chrono::{DateTime, Utc};
use schemars::{json_schema, Schema, SchemaGenerator};

/// Read-only view over the progress markers of a status
///
/// The reconciler uses this to decide whether a freshly computed status
/// differs from the stored one and to describe it in logs and metrics.
pub trait PhaseStatus {
    /// Generation the status was computed for
    fn observed_generation(&self) -> i64;
    /// Phase as it appears on the wire (empty when unset)
    fn phase_str(&self) -> &str;
    /// Reason code as it appears on the wire (empty when unset)
    fn reason(&self) -> &str;

    /// `true` when generation, phase and reason all match `other`
    fn same_progress_as(&self, other: &Self) -> bool {
        self.observed_generation() == other.observed_generation()
            && self.phase_str() == other.phase_str()
            && self.reason() == other.reason()
    }
}

/// Parse an RFC3339 heartbeat into UTC
///
/// A missing or malformed value yields `None`, which callers treat as "long ago".
#[must_use]
pub fn parse_heartbeat(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a heartbeat the way it is persisted in status
#[must_use]
pub fn format_heartbeat(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// `true` when `now` is past `heartbeat + interval` (or there is no heartbeat)
#[must_use]
pub fn is_past_relist(
    heartbeat: Option<&str>,
    now: DateTime<Utc>,
    interval: std::time::Duration,
) -> bool {
    let Some(last) = parse_heartbeat(heartbeat) else {
        return true;
    };
    let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::zero());
    now > last + interval
}

/// Schema for free-form JSON kept verbatim by the API server
pub(crate) fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    })
}
