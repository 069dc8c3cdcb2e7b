//! Composable filter for audit log queries.
//!
//! All criteria are AND-combined. Each `Some` field adds a condition;
//! `None` fields are ignored.

use chrono::{DateTime, Utc};

use fleetguard_types::Severity;

use crate::event::{AuditEvent, AuditEventType, Outcome};

/// Use `Default::default()` for an empty filter (matches everything),
/// then set individual fields to narrow results.
#[derive(Debug, Default, Clone)]
pub struct AuditFilter {
    pub event_type: Option<AuditEventType>,
    pub actor: Option<String>,
    pub resource: Option<String>,
    /// Only events at or after this timestamp.
    pub from: Option<DateTime<Utc>>,
    /// Only events at or before this timestamp.
    pub to: Option<DateTime<Utc>>,
    /// Exact severity.
    pub severity: Option<Severity>,
    /// This severity or worse.
    pub min_severity: Option<Severity>,
    pub outcome: Option<Outcome>,
    /// Maximum number of events to return, counted from the start of the log.
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.map_or(true, |t| event.event_type == t)
            && self.actor.as_deref().map_or(true, |a| event.actor == a)
            && self.resource.as_deref().map_or(true, |r| event.resource == r)
            && self.from.map_or(true, |from| event.timestamp >= from)
            && self.to.map_or(true, |to| event.timestamp <= to)
            && self.severity.map_or(true, |s| event.severity == s)
            && self.min_severity.map_or(true, |s| event.severity >= s)
            && self.outcome.map_or(true, |o| event.outcome == o)
    }
}
