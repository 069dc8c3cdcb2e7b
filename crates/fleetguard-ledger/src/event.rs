//! AuditEvent: a single checksummed audit record.
//!
//! The checksum is `hex(SHA-256(json(event without checksum)))`. Field order
//! is fixed by the canonical struct below and `details` is a sorted map, so
//! the serialization is stable across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use fleetguard_types::{FleetGuardError, Severity};

/// What kind of decision or lifecycle transition an event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TemplateValidation,
    TemplateApplied,
    ApplyBlocked,
    DriftDetected,
    TunnelCreated,
    TunnelReused,
    TunnelReleased,
    TunnelClosed,
    TunnelEvicted,
    TunnelExpired,
    TunnelRejected,
    TunnelCreationFailed,
    PoolExhausted,
    AcquireTimeout,
    IntegrityCheck,
    LogBackup,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 16] = [
        AuditEventType::TemplateValidation,
        AuditEventType::TemplateApplied,
        AuditEventType::ApplyBlocked,
        AuditEventType::DriftDetected,
        AuditEventType::TunnelCreated,
        AuditEventType::TunnelReused,
        AuditEventType::TunnelReleased,
        AuditEventType::TunnelClosed,
        AuditEventType::TunnelEvicted,
        AuditEventType::TunnelExpired,
        AuditEventType::TunnelRejected,
        AuditEventType::TunnelCreationFailed,
        AuditEventType::PoolExhausted,
        AuditEventType::AcquireTimeout,
        AuditEventType::IntegrityCheck,
        AuditEventType::LogBackup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::TemplateValidation => "template_validation",
            AuditEventType::TemplateApplied => "template_applied",
            AuditEventType::ApplyBlocked => "apply_blocked",
            AuditEventType::DriftDetected => "drift_detected",
            AuditEventType::TunnelCreated => "tunnel_created",
            AuditEventType::TunnelReused => "tunnel_reused",
            AuditEventType::TunnelReleased => "tunnel_released",
            AuditEventType::TunnelClosed => "tunnel_closed",
            AuditEventType::TunnelEvicted => "tunnel_evicted",
            AuditEventType::TunnelExpired => "tunnel_expired",
            AuditEventType::TunnelRejected => "tunnel_rejected",
            AuditEventType::TunnelCreationFailed => "tunnel_creation_failed",
            AuditEventType::PoolExhausted => "pool_exhausted",
            AuditEventType::AcquireTimeout => "acquire_timeout",
            AuditEventType::IntegrityCheck => "integrity_check",
            AuditEventType::LogBackup => "log_backup",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = FleetGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| FleetGuardError::Schema(format!("unknown audit event type: {s}")))
    }
}

/// Result of the audited operation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Success,
    Failure,
    Denied,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::Failure => write!(f, "failure"),
            Outcome::Denied => write!(f, "denied"),
        }
    }
}

impl FromStr for Outcome {
    type Err = FleetGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            "denied" => Ok(Outcome::Denied),
            other => Err(FleetGuardError::Schema(format!("unknown outcome: {other}"))),
        }
    }
}

/// A single record in the audit log.
///
/// Never mutated once appended. A nil `event_id` is replaced with a fresh
/// one when the event is logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: String,
    pub resource: String,
    pub action: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    pub severity: Severity,
    #[serde(default)]
    pub compliance_tags: Vec<String>,
    #[serde(default)]
    pub checksum: String,
}

/// Every field except `checksum`, in a fixed order.
#[derive(Serialize)]
struct Canonical<'a> {
    event_id: &'a Uuid,
    timestamp: &'a DateTime<Utc>,
    event_type: &'a AuditEventType,
    actor: &'a str,
    resource: &'a str,
    action: &'a str,
    outcome: &'a Outcome,
    details: &'a BTreeMap<String, String>,
    severity: &'a Severity,
    compliance_tags: &'a [String],
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        actor: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            event_id: Uuid::nil(),
            timestamp: Utc::now(),
            event_type,
            actor: actor.into(),
            resource: resource.into(),
            action: action.into(),
            outcome: Outcome::Success,
            details: BTreeMap::new(),
            severity: Severity::Info,
            compliance_tags: Vec::new(),
            checksum: String::new(),
        }
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compliance_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Recompute the checksum from the current field values.
    pub fn compute_checksum(&self) -> Result<String, FleetGuardError> {
        let canonical = Canonical {
            event_id: &self.event_id,
            timestamp: &self.timestamp,
            event_type: &self.event_type,
            actor: &self.actor,
            resource: &self.resource,
            action: &self.action,
            outcome: &self.outcome,
            details: &self.details,
            severity: &self.severity,
            compliance_tags: &self.compliance_tags,
        };
        let bytes = serde_json::to_vec(&canonical)
            .map_err(|e| FleetGuardError::Ledger(format!("failed to canonicalize event: {e}")))?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Whether the stored checksum matches the fields.
    pub fn verify_checksum(&self) -> bool {
        self.compute_checksum()
            .is_ok_and(|computed| computed == self.checksum)
    }
}
