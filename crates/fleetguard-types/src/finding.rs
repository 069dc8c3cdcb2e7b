use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::rule::RuleSetRef;
use crate::FleetGuardError;

/// How serious a policy finding or audit event is.
///
/// Ordered from least to most severe so `>=` comparisons read naturally.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = FleetGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(FleetGuardError::Schema(format!(
                "unknown severity '{other}'; expected one of info, low, medium, high, critical"
            ))),
        }
    }
}

/// A single policy-evaluation result with remediation guidance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    /// Stable identifier: the check id, suffixed with the rule name for
    /// per-rule checks (e.g. `management-port-exposed:ssh`).
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub remediation: String,
    #[serde(default)]
    pub compliance_tags: Vec<String>,
    /// The rule that triggered the finding, if it concerns a single rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl Finding {
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Outcome of validating one rule set.
///
/// `blocking` is never stored. It is recomputed from `findings` on every
/// call, so it stays true exactly when some finding is critical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub rule_set: RuleSetRef,
    pub findings: Vec<Finding>,
}

impl ValidationResult {
    pub fn new(rule_set: RuleSetRef, findings: Vec<Finding>) -> Self {
        Self { rule_set, findings }
    }

    /// Whether deployment of this rule set must not proceed.
    pub fn blocking(&self) -> bool {
        self.findings.iter().any(Finding::is_blocking)
    }

    pub fn passed(&self) -> bool {
        !self.blocking()
    }

    /// Findings at or above the given severity, in evaluation order.
    pub fn findings_at_least(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.severity >= severity)
    }

    /// Number of findings with exactly the given severity.
    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }
}

impl Serialize for ValidationResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ValidationResult", 3)?;
        state.serialize_field("rule_set", &self.rule_set)?;
        state.serialize_field("findings", &self.findings)?;
        state.serialize_field("blocking", &self.blocking())?;
        state.end()
    }
}
