//! Predicate-based policy engine for ACL templates.
//!
//! The engine holds two ordered registries: forbidden checks, which are
//! applied to every rule, and required checks, which are applied once to the
//! whole rule set. Evaluation is pure and has no hidden state, so the same
//! input always yields the same findings in the same order.

use fleetguard_types::{Finding, RuleSet, SecurityRule, Severity, ValidationConfig};

use crate::builtin;

/// A boolean test over some subject (a rule or a rule set).
///
/// Implemented for every `Fn(&T) -> bool` closure, so registrations can
/// pass plain closures or dedicated types.
pub trait Predicate<T: ?Sized>: Send + Sync {
    fn evaluate(&self, subject: &T) -> bool;
}

impl<T: ?Sized, F> Predicate<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn evaluate(&self, subject: &T) -> bool {
        self(subject)
    }
}

/// Identity and reporting text shared by every finding a check emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckMeta {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub remediation: String,
    pub compliance_tags: Vec<String>,
}

impl CheckMeta {
    pub fn new(id: impl Into<String>, severity: Severity, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            severity,
            message: title.clone(),
            title,
            remediation: String::new(),
            compliance_tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
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
}

/// A check that must not match any single rule.
pub struct ForbiddenCheck {
    pub meta: CheckMeta,
    predicate: Box<dyn Predicate<SecurityRule>>,
}

impl ForbiddenCheck {
    fn finding_for(&self, rule: &SecurityRule) -> Finding {
        Finding {
            id: format!("{}:{}", self.meta.id, rule.name),
            severity: self.meta.severity,
            title: self.meta.title.clone(),
            description: format!(
                "{} (rule '{}', priority {})",
                self.meta.message, rule.name, rule.priority
            ),
            remediation: self.meta.remediation.clone(),
            compliance_tags: self.meta.compliance_tags.clone(),
            rule: Some(rule.name.clone()),
        }
    }
}

/// A check that must hold for the rule set as a whole.
pub struct RequiredCheck {
    pub meta: CheckMeta,
    predicate: Box<dyn Predicate<RuleSet>>,
}

impl RequiredCheck {
    fn finding(&self) -> Finding {
        Finding {
            id: self.meta.id.clone(),
            severity: self.meta.severity,
            title: self.meta.title.clone(),
            description: self.meta.message.clone(),
            remediation: self.meta.remediation.clone(),
            compliance_tags: self.meta.compliance_tags.clone(),
            rule: None,
        }
    }
}

/// Registry of forbidden and required checks.
#[derive(Default)]
pub struct PolicyEngine {
    forbidden: Vec<ForbiddenCheck>,
    required: Vec<RequiredCheck>,
}

impl PolicyEngine {
    /// An engine with no checks registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine with the built-in checks for the given validation settings.
    pub fn with_builtins(config: &ValidationConfig) -> Self {
        let mut engine = Self::new();
        builtin::register_defaults(&mut engine, config);
        engine
    }

    /// Register a check applied to every rule; a match produces a finding.
    ///
    /// Registering an id that already exists replaces that check in place,
    /// keeping its position in the evaluation order.
    pub fn register_forbidden_rule<P>(&mut self, meta: CheckMeta, predicate: P)
    where
        P: Predicate<SecurityRule> + 'static,
    {
        let check = ForbiddenCheck {
            meta,
            predicate: Box::new(predicate),
        };
        match self.forbidden.iter_mut().find(|c| c.meta.id == check.meta.id) {
            Some(existing) => {
                tracing::warn!(check_id = %check.meta.id, "replacing forbidden check");
                *existing = check;
            }
            None => self.forbidden.push(check),
        }
    }

    /// Register a check applied once per rule set; `false` produces a finding.
    ///
    /// Same replace-in-place semantics as [`register_forbidden_rule`](Self::register_forbidden_rule).
    pub fn register_required_rule<P>(&mut self, meta: CheckMeta, predicate: P)
    where
        P: Predicate<RuleSet> + 'static,
    {
        let check = RequiredCheck {
            meta,
            predicate: Box::new(predicate),
        };
        match self.required.iter_mut().find(|c| c.meta.id == check.meta.id) {
            Some(existing) => {
                tracing::warn!(check_id = %check.meta.id, "replacing required check");
                *existing = check;
            }
            None => self.required.push(check),
        }
    }

    /// Evaluate every check against the rule set.
    ///
    /// Forbidden checks run rule by rule in declaration order, then the
    /// required checks run once each, both in registration order.
    pub fn evaluate(&self, rule_set: &RuleSet) -> Vec<Finding> {
        let mut findings = Vec::new();

        for rule in &rule_set.rules {
            for check in &self.forbidden {
                if check.predicate.evaluate(rule) {
                    findings.push(check.finding_for(rule));
                }
            }
        }

        for check in &self.required {
            if !check.predicate.evaluate(rule_set) {
                findings.push(check.finding());
            }
        }

        tracing::debug!(
            rule_set = %rule_set.reference(),
            rules = rule_set.rules.len(),
            findings = findings.len(),
            "policy evaluation complete"
        );
        findings
    }

    /// Ids of all registered checks, forbidden first, in evaluation order.
    pub fn check_ids(&self) -> Vec<&str> {
        self.forbidden
            .iter()
            .map(|c| c.meta.id.as_str())
            .chain(self.required.iter().map(|c| c.meta.id.as_str()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.forbidden.len() + self.required.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
