//! Gate decision for whether a template may be applied.
//!
//! [`TemplateValidator::validate`] runs structural schema checks first. Any
//! structural problem short-circuits into a single `critical` finding and
//! the policy engine is skipped; otherwise the engine's findings decide.
//!
//! The validator has no authority over what callers do with the result.
//! Callers must never pass a blocking rule set to the control plane's apply
//! operation; `fleetguard::DeploymentGate` is the boundary that does this.

use std::collections::HashMap;
use std::path::Path;

use fleetguard_types::{
    AddressRange, Finding, FleetGuardError, RuleSet, Severity, ValidationConfig, ValidationResult,
};

use crate::diff::{self, RuleSetDiff};
use crate::engine::PolicyEngine;

/// Finding id used for structural failures.
pub const SCHEMA_INVALID: &str = "schema-invalid";

pub struct TemplateValidator {
    engine: PolicyEngine,
    config: ValidationConfig,
}

impl Default for TemplateValidator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl TemplateValidator {
    /// A validator using the built-in checks.
    pub fn new(config: ValidationConfig) -> Self {
        Self {
            engine: PolicyEngine::with_builtins(&config),
            config,
        }
    }

    /// A validator using a caller-assembled engine.
    pub fn with_engine(engine: PolicyEngine, config: ValidationConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut PolicyEngine {
        &mut self.engine
    }

    pub fn validate(&self, template: &RuleSet) -> ValidationResult {
        let problems = self.schema_problems(template);
        if !problems.is_empty() {
            tracing::info!(
                rule_set = %template.reference(),
                problems = problems.len(),
                "template failed schema validation"
            );
            return ValidationResult::new(template.reference(), vec![schema_finding(&problems)]);
        }

        let result = ValidationResult::new(template.reference(), self.engine.evaluate(template));
        tracing::info!(
            rule_set = %result.rule_set,
            findings = result.findings.len(),
            blocking = result.blocking(),
            "template validated"
        );
        result
    }

    /// Parse a template file and validate it.
    ///
    /// Only a document that cannot be parsed at all is an error; every other
    /// problem comes back as a finding.
    pub fn validate_file(&self, path: &Path) -> Result<ValidationResult, FleetGuardError> {
        let template = RuleSet::load(path)?;
        Ok(self.validate(&template))
    }

    /// Structural problems, in rule order. Empty means the template is well formed.
    pub fn schema_problems(&self, template: &RuleSet) -> Vec<String> {
        let mut problems = Vec::new();

        if template.name.trim().is_empty() {
            problems.push("template name is empty".to_string());
        }
        if template.version.trim().is_empty() {
            problems.push("template version is empty".to_string());
        }

        let mut names: HashMap<&str, usize> = HashMap::new();
        let mut priorities: HashMap<u32, &str> = HashMap::new();
        let (min, max) = (self.config.min_priority, self.config.max_priority);

        for (index, rule) in template.rules.iter().enumerate() {
            let label = if rule.name.trim().is_empty() {
                problems.push(format!("rule #{index} has an empty name"));
                format!("#{index}")
            } else {
                rule.name.clone()
            };

            if let Some(first) = names.insert(rule.name.as_str(), index) {
                if !rule.name.trim().is_empty() {
                    problems.push(format!(
                        "duplicate rule name '{}' (rules #{first} and #{index})",
                        rule.name
                    ));
                }
            }

            if let Some(other) = priorities.insert(rule.priority, rule.name.as_str()) {
                problems.push(format!(
                    "duplicate priority {} (rules '{other}' and '{label}')",
                    rule.priority
                ));
            }

            if rule.priority < min || rule.priority > max {
                problems.push(format!(
                    "rule '{label}' priority {} is outside [{min}, {max}]",
                    rule.priority
                ));
            }

            for (field, ports) in [
                ("source_ports", &rule.source_ports),
                ("destination_ports", &rule.destination_ports),
            ] {
                if ports.is_inverted() {
                    problems.push(format!("rule '{label}' {field} range {ports} is inverted"));
                }
            }

            for (field, range) in [("source", &rule.source), ("destination", &rule.destination)] {
                if let AddressRange::Cidr(ip, prefix) = range {
                    if *prefix > AddressRange::max_prefix(ip) {
                        problems.push(format!(
                            "rule '{label}' {field} prefix /{prefix} is too long for {ip}"
                        ));
                    }
                }
            }
        }

        problems
    }

    /// Compare a template with a live rule set. See [`diff::diff`].
    pub fn diff(&self, template: &RuleSet, live: &RuleSet) -> RuleSetDiff {
        diff::diff(template, live)
    }

    /// Capture a live rule set as a template. See [`diff::generate_template`].
    pub fn generate_template(&self, live: &RuleSet) -> RuleSet {
        diff::generate_template(live)
    }
}

fn schema_finding(problems: &[String]) -> Finding {
    Finding {
        id: SCHEMA_INVALID.to_string(),
        severity: Severity::Critical,
        title: "template failed schema validation".to_string(),
        description: problems.join("; "),
        remediation: "Fix the listed structural problems; policy checks only run on \
                      structurally valid templates"
            .to_string(),
        compliance_tags: vec!["schema".to_string()],
        rule: None,
    }
}
