//! Integration tests for template validation and drift handling.
//!
//! Exercises the policy crate through the façade: built-in checks, custom
//! checks, schema short-circuiting, and the diff/reconcile/generate laws.

mod common;

use std::io::Write;

use tempfile::NamedTempFile;

use fleetguard::policy::builtin::{MANAGEMENT_PORT_EXPOSED, MISSING_INBOUND_DENY_DEFAULT};
use fleetguard::policy::{generate_template, reconcile, CheckMeta, TemplateValidator, SCHEMA_INVALID};
use fleetguard::types::{
    AddressRange, Direction, PortRange, Protocol, RuleAction, RuleSet, SecurityRule, Severity,
    ValidationConfig,
};

use common::{allow_inbound, https_with_deny_default, open_ssh_without_deny_default};

#[test]
fn test_https_with_deny_default_passes_cleanly() {
    let result = TemplateValidator::default().validate(&https_with_deny_default());
    assert!(!result.blocking());
    assert!(result.findings.is_empty(), "unexpected findings: {:?}", result.findings);
}

#[test]
fn test_open_ssh_reports_exposure_and_missing_deny_default() {
    let result = TemplateValidator::default().validate(&open_ssh_without_deny_default());
    assert!(result.blocking());
    assert_eq!(result.findings.len(), 2, "findings: {:?}", result.findings);

    let ssh = &result.findings[0];
    assert_eq!(ssh.id, format!("{MANAGEMENT_PORT_EXPOSED}:allow-ssh"));
    assert_eq!(ssh.severity, Severity::Critical);
    assert!(!ssh.remediation.is_empty());

    let deny = &result.findings[1];
    assert_eq!(deny.id, MISSING_INBOUND_DENY_DEFAULT);
    assert_eq!(deny.severity, Severity::High);
}

#[test]
fn test_evaluation_is_repeatable() {
    let validator = TemplateValidator::default();
    let template = open_ssh_without_deny_default().with_rule(allow_inbound("allow-rdp", 110, 3389));
    let first = validator.validate(&template);
    let second = validator.validate(&template);
    assert_eq!(first, second);
}

#[test]
fn test_blocking_tracks_critical_findings_only() {
    let validator = TemplateValidator::default();
    let templates = [
        https_with_deny_default(),
        open_ssh_without_deny_default(),
        RuleSet::new("db", "1")
            .with_rule(allow_inbound("allow-pg", 100, 5432))
            .with_rule(SecurityRule::deny_all("deny-in", 4096, Direction::Inbound)),
        RuleSet::new("no-default", "1").with_rule(allow_inbound("allow-https", 100, 443)),
    ];
    for template in &templates {
        let result = validator.validate(template);
        let has_critical = result.findings.iter().any(|f| f.severity == Severity::Critical);
        assert_eq!(result.blocking(), has_critical, "template {}", template.name);
    }
}

#[test]
fn test_duplicate_priority_short_circuits_as_schema_failure() {
    let template = https_with_deny_default().with_rule(allow_inbound("allow-http", 100, 80));
    let result = TemplateValidator::default().validate(&template);
    assert!(result.blocking());
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].id, SCHEMA_INVALID);
    assert!(result.findings[0].description.contains("priority 100"));
}

#[test]
fn test_custom_forbidden_check_runs_after_builtins() {
    let mut validator = TemplateValidator::new(ValidationConfig::default());
    validator.engine_mut().register_forbidden_rule(
        CheckMeta::new("no-telnet", Severity::Critical, "Telnet allowed")
            .with_remediation("Use SSH through the bastion instead.")
            .with_tags(["CIS-9.2"]),
        |rule: &SecurityRule| {
            rule.action == RuleAction::Allow && rule.destination_ports.covers(23)
        },
    );

    let template = https_with_deny_default().with_rule(
        SecurityRule::new("allow-telnet", 200, Direction::Inbound, RuleAction::Allow)
            .with_source(AddressRange::Cidr("10.0.0.0".parse().unwrap(), 8))
            .with_destination_ports(PortRange::Single(23)),
    );
    let result = validator.validate(&template);
    assert!(result.blocking());
    assert_eq!(result.findings.len(), 1);
    assert_eq!(result.findings[0].id, "no-telnet:allow-telnet");
    assert_eq!(result.findings[0].compliance_tags, vec!["CIS-9.2".to_string()]);
}

#[test]
fn test_validate_file_reads_toml_templates() {
    let mut file = NamedTempFile::with_suffix(".toml").expect("should create temp template");
    let toml = https_with_deny_default().to_toml().expect("should render template");
    file.write_all(toml.as_bytes()).expect("should write template");

    let result = TemplateValidator::default()
        .validate_file(file.path())
        .expect("should load template");
    assert!(result.passed());
    assert_eq!(result.rule_set.name, "web-tier");
}

#[test]
fn test_malformed_document_is_a_schema_error() {
    let mut file = NamedTempFile::with_suffix(".json").expect("should create temp template");
    file.write_all(br#"{"name": "x", "version": "1", "rules": [{"name": "r", "priority": 100, "direction": "sideways", "action": "allow"}]}"#)
        .expect("should write template");
    let err = TemplateValidator::default().validate_file(file.path()).unwrap_err();
    assert!(err.to_string().starts_with("schema error"), "got: {err}");
}

#[test]
fn test_reconciled_diff_regenerates_live_rules() {
    let template = https_with_deny_default();
    let live = RuleSet::new("web-tier-live", "prod")
        .with_rule(allow_inbound("allow-http", 90, 80))
        .with_rule(allow_inbound("allow-https", 100, 8443))
        .with_rule(SecurityRule::deny_all("deny-all-inbound", 4000, Direction::Inbound));

    let validator = TemplateValidator::default();
    let diff = validator.diff(&template, &live);
    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.modified.len(), 2);
    assert!(diff.removed.is_empty());

    let reconciled = reconcile(&template, &diff);
    assert_eq!(reconciled.name, template.name);
    assert!(validator.diff(&reconciled, &live).is_empty());

    let generated = generate_template(&reconciled);
    assert_eq!(generated.rules, live.rules);
}

#[test]
fn test_round_trip_keeps_live_order_not_sorted_by_priority() {
    let template = https_with_deny_default();
    let live = RuleSet::new("web-tier-live", "prod")
        .with_rule(SecurityRule::deny_all("deny-all-inbound", 4096, Direction::Inbound))
        .with_rule(allow_inbound("allow-https", 100, 443))
        .with_rule(allow_inbound("allow-http", 90, 80));

    let validator = TemplateValidator::default();
    let diff = validator.diff(&template, &live);
    let generated = generate_template(&reconcile(&template, &diff));

    let names: Vec<_> = generated.rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["deny-all-inbound", "allow-https", "allow-http"]);
    assert_eq!(generated.rules, live.rules);
}

#[test]
fn test_udp_rdp_from_anywhere_blocks_deployment() {
    let template = https_with_deny_default().with_rule(
        allow_inbound("allow-rdp-udp", 110, 3389).with_protocol(Protocol::Udp),
    );
    let result = TemplateValidator::default().validate(&template);
    assert!(result.blocking());
    assert_eq!(result.findings.len(), 1, "findings: {:?}", result.findings);
    assert_eq!(result.findings[0].id, format!("{MANAGEMENT_PORT_EXPOSED}:allow-rdp-udp"));
}
