//! ACL template commands: `validate`, `diff`, and `generate`.

use std::path::Path;

use anyhow::{Context, Result};

use fleetguard_policy::{RuleSetDiff, TemplateValidator};
use fleetguard_types::{FleetGuardConfig, RuleSet, Severity, ValidationResult};

/// Run `fleetguard template validate --path FILE`.
///
/// Prints every critical and high finding with its remediation. Exits with
/// status 1 when the template must not be deployed.
pub fn validate(path: &Path, config: &FleetGuardConfig, json: bool) -> Result<()> {
    let validator = TemplateValidator::new(config.validation.clone());
    let result = validator
        .validate_file(path)
        .with_context(|| format!("failed to load template {}", path.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        );
    } else {
        print_result(&result);
    }

    if result.blocking() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_result(result: &ValidationResult) {
    let verdict = if result.blocking() { "BLOCKED" } else { "PASSED" };
    println!("{verdict}: {} ({} findings)", result.rule_set, result.findings.len());

    for finding in result.findings_at_least(Severity::High) {
        println!();
        println!("  [{}] {}", finding.severity, finding.title);
        println!("    id:          {}", finding.id);
        if let Some(rule) = &finding.rule {
            println!("    rule:        {rule}");
        }
        println!("    detail:      {}", finding.description);
        println!("    remediation: {}", finding.remediation);
        if !finding.compliance_tags.is_empty() {
            println!("    controls:    {}", finding.compliance_tags.join(", "));
        }
    }

    let minor = result.count(Severity::Medium) + result.count(Severity::Low) + result.count(Severity::Info);
    if minor > 0 {
        println!();
        println!("  {minor} lower-severity finding(s) not shown (use --json for all)");
    }
}

/// Run `fleetguard template diff --template FILE --live FILE`.
pub fn diff(template_path: &Path, live_path: &Path) -> Result<()> {
    let template = load(template_path)?;
    let live = load(live_path)?;
    let diff = fleetguard_policy::diff::diff(&template, &live);
    print_diff(&diff);
    Ok(())
}

fn print_diff(diff: &RuleSetDiff) {
    if diff.is_empty() {
        println!("No drift: live rules match the template.");
        return;
    }
    for rule in &diff.added {
        println!("+ {} (priority {}, {} {})", rule.name, rule.priority, rule.direction, rule.action);
    }
    for rule in &diff.removed {
        println!("- {} (priority {}, {} {})", rule.name, rule.priority, rule.direction, rule.action);
    }
    for change in &diff.modified {
        println!("~ {} [{}]", change.name, change.fields.join(", "));
    }
    println!();
    println!(
        "{} added, {} removed, {} modified",
        diff.added.len(),
        diff.removed.len(),
        diff.modified.len()
    );
}

/// Run `fleetguard template generate --live FILE [--toml]`.
///
/// Writes a template reproducing the live rules to stdout.
pub fn generate(live_path: &Path, toml: bool) -> Result<()> {
    let live = load(live_path)?;
    let template = fleetguard_policy::generate_template(&live);
    let rendered = if toml {
        template.to_toml()
    } else {
        template.to_json()
    }
    .context("failed to serialize generated template")?;
    println!("{rendered}");
    Ok(())
}

fn load(path: &Path) -> Result<RuleSet> {
    RuleSet::load(path).with_context(|| format!("failed to load rule set {}", path.display()))
}
