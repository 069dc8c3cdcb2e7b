//! DeploymentGate: the only path from a template to the control plane.
//!
//! Every apply attempt is validated and audited first. A blocking result
//! never reaches [`ControlPlane::apply_rule_set`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use fleetguard_ledger::{AuditEvent, AuditEventType, AuditLogger, Outcome};
use fleetguard_policy::{RuleSetDiff, TemplateValidator};
use fleetguard_types::{FleetGuardError, RuleSet, Severity, ValidationResult};

/// Cloud API that owns the live rule sets.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Fetch the rule set currently applied to `resource_id`.
    async fn describe_resource(&self, resource_id: &str) -> Result<RuleSet, FleetGuardError>;

    async fn apply_rule_set(&self, resource_id: &str, rules: &RuleSet) -> Result<(), FleetGuardError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    Apply,
    /// Validate and audit, but leave the live rules untouched.
    DryRun,
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub result: ValidationResult,
    /// True only when the control plane accepted the rule set.
    pub applied: bool,
    /// False when the validation event could not be written. The template
    /// is then held back even if it passed.
    pub audited: bool,
}

impl ApplyOutcome {
    pub fn blocked(&self) -> bool {
        self.result.blocking()
    }
}

pub struct DeploymentGate {
    validator: TemplateValidator,
    audit: Arc<AuditLogger>,
    plane: Arc<dyn ControlPlane>,
}

impl DeploymentGate {
    pub fn new(validator: TemplateValidator, audit: Arc<AuditLogger>, plane: Arc<dyn ControlPlane>) -> Self {
        Self {
            validator,
            audit,
            plane,
        }
    }

    pub fn validator(&self) -> &TemplateValidator {
        &self.validator
    }

    /// Validate `template` and, if nothing blocks it, push it to `resource_id`.
    ///
    /// Policy violations come back inside the outcome; `Err` means the
    /// control-plane call itself failed. An audit write failure is counted
    /// by the logger and reported through [`ApplyOutcome::audited`]; a
    /// template is never applied unless its validation event was persisted.
    pub async fn apply(
        &self,
        resource_id: &str,
        template: &RuleSet,
        mode: ApplyMode,
    ) -> Result<ApplyOutcome, FleetGuardError> {
        let result = self.validator.validate(template);
        let template_ref = template.reference().to_string();

        let audited = self.audit.record(
            self.event(AuditEventType::TemplateValidation, resource_id, "validate")
                .with_outcome(if result.blocking() {
                    Outcome::Failure
                } else {
                    Outcome::Success
                })
                .with_severity(highest_severity(&result))
                .with_detail("template", &template_ref)
                .with_detail("findings", result.findings.len())
                .with_detail("blocking", result.blocking()),
        );

        if result.blocking() {
            let finding_ids: Vec<&str> = result
                .findings_at_least(Severity::Critical)
                .map(|f| f.id.as_str())
                .collect();
            warn!(
                resource = resource_id,
                template = %template_ref,
                findings = ?finding_ids,
                "apply blocked by critical findings"
            );
            self.audit.record(
                self.event(AuditEventType::ApplyBlocked, resource_id, "apply")
                    .with_outcome(Outcome::Denied)
                    .with_severity(Severity::Critical)
                    .with_detail("template", &template_ref)
                    .with_detail("findings", finding_ids.join(",")),
            );
            return Ok(ApplyOutcome {
                result,
                applied: false,
                audited,
            });
        }

        if mode == ApplyMode::DryRun {
            info!(resource = resource_id, template = %template_ref, "dry run: template passed validation");
            return Ok(ApplyOutcome {
                result,
                applied: false,
                audited,
            });
        }

        if !audited {
            warn!(
                resource = resource_id,
                template = %template_ref,
                "validation event not persisted; holding template back"
            );
            return Ok(ApplyOutcome {
                result,
                applied: false,
                audited,
            });
        }

        let applied = self.plane.apply_rule_set(resource_id, template).await;
        let mut event = self
            .event(AuditEventType::TemplateApplied, resource_id, "apply")
            .with_detail("template", &template_ref)
            .with_detail("rules", template.rules.len());
        if let Err(e) = &applied {
            event = event
                .with_outcome(Outcome::Failure)
                .with_severity(Severity::High)
                .with_detail("error", e);
        }
        self.audit.record(event);
        applied?;

        info!(resource = resource_id, template = %template_ref, "template applied");
        Ok(ApplyOutcome {
            result,
            applied: true,
            audited,
        })
    }

    /// Compare `template` with what is live on `resource_id`.
    pub async fn drift(&self, resource_id: &str, template: &RuleSet) -> Result<RuleSetDiff, FleetGuardError> {
        let live = self.plane.describe_resource(resource_id).await?;
        let template_ref = template.reference().to_string();
        let diff = self.validator.diff(template, &live);
        if !diff.is_empty() {
            warn!(
                resource = resource_id,
                added = diff.added.len(),
                removed = diff.removed.len(),
                modified = diff.modified.len(),
                "live rules drifted from template"
            );
            self.audit.record(
                self.event(AuditEventType::DriftDetected, resource_id, "describe")
                    .with_outcome(Outcome::Failure)
                    .with_severity(Severity::Medium)
                    .with_detail("template", &template_ref)
                    .with_detail("added", diff.added.len())
                    .with_detail("removed", diff.removed.len())
                    .with_detail("modified", diff.modified.len()),
            );
        }
        Ok(diff)
    }

    fn event(&self, event_type: AuditEventType, resource_id: &str, action: &str) -> AuditEvent {
        AuditEvent::new(event_type, self.audit.actor(), resource_id, action)
    }
}

fn highest_severity(result: &ValidationResult) -> Severity {
    result
        .findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(Severity::Info)
}
