//! Drift detection between a template and the live state of a resource.
//!
//! Rules are matched by name. `added` are rules present live but absent from
//! the template; `removed` are the reverse.

use std::collections::{HashMap, HashSet};

use fleetguard_types::{RuleSet, SecurityRule};
use serde::Serialize;

/// Metadata key recording which live rule set a generated template came from.
pub const GENERATED_FROM: &str = "generated_from";

/// Version stamped on generated templates.
pub const GENERATED_VERSION: &str = "generated";

/// A rule present on both sides whose contents differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleChange {
    pub name: String,
    pub template: SecurityRule,
    pub live: SecurityRule,
    /// Names of the fields that differ, in declaration order.
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleSetDiff {
    pub added: Vec<SecurityRule>,
    pub removed: Vec<SecurityRule>,
    pub modified: Vec<RuleChange>,
    /// Rule names in live declaration order. Used by [`reconcile`] to
    /// reproduce the live ordering; not considered drift on its own.
    #[serde(skip)]
    pub live_order: Vec<String>,
}

impl RuleSetDiff {
    /// No added, removed, or modified rules. Ordering alone is not drift.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Total number of differing rules.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

/// Compare `template` against `live`.
///
/// `added` and `modified` follow live order; `removed` follows template order.
pub fn diff(template: &RuleSet, live: &RuleSet) -> RuleSetDiff {
    let wanted: HashMap<&str, &SecurityRule> =
        template.rules.iter().map(|r| (r.name.as_str(), r)).collect();
    let present: HashSet<&str> = live.rules.iter().map(|r| r.name.as_str()).collect();

    let mut out = RuleSetDiff {
        live_order: live.rules.iter().map(|r| r.name.clone()).collect(),
        ..RuleSetDiff::default()
    };
    for rule in &live.rules {
        match wanted.get(rule.name.as_str()) {
            None => out.added.push(rule.clone()),
            Some(expected) => {
                let fields = changed_fields(expected, rule);
                if !fields.is_empty() {
                    out.modified.push(RuleChange {
                        name: rule.name.clone(),
                        template: (*expected).clone(),
                        live: rule.clone(),
                        fields,
                    });
                }
            }
        }
    }
    out.removed = template
        .rules
        .iter()
        .filter(|r| !present.contains(r.name.as_str()))
        .cloned()
        .collect();

    tracing::debug!(
        template = %template.reference(),
        live = %live.reference(),
        added = out.added.len(),
        removed = out.removed.len(),
        modified = out.modified.len(),
        "rule set diff computed"
    );
    out
}

fn changed_fields(a: &SecurityRule, b: &SecurityRule) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if a.priority != b.priority {
        fields.push("priority");
    }
    if a.direction != b.direction {
        fields.push("direction");
    }
    if a.action != b.action {
        fields.push("action");
    }
    if a.protocol != b.protocol {
        fields.push("protocol");
    }
    if a.source != b.source {
        fields.push("source");
    }
    if a.destination != b.destination {
        fields.push("destination");
    }
    if a.source_ports != b.source_ports {
        fields.push("source_ports");
    }
    if a.destination_ports != b.destination_ports {
        fields.push("destination_ports");
    }
    if a.justification != b.justification {
        fields.push("justification");
    }
    fields
}

/// Apply a diff to a template, producing the rule set it describes as live.
///
/// The result keeps the template's name, version, and metadata. Rules follow
/// the live declaration order recorded in the diff; rules the diff does not
/// place keep template order, followed by added rules.
pub fn reconcile(template: &RuleSet, diff: &RuleSetDiff) -> RuleSet {
    let removed: HashSet<&str> = diff.removed.iter().map(|r| r.name.as_str()).collect();
    let modified: HashMap<&str, &SecurityRule> = diff
        .modified
        .iter()
        .map(|c| (c.name.as_str(), &c.live))
        .collect();

    let mut unplaced: Vec<SecurityRule> = template
        .rules
        .iter()
        .filter(|r| !removed.contains(r.name.as_str()))
        .map(|r| match modified.get(r.name.as_str()) {
            Some(live) => (*live).clone(),
            None => r.clone(),
        })
        .collect();
    unplaced.extend(diff.added.iter().cloned());

    let mut rules = Vec::with_capacity(unplaced.len());
    for name in &diff.live_order {
        if let Some(pos) = unplaced.iter().position(|r| &r.name == name) {
            rules.push(unplaced.remove(pos));
        }
    }
    rules.extend(unplaced);

    RuleSet {
        name: template.name.clone(),
        version: template.version.clone(),
        metadata: template.metadata.clone(),
        rules,
    }
}

/// Capture a live rule set as a new template, keeping its rule order.
pub fn generate_template(live: &RuleSet) -> RuleSet {
    let mut template = RuleSet::new(live.name.clone(), GENERATED_VERSION)
        .with_metadata(GENERATED_FROM, live.reference().to_string());
    template.rules = live.rules.clone();
    template
}
