//! Built-in checks registered on every validator.
//!
//! The management-port and inbound deny-default checks are the minimum
//! baseline; the rest catch other common exposure mistakes.

use std::collections::HashSet;

use fleetguard_types::{
    Direction, PortRange, Protocol, RuleSet, SecurityRule, Severity, ValidationConfig,
};

use crate::engine::{CheckMeta, PolicyEngine};

/// Remote administration listeners that must never face the internet, with
/// the transports each one accepts. RDP also listens on UDP.
pub const MANAGEMENT_PORTS: &[(u16, &[Protocol])] = &[
    (22, &[Protocol::Tcp]),
    (3389, &[Protocol::Tcp, Protocol::Udp]),
];

/// Well-known database listener ports.
pub const DATABASE_PORTS: &[(u16, &[Protocol])] = &[
    (1433, &[Protocol::Tcp]),
    (3306, &[Protocol::Tcp]),
    (5432, &[Protocol::Tcp]),
    (6379, &[Protocol::Tcp]),
    (27017, &[Protocol::Tcp]),
];

pub const MANAGEMENT_PORT_EXPOSED: &str = "management-port-exposed";
pub const UNRESTRICTED_INBOUND: &str = "unrestricted-inbound";
pub const DATABASE_PORT_EXPOSED: &str = "database-port-exposed";
pub const MISSING_INBOUND_DENY_DEFAULT: &str = "missing-inbound-deny-default";
pub const MISSING_OUTBOUND_DENY_DEFAULT: &str = "missing-outbound-deny-default";
pub const AMBIGUOUS_PRECEDENCE: &str = "ambiguous-precedence";

/// Register the built-in checks in their canonical order.
pub fn register_defaults(engine: &mut PolicyEngine, config: &ValidationConfig) {
    engine.register_forbidden_rule(
        CheckMeta::new(MANAGEMENT_PORT_EXPOSED, Severity::Critical, "management port exposed")
            .with_message("inbound Allow rule exposes SSH/RDP to an unrestricted source")
            .with_remediation(
                "Restrict the source to a bastion or VPN range, or remove the rule and \
                 reach the host through a brokered tunnel",
            )
            .with_tags(["CIS-6.1", "CIS-6.2", "NIST-AC-17"]),
        |rule: &SecurityRule| exposes_any_port(rule, MANAGEMENT_PORTS),
    );

    engine.register_forbidden_rule(
        CheckMeta::new(UNRESTRICTED_INBOUND, Severity::Critical, "unrestricted inbound access")
            .with_message("inbound Allow rule opens every port to an unrestricted source")
            .with_remediation("Limit the rule to the specific ports and source ranges required")
            .with_tags(["CIS-6.5", "NIST-SC-7"]),
        |rule: &SecurityRule| {
            is_public_inbound_allow(rule) && rule.destination_ports == PortRange::Any
        },
    );

    engine.register_forbidden_rule(
        CheckMeta::new(DATABASE_PORT_EXPOSED, Severity::High, "database port exposed")
            .with_message("inbound Allow rule exposes a database listener to an unrestricted source")
            .with_remediation(
                "Allow database traffic only from application subnets or private endpoints",
            )
            .with_tags(["CIS-6.6", "NIST-SC-7"]),
        |rule: &SecurityRule| exposes_any_port(rule, DATABASE_PORTS),
    );

    engine.register_required_rule(
        CheckMeta::new(
            MISSING_INBOUND_DENY_DEFAULT,
            Severity::High,
            "missing deny-default",
        )
        .with_message("the lowest-precedence inbound rule is not an explicit Deny-all")
        .with_remediation(
            "Add an inbound Deny rule for all protocols, addresses, and ports at the \
             numerically highest priority",
        )
        .with_tags(["CIS-6.3", "NIST-AC-3"]),
        |set: &RuleSet| has_deny_default(set, Direction::Inbound),
    );

    engine.register_required_rule(
        CheckMeta::new(AMBIGUOUS_PRECEDENCE, Severity::Critical, "ambiguous precedence")
            .with_message("two or more rules share a priority value")
            .with_remediation("Give every rule a distinct priority")
            .with_tags(["NIST-CM-6"]),
        |set: &RuleSet| priorities_unique(set),
    );

    if config.require_outbound_default_deny {
        engine.register_required_rule(
            CheckMeta::new(
                MISSING_OUTBOUND_DENY_DEFAULT,
                Severity::High,
                "missing outbound deny-default",
            )
            .with_message("the lowest-precedence outbound rule is not an explicit Deny-all")
            .with_remediation(
                "Add an outbound Deny rule for all protocols, addresses, and ports at the \
                 numerically highest priority",
            )
            .with_tags(["NIST-SC-7(5)"]),
            |set: &RuleSet| has_deny_default(set, Direction::Outbound),
        );
    }
}

fn is_public_inbound_allow(rule: &SecurityRule) -> bool {
    rule.direction == Direction::Inbound && rule.allows_from_anywhere()
}

fn exposes_any_port(rule: &SecurityRule, listeners: &[(u16, &[Protocol])]) -> bool {
    is_public_inbound_allow(rule)
        && listeners.iter().any(|(port, transports)| {
            rule.destination_ports.covers(*port)
                && (rule.protocol == Protocol::Any || transports.contains(&rule.protocol))
        })
}

/// True when the direction's lowest-precedence rule denies everything.
pub fn has_deny_default(set: &RuleSet, direction: Direction) -> bool {
    set.lowest_precedence(direction)
        .is_some_and(SecurityRule::is_deny_all)
}

pub fn priorities_unique(set: &RuleSet) -> bool {
    let mut seen = HashSet::with_capacity(set.rules.len());
    set.rules.iter().all(|r| seen.insert(r.priority))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetguard_types::RuleAction;

    fn engine() -> PolicyEngine {
        PolicyEngine::with_builtins(&ValidationConfig::default())
    }

    fn inbound_allow(name: &str, priority: u32, ports: PortRange) -> SecurityRule {
        SecurityRule::new(name, priority, Direction::Inbound, RuleAction::Allow)
            .with_protocol(Protocol::Tcp)
            .with_destination_ports(ports)
    }

    fn deny_in() -> SecurityRule {
        SecurityRule::deny_all("deny-all-inbound", 4096, Direction::Inbound)
    }

    #[test]
    fn https_with_deny_default_is_clean() {
        let set = RuleSet::new("web", "1")
            .with_rule(inbound_allow("https", 100, PortRange::Single(443)))
            .with_rule(deny_in());
        assert!(engine().evaluate(&set).is_empty());
    }

    #[test]
    fn open_ssh_without_deny_default_yields_two_findings() {
        let set =
            RuleSet::new("web", "1").with_rule(inbound_allow("ssh", 100, PortRange::Single(22)));
        let findings = engine().evaluate(&set);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].id, "management-port-exposed:ssh");
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[1].id, MISSING_INBOUND_DENY_DEFAULT);
        assert_eq!(findings[1].severity, Severity::High);
    }

    #[test]
    fn port_range_covering_rdp_is_flagged() {
        let set = RuleSet::new("web", "1")
            .with_rule(inbound_allow("wide", 100, PortRange::Range(3380, 3400)))
            .with_rule(deny_in());
        let findings = engine().evaluate(&set);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, "management-port-exposed:wide");
    }

    #[test]
    fn restricted_source_is_not_flagged() {
        let set = RuleSet::new("web", "1")
            .with_rule(
                inbound_allow("ssh-corp", 100, PortRange::Single(22))
                    .with_source("10.0.0.0/8".parse().unwrap()),
            )
            .with_rule(deny_in());
        assert!(engine().evaluate(&set).is_empty());
    }

    #[test]
    fn udp_only_rule_does_not_expose_ssh() {
        let set = RuleSet::new("web", "1")
            .with_rule(
                inbound_allow("dns", 100, PortRange::Range(1, 100)).with_protocol(Protocol::Udp),
            )
            .with_rule(deny_in());
        assert!(engine().evaluate(&set).is_empty());
    }

    #[test]
    fn udp_rdp_from_anywhere_is_critical() {
        let set = RuleSet::new("web", "1")
            .with_rule(
                inbound_allow("rdp-udp", 100, PortRange::Single(3389)).with_protocol(Protocol::Udp),
            )
            .with_rule(deny_in());
        let result = engine().evaluate(&set);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, "management-port-exposed:rdp-udp");
        assert_eq!(result[0].severity, Severity::Critical);
    }

    #[test]
    fn icmp_rule_never_exposes_management_ports() {
        let set = RuleSet::new("web", "1")
            .with_rule(inbound_allow("ping", 100, PortRange::Any).with_protocol(Protocol::Icmp))
            .with_rule(deny_in());
        let ids: Vec<_> = engine().evaluate(&set).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["unrestricted-inbound:ping"]);
    }

    #[test]
    fn any_port_from_anywhere_trips_every_exposure_check() {
        let set = RuleSet::new("web", "1")
            .with_rule(inbound_allow("open", 100, PortRange::Any))
            .with_rule(deny_in());
        let ids: Vec<_> = engine().evaluate(&set).into_iter().map(|f| f.id).collect();
        assert_eq!(
            ids,
            vec![
                "management-port-exposed:open",
                "unrestricted-inbound:open",
                "database-port-exposed:open",
            ]
        );
    }

    #[test]
    fn database_port_is_high() {
        let set = RuleSet::new("db", "1")
            .with_rule(inbound_allow("pg", 100, PortRange::Single(5432)))
            .with_rule(deny_in());
        let findings = engine().evaluate(&set);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn deny_default_must_be_lowest_precedence() {
        let set = RuleSet::new("web", "1")
            .with_rule(SecurityRule::deny_all("deny-early", 100, Direction::Inbound))
            .with_rule(inbound_allow("https", 200, PortRange::Single(443)));
        let ids: Vec<_> = engine().evaluate(&set).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![MISSING_INBOUND_DENY_DEFAULT]);
    }

    #[test]
    fn partial_deny_is_not_a_deny_default() {
        let set = RuleSet::new("web", "1").with_rule(
            SecurityRule::deny_all("deny-tcp", 4096, Direction::Inbound)
                .with_protocol(Protocol::Tcp),
        );
        assert!(!has_deny_default(&set, Direction::Inbound));
    }

    #[test]
    fn duplicate_priorities_are_critical() {
        let set = RuleSet::new("web", "1")
            .with_rule(inbound_allow("a", 100, PortRange::Single(443)))
            .with_rule(inbound_allow("b", 100, PortRange::Single(8443)))
            .with_rule(deny_in());
        let findings = engine().evaluate(&set);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, AMBIGUOUS_PRECEDENCE);
        assert_eq!(findings[0].severity, Severity::Critical);
    }

    #[test]
    fn outbound_deny_default_is_opt_in() {
        let set = RuleSet::new("web", "1").with_rule(deny_in());
        assert!(engine().evaluate(&set).is_empty());

        let strict = PolicyEngine::with_builtins(&ValidationConfig {
            require_outbound_default_deny: true,
            ..ValidationConfig::default()
        });
        let ids: Vec<_> = strict.evaluate(&set).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![MISSING_OUTBOUND_DENY_DEFAULT]);
    }
}
