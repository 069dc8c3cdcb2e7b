//! Access-control rules and the versioned templates that group them.
//!
//! A [`RuleSet`] is the unit that gets validated, diffed against live state,
//! and applied through the control plane. Each [`SecurityRule`] carries a
//! priority where the lower number wins.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FleetGuardError;

/// Traffic direction a rule applies to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    #[serde(alias = "inbound")]
    Inbound,
    #[serde(alias = "outbound")]
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "Inbound"),
            Direction::Outbound => write!(f, "Outbound"),
        }
    }
}

/// What a matching rule does with the traffic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RuleAction {
    #[serde(alias = "allow")]
    Allow,
    #[serde(alias = "deny")]
    Deny,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Allow => write!(f, "Allow"),
            RuleAction::Deny => write!(f, "Deny"),
        }
    }
}

/// Transport protocol matched by a rule.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[serde(alias = "tcp")]
    Tcp,
    #[serde(alias = "udp")]
    Udp,
    #[serde(alias = "icmp")]
    Icmp,
    #[default]
    #[serde(rename = "*", alias = "any", alias = "Any")]
    Any,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "Tcp"),
            Protocol::Udp => write!(f, "Udp"),
            Protocol::Icmp => write!(f, "Icmp"),
            Protocol::Any => write!(f, "*"),
        }
    }
}

/// A port selector: every port, one port, or an inclusive range.
///
/// Inverted ranges parse successfully so that the template validator can
/// report them as findings instead of rejecting the whole document.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "PortSpec", into = "String")]
pub enum PortRange {
    #[default]
    Any,
    Single(u16),
    Range(u16, u16),
}

/// Wire form of a port selector: a bare number or a string such as `"*"` or `"8000-8080"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PortSpec {
    Number(u16),
    Text(String),
}

impl PortRange {
    /// Whether `port` falls inside this selector.
    pub fn covers(&self, port: u16) -> bool {
        match *self {
            PortRange::Any => true,
            PortRange::Single(p) => p == port,
            PortRange::Range(lo, hi) => lo <= port && port <= hi,
        }
    }

    /// Whether the range is written backwards (`hi < lo`).
    pub fn is_inverted(&self) -> bool {
        matches!(*self, PortRange::Range(lo, hi) if hi < lo)
    }
}

impl FromStr for PortRange {
    type Err = FleetGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" || s.eq_ignore_ascii_case("any") {
            return Ok(PortRange::Any);
        }
        let parse_port = |raw: &str| {
            raw.trim()
                .parse::<u16>()
                .map_err(|e| FleetGuardError::Schema(format!("invalid port '{raw}': {e}")))
        };
        match s.split_once('-') {
            Some((lo, hi)) => Ok(PortRange::Range(parse_port(lo)?, parse_port(hi)?)),
            None => Ok(PortRange::Single(parse_port(s)?)),
        }
    }
}

impl TryFrom<PortSpec> for PortRange {
    type Error = FleetGuardError;

    fn try_from(spec: PortSpec) -> Result<Self, Self::Error> {
        match spec {
            PortSpec::Number(p) => Ok(PortRange::Single(p)),
            PortSpec::Text(s) => s.parse(),
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRange::Any => write!(f, "*"),
            PortRange::Single(p) => write!(f, "{p}"),
            PortRange::Range(lo, hi) => write!(f, "{lo}-{hi}"),
        }
    }
}

impl From<PortRange> for String {
    fn from(range: PortRange) -> Self {
        range.to_string()
    }
}

/// An address selector: anything, a CIDR block, or a named service tag.
///
/// A bare IP address parses as a host-length CIDR block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum AddressRange {
    #[default]
    Any,
    Cidr(IpAddr, u8),
    Tag(String),
}

impl AddressRange {
    /// Whether the selector matches every address on the internet.
    ///
    /// True for `*`/`any`/`internet` and for zero-length prefixes such as
    /// `0.0.0.0/0` or `::/0`.
    pub fn is_unrestricted(&self) -> bool {
        match self {
            AddressRange::Any => true,
            AddressRange::Cidr(_, prefix) => *prefix == 0,
            AddressRange::Tag(tag) => tag.eq_ignore_ascii_case("internet"),
        }
    }

    /// Maximum prefix length for the address family of a CIDR block.
    pub fn max_prefix(ip: &IpAddr) -> u8 {
        match ip {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }
}

impl FromStr for AddressRange {
    type Err = FleetGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" || s.eq_ignore_ascii_case("any") {
            return Ok(AddressRange::Any);
        }
        if let Some((ip, prefix)) = s.split_once('/') {
            let ip: IpAddr = ip
                .parse()
                .map_err(|e| FleetGuardError::Schema(format!("invalid address '{s}': {e}")))?;
            let prefix: u8 = prefix
                .parse()
                .map_err(|e| FleetGuardError::Schema(format!("invalid prefix in '{s}': {e}")))?;
            return Ok(AddressRange::Cidr(ip, prefix));
        }
        if let Ok(ip) = s.parse::<IpAddr>() {
            let prefix = AddressRange::max_prefix(&ip);
            return Ok(AddressRange::Cidr(ip, prefix));
        }
        let valid_tag = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if valid_tag {
            Ok(AddressRange::Tag(s.to_string()))
        } else {
            Err(FleetGuardError::Schema(format!(
                "invalid address range '{s}': expected '*', an IP, a CIDR block, or a service tag"
            )))
        }
    }
}

impl TryFrom<String> for AddressRange {
    type Error = FleetGuardError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressRange::Any => write!(f, "*"),
            AddressRange::Cidr(ip, prefix) => write!(f, "{ip}/{prefix}"),
            AddressRange::Tag(tag) => write!(f, "{tag}"),
        }
    }
}

impl From<AddressRange> for String {
    fn from(range: AddressRange) -> Self {
        range.to_string()
    }
}

/// A single access-control rule.
///
/// `name` and `priority` must each be unique within a [`RuleSet`]; the
/// validator reports violations of either as a structural failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecurityRule {
    pub name: String,
    /// Lower value wins.
    pub priority: u32,
    pub direction: Direction,
    pub action: RuleAction,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub source: AddressRange,
    #[serde(default)]
    pub destination: AddressRange,
    #[serde(default)]
    pub source_ports: PortRange,
    #[serde(default)]
    pub destination_ports: PortRange,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub justification: String,
}

impl SecurityRule {
    /// Create a rule matching all protocols, addresses, and ports.
    ///
    /// Narrow it with the `with_*` builders.
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        direction: Direction,
        action: RuleAction,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            direction,
            action,
            protocol: Protocol::Any,
            source: AddressRange::Any,
            destination: AddressRange::Any,
            source_ports: PortRange::Any,
            destination_ports: PortRange::Any,
            justification: String::new(),
        }
    }

    /// A catch-all Deny rule for one direction.
    pub fn deny_all(name: impl Into<String>, priority: u32, direction: Direction) -> Self {
        Self::new(name, priority, direction, RuleAction::Deny)
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: AddressRange) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: AddressRange) -> Self {
        self.destination = destination;
        self
    }

    #[must_use]
    pub fn with_source_ports(mut self, ports: PortRange) -> Self {
        self.source_ports = ports;
        self
    }

    #[must_use]
    pub fn with_destination_ports(mut self, ports: PortRange) -> Self {
        self.destination_ports = ports;
        self
    }

    #[must_use]
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }

    /// Whether this rule denies every packet in its direction.
    pub fn is_deny_all(&self) -> bool {
        self.action == RuleAction::Deny
            && self.protocol == Protocol::Any
            && self.source.is_unrestricted()
            && self.destination.is_unrestricted()
            && self.source_ports == PortRange::Any
            && self.destination_ports == PortRange::Any
    }

    /// Whether this is an Allow rule open to any source address.
    pub fn allows_from_anywhere(&self) -> bool {
        self.action == RuleAction::Allow && self.source.is_unrestricted()
    }
}

/// Name and version identifying a rule set in results and audit records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSetRef {
    pub name: String,
    pub version: String,
}

impl fmt::Display for RuleSetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A versioned, ordered collection of rules (an ACL template).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSet {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<SecurityRule>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            metadata: BTreeMap::new(),
            rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: SecurityRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn reference(&self) -> RuleSetRef {
        RuleSetRef {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// Rules for one direction, in declaration order.
    pub fn rules_in(&self, direction: Direction) -> impl Iterator<Item = &SecurityRule> {
        self.rules.iter().filter(move |r| r.direction == direction)
    }

    /// The lowest-precedence (numerically highest priority) rule for a direction.
    pub fn lowest_precedence(&self, direction: Direction) -> Option<&SecurityRule> {
        self.rules_in(direction).max_by_key(|r| r.priority)
    }

    /// Look up a rule by name.
    pub fn rule(&self, name: &str) -> Option<&SecurityRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Parse a rule set from a JSON document.
    pub fn from_json(content: &str) -> Result<Self, FleetGuardError> {
        serde_json::from_str(content).map_err(|e| FleetGuardError::Schema(e.to_string()))
    }

    /// Parse a rule set from a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, FleetGuardError> {
        toml::from_str(content).map_err(|e| FleetGuardError::Schema(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, FleetGuardError> {
        serde_json::to_string_pretty(self).map_err(|e| FleetGuardError::Schema(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, FleetGuardError> {
        toml::to_string_pretty(self).map_err(|e| FleetGuardError::Schema(e.to_string()))
    }

    /// Load a rule set from disk, choosing the format by file extension.
    ///
    /// `.toml` files are parsed as TOML; everything else as JSON.
    pub fn load(path: &Path) -> Result<Self, FleetGuardError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FleetGuardError::Schema(format!("failed to read template '{}': {e}", path.display()))
        })?;
        if path.extension().is_some_and(|ext| ext == "toml") {
            Self::from_toml(&content)
        } else {
            Self::from_json(&content)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_parses_all_forms() {
        assert_eq!("*".parse::<PortRange>().unwrap(), PortRange::Any);
        assert_eq!("22".parse::<PortRange>().unwrap(), PortRange::Single(22));
        assert_eq!(
            "8000-8080".parse::<PortRange>().unwrap(),
            PortRange::Range(8000, 8080)
        );
        assert!("ssh".parse::<PortRange>().is_err());
        assert!("70000".parse::<PortRange>().is_err());
    }

    #[test]
    fn port_range_covers() {
        assert!(PortRange::Any.covers(3389));
        assert!(PortRange::Range(20, 25).covers(22));
        assert!(!PortRange::Range(20, 25).covers(26));
        assert!(!PortRange::Single(443).covers(22));
        assert!(PortRange::Range(30, 20).is_inverted());
    }

    #[test]
    fn address_range_unrestricted_forms() {
        for raw in ["*", "any", "0.0.0.0/0", "::/0", "Internet"] {
            let range: AddressRange = raw.parse().unwrap();
            assert!(range.is_unrestricted(), "{raw} should be unrestricted");
        }
        let range: AddressRange = "10.0.0.0/8".parse().unwrap();
        assert!(!range.is_unrestricted());
        let host: AddressRange = "10.1.2.3".parse().unwrap();
        assert_eq!(host, AddressRange::Cidr("10.1.2.3".parse().unwrap(), 32));
        let tag: AddressRange = "VirtualNetwork".parse().unwrap();
        assert_eq!(tag, AddressRange::Tag("VirtualNetwork".into()));
        assert!("10.0.0.0/abc".parse::<AddressRange>().is_err());
        assert!("not an address!".parse::<AddressRange>().is_err());
    }

    #[test]
    fn rule_set_parses_from_json() {
        let json = r#"{
            "name": "web",
            "version": "1.0.0",
            "rules": [
                {"name": "https", "priority": 100, "direction": "Inbound", "action": "Allow",
                 "protocol": "Tcp", "source": "*", "destination_ports": 443},
                {"name": "deny-all", "priority": 4096, "direction": "inbound", "action": "deny"}
            ]
        }"#;
        let set = RuleSet::from_json(json).unwrap();
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].destination_ports, PortRange::Single(443));
        assert!(set.rules[1].is_deny_all());
        assert_eq!(
            set.lowest_precedence(Direction::Inbound).map(|r| r.name.as_str()),
            Some("deny-all")
        );
    }

    #[test]
    fn unknown_enum_value_is_schema_error() {
        let json = r#"{"name": "x", "version": "1", "rules": [
            {"name": "r", "priority": 100, "direction": "Sideways", "action": "Allow"}
        ]}"#;
        let err = RuleSet::from_json(json).unwrap_err();
        assert!(matches!(err, FleetGuardError::Schema(_)));
    }

    #[test]
    fn rule_set_toml_roundtrip_preserves_rules() {
        let set = RuleSet::new("bastion", "2")
            .with_metadata("owner", "netops")
            .with_rule(
                SecurityRule::new("ssh-corp", 110, Direction::Inbound, RuleAction::Allow)
                    .with_protocol(Protocol::Tcp)
                    .with_source("10.0.0.0/8".parse().unwrap())
                    .with_destination_ports(PortRange::Single(22))
                    .with_justification("corp jump hosts"),
            )
            .with_rule(SecurityRule::deny_all("deny-in", 4096, Direction::Inbound));
        let text = set.to_toml().unwrap();
        let back = RuleSet::from_toml(&text).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn load_picks_format_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let set = RuleSet::new("t", "1")
            .with_rule(SecurityRule::deny_all("deny-in", 4096, Direction::Inbound));

        let json_path = dir.path().join("t.json");
        std::fs::write(&json_path, set.to_json().unwrap()).unwrap();
        assert_eq!(RuleSet::load(&json_path).unwrap(), set);

        let toml_path = dir.path().join("t.toml");
        std::fs::write(&toml_path, set.to_toml().unwrap()).unwrap();
        assert_eq!(RuleSet::load(&toml_path).unwrap(), set);
    }
}
