//! Shared helpers for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use fleetguard::gate::ControlPlane;
use fleetguard::ledger::AuditLogger;
use fleetguard::tunnel::{BindingVerifier, ProviderError, TunnelDescriptor, TunnelProvider};
use fleetguard::types::{
    AddressRange, AuditConfig, Direction, FleetGuardError, PortRange, Protocol, RuleAction,
    RuleSet, SecurityRule,
};

/// Open an audit logger inside a fresh temporary directory.
///
/// Keep the `TempDir` alive for as long as the logger is used.
pub fn temp_audit() -> (TempDir, Arc<AuditLogger>) {
    let dir = TempDir::new().expect("should create temp dir for audit log");
    let logger = AuditLogger::open(&AuditConfig {
        log_path: dir.path().join("audit.ndjson"),
        backup_dir: dir.path().join("backups"),
        ..AuditConfig::default()
    })
    .expect("should open audit logger");
    (dir, Arc::new(logger))
}

/// An inbound TCP Allow rule for one port from anywhere.
pub fn allow_inbound(name: &str, priority: u32, port: u16) -> SecurityRule {
    SecurityRule::new(name, priority, Direction::Inbound, RuleAction::Allow)
        .with_protocol(Protocol::Tcp)
        .with_source(AddressRange::Any)
        .with_destination_ports(PortRange::Single(port))
}

/// HTTPS from anywhere plus an inbound deny-all at the lowest precedence.
pub fn https_with_deny_default() -> RuleSet {
    RuleSet::new("web-tier", "1.0.0")
        .with_rule(allow_inbound("allow-https", 100, 443))
        .with_rule(SecurityRule::deny_all("deny-all-inbound", 4096, Direction::Inbound))
}

/// SSH from anywhere and no deny-default.
pub fn open_ssh_without_deny_default() -> RuleSet {
    RuleSet::new("jump-host", "1.0.0").with_rule(allow_inbound("allow-ssh", 100, 22))
}

/// In-memory tunnel provider that binds to `bind_ip` and counts calls.
pub struct FakeProvider {
    pub created: AtomicUsize,
    pub closed: AtomicUsize,
    pub delay: Duration,
    pub bind_ip: IpAddr,
}

impl FakeProvider {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            delay,
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        })
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TunnelProvider for FakeProvider {
    async fn create_tunnel(
        &self,
        broker_id: &str,
        target_id: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<TunnelDescriptor, ProviderError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(TunnelDescriptor {
            tunnel_id: format!("{broker_id}/{target_id}:{remote_port}@{local_port}"),
            local_addr: SocketAddr::new(self.bind_ip, local_port),
        })
    }

    async fn close_tunnel(&self, _descriptor: &TunnelDescriptor) -> Result<(), ProviderError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self, _descriptor: &TunnelDescriptor) -> bool {
        true
    }
}

/// Accepts any loopback binding without network I/O.
pub struct TrustLoopback;

#[async_trait]
impl BindingVerifier for TrustLoopback {
    async fn verify(&self, _local_addr: SocketAddr) -> Result<(), String> {
        Ok(())
    }
}

/// Control plane that records every apply call.
#[derive(Default)]
pub struct FakeControlPlane {
    pub live: Mutex<HashMap<String, RuleSet>>,
    pub applied: Mutex<Vec<(String, RuleSet)>>,
}

impl FakeControlPlane {
    pub fn with_live(resource_id: &str, rules: RuleSet) -> Arc<Self> {
        let plane = Self::default();
        plane
            .live
            .lock()
            .expect("live map lock")
            .insert(resource_id.to_string(), rules);
        Arc::new(plane)
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().expect("applied lock").len()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn describe_resource(&self, resource_id: &str) -> Result<RuleSet, FleetGuardError> {
        self.live
            .lock()
            .expect("live map lock")
            .get(resource_id)
            .cloned()
            .ok_or_else(|| FleetGuardError::ControlPlane(format!("no such resource: {resource_id}")))
    }

    async fn apply_rule_set(&self, resource_id: &str, rules: &RuleSet) -> Result<(), FleetGuardError> {
        self.applied
            .lock()
            .expect("applied lock")
            .push((resource_id.to_string(), rules.clone()));
        self.live
            .lock()
            .expect("live map lock")
            .insert(resource_id.to_string(), rules.clone());
        Ok(())
    }
}
