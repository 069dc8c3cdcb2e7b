//! Integration tests for the audit ledger.
//!
//! Verifies append, query, tamper detection, and backups against a real
//! file, including the one-flipped-byte property.

mod common;

use std::fs;

use fleetguard::ledger::{AuditEvent, AuditEventType, AuditFilter, AuditLogger, Outcome};
use fleetguard::types::{AuditConfig, Severity};

use common::temp_audit;

fn tunnel_event(target: &str) -> AuditEvent {
    AuditEvent::new(AuditEventType::TunnelCreated, "ops", format!("bastion/{target}:22"), "acquire")
        .with_detail("local_addr", "127.0.0.1:40022")
}

#[test]
fn test_untouched_log_verifies_clean() {
    let (_dir, logger) = temp_audit();
    for target in ["vm-1", "vm-2", "vm-3"] {
        logger.log_event(tunnel_event(target)).expect("should append event");
    }

    let report = logger.verify_integrity().expect("should verify");
    assert!(report.valid);
    assert!(report.corrupted_ids.is_empty());
    // The integrity-check event itself is appended after the scan.
    assert_eq!(report.total_entries, 3);
    assert_eq!(logger.count().expect("should count"), 4);
}

#[test]
fn test_flipped_byte_reports_only_that_event() {
    let (_dir, logger) = temp_audit();
    let first = logger.log_event(tunnel_event("vm-1")).expect("should append");
    let target = logger
        .log_event(tunnel_event("vm-2").with_detail("note", "tamper-here"))
        .expect("should append");
    let third = logger.log_event(tunnel_event("vm-3")).expect("should append");

    let content = fs::read_to_string(logger.path()).expect("should read log");
    let tampered = content.replacen("tamper-here", "tamper-hera", 1);
    assert_ne!(content, tampered);
    fs::write(logger.path(), tampered).expect("should rewrite log");

    let report = logger.verify_integrity().expect("should verify");
    assert!(!report.valid);
    assert_eq!(report.corrupted_ids, vec![target.event_id.to_string()]);
    assert!(!report.corrupted_ids.contains(&first.event_id.to_string()));
    assert!(!report.corrupted_ids.contains(&third.event_id.to_string()));
    assert!(logger.ensure_intact().is_err());
}

#[test]
fn test_query_filters_and_keeps_file_order() {
    let (_dir, logger) = temp_audit();
    logger.log_event(tunnel_event("vm-1")).expect("should append");
    logger
        .log_event(
            AuditEvent::new(AuditEventType::ApplyBlocked, "ci", "nsg-web", "apply")
                .with_outcome(Outcome::Denied)
                .with_severity(Severity::Critical),
        )
        .expect("should append");
    logger.log_event(tunnel_event("vm-2")).expect("should append");

    let created = logger
        .query(&AuditFilter {
            event_type: Some(AuditEventType::TunnelCreated),
            ..Default::default()
        })
        .expect("should query");
    let resources: Vec<&str> = created.iter().map(|e| e.resource.as_str()).collect();
    assert_eq!(resources, vec!["bastion/vm-1:22", "bastion/vm-2:22"]);
    assert!(created.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let severe = logger
        .query(&AuditFilter {
            min_severity: Some(Severity::High),
            actor: Some("ci".into()),
            ..Default::default()
        })
        .expect("should query");
    assert_eq!(severe.len(), 1);
    assert_eq!(severe[0].outcome, Outcome::Denied);
}

#[test]
fn test_backup_copies_without_touching_live_log() {
    let (dir, logger) = temp_audit();
    logger.log_event(tunnel_event("vm-1")).expect("should append");
    let before = fs::read(logger.path()).expect("should read log");

    let backup = logger.backup().expect("should back up");
    assert!(backup.starts_with(dir.path().join("backups")));
    assert_eq!(fs::read(&backup).expect("should read backup"), before);

    // The live log only grew: the backup itself is audited.
    let after = fs::read(logger.path()).expect("should read log");
    assert!(after.starts_with(&before));
    assert_eq!(logger.list_backups().expect("should list").len(), 1);
}

#[test]
fn test_reopened_log_keeps_appending() {
    let (dir, logger) = temp_audit();
    logger.log_event(tunnel_event("vm-1")).expect("should append");
    drop(logger);

    let reopened = AuditLogger::open(&AuditConfig {
        log_path: dir.path().join("audit.ndjson"),
        backup_dir: dir.path().join("backups"),
        ..AuditConfig::default()
    })
    .expect("should reopen");
    reopened.log_event(tunnel_event("vm-2")).expect("should append");

    assert_eq!(reopened.count().expect("should count"), 2);
    assert!(reopened.verify_integrity().expect("should verify").valid);
}
