//! Audit log commands: `verify`, `query`, and `backup`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use fleetguard_ledger::{AuditEvent, AuditEventType, AuditFilter, AuditLogger, Outcome};
use fleetguard_types::{FleetGuardConfig, Severity};

/// Filters accepted by `fleetguard audit query`.
#[derive(Debug, Default)]
pub struct QueryArgs {
    pub event_type: Option<String>,
    pub actor: Option<String>,
    pub resource: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub min_severity: Option<String>,
    pub outcome: Option<String>,
    pub limit: Option<usize>,
    pub json: bool,
}

fn open_logger(config: &FleetGuardConfig) -> Result<AuditLogger> {
    AuditLogger::open(&config.audit).with_context(|| {
        format!("failed to open audit log {}", config.audit.log_path.display())
    })
}

/// Run `fleetguard audit verify`. Exits with status 1 on any corrupted record.
pub fn verify(config: &FleetGuardConfig) -> Result<()> {
    let logger = open_logger(config)?;
    let report = logger
        .verify_integrity()
        .context("failed to verify audit log integrity")?;

    println!("Integrity Report:");
    println!("  Log:           {}", logger.path().display());
    println!("  Total entries: {}", report.total_entries);
    println!("  Valid:         {}", if report.valid { "YES" } else { "NO" });
    for id in &report.corrupted_ids {
        println!("  Corrupted:     {id}");
    }
    println!("  Message:       {}", report.message);

    if !report.valid {
        std::process::exit(1);
    }
    Ok(())
}

/// Run `fleetguard audit query` with optional filters.
pub fn query(config: &FleetGuardConfig, args: QueryArgs) -> Result<()> {
    let logger = open_logger(config)?;
    let filter = build_filter(&args)?;
    let events = logger.query(&filter).context("failed to query audit log")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&events).context("failed to serialize events")?
        );
        return Ok(());
    }

    if events.is_empty() {
        println!("No audit events found.");
        return Ok(());
    }
    print_table(&events);
    println!();
    println!("{} event(s)", events.len());
    Ok(())
}

fn build_filter(args: &QueryArgs) -> Result<AuditFilter> {
    Ok(AuditFilter {
        event_type: args
            .event_type
            .as_deref()
            .map(str::parse::<AuditEventType>)
            .transpose()
            .context("invalid --type")?,
        actor: args.actor.clone(),
        resource: args.resource.clone(),
        from: args.from.as_deref().map(|s| parse_timestamp(s, "--from")).transpose()?,
        to: args.to.as_deref().map(|s| parse_timestamp(s, "--to")).transpose()?,
        min_severity: args
            .min_severity
            .as_deref()
            .map(str::parse::<Severity>)
            .transpose()
            .context("invalid --min-severity")?,
        outcome: args
            .outcome
            .as_deref()
            .map(str::parse::<Outcome>)
            .transpose()
            .context("invalid --outcome")?,
        limit: args.limit,
        ..Default::default()
    })
}

fn parse_timestamp(s: &str, flag: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid {flag} timestamp (expected RFC 3339)"))
}

fn print_table(events: &[AuditEvent]) {
    println!(
        "{:<20}  {:<22}  {:<8}  {:<8}  {:<24}  ACTION",
        "TIMESTAMP", "TYPE", "OUTCOME", "SEVERITY", "RESOURCE"
    );
    println!("{}", "-".repeat(100));

    for event in events {
        let timestamp = event.timestamp.format("%Y-%m-%d %H:%M:%S");
        let resource = if event.resource.chars().count() > 24 {
            let head: String = event.resource.chars().take(21).collect();
            format!("{head}...")
        } else {
            event.resource.clone()
        };
        println!(
            "{:<20}  {:<22}  {:<8}  {:<8}  {:<24}  {}",
            timestamp.to_string(),
            event.event_type.to_string(),
            event.outcome.to_string(),
            event.severity.to_string(),
            resource,
            event.action
        );
    }
}

/// Run `fleetguard audit backup`.
pub fn backup(config: &FleetGuardConfig) -> Result<()> {
    let logger = open_logger(config)?;
    let path = logger.backup().context("failed to back up audit log")?;
    println!("Backed up audit log to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_parses_every_flag() {
        let filter = build_filter(&QueryArgs {
            event_type: Some("tunnel-created".into()),
            actor: Some("ops".into()),
            from: Some("2026-01-01T00:00:00Z".into()),
            min_severity: Some("high".into()),
            outcome: Some("denied".into()),
            limit: Some(5),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(filter.event_type, Some(AuditEventType::TunnelCreated));
        assert_eq!(filter.actor.as_deref(), Some("ops"));
        assert_eq!(filter.min_severity, Some(Severity::High));
        assert_eq!(filter.outcome, Some(Outcome::Denied));
        assert_eq!(filter.limit, Some(5));
        assert!(filter.from.is_some());
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let err = build_filter(&QueryArgs {
            from: Some("yesterday".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("--from"));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let args = QueryArgs {
            event_type: Some("teleported".into()),
            ..Default::default()
        };
        assert!(build_filter(&args).is_err());
    }
}
