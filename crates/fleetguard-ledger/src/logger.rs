//! AuditLogger: single-writer, append-only, checksummed audit log.
//!
//! Every record is one NDJSON line carrying its own SHA-256 checksum.
//! Appends are serialized through one mutex so concurrent callers never
//! interleave bytes. Reads (verification, queries, backups) take the same
//! lock so they never observe a half-written line.
//!
//! Checksums detect retroactive edits. They are not signatures: anyone with
//! write access to the file can recompute a consistent checksum.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use fleetguard_types::{AuditConfig, FleetGuardError, Severity};

use crate::event::{AuditEvent, AuditEventType, Outcome};
use crate::filter::AuditFilter;
use crate::integrity::IntegrityReport;
use crate::ndjson_log::{NdjsonReader, NdjsonWriter};

const BACKUP_PREFIX: &str = "audit-";
const BACKUP_SUFFIX: &str = ".ndjson";

/// One line of the log as read back from disk.
enum Scanned {
    Event(AuditEvent),
    /// Label for a line that did not parse: its `event_id` if recoverable,
    /// otherwise `line N`.
    Unparsable(String),
}

pub struct AuditLogger {
    path: PathBuf,
    backup_dir: PathBuf,
    backup_interval: Duration,
    actor: String,
    writer: Mutex<NdjsonWriter>,
    write_failures: AtomicU64,
    /// Time the age-triggered backup is measured from: the last backup, or
    /// the first record if no backup exists yet.
    backup_baseline: Mutex<Option<DateTime<Utc>>>,
}

impl AuditLogger {
    /// Open (or create) the log described by `config`.
    pub fn open(config: &AuditConfig) -> Result<Self, FleetGuardError> {
        if let Some(parent) = config.log_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    FleetGuardError::Ledger(format!(
                        "failed to create audit directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let writer = NdjsonWriter::open(&config.log_path).map_err(|e| {
            FleetGuardError::Ledger(format!(
                "failed to open audit log {}: {e}",
                config.log_path.display()
            ))
        })?;
        set_file_permissions_0600(&config.log_path)?;

        let logger = Self {
            path: config.log_path.clone(),
            backup_dir: config.backup_dir.clone(),
            backup_interval: config.backup_interval(),
            actor: config.actor.clone(),
            writer: Mutex::new(writer),
            write_failures: AtomicU64::new(0),
            backup_baseline: Mutex::new(None),
        };

        let baseline = match logger.newest_backup_time()? {
            Some(t) => Some(t),
            None => logger.first_event_time()?,
        };
        *logger.lock_baseline()? = baseline;

        info!(path = %logger.path.display(), "audit log opened");
        Ok(logger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Actor name for events emitted by the core itself.
    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Number of events that [`record`](Self::record) failed to persist.
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Append one event and return it as stored.
    ///
    /// A nil `event_id` is replaced with a fresh v4 id; the checksum is
    /// always recomputed. May trigger an age-based backup afterwards.
    pub fn log_event(&self, event: AuditEvent) -> Result<AuditEvent, FleetGuardError> {
        let event = self.append(event)?;
        if let Err(e) = self.maybe_backup() {
            warn!(error = %e, "age-triggered audit backup failed");
        }
        Ok(event)
    }

    /// Like [`log_event`](Self::log_event), but never fails.
    ///
    /// A failed write is logged at error level and counted in
    /// [`write_failures`](Self::write_failures); the caller's operation
    /// goes on. Returns whether the event was persisted.
    pub fn record(&self, event: AuditEvent) -> bool {
        let event_type = event.event_type;
        match self.log_event(event) {
            Ok(_) => true,
            Err(e) => {
                self.note_write_failure(event_type, &e);
                false
            }
        }
    }

    fn append(&self, mut event: AuditEvent) -> Result<AuditEvent, FleetGuardError> {
        if event.event_id.is_nil() {
            event.event_id = Uuid::new_v4();
        }
        event.checksum = event.compute_checksum()?;

        self.lock_writer()?.append(&event).map_err(|e| {
            FleetGuardError::Ledger(format!(
                "failed to append to {}: {e}",
                self.path.display()
            ))
        })?;
        set_file_permissions_0600(&self.path)?;

        let mut baseline = self.lock_baseline()?;
        if baseline.is_none() {
            *baseline = Some(event.timestamp);
        }
        drop(baseline);

        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "audit event appended"
        );
        Ok(event)
    }

    fn note_write_failure(&self, event_type: AuditEventType, err: &FleetGuardError) {
        let failures = self.write_failures.fetch_add(1, Ordering::Relaxed) + 1;
        error!(
            event_type = %event_type,
            path = %self.path.display(),
            failures,
            error = %err,
            "failed to write audit event"
        );
    }

    /// Recompute every record's checksum.
    ///
    /// Scanning continues past bad records so that every problem shows up
    /// in one report. The check itself is recorded as an audit event.
    pub fn verify_integrity(&self) -> Result<IntegrityReport, FleetGuardError> {
        let scanned = self.scan()?;
        let total = scanned.len();
        let corrupted: Vec<String> = scanned
            .into_iter()
            .filter_map(|record| match record {
                Scanned::Event(event) if event.verify_checksum() => None,
                Scanned::Event(event) => Some(event.event_id.to_string()),
                Scanned::Unparsable(label) => Some(label),
            })
            .collect();
        let report = IntegrityReport::from_scan(total, corrupted);

        if report.valid {
            info!(records = total, "audit log integrity verified");
        } else {
            warn!(
                records = total,
                corrupted = report.corrupted_ids.len(),
                "audit log integrity violation"
            );
        }

        let (outcome, severity) = if report.valid {
            (Outcome::Success, Severity::Info)
        } else {
            (Outcome::Failure, Severity::Critical)
        };
        self.record(
            AuditEvent::new(
                AuditEventType::IntegrityCheck,
                &self.actor,
                self.path.display().to_string(),
                "verify",
            )
            .with_outcome(outcome)
            .with_severity(severity)
            .with_detail("total_entries", report.total_entries)
            .with_detail("corrupted", report.corrupted_ids.len()),
        );
        Ok(report)
    }

    /// Verify and turn a failed check into [`FleetGuardError::Integrity`].
    pub fn ensure_intact(&self) -> Result<IntegrityReport, FleetGuardError> {
        let report = self.verify_integrity()?;
        if report.valid {
            Ok(report)
        } else {
            Err(FleetGuardError::Integrity(format!(
                "{}: {}",
                report.message,
                report.corrupted_ids.join(", ")
            )))
        }
    }

    /// Events matching `filter`, in file order.
    ///
    /// Unparsable records are skipped with a warning; use
    /// [`verify_integrity`](Self::verify_integrity) to surface them.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEvent>, FleetGuardError> {
        let limit = filter.limit.unwrap_or(usize::MAX);
        let events = self
            .scan()?
            .into_iter()
            .filter_map(|record| match record {
                Scanned::Event(event) => Some(event),
                Scanned::Unparsable(label) => {
                    warn!(record = %label, "skipping unparsable audit record");
                    None
                }
            })
            .filter(|event| filter.matches(event))
            .take(limit)
            .collect();
        Ok(events)
    }

    /// Number of records in the log.
    pub fn count(&self) -> Result<usize, FleetGuardError> {
        let _guard = self.lock_writer()?;
        Ok(self.open_reader()?.line_count())
    }

    /// Copy the live log to a new timestamped file in the backup directory.
    ///
    /// The live log is never truncated or rewritten.
    pub fn backup(&self) -> Result<PathBuf, FleetGuardError> {
        std::fs::create_dir_all(&self.backup_dir).map_err(|e| {
            FleetGuardError::Ledger(format!(
                "failed to create backup directory {}: {e}",
                self.backup_dir.display()
            ))
        })?;
        set_dir_permissions_0700(&self.backup_dir)?;

        let now = Utc::now();
        let dest = self.backup_dir.join(format!(
            "{BACKUP_PREFIX}{}{BACKUP_SUFFIX}",
            now.format("%Y%m%dT%H%M%S%.6fZ")
        ));
        let bytes = {
            let _guard = self.lock_writer()?;
            std::fs::copy(&self.path, &dest).map_err(|e| {
                FleetGuardError::Ledger(format!(
                    "failed to copy {} to {}: {e}",
                    self.path.display(),
                    dest.display()
                ))
            })?
        };
        set_file_permissions_0600(&dest)?;
        *self.lock_baseline()? = Some(now);

        info!(destination = %dest.display(), bytes, "audit log backed up");

        // Appended without the age check so a zero interval cannot recurse.
        let event = AuditEvent::new(
            AuditEventType::LogBackup,
            &self.actor,
            self.path.display().to_string(),
            "backup",
        )
        .with_detail("destination", dest.display())
        .with_detail("bytes", bytes);
        if let Err(e) = self.append(event) {
            self.note_write_failure(AuditEventType::LogBackup, &e);
        }
        Ok(dest)
    }

    /// Back up the log if the last backup (or the first record, if there has
    /// been no backup) is older than the configured interval.
    pub fn maybe_backup(&self) -> Result<Option<PathBuf>, FleetGuardError> {
        let due = match *self.lock_baseline()? {
            Some(baseline) => (Utc::now() - baseline)
                .to_std()
                .is_ok_and(|age| age >= self.backup_interval),
            None => false,
        };
        if due {
            self.backup().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Existing backup files, oldest first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, FleetGuardError> {
        let entries = match std::fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(FleetGuardError::Ledger(format!(
                    "failed to list {}: {e}",
                    self.backup_dir.display()
                )))
            }
        };
        let mut backups: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| {
                        name.starts_with(BACKUP_PREFIX) && name.ends_with(BACKUP_SUFFIX)
                    })
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    fn scan(&self) -> Result<Vec<Scanned>, FleetGuardError> {
        let _guard = self.lock_writer()?;
        let reader = self.open_reader()?;
        let scanned = reader
            .lines()
            .enumerate()
            .map(|(index, line)| match serde_json::from_slice::<AuditEvent>(line) {
                Ok(event) => Scanned::Event(event),
                Err(_) => Scanned::Unparsable(salvage_event_id(line).unwrap_or_else(|| {
                    format!("line {}", index + 1)
                })),
            })
            .collect();
        Ok(scanned)
    }

    fn open_reader(&self) -> Result<NdjsonReader, FleetGuardError> {
        NdjsonReader::open(&self.path).map_err(|e| {
            FleetGuardError::Ledger(format!("failed to read {}: {e}", self.path.display()))
        })
    }

    fn first_event_time(&self) -> Result<Option<DateTime<Utc>>, FleetGuardError> {
        let reader = self.open_reader()?;
        let first = reader
            .lines()
            .next()
            .and_then(|line| serde_json::from_slice::<AuditEvent>(line).ok())
            .map(|event| event.timestamp);
        Ok(first)
    }

    fn newest_backup_time(&self) -> Result<Option<DateTime<Utc>>, FleetGuardError> {
        let newest = self.list_backups()?.pop();
        Ok(newest
            .and_then(|path| std::fs::metadata(path).ok())
            .and_then(|meta| meta.modified().ok())
            .map(DateTime::<Utc>::from))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, NdjsonWriter>, FleetGuardError> {
        self.writer
            .lock()
            .map_err(|_| FleetGuardError::Ledger("audit writer lock poisoned".into()))
    }

    fn lock_baseline(&self) -> Result<MutexGuard<'_, Option<DateTime<Utc>>>, FleetGuardError> {
        self.backup_baseline
            .lock()
            .map_err(|_| FleetGuardError::Ledger("audit backup state lock poisoned".into()))
    }
}

/// Pull `event_id` out of a record that no longer deserializes as an event.
///
/// Works on the raw bytes, so a record whose JSON or UTF-8 is broken
/// elsewhere still names its event.
fn salvage_event_id(line: &[u8]) -> Option<String> {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(line) {
        if let Some(id) = value.get("event_id").and_then(|v| v.as_str()) {
            return Some(id.to_string());
        }
    }
    let text = String::from_utf8_lossy(line);
    let start = text.find(EVENT_ID_KEY)? + EVENT_ID_KEY.len();
    let rest = text[start..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start().strip_prefix('"')?;
    let id = &rest[..rest.find('"')?];
    (!id.is_empty() && !id.contains(char::REPLACEMENT_CHARACTER)).then(|| id.to_string())
}

const EVENT_ID_KEY: &str = "\"event_id\"";

/// Set a file's permissions to `0600` on Unix systems.
#[cfg(unix)]
fn set_file_permissions_0600(path: &Path) -> Result<(), FleetGuardError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(|e| {
        FleetGuardError::Ledger(format!(
            "failed to set permissions on '{}': {e}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn set_file_permissions_0600(_path: &Path) -> Result<(), FleetGuardError> {
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions_0700(path: &Path) -> Result<(), FleetGuardError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700)).map_err(|e| {
        FleetGuardError::Ledger(format!(
            "failed to set permissions on '{}': {e}",
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn set_dir_permissions_0700(_path: &Path) -> Result<(), FleetGuardError> {
    Ok(())
}
