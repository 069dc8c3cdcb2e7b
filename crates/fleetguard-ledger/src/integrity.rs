use serde::Serialize;

/// The result of recomputing every record checksum in the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Total number of records inspected, including unparsable ones.
    pub total_entries: usize,
    /// Whether every record parsed and matched its checksum.
    pub valid: bool,
    /// Event ids of mismatched records, in file order. Records too damaged to
    /// yield an id are reported as `line N` (1-based).
    pub corrupted_ids: Vec<String>,
    /// Human-readable summary of the verification result.
    pub message: String,
}

impl IntegrityReport {
    pub(crate) fn from_scan(total_entries: usize, corrupted_ids: Vec<String>) -> Self {
        let valid = corrupted_ids.is_empty();
        let message = if total_entries == 0 {
            "audit log is empty".to_string()
        } else if valid {
            format!("all {total_entries} records verified successfully")
        } else {
            format!(
                "{} of {total_entries} records failed verification",
                corrupted_ids.len()
            )
        };
        Self {
            total_entries,
            valid,
            corrupted_ids,
            message,
        }
    }
}
