pub mod event;
pub mod filter;
pub mod integrity;
pub mod logger;
pub mod ndjson_log;

pub use event::{AuditEvent, AuditEventType, Outcome};
pub use filter::AuditFilter;
pub use integrity::IntegrityReport;
pub use logger::AuditLogger;
