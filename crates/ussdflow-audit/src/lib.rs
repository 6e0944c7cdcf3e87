//! Durable audit pipeline for USSD interaction logs.
//!
//! Records every completed interaction asynchronously without blocking
//! the request path: a batch writer flushes queued rows in bulk, failed
//! batches spill to timestamped JSON files, and a recovery scanner
//! replays spill files with conflict-ignoring inserts (effectively-once
//! delivery, at-least-once on the recovery path).

pub mod pipeline;
pub mod record;
pub mod spill;
pub mod store;

pub use pipeline::{AuditLogger, AuditPipeline};
pub use record::AuditRecord;
pub use spill::SpillDir;
pub use store::{AuditStore, SqliteAuditStore};
