//! Services module for reconciliation-service.

pub mod csv;
pub mod cursor;
pub mod database;
pub mod metrics;
pub mod progress;
pub mod queue;
pub mod summary;
pub mod worker;

pub use csv::{CsvTransactionReader, ParsedRow};
pub use cursor::ListCursor;
pub use database::{CounterDelta, Database, NewAuditEntry, NewTransaction};
pub use metrics::{get_metrics, init_metrics, record_admin_action, record_batch_job, record_error};
pub use progress::{BatchProgress, NoopProgressMirror, ProgressDelta, ProgressMirror, RedisProgressMirror};
pub use queue::{BATCH_JOB_NAME, BatchJob, JobDispatcher, RedisJobQueue};
pub use summary::{BatchSummary, build_summary};
pub use worker::{BatchWorker, CHUNK_SIZE};
